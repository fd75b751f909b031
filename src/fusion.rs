//! Occupancy-guided pyramid fusion.
//!
//! [`PyramidFusion`] refines a feature map across multiple spatial scales:
//! each level predicts a one-channel occupancy map, gates the level's
//! features by its sigmoid, and the gated maps are resized back to full
//! resolution and averaged. The per-scale occupancy logits are returned
//! alongside the fused map so the training side can supervise them.

use ndarray::Array4;

use crate::config::FusionArgs;
use crate::error::ModelResult;
use crate::layers::{avg_pool2, resize_nearest, sigmoid, Conv1x1};
use crate::nn::{Mode, NnModule, Parameter};

/// Multiscale occupancy-guided fusion stage.
#[derive(Debug)]
pub struct PyramidFusion {
    occ_heads: Vec<Conv1x1>,
    mode: Mode,
}

impl PyramidFusion {
    /// Build a pyramid fusion stage under the given parameter namespace.
    pub fn new(prefix: &str, args: &FusionArgs, seed: u64) -> Self {
        let occ_heads = (0..args.num_levels)
            .map(|level| {
                Conv1x1::new(
                    &format!("{prefix}.occ{level}"),
                    args.input_dim,
                    1,
                    seed.wrapping_add(level as u64),
                )
            })
            .collect();
        PyramidFusion {
            occ_heads,
            mode: Mode::Eval,
        }
    }

    /// Single-agent fusion pass.
    ///
    /// Returns the fused feature map (same shape as the input) and the
    /// per-scale occupancy logits, finest scale first.
    pub fn forward_single(
        &self,
        input: &Array4<f32>,
    ) -> ModelResult<(Array4<f32>, Vec<Array4<f32>>)> {
        let (_, _, h, w) = input.dim();
        let mut occ_list = Vec::with_capacity(self.occ_heads.len());
        let mut fused = Array4::<f32>::zeros(input.dim());
        let mut level_feature = input.clone();

        for (level, occ_head) in self.occ_heads.iter().enumerate() {
            let occ = occ_head.forward(&level_feature)?;
            let gate = sigmoid(&occ);
            let gated = &level_feature * &broadcast_gate(&gate, level_feature.dim().1);
            let restored = if level == 0 {
                gated
            } else {
                resize_nearest(&gated, h, w)
            };
            fused = &fused + &restored;
            occ_list.push(occ);
            if level + 1 < self.occ_heads.len() {
                level_feature = avg_pool2(&level_feature);
            }
        }

        fused.mapv_inplace(|v| v / self.occ_heads.len() as f32);
        Ok((fused, occ_list))
    }
}

/// Repeat a 1-channel gate across `channels` feature channels.
fn broadcast_gate(gate: &Array4<f32>, channels: usize) -> Array4<f32> {
    let (b, _, h, w) = gate.dim();
    let mut out = Array4::<f32>::zeros((b, channels, h, w));
    for bi in 0..b {
        for ci in 0..channels {
            for y in 0..h {
                for x in 0..w {
                    out[[bi, ci, y, x]] = gate[[bi, 0, y, x]];
                }
            }
        }
    }
    out
}

impl NnModule for PyramidFusion {
    fn forward(&self, input: &Array4<f32>) -> ModelResult<Array4<f32>> {
        Ok(self.forward_single(input)?.0)
    }

    fn visit_parameters(&self, visitor: &mut dyn FnMut(&Parameter)) {
        for head in &self.occ_heads {
            head.visit_parameters(visitor);
        }
    }

    fn set_mode(&mut self, mode: Mode) {
        self.mode = mode;
        for head in &mut self.occ_heads {
            head.set_mode(mode);
        }
    }

    fn mode(&self) -> Mode {
        self.mode
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    fn fusion(levels: usize) -> PyramidFusion {
        PyramidFusion::new(
            "m0.fusion",
            &FusionArgs {
                input_dim: 8,
                num_levels: levels,
            },
            13,
        )
    }

    #[test]
    fn fused_map_keeps_input_shape() {
        let (fused, _) = fusion(3)
            .forward_single(&Array4::ones((1, 8, 16, 16)))
            .unwrap();
        assert_eq!(fused.dim(), (1, 8, 16, 16));
    }

    #[test]
    fn occupancy_list_has_one_entry_per_level() {
        let (_, occ) = fusion(3)
            .forward_single(&Array4::ones((1, 8, 16, 16)))
            .unwrap();
        assert_eq!(occ.len(), 3);
        // finest scale first, halving per level
        assert_eq!(occ[0].dim(), (1, 1, 16, 16));
        assert_eq!(occ[1].dim(), (1, 1, 8, 8));
        assert_eq!(occ[2].dim(), (1, 1, 4, 4));
    }

    #[test]
    fn single_level_fusion_is_pure_gating() {
        let (fused, occ) = fusion(1)
            .forward_single(&Array4::ones((1, 8, 4, 4)))
            .unwrap();
        assert_eq!(occ.len(), 1);
        assert_eq!(fused.dim(), (1, 8, 4, 4));
    }

    #[test]
    fn fusion_handles_odd_spatial_dims() {
        let (fused, occ) = fusion(3)
            .forward_single(&Array4::ones((1, 8, 11, 13)))
            .unwrap();
        assert_eq!(fused.dim(), (1, 8, 11, 13));
        assert_eq!(occ[1].dim(), (1, 1, 5, 6));
    }
}
