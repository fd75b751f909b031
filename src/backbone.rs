//! Residual BEV backbone.
//!
//! Consumes the encoder's `spatial_features` map and produces the spatially
//! processed `spatial_features_2d` map consumed by the aligner.

use ndarray::Array4;

use crate::config::BackboneArgs;
use crate::error::ModelResult;
use crate::layers::{relu, BatchNorm2d, Conv1x1};
use crate::nn::{Mode, NnModule, Parameter};

/// One residual unit: `x + norm(conv(x))`, rectified.
#[derive(Debug)]
struct ResBlock {
    conv: Conv1x1,
    norm: BatchNorm2d,
}

impl ResBlock {
    fn new(prefix: &str, channels: usize, seed: u64) -> Self {
        ResBlock {
            conv: Conv1x1::new(&format!("{prefix}.conv"), channels, channels, seed),
            norm: BatchNorm2d::new(&format!("{prefix}.norm"), channels),
        }
    }

    fn forward(&self, input: &Array4<f32>) -> ModelResult<Array4<f32>> {
        let branch = self.norm.forward(&self.conv.forward(input)?)?;
        Ok(relu(&(input + &branch)))
    }
}

/// Residual BEV backbone: entry projection followed by residual blocks.
#[derive(Debug)]
pub struct ResBevBackbone {
    entry: Conv1x1,
    blocks: Vec<ResBlock>,
    mode: Mode,
}

impl ResBevBackbone {
    /// Build a backbone under the given parameter namespace.
    pub fn new(prefix: &str, args: &BackboneArgs, seed: u64) -> Self {
        let entry = Conv1x1::new(
            &format!("{prefix}.entry"),
            args.input_dim,
            args.output_dim,
            seed,
        );
        let blocks = (0..args.num_blocks)
            .map(|i| {
                ResBlock::new(
                    &format!("{prefix}.block{i}"),
                    args.output_dim,
                    seed.wrapping_add(1 + i as u64),
                )
            })
            .collect();
        ResBevBackbone {
            entry,
            blocks,
            mode: Mode::Eval,
        }
    }
}

impl NnModule for ResBevBackbone {
    fn forward(&self, input: &Array4<f32>) -> ModelResult<Array4<f32>> {
        let mut feature = relu(&self.entry.forward(input)?);
        for block in &self.blocks {
            feature = block.forward(&feature)?;
        }
        Ok(feature)
    }

    fn visit_parameters(&self, visitor: &mut dyn FnMut(&Parameter)) {
        self.entry.visit_parameters(visitor);
        for block in &self.blocks {
            block.conv.visit_parameters(visitor);
            block.norm.visit_parameters(visitor);
        }
    }

    fn set_mode(&mut self, mode: Mode) {
        self.mode = mode;
        self.entry.set_mode(mode);
        for block in &mut self.blocks {
            block.conv.set_mode(mode);
            block.norm.set_mode(mode);
        }
    }

    fn mode(&self) -> Mode {
        self.mode
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn backbone_preserves_spatial_dims() {
        let args = BackboneArgs {
            input_dim: 4,
            output_dim: 8,
            num_blocks: 2,
        };
        let backbone = ResBevBackbone::new("m0.backbone", &args, 5);
        let y = backbone.forward(&Array4::ones((2, 4, 5, 7))).unwrap();
        assert_eq!(y.dim(), (2, 8, 5, 7));
    }

    #[test]
    fn backbone_parameter_count_scales_with_blocks() {
        let one = ResBevBackbone::new(
            "b",
            &BackboneArgs {
                input_dim: 4,
                output_dim: 4,
                num_blocks: 1,
            },
            0,
        );
        let three = ResBevBackbone::new(
            "b",
            &BackboneArgs {
                input_dim: 4,
                output_dim: 4,
                num_blocks: 3,
            },
            0,
        );
        assert!(three.num_parameters() > one.num_parameters());
    }
}
