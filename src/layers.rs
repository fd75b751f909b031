//! Parameter-bearing layer primitives and spatial helpers.
//!
//! The pipeline's opaque numeric components are assembled from two
//! primitives: [`Conv1x1`] (a per-location channel projection) and
//! [`BatchNorm2d`] (channel-wise normalization with running statistics).
//! Free functions cover the non-learnable spatial operations (pooling,
//! nearest resize, activations).

use ndarray::{Array1, Array4, ArrayD, IxDyn};
use std::cell::RefCell;

use crate::error::{ModelError, ModelResult};
use crate::nn::{det_uniform, Mode, NnModule, Parameter};

// ---------------------------------------------------------------------------
// Conv1x1
// ---------------------------------------------------------------------------

/// 1×1 convolution: a learnable linear projection applied independently at
/// every spatial location.
///
/// Weight shape `[out, in]`, bias shape `[out]`. Kaiming-style uniform
/// initialisation `U(-k, k)` with `k = sqrt(1 / in)`.
#[derive(Debug)]
pub struct Conv1x1 {
    weight: Parameter,
    bias: Parameter,
    in_channels: usize,
    out_channels: usize,
    mode: Mode,
}

impl Conv1x1 {
    /// Create a 1×1 convolution with deterministic seeded initialisation.
    ///
    /// `prefix` becomes the namespace of the layer's parameters
    /// (`{prefix}.weight`, `{prefix}.bias`).
    pub fn new(prefix: &str, in_channels: usize, out_channels: usize, seed: u64) -> Self {
        let k = (1.0 / in_channels as f32).sqrt();
        let weight = ArrayD::from_shape_vec(
            IxDyn(&[out_channels, in_channels]),
            det_uniform(out_channels * in_channels, -k, k, seed),
        )
        .expect("weight buffer matches its declared shape");
        let bias = ArrayD::zeros(IxDyn(&[out_channels]));
        Conv1x1 {
            weight: Parameter::new(format!("{prefix}.weight"), weight),
            bias: Parameter::new(format!("{prefix}.bias"), bias),
            in_channels,
            out_channels,
            mode: Mode::Eval,
        }
    }

    /// Number of output channels.
    pub fn out_channels(&self) -> usize {
        self.out_channels
    }
}

impl NnModule for Conv1x1 {
    fn forward(&self, input: &Array4<f32>) -> ModelResult<Array4<f32>> {
        let (b, c, h, w) = input.dim();
        if c != self.in_channels {
            return Err(ModelError::shape_mismatch(
                &[b, self.in_channels, h, w],
                &[b, c, h, w],
            ));
        }
        let weight = self.weight.value();
        let bias = self.bias.value();
        let mut out = Array4::<f32>::zeros((b, self.out_channels, h, w));
        for bi in 0..b {
            for o in 0..self.out_channels {
                for y in 0..h {
                    for x in 0..w {
                        let mut acc = bias[[o]];
                        for i in 0..self.in_channels {
                            acc += weight[[o, i]] * input[[bi, i, y, x]];
                        }
                        out[[bi, o, y, x]] = acc;
                    }
                }
            }
        }
        Ok(out)
    }

    fn visit_parameters(&self, visitor: &mut dyn FnMut(&Parameter)) {
        visitor(&self.weight);
        visitor(&self.bias);
    }

    fn set_mode(&mut self, mode: Mode) {
        self.mode = mode;
    }

    fn mode(&self) -> Mode {
        self.mode
    }
}

// ---------------------------------------------------------------------------
// BatchNorm2d
// ---------------------------------------------------------------------------

/// Channel-wise batch normalization over `(batch, height, width)`.
///
/// Running statistics are interior state, not parameters: they update only
/// while the layer is in [`Mode::Train`], so forwards through a frozen
/// subsystem leave them bit-identical.
#[derive(Debug)]
pub struct BatchNorm2d {
    gamma: Parameter,
    beta: Parameter,
    running: RefCell<RunningStats>,
    channels: usize,
    eps: f32,
    momentum: f32,
    mode: Mode,
}

#[derive(Debug, Clone)]
struct RunningStats {
    mean: Array1<f32>,
    var: Array1<f32>,
}

impl BatchNorm2d {
    /// Create a batch-norm layer with identity affine initialisation.
    pub fn new(prefix: &str, channels: usize) -> Self {
        BatchNorm2d {
            gamma: Parameter::new(
                format!("{prefix}.gamma"),
                ArrayD::ones(IxDyn(&[channels])),
            ),
            beta: Parameter::new(
                format!("{prefix}.beta"),
                ArrayD::zeros(IxDyn(&[channels])),
            ),
            running: RefCell::new(RunningStats {
                mean: Array1::zeros(channels),
                var: Array1::ones(channels),
            }),
            channels,
            eps: 1e-5,
            momentum: 0.1,
            mode: Mode::Eval,
        }
    }

    /// Snapshot of the running mean (test/audit hook).
    pub fn running_mean(&self) -> Array1<f32> {
        self.running.borrow().mean.clone()
    }

    /// Snapshot of the running variance (test/audit hook).
    pub fn running_var(&self) -> Array1<f32> {
        self.running.borrow().var.clone()
    }
}

impl NnModule for BatchNorm2d {
    fn forward(&self, input: &Array4<f32>) -> ModelResult<Array4<f32>> {
        let (b, c, h, w) = input.dim();
        if c != self.channels {
            return Err(ModelError::shape_mismatch(
                &[b, self.channels, h, w],
                &[b, c, h, w],
            ));
        }
        let n = (b * h * w) as f32;
        let (mean, var) = match self.mode {
            Mode::Train => {
                let mut mean = Array1::<f32>::zeros(c);
                let mut var = Array1::<f32>::zeros(c);
                for ci in 0..c {
                    let mut sum = 0.0;
                    for bi in 0..b {
                        for y in 0..h {
                            for x in 0..w {
                                sum += input[[bi, ci, y, x]];
                            }
                        }
                    }
                    let m = sum / n;
                    let mut sq = 0.0;
                    for bi in 0..b {
                        for y in 0..h {
                            for x in 0..w {
                                let d = input[[bi, ci, y, x]] - m;
                                sq += d * d;
                            }
                        }
                    }
                    mean[ci] = m;
                    var[ci] = sq / n;
                }
                let mut running = self.running.borrow_mut();
                for ci in 0..c {
                    running.mean[ci] =
                        (1.0 - self.momentum) * running.mean[ci] + self.momentum * mean[ci];
                    running.var[ci] =
                        (1.0 - self.momentum) * running.var[ci] + self.momentum * var[ci];
                }
                (mean, var)
            }
            Mode::Eval => {
                let running = self.running.borrow();
                (running.mean.clone(), running.var.clone())
            }
        };

        let gamma = self.gamma.value();
        let beta = self.beta.value();
        let mut out = input.clone();
        for ci in 0..c {
            let scale = gamma[[ci]] / (var[ci] + self.eps).sqrt();
            let shift = beta[[ci]] - mean[ci] * scale;
            for bi in 0..b {
                for y in 0..h {
                    for x in 0..w {
                        out[[bi, ci, y, x]] = input[[bi, ci, y, x]] * scale + shift;
                    }
                }
            }
        }
        Ok(out)
    }

    fn visit_parameters(&self, visitor: &mut dyn FnMut(&Parameter)) {
        visitor(&self.gamma);
        visitor(&self.beta);
    }

    fn set_mode(&mut self, mode: Mode) {
        self.mode = mode;
    }

    fn mode(&self) -> Mode {
        self.mode
    }
}

// ---------------------------------------------------------------------------
// Spatial helpers
// ---------------------------------------------------------------------------

/// 2×2 average pooling with stride 2. Odd trailing rows/columns are dropped;
/// the output never shrinks below 1×1.
pub fn avg_pool2(input: &Array4<f32>) -> Array4<f32> {
    let (b, c, h, w) = input.dim();
    let oh = (h / 2).max(1);
    let ow = (w / 2).max(1);
    let mut out = Array4::<f32>::zeros((b, c, oh, ow));
    for bi in 0..b {
        for ci in 0..c {
            for y in 0..oh {
                for x in 0..ow {
                    let (y0, x0) = (2 * y, 2 * x);
                    let y1 = (y0 + 1).min(h - 1);
                    let x1 = (x0 + 1).min(w - 1);
                    out[[bi, ci, y, x]] = 0.25
                        * (input[[bi, ci, y0, x0]]
                            + input[[bi, ci, y0, x1]]
                            + input[[bi, ci, y1, x0]]
                            + input[[bi, ci, y1, x1]]);
                }
            }
        }
    }
    out
}

/// Nearest-neighbour resize to an exact `(height, width)` target.
pub fn resize_nearest(input: &Array4<f32>, th: usize, tw: usize) -> Array4<f32> {
    let (b, c, h, w) = input.dim();
    let mut out = Array4::<f32>::zeros((b, c, th, tw));
    for bi in 0..b {
        for ci in 0..c {
            for y in 0..th {
                let sy = (y * h / th).min(h - 1);
                for x in 0..tw {
                    let sx = (x * w / tw).min(w - 1);
                    out[[bi, ci, y, x]] = input[[bi, ci, sy, sx]];
                }
            }
        }
    }
    out
}

/// Element-wise ReLU.
pub fn relu(input: &Array4<f32>) -> Array4<f32> {
    input.mapv(|v| v.max(0.0))
}

/// Element-wise logistic sigmoid.
pub fn sigmoid(input: &Array4<f32>) -> Array4<f32> {
    input.mapv(|v| 1.0 / (1.0 + (-v).exp()))
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn conv1x1_output_channels() {
        let conv = Conv1x1::new("t.conv", 3, 5, 0);
        let x = Array4::<f32>::ones((2, 3, 4, 4));
        let y = conv.forward(&x).unwrap();
        assert_eq!(y.dim(), (2, 5, 4, 4));
    }

    #[test]
    fn conv1x1_rejects_wrong_channel_count() {
        let conv = Conv1x1::new("t.conv", 3, 5, 0);
        let x = Array4::<f32>::ones((1, 4, 2, 2));
        assert!(conv.forward(&x).is_err());
    }

    #[test]
    fn conv1x1_zero_input_gives_bias() {
        let conv = Conv1x1::new("t.conv", 4, 2, 9);
        let y = conv.forward(&Array4::zeros((1, 4, 2, 2))).unwrap();
        for &v in y.iter() {
            assert_eq!(v, 0.0, "bias initialises to zero");
        }
    }

    #[test]
    fn conv1x1_is_spatially_independent() {
        // The same channel vector must map to the same output everywhere.
        let conv = Conv1x1::new("t.conv", 2, 3, 11);
        let mut x = Array4::<f32>::zeros((1, 2, 2, 2));
        x.fill(0.7);
        let y = conv.forward(&x).unwrap();
        let reference = y[[0, 0, 0, 0]];
        assert!((y[[0, 0, 1, 1]] - reference).abs() < 1e-6);
    }

    #[test]
    fn batchnorm_eval_leaves_running_stats_untouched() {
        let bn = BatchNorm2d::new("t.bn", 2);
        let before = bn.running_mean();
        let x = Array4::<f32>::from_elem((2, 2, 3, 3), 5.0);
        bn.forward(&x).unwrap();
        assert_eq!(bn.running_mean(), before);
    }

    #[test]
    fn batchnorm_train_updates_running_stats() {
        let mut bn = BatchNorm2d::new("t.bn", 2);
        bn.set_mode(Mode::Train);
        let x = Array4::<f32>::from_elem((2, 2, 3, 3), 5.0);
        bn.forward(&x).unwrap();
        // momentum 0.1 moves the zero-initialised mean towards 5.0
        let mean = bn.running_mean();
        assert!((mean[0] - 0.5).abs() < 1e-5, "got {}", mean[0]);
    }

    #[test]
    fn batchnorm_train_normalizes_batch() {
        let mut bn = BatchNorm2d::new("t.bn", 1);
        bn.set_mode(Mode::Train);
        let x = Array4::from_shape_vec((1, 1, 1, 4), vec![1.0, 2.0, 3.0, 4.0]).unwrap();
        let y = bn.forward(&x).unwrap();
        let mean: f32 = y.iter().sum::<f32>() / 4.0;
        assert!(mean.abs() < 1e-5, "normalized mean should be 0, got {mean}");
    }

    #[test]
    fn avg_pool_halves_spatial_dims() {
        let x = Array4::<f32>::ones((1, 1, 6, 8));
        let y = avg_pool2(&x);
        assert_eq!(y.dim(), (1, 1, 3, 4));
        assert!((y[[0, 0, 0, 0]] - 1.0).abs() < 1e-6);
    }

    #[test]
    fn resize_nearest_hits_exact_target() {
        let x = Array4::<f32>::ones((1, 2, 3, 5));
        assert_eq!(resize_nearest(&x, 7, 9).dim(), (1, 2, 7, 9));
        assert_eq!(resize_nearest(&x, 1, 1).dim(), (1, 2, 1, 1));
    }

    #[test]
    fn sigmoid_bounded() {
        let x = Array4::from_shape_vec((1, 1, 1, 3), vec![-50.0, 0.0, 50.0]).unwrap();
        let y = sigmoid(&x);
        assert!(y[[0, 0, 0, 0]] < 1e-6);
        assert!((y[[0, 0, 0, 1]] - 0.5).abs() < 1e-6);
        assert!(y[[0, 0, 0, 2]] > 1.0 - 1e-6);
    }
}
