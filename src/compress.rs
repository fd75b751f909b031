//! Optional channel-reduction components.
//!
//! [`NaiveCompressor`] is a bottleneck used when transmitting features
//! between agents; it is the only trainable subsystem during the
//! compressor-only training phase and is never invoked in the single-agent
//! forward chain. [`DownsampleConv`] is the shrink header applied to the
//! fused feature map before the prediction heads.

use ndarray::Array4;

use crate::config::{CompressorArgs, ShrinkArgs};
use crate::error::ModelResult;
use crate::layers::{relu, BatchNorm2d, Conv1x1};
use crate::nn::{Mode, NnModule, Parameter};

// ---------------------------------------------------------------------------
// NaiveCompressor
// ---------------------------------------------------------------------------

/// Channel bottleneck: project down by `compress_ratio`, then back up.
#[derive(Debug)]
pub struct NaiveCompressor {
    down: Conv1x1,
    up: Conv1x1,
    norm: BatchNorm2d,
    mode: Mode,
}

impl NaiveCompressor {
    /// Build a compressor under the given parameter namespace.
    pub fn new(prefix: &str, args: &CompressorArgs, seed: u64) -> Self {
        let compressed = args.input_dim / args.compress_ratio;
        NaiveCompressor {
            down: Conv1x1::new(&format!("{prefix}.down"), args.input_dim, compressed, seed),
            up: Conv1x1::new(
                &format!("{prefix}.up"),
                compressed,
                args.input_dim,
                seed.wrapping_add(1),
            ),
            norm: BatchNorm2d::new(&format!("{prefix}.norm"), args.input_dim),
            mode: Mode::Eval,
        }
    }
}

impl NnModule for NaiveCompressor {
    fn forward(&self, input: &Array4<f32>) -> ModelResult<Array4<f32>> {
        let squeezed = relu(&self.down.forward(input)?);
        self.norm.forward(&self.up.forward(&squeezed)?)
    }

    fn visit_parameters(&self, visitor: &mut dyn FnMut(&Parameter)) {
        self.down.visit_parameters(visitor);
        self.up.visit_parameters(visitor);
        self.norm.visit_parameters(visitor);
    }

    fn set_mode(&mut self, mode: Mode) {
        self.mode = mode;
        self.down.set_mode(mode);
        self.up.set_mode(mode);
        self.norm.set_mode(mode);
    }

    fn mode(&self) -> Mode {
        self.mode
    }
}

// ---------------------------------------------------------------------------
// DownsampleConv
// ---------------------------------------------------------------------------

/// Shrink header: channel projection of the fused feature map down to the
/// head input dimension.
#[derive(Debug)]
pub struct DownsampleConv {
    proj: Conv1x1,
    norm: BatchNorm2d,
    mode: Mode,
}

impl DownsampleConv {
    /// Build a shrink header under the given parameter namespace.
    pub fn new(prefix: &str, args: &ShrinkArgs, seed: u64) -> Self {
        DownsampleConv {
            proj: Conv1x1::new(
                &format!("{prefix}.proj"),
                args.input_dim,
                args.output_dim,
                seed,
            ),
            norm: BatchNorm2d::new(&format!("{prefix}.norm"), args.output_dim),
            mode: Mode::Eval,
        }
    }
}

impl NnModule for DownsampleConv {
    fn forward(&self, input: &Array4<f32>) -> ModelResult<Array4<f32>> {
        Ok(relu(&self.norm.forward(&self.proj.forward(input)?)?))
    }

    fn visit_parameters(&self, visitor: &mut dyn FnMut(&Parameter)) {
        self.proj.visit_parameters(visitor);
        self.norm.visit_parameters(visitor);
    }

    fn set_mode(&mut self, mode: Mode) {
        self.mode = mode;
        self.proj.set_mode(mode);
        self.norm.set_mode(mode);
    }

    fn mode(&self) -> Mode {
        self.mode
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
