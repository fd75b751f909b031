//! Cross-modality feature aligner.
//!
//! Projects a modality-specific feature map into the channel space shared
//! by all modalities, so downstream fusion and heads see one feature
//! vocabulary regardless of the sensor that produced the map.

use ndarray::Array4;

use crate::config::AlignerArgs;
use crate::error::ModelResult;
use crate::layers::{BatchNorm2d, Conv1x1};
use crate::nn::{Mode, NnModule, Parameter};

/// Channel-space aligner: projection plus normalization into the shared
/// cross-modality feature space.
#[derive(Debug)]
pub struct ChannelAligner {
    proj: Conv1x1,
    norm: BatchNorm2d,
    mode: Mode,
}

impl ChannelAligner {
    /// Build an aligner under the given parameter namespace.
    pub fn new(prefix: &str, args: &AlignerArgs, seed: u64) -> Self {
        ChannelAligner {
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

impl NnModule for ChannelAligner {
    fn forward(&self, input: &Array4<f32>) -> ModelResult<Array4<f32>> {
        self.norm.forward(&self.proj.forward(input)?)
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
