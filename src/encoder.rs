//! Per-modality feature encoders.
//!
//! Encoders turn a sensor's raw per-location channels into the modality's
//! feature map. Camera encoders may additionally expose a depth auxiliary
//! output used for depth supervision downstream; lidar encoders never do.
//!
//! The concrete encoders here are deliberately lightweight: the pipeline
//! treats them as opaque components with a fixed
//! `(batch, channel, height, width)` input/output contract.

use ndarray::Array4;
use tracing::debug;

use crate::config::EncoderArgs;
use crate::error::ModelResult;
use crate::layers::{relu, BatchNorm2d, Conv1x1};
use crate::nn::{Mode, NnModule, Parameter};

/// Number of discrete depth bins in the camera depth auxiliary output.
pub const DEPTH_BINS: usize = 48;

// ---------------------------------------------------------------------------
// EncoderOutput
// ---------------------------------------------------------------------------

/// Result of one encoder pass.
#[derive(Debug)]
pub struct EncoderOutput {
    /// The encoded feature map `[batch, feature_dim, H, W]`.
    pub feature: Array4<f32>,
    /// Depth auxiliary output `[batch, DEPTH_BINS, H, W]`, present only for
    /// camera encoders with depth supervision enabled.
    pub depth_items: Option<Array4<f32>>,
}

// ---------------------------------------------------------------------------
// FeatureEncoder
// ---------------------------------------------------------------------------

/// A modality encoder: raw sensor channels in, feature map (plus optional
/// depth auxiliary) out.
pub trait FeatureEncoder: NnModule + std::fmt::Debug {
    /// Encodes one batch of raw inputs.
    fn encode(&self, inputs: &Array4<f32>) -> ModelResult<EncoderOutput>;
}

// ---------------------------------------------------------------------------
// PointPillarEncoder
// ---------------------------------------------------------------------------

/// Pillar-style lidar encoder: per-cell channel projection into the
/// modality feature space.
#[derive(Debug)]
pub struct PointPillarEncoder {
    proj: Conv1x1,
    norm: BatchNorm2d,
    mode: Mode,
}

impl PointPillarEncoder {
    /// Build a pillar encoder under the given parameter namespace.
    pub fn new(prefix: &str, args: &EncoderArgs, seed: u64) -> Self {
        debug!(prefix, input_dim = args.input_dim, feature_dim = args.feature_dim,
               "building point_pillar encoder");
        PointPillarEncoder {
            proj: Conv1x1::new(
                &format!("{prefix}.proj"),
                args.input_dim,
                args.feature_dim,
                seed,
            ),
            norm: BatchNorm2d::new(&format!("{prefix}.norm"), args.feature_dim),
            mode: Mode::Eval,
        }
    }
}

impl FeatureEncoder for PointPillarEncoder {
    fn encode(&self, inputs: &Array4<f32>) -> ModelResult<EncoderOutput> {
        let feature = relu(&self.norm.forward(&self.proj.forward(inputs)?)?);
        Ok(EncoderOutput {
            feature,
            depth_items: None,
        })
    }
}

impl NnModule for PointPillarEncoder {
    fn forward(&self, input: &Array4<f32>) -> ModelResult<Array4<f32>> {
        Ok(self.encode(input)?.feature)
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
// LiftSplatEncoder
// ---------------------------------------------------------------------------

/// Lift-splat camera encoder: channel projection into the modality feature
/// space plus an optional per-cell depth-bin auxiliary head.
#[derive(Debug)]
pub struct LiftSplatEncoder {
    proj: Conv1x1,
    norm: BatchNorm2d,
    depth_head: Option<Conv1x1>,
    mode: Mode,
}

impl LiftSplatEncoder {
    /// Build a lift-splat encoder under the given parameter namespace.
    pub fn new(prefix: &str, args: &EncoderArgs, seed: u64) -> Self {
        debug!(prefix, input_dim = args.input_dim, feature_dim = args.feature_dim,
               depth_supervision = args.depth_supervision,
               "building lift_splat_shoot encoder");
        let depth_head = args.depth_supervision.then(|| {
            Conv1x1::new(
                &format!("{prefix}.depth_head"),
                args.feature_dim,
                DEPTH_BINS,
                seed.wrapping_add(1),
            )
        });
        LiftSplatEncoder {
            proj: Conv1x1::new(
                &format!("{prefix}.proj"),
                args.input_dim,
                args.feature_dim,
                seed,
            ),
            norm: BatchNorm2d::new(&format!("{prefix}.norm"), args.feature_dim),
            depth_head,
            mode: Mode::Eval,
        }
    }
}

impl FeatureEncoder for LiftSplatEncoder {
    fn encode(&self, inputs: &Array4<f32>) -> ModelResult<EncoderOutput> {
        let feature = relu(&self.norm.forward(&self.proj.forward(inputs)?)?);
        let depth_items = match &self.depth_head {
            Some(head) => Some(head.forward(&feature)?),
            None => None,
        };
        Ok(EncoderOutput {
            feature,
            depth_items,
        })
    }
}

impl NnModule for LiftSplatEncoder {
    fn forward(&self, input: &Array4<f32>) -> ModelResult<Array4<f32>> {
        Ok(self.encode(input)?.feature)
    }

    fn visit_parameters(&self, visitor: &mut dyn FnMut(&Parameter)) {
        self.proj.visit_parameters(visitor);
        self.norm.visit_parameters(visitor);
        if let Some(head) = &self.depth_head {
            head.visit_parameters(visitor);
        }
    }

    fn set_mode(&mut self, mode: Mode) {
        self.mode = mode;
        self.proj.set_mode(mode);
        self.norm.set_mode(mode);
        if let Some(head) = &mut self.depth_head {
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
