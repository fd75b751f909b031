//! Forward execution over assembled pipelines.
//!
//! [`ForwardExecutor`] drives one [`ModalityPipeline`] through the fixed
//! chain `encode → backbone → align → crop → fuse → shrink → predict`.
//! Two entry points exist: [`ForwardExecutor::run_single`] keeps only the
//! ego agent (the first entry of the batch dimension) before fusion, while
//! [`ForwardExecutor::run_agents`] carries every collaborating agent
//! through to the heads.

use std::collections::BTreeMap;

use ndarray::{s, Array4};
use tracing::debug;

use crate::error::{ModelResult, PreconditionError};
use crate::nn::NnModule;
use crate::pipeline::ModalityPipeline;

// ---------------------------------------------------------------------------
// BatchRecord
// ---------------------------------------------------------------------------

/// One batch of inputs: per-modality raw tensors plus the per-sample agent
/// counts.
///
/// The batch dimension of each input tensor concatenates the agents of
/// every sample; `record_len[i]` is the number of agents contributed by
/// sample `i`, so `record_len` sums to the batch dimension.
#[derive(Debug, Clone, Default)]
pub struct BatchRecord {
    /// Raw input tensors keyed by modality name.
    pub inputs: BTreeMap<String, Array4<f32>>,
    /// Number of agents per sample.
    pub record_len: Vec<usize>,
}

impl BatchRecord {
    /// A record carrying a single modality's tensor.
    pub fn single(modality: impl Into<String>, input: Array4<f32>, record_len: Vec<usize>) -> Self {
        let mut inputs = BTreeMap::new();
        inputs.insert(modality.into(), input);
        BatchRecord { inputs, record_len }
    }

    /// Fetch the input tensor for `modality`.
    ///
    /// # Errors
    ///
    /// Returns [`PreconditionError::MissingModalityInput`] when the record
    /// carries no tensor under that name.
    pub fn input_for(&self, modality: &str) -> Result<&Array4<f32>, PreconditionError> {
        self.inputs
            .get(modality)
            .ok_or_else(|| PreconditionError::MissingModalityInput {
                modality: modality.to_string(),
            })
    }
}

// ---------------------------------------------------------------------------
// PredictionBundle
// ---------------------------------------------------------------------------

/// Outputs of one forward pass.
#[derive(Debug)]
pub struct PredictionBundle {
    /// Classification logits `[batch, anchor_number, H, W]`.
    pub cls_preds: Array4<f32>,
    /// Box regression output `[batch, 7 · anchor_number, H, W]`.
    pub reg_preds: Array4<f32>,
    /// Direction logits `[batch, num_bins · anchor_number, H, W]`.
    pub dir_preds: Array4<f32>,
    /// Per-scale occupancy logits from the fusion pyramid, finest first.
    pub occ_single_list: Vec<Array4<f32>>,
    /// Depth auxiliary output, present when the encoder supervises depth.
    pub depth_items: Option<Array4<f32>>,
}

// ---------------------------------------------------------------------------
// ForwardExecutor
// ---------------------------------------------------------------------------

/// Drives a modality pipeline through its forward chain.
pub struct ForwardExecutor;

impl ForwardExecutor {
    /// Single-agent forward: only the ego agent's features enter fusion.
    pub fn run_single(
        pipeline: &ModalityPipeline,
        batch: &BatchRecord,
    ) -> ModelResult<PredictionBundle> {
        let input = batch.input_for(pipeline.name())?;
        let (aligned, depth_items) = Self::feature_chain(pipeline, input)?;
        // Ego agent is the leading entry of the batch dimension.
        let ego = aligned.slice(s![0..1, .., .., ..]).to_owned();
        Self::fuse_and_predict(pipeline, &ego, depth_items)
    }

    /// All-agents forward: every agent in the batch reaches the heads.
    pub fn run_agents(
        pipeline: &ModalityPipeline,
        batch: &BatchRecord,
    ) -> ModelResult<PredictionBundle> {
        let input = batch.input_for(pipeline.name())?;
        let (aligned, depth_items) = Self::feature_chain(pipeline, input)?;
        Self::fuse_and_predict(pipeline, &aligned, depth_items)
    }

    /// `encode → backbone → align → crop` for one raw input tensor.
    fn feature_chain(
        pipeline: &ModalityPipeline,
        input: &Array4<f32>,
    ) -> ModelResult<(Array4<f32>, Option<Array4<f32>>)> {
        let encoded = pipeline.encoder.encode(input)?;
        let spatial = pipeline.backbone.forward(&encoded.feature)?;
        let mut aligned = pipeline.aligner.forward(&spatial)?;
        if let Some(geometry) = pipeline.crop_geometry() {
            aligned = geometry.apply(&aligned)?;
        }
        debug!(
            modality = pipeline.name(),
            shape = ?aligned.dim(),
            "feature chain complete"
        );
        Ok((aligned, encoded.depth_items))
    }

    /// `fuse → shrink → predict` over an aligned feature map.
    fn fuse_and_predict(
        pipeline: &ModalityPipeline,
        aligned: &Array4<f32>,
        depth_items: Option<Array4<f32>>,
    ) -> ModelResult<PredictionBundle> {
        let (fused, occ_single_list) = pipeline.fusion.forward_single(aligned)?;
        let head_input = match &pipeline.shrink {
            Some(shrink) => shrink.forward(&fused)?,
            None => fused,
        };
        Ok(PredictionBundle {
            cls_preds: pipeline.cls_head.forward(&head_input)?,
            reg_preds: pipeline.reg_head.forward(&head_input)?,
            dir_preds: pipeline.dir_head.forward(&head_input)?,
            occ_single_list,
            depth_items,
        })
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
