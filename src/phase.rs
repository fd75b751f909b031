//! Phased-training freeze controller.
//!
//! Training proceeds in stages, each exposing exactly one parameter
//! subsystem as trainable while the rest of the model stays frozen in
//! eval mode. The controller computes the trainable set as the target
//! subsystem's own parameter names (via the parameter visitor) instead of
//! flipping flags buried inside nested components, and returns a
//! [`FreezeReport`] so callers can audit exactly what a phase unfroze.

use std::collections::BTreeSet;

use tracing::info;

use crate::error::{ConfigError, ModelResult};
use crate::nn::Mode;
use crate::pipeline::{PerceptionModel, Subsystem};

// ---------------------------------------------------------------------------
// TrainingPhase
// ---------------------------------------------------------------------------

/// One stage of the phased training schedule.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TrainingPhase {
    /// End-to-end stage: every parameter trainable, every module in train
    /// mode.
    Base,
    /// Compressor stage: only the feature compressors are trainable.
    CompressorOnly,
    /// Calibrator stage: the base model is fully frozen. The confidence
    /// calibrators live on the calibration wrapper, which marks its own
    /// parameters trainable at construction.
    CalibratorOnly,
}

impl TrainingPhase {
    /// Stable phase name used in errors and logs.
    pub fn as_str(&self) -> &'static str {
        match self {
            TrainingPhase::Base => "base",
            TrainingPhase::CompressorOnly => "compressor_only",
            TrainingPhase::CalibratorOnly => "calibrator_only",
        }
    }
}

// ---------------------------------------------------------------------------
// FreezeReport
// ---------------------------------------------------------------------------

/// Audit record of one freeze application: which phase ran and exactly
/// which parameters it left trainable.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FreezeReport {
    /// The phase that was applied.
    pub phase: TrainingPhase,
    /// Fully qualified names of every trainable parameter after the
    /// application.
    pub trainable: BTreeSet<String>,
}

// ---------------------------------------------------------------------------
// TrainingPhaseController
// ---------------------------------------------------------------------------

/// Applies a training phase's freeze plan to a [`PerceptionModel`].
#[derive(Debug, Clone, Copy)]
pub struct TrainingPhaseController {
    phase: TrainingPhase,
}

impl TrainingPhaseController {
    /// Create a controller for the given phase.
    pub fn new(phase: TrainingPhase) -> Self {
        TrainingPhaseController { phase }
    }

    /// The phase this controller applies.
    pub fn phase(&self) -> TrainingPhase {
        self.phase
    }

    /// Apply the phase's freeze plan: switch every module to eval, then
    /// unfreeze exactly the phase's target subsystem.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::SubsystemAbsent`] when the phase targets a
    /// subsystem no modality configured.
    pub fn apply(&self, model: &mut PerceptionModel) -> ModelResult<FreezeReport> {
        let trainable = match self.phase {
            TrainingPhase::Base => {
                model.set_mode(Mode::Train);
                model.mark_all_trainable();
                model.trainable().clone()
            }
            TrainingPhase::CompressorOnly => {
                if !model.pipelines().any(|p| p.has_compressor()) {
                    return Err(ConfigError::SubsystemAbsent {
                        phase: self.phase.as_str(),
                        subsystem: "compressor",
                    }
                    .into());
                }
                model.set_mode(Mode::Eval);
                let mut trainable = BTreeSet::new();
                for pipeline in model.pipelines_mut() {
                    pipeline.set_subsystem_mode(Subsystem::Compressor, Mode::Train);
                    trainable.extend(pipeline.subsystem_parameter_names(Subsystem::Compressor));
                }
                model.set_trainable(trainable.clone());
                trainable
            }
            TrainingPhase::CalibratorOnly => {
                if !model.pipelines().any(|p| p.calibrator_kind().is_some()) {
                    return Err(ConfigError::SubsystemAbsent {
                        phase: self.phase.as_str(),
                        subsystem: "calibrator",
                    }
                    .into());
                }
                model.set_mode(Mode::Eval);
                model.freeze_all();
                BTreeSet::new()
            }
        };
        let report = FreezeReport {
            phase: self.phase,
            trainable,
        };
        info!(
            phase = self.phase.as_str(),
            trainable = report.trainable.len(),
            total = model.all_parameter_names().len(),
            "applied training phase freeze plan"
        );
        Ok(report)
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
