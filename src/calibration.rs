//! Post-hoc confidence calibration.
//!
//! A calibrator is a tiny learnable transform over the classification
//! logits only; regression and direction outputs pass through untouched.
//! [`CalibratedModel`] composes a fully frozen [`PerceptionModel`] with one
//! calibrator per configured modality rather than subclassing the model:
//! the base forward stays byte-for-byte the multi-agent pass, and the
//! wrapper owns the only trainable parameters.
//!
//! All three calibrator kinds initialise to the identity transform, so a
//! freshly wrapped model predicts exactly what the base model predicts.

use std::collections::{BTreeMap, BTreeSet};

use ndarray::{Array4, Axis};
use tracing::warn;

use crate::error::{ConfigError, ModelResult, PreconditionError};
use crate::forward::{BatchRecord, ForwardExecutor, PredictionBundle};
use crate::nn::{Mode, NnModule, Parameter};
use crate::phase::{TrainingPhase, TrainingPhaseController};
use crate::pipeline::PerceptionModel;

// ---------------------------------------------------------------------------
// CalibratorKind
// ---------------------------------------------------------------------------

/// Implemented calibrator families.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CalibratorKind {
    /// Doubly bounded scaling: independent exponents on the positive and
    /// negative probability mass.
    Dbs,
    /// Platt scaling: affine transform of the logit.
    Platt,
    /// Temperature scaling: logit divided by a learned temperature.
    Temp,
}

impl CalibratorKind {
    /// Parse a configured kind identifier.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::UnknownCalibrator`] for any identifier
    /// outside the exact set `DBS` / `Platt` / `Temp`; nothing is
    /// constructed for an unrecognised kind.
    pub fn parse(name: &str) -> Result<Self, ConfigError> {
        match name {
            "DBS" => Ok(CalibratorKind::Dbs),
            "Platt" => Ok(CalibratorKind::Platt),
            "Temp" => Ok(CalibratorKind::Temp),
            _ => Err(ConfigError::UnknownCalibrator {
                name: name.to_string(),
            }),
        }
    }

    /// Stable kind name used in logs.
    pub fn as_str(&self) -> &'static str {
        match self {
            CalibratorKind::Dbs => "DBS",
            CalibratorKind::Platt => "Platt",
            CalibratorKind::Temp => "Temp",
        }
    }

    /// Build an identity-initialised calibrator of this kind under the
    /// given parameter namespace.
    pub fn build(&self, prefix: &str) -> Box<dyn NnModule> {
        match self {
            CalibratorKind::Dbs => Box::new(DoublyBoundedScaling::new(prefix)),
            CalibratorKind::Platt => Box::new(PlattScaling::new(prefix)),
            CalibratorKind::Temp => Box::new(TemperatureScaling::new(prefix)),
        }
    }
}

// ---------------------------------------------------------------------------
// Calibrator transforms
// ---------------------------------------------------------------------------

fn scalar_param(prefix: &str, name: &str, value: f32) -> Parameter {
    Parameter::new(
        format!("{prefix}.{name}"),
        ndarray::ArrayD::from_elem(ndarray::IxDyn(&[1]), value),
    )
}

/// Doubly bounded scaling over the classification logit.
///
/// With `p = sigmoid(x)`, the calibrated probability is
/// `p^a / (p^a + (1 - p)^b)`; the forward emits its logit
/// `a·ln(p) − b·ln(1 − p)`, which reduces to the identity at `a = b = 1`.
#[derive(Debug)]
pub struct DoublyBoundedScaling {
    a: Parameter,
    b: Parameter,
    mode: Mode,
}

impl DoublyBoundedScaling {
    /// Identity-initialised (`a = b = 1`) calibrator.
    pub fn new(prefix: &str) -> Self {
        DoublyBoundedScaling {
            a: scalar_param(prefix, "a", 1.0),
            b: scalar_param(prefix, "b", 1.0),
            mode: Mode::Eval,
        }
    }
}

impl NnModule for DoublyBoundedScaling {
    fn forward(&self, input: &Array4<f32>) -> ModelResult<Array4<f32>> {
        let a = self.a.value()[[0]];
        let b = self.b.value()[[0]];
        // ln(sigmoid(x)) and ln(sigmoid(-x)), computed stably.
        Ok(input.mapv(|x| {
            let log_p = -(1.0 + (-x).exp()).ln();
            let log_q = -(1.0 + x.exp()).ln();
            a * log_p - b * log_q
        }))
    }

    fn visit_parameters(&self, visitor: &mut dyn FnMut(&Parameter)) {
        visitor(&self.a);
        visitor(&self.b);
    }

    fn set_mode(&mut self, mode: Mode) {
        self.mode = mode;
    }

    fn mode(&self) -> Mode {
        self.mode
    }
}

/// Platt scaling: `a·x + b` on the logit.
#[derive(Debug)]
pub struct PlattScaling {
    a: Parameter,
    b: Parameter,
    mode: Mode,
}

impl PlattScaling {
    /// Identity-initialised (`a = 1`, `b = 0`) calibrator.
    pub fn new(prefix: &str) -> Self {
        PlattScaling {
            a: scalar_param(prefix, "a", 1.0),
            b: scalar_param(prefix, "b", 0.0),
            mode: Mode::Eval,
        }
    }
}

impl NnModule for PlattScaling {
    fn forward(&self, input: &Array4<f32>) -> ModelResult<Array4<f32>> {
        let a = self.a.value()[[0]];
        let b = self.b.value()[[0]];
        Ok(input.mapv(|x| a * x + b))
    }

    fn visit_parameters(&self, visitor: &mut dyn FnMut(&Parameter)) {
        visitor(&self.a);
        visitor(&self.b);
    }

    fn set_mode(&mut self, mode: Mode) {
        self.mode = mode;
    }

    fn mode(&self) -> Mode {
        self.mode
    }
}

/// Temperature scaling: `x / T` on the logit.
#[derive(Debug)]
pub struct TemperatureScaling {
    temperature: Parameter,
    mode: Mode,
}

impl TemperatureScaling {
    /// Identity-initialised (`T = 1`) calibrator.
    pub fn new(prefix: &str) -> Self {
        TemperatureScaling {
            temperature: scalar_param(prefix, "temperature", 1.0),
            mode: Mode::Eval,
        }
    }
}

impl NnModule for TemperatureScaling {
    fn forward(&self, input: &Array4<f32>) -> ModelResult<Array4<f32>> {
        let t = self.temperature.value()[[0]];
        Ok(input.mapv(|x| x / t))
    }

    fn visit_parameters(&self, visitor: &mut dyn FnMut(&Parameter)) {
        visitor(&self.temperature);
    }

    fn set_mode(&mut self, mode: Mode) {
        self.mode = mode;
    }

    fn mode(&self) -> Mode {
        self.mode
    }
}

// ---------------------------------------------------------------------------
// CalibratedModel
// ---------------------------------------------------------------------------

/// A frozen perception model decorated with per-modality confidence
/// calibrators.
///
/// Construction applies the calibrator training phase to the base model
/// (everything frozen, eval mode) and marks every calibrator parameter
/// trainable. The wrapper never mutates the base model afterwards.
pub struct CalibratedModel {
    model: PerceptionModel,
    calibrators: BTreeMap<String, Box<dyn NnModule>>,
    trainable: BTreeSet<String>,
}

impl CalibratedModel {
    /// Wrap a perception model, freezing it and building one calibrator per
    /// modality that configured one.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::SubsystemAbsent`] when no modality configured
    /// a calibrator, and [`ConfigError::MissingCalibrator`] when some
    /// modality lacks one: every modality entering the wrapper must define
    /// its own calibrator.
    pub fn new(mut model: PerceptionModel) -> ModelResult<Self> {
        TrainingPhaseController::new(TrainingPhase::CalibratorOnly).apply(&mut model)?;
        let mut calibrators: BTreeMap<String, Box<dyn NnModule>> = BTreeMap::new();
        for pipeline in model.pipelines() {
            let kind = pipeline
                .calibrator_kind()
                .ok_or_else(|| ConfigError::MissingCalibrator {
                    modality: pipeline.name().to_string(),
                })?;
            let name = pipeline.name().to_string();
            let mut calibrator = kind.build(&format!("{name}.calibrator"));
            calibrator.set_mode(Mode::Train);
            calibrators.insert(name, calibrator);
        }
        let trainable = calibrators
            .values()
            .flat_map(|c| c.parameter_names())
            .collect();
        Ok(CalibratedModel {
            model,
            calibrators,
            trainable,
        })
    }

    /// The frozen base model.
    pub fn base(&self) -> &PerceptionModel {
        &self.model
    }

    /// Fully qualified names of the trainable (calibrator) parameters.
    pub fn trainable(&self) -> &BTreeSet<String> {
        &self.trainable
    }

    /// Names of the modalities carrying a calibrator.
    pub fn calibrated_modalities(&self) -> Vec<String> {
        self.calibrators.keys().cloned().collect()
    }

    /// Calibrated multi-agent forward for a single active modality.
    ///
    /// Runs the base all-agents pass, selects the ego rows with
    /// `ego_idx[i] = cumsum(record_len)[i] − record_len[0]`, rescales the
    /// classification logits through the modality's calibrator, and passes
    /// regression and direction outputs through untouched.
    ///
    /// `record_len` must carry positive counts summing to the input's
    /// batch dimension; anything else is
    /// [`PreconditionError::InvalidRecordLen`].
    ///
    /// The ego-index formula matches the reference arithmetic, which only
    /// lands on each sample's leading agent when every sample contributes
    /// the same agent count; non-uniform counts are surfaced with a
    /// warning.
    pub fn forward(&self, batch: &BatchRecord) -> ModelResult<PredictionBundle> {
        if batch.inputs.is_empty() {
            return Err(PreconditionError::NoActiveModality.into());
        }
        if batch.inputs.len() > 1 {
            return Err(PreconditionError::MultipleActiveModalities {
                count: batch.inputs.len(),
            }
            .into());
        }
        if batch.record_len.is_empty() {
            return Err(PreconditionError::EmptyRecordLen.into());
        }
        let modality = batch
            .inputs
            .keys()
            .next()
            .cloned()
            .unwrap_or_default();
        let pipeline = self.model.pipeline(&modality).ok_or_else(|| {
            PreconditionError::MissingModalityInput {
                modality: modality.clone(),
            }
        })?;

        // Every ego index is in range iff the counts are positive and sum
        // to the batch dimension.
        let batch_dim = batch.input_for(&modality)?.dim().0;
        let total: usize = batch.record_len.iter().sum();
        if total != batch_dim || batch.record_len.iter().any(|&n| n == 0) {
            return Err(PreconditionError::InvalidRecordLen {
                record_len: batch.record_len.clone(),
                batch: batch_dim,
            }
            .into());
        }

        let bundle = ForwardExecutor::run_agents(pipeline, batch)?;

        let ego_idx = ego_indices(&batch.record_len);
        let cls = bundle.cls_preds.select(Axis(0), &ego_idx);
        let reg = bundle.reg_preds.select(Axis(0), &ego_idx);
        let dir = bundle.dir_preds.select(Axis(0), &ego_idx);

        let calibrator = self.calibrators.get(&modality).ok_or_else(|| {
            ConfigError::MissingCalibrator {
                modality: modality.clone(),
            }
        })?;
        let cls = calibrator.forward(&cls)?;

        Ok(PredictionBundle {
            cls_preds: cls,
            reg_preds: reg,
            dir_preds: dir,
            occ_single_list: bundle.occ_single_list,
            depth_items: bundle.depth_items,
        })
    }
}

impl std::fmt::Debug for CalibratedModel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CalibratedModel")
            .field("modalities", &self.calibrated_modalities())
            .field("trainable", &self.trainable.len())
            .finish()
    }
}

/// Reference ego-row arithmetic: `cumsum(record_len)[i] − record_len[0]`.
fn ego_indices(record_len: &[usize]) -> Vec<usize> {
    let uniform = record_len.windows(2).all(|w| w[0] == w[1]);
    if !uniform {
        warn!(
            ?record_len,
            "ego-index arithmetic assumes uniform per-sample agent counts"
        );
    }
    let first = record_len[0];
    record_len
        .iter()
        .scan(0usize, |acc, &len| {
            *acc += len;
            Some(*acc - first)
        })
        .collect()
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
