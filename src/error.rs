//! Error types for the BEV perception pipeline.
//!
//! This module is the single source of truth for all error types in the
//! crate. Every module that produces an error imports its error type from
//! here rather than defining it inline, keeping the error hierarchy
//! centralised and consistent.
//!
//! ## Hierarchy
//!
//! ```text
//! ModelError (top-level)
//! ├── ConfigError        (build-time configuration faults)
//! └── PreconditionError  (first-forward precondition violations)
//! ```
//!
//! Configuration faults fail at build time; no partial pipeline is ever
//! returned. Precondition violations fail at the first forward call that
//! detects them. Neither category is transient, so there is no retry path.

use std::path::PathBuf;
use thiserror::Error;

// ---------------------------------------------------------------------------
// ModelResult
// ---------------------------------------------------------------------------

/// Convenient `Result` alias used throughout the crate.
pub type ModelResult<T> = Result<T, ModelError>;

// ---------------------------------------------------------------------------
// ModelError — top-level aggregator
// ---------------------------------------------------------------------------

/// Top-level error type for the perception pipeline.
///
/// Build-time functions ([`crate::pipeline::PipelineBuilder`],
/// [`crate::calibration::CalibratedModel::new`]) surface [`ConfigError`];
/// forward-path functions surface [`PreconditionError`]. Both coerce into
/// `ModelError` via [`From`].
#[derive(Debug, Error)]
pub enum ModelError {
    /// A configuration validation or loading error.
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    /// A forward-path precondition was violated.
    #[error("Precondition violation: {0}")]
    Precondition(#[from] PreconditionError),

    /// A shape mismatch was detected between two tensors.
    #[error("Shape mismatch: expected {expected:?}, got {actual:?}")]
    ShapeMismatch {
        /// Expected shape.
        expected: Vec<usize>,
        /// Actual shape.
        actual: Vec<usize>,
    },

    /// JSON (de)serialization error.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl ModelError {
    /// Construct a [`ModelError::ShapeMismatch`].
    pub fn shape_mismatch(expected: &[usize], actual: &[usize]) -> Self {
        ModelError::ShapeMismatch {
            expected: expected.to_vec(),
            actual: actual.to_vec(),
        }
    }
}

// ---------------------------------------------------------------------------
// ConfigError
// ---------------------------------------------------------------------------

/// Errors produced while loading, validating, or acting on a
/// [`ModelConfig`].
///
/// Every variant is a structural fault: the configuration cannot produce a
/// working pipeline and construction stops at the first problem found.
///
/// [`ModelConfig`]: crate::config::ModelConfig
#[derive(Debug, Error)]
pub enum ConfigError {
    /// A `core_method` identifier did not resolve in the encoder registry.
    #[error("Unknown encoder `{name}`: no such core_method is registered")]
    UnknownCoreMethod {
        /// The unresolvable identifier, as written in the config.
        name: String,
    },

    /// A camera modality is missing its grid-bound sub-configuration.
    #[error("Camera modality `{modality}` has no camera_mask grid configuration")]
    MissingCameraGrid {
        /// Name of the offending modality.
        modality: String,
    },

    /// A calibrator `core_method` named an unimplemented calibrator kind.
    #[error("Calibrator kind `{name}` is not implemented (expected DBS, Platt, or Temp)")]
    UnknownCalibrator {
        /// The unrecognised kind string.
        name: String,
    },

    /// A modality entered the calibration wrapper without a calibrator.
    #[error("Modality `{modality}` configures no calibrator; the calibration wrapper requires one per modality")]
    MissingCalibrator {
        /// Name of the offending modality.
        modality: String,
    },

    /// A training phase targets a subsystem that was never built.
    #[error("Phase `{phase}` requires a {subsystem}, but none was configured")]
    SubsystemAbsent {
        /// The active training phase.
        phase: &'static str,
        /// The missing subsystem.
        subsystem: &'static str,
    },

    /// A camera grid bound has zero extent, so no crop ratio exists.
    #[error("Modality `{modality}` has a zero-extent {axis} grid bound")]
    ZeroGridBound {
        /// Name of the offending modality.
        modality: String,
        /// The degenerate axis (`"x"` or `"y"`).
        axis: &'static str,
    },

    /// A field has an invalid value.
    #[error("Invalid value for `{field}`: {reason}")]
    InvalidValue {
        /// Name of the field.
        field: &'static str,
        /// Human-readable reason.
        reason: String,
    },

    /// A configuration file could not be read from disk.
    #[error("Cannot read config file `{path}`: {source}")]
    FileRead {
        /// Path that was being read.
        path: PathBuf,
        /// Underlying I/O error.
        #[source]
        source: std::io::Error,
    },

    /// A configuration file contains malformed JSON.
    #[error("Cannot parse config file `{path}`: {source}")]
    Parse {
        /// Path that was being parsed.
        path: PathBuf,
        /// Underlying JSON parse error.
        #[source]
        source: serde_json::Error,
    },
}

impl ConfigError {
    /// Construct a [`ConfigError::InvalidValue`].
    pub fn invalid_value<S: Into<String>>(field: &'static str, reason: S) -> Self {
        ConfigError::InvalidValue {
            field,
            reason: reason.into(),
        }
    }

    /// Construct a [`ConfigError::UnknownCoreMethod`].
    pub fn unknown_core_method<S: Into<String>>(name: S) -> Self {
        ConfigError::UnknownCoreMethod { name: name.into() }
    }
}

// ---------------------------------------------------------------------------
// PreconditionError
// ---------------------------------------------------------------------------

/// Forward-path precondition violations.
///
/// These are detected on the first forward call that exercises the faulty
/// path. They indicate a structural mismatch between the built model and the
/// data presented to it, never a transient condition.
#[derive(Debug, Error)]
pub enum PreconditionError {
    /// The calibration forward path saw more than one active modality.
    #[error("Calibrator training requires exactly one active modality, got {count}")]
    MultipleActiveModalities {
        /// Number of modalities presented.
        count: usize,
    },

    /// A centre-crop target exceeds the source feature map.
    #[error(
        "Crop target {target:?} exceeds source {available:?}: cannot crop to a larger extent"
    )]
    CropExceedsSource {
        /// Requested (height, width).
        target: (usize, usize),
        /// Available (height, width).
        available: (usize, usize),
    },

    /// The batch record carries no input for the pipeline's modality.
    #[error("No input tensor present for modality `{modality}`")]
    MissingModalityInput {
        /// The modality whose input is missing.
        modality: String,
    },

    /// The batch record's per-sample agent counts are empty.
    #[error("record_len is empty: at least one sample is required")]
    EmptyRecordLen,

    /// The batch record carries no modality inputs at all.
    #[error("No modality input present: the calibrated forward requires exactly one")]
    NoActiveModality,

    /// The per-sample agent counts disagree with the input batch dimension.
    #[error(
        "record_len {record_len:?} is inconsistent with batch dimension {batch}: counts must be non-zero and sum to the batch"
    )]
    InvalidRecordLen {
        /// The offending per-sample counts.
        record_len: Vec<usize>,
        /// The input tensor's batch dimension.
        batch: usize,
    },
}
