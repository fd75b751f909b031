//! # Heterogeneous BEV Perception Pipeline
//!
//! This crate assembles, per sensing modality, a chain of learnable
//! numeric-transform components (feature encoder, spatial backbone,
//! cross-modality aligner, multiscale pyramid fusion, prediction heads) into
//! a single inference pipeline for multi-agent bird's-eye-view perception,
//! and layers a phased-training controller on top that exposes exactly one
//! parameter subsystem as trainable per training stage.
//!
//! ## Architecture
//!
//! ```text
//! ModelConfig ──► PipelineBuilder ──► ModalityPipeline ──► PerceptionModel
//!                       │                                       │
//!                 EncoderRegistry                        ForwardExecutor
//!                                                               │
//!                                                       PredictionBundle
//!                                                               │
//!                                                 [optional] CalibratedModel
//! ```
//!
//! Per forward call the executor runs the fixed chain
//! `encode → backbone → align → crop → fuse → shrink → predict`; camera
//! modalities are centre-cropped to the shared spatial range via
//! [`geometry::CropGeometry`] before fusion.
//!
//! ## Quick Start
//!
//! ```rust
//! use bev_perception::config::ModelConfig;
//! use bev_perception::pipeline::PerceptionModel;
//! use bev_perception::registry::EncoderRegistry;
//!
//! let config = ModelConfig::default();
//! config.validate().expect("default config is valid");
//!
//! let registry = EncoderRegistry::with_builtins();
//! let model = PerceptionModel::build(&config, &registry).expect("model builds");
//! assert_eq!(model.modality_names(), vec!["m0".to_string()]);
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]

pub mod aligner;
pub mod backbone;
pub mod calibration;
pub mod compress;
pub mod config;
pub mod encoder;
pub mod error;
pub mod forward;
pub mod fusion;
pub mod geometry;
pub mod layers;
pub mod nn;
pub mod phase;
pub mod pipeline;
pub mod registry;

// Convenient re-exports at the crate root.
pub use calibration::{CalibratedModel, CalibratorKind};
pub use config::{ModalityConfig, ModelConfig};
pub use error::{ConfigError, ModelError, ModelResult, PreconditionError};
pub use forward::{BatchRecord, ForwardExecutor, PredictionBundle};
pub use geometry::CropGeometry;
pub use nn::{Mode, NnModule, Parameter};
pub use phase::{FreezeReport, TrainingPhase, TrainingPhaseController};
pub use pipeline::{
    ModalityDescriptor, ModalityPipeline, PerceptionModel, PipelineBuilder, SensorKind, Subsystem,
};
pub use registry::EncoderRegistry;

/// Crate version string.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Number of regression channels emitted per anchor (x, y, z, h, w, l, yaw).
pub const REG_CHANNELS_PER_ANCHOR: usize = 7;
