//! Pipeline assembly: per-modality component chains and the whole model.
//!
//! [`PipelineBuilder`] turns one [`ModalityConfig`] into a
//! [`ModalityPipeline`], resolving the encoder through the registry and
//! precomputing camera crop geometry. [`PerceptionModel`] holds one pipeline
//! per configured modality plus the model-wide trainable-parameter set the
//! phased training controller manipulates.
//!
//! Construction is all-or-nothing: any unresolved identifier, missing
//! camera grid, or degenerate bound aborts the build, and no partially
//! assembled model is ever returned.

use std::collections::{BTreeMap, BTreeSet};

use serde::{Deserialize, Serialize};
use tracing::info;

use crate::aligner::ChannelAligner;
use crate::backbone::ResBevBackbone;
use crate::calibration::CalibratorKind;
use crate::compress::{DownsampleConv, NaiveCompressor};
use crate::config::{ModalityConfig, ModelConfig};
use crate::encoder::FeatureEncoder;
use crate::error::{ConfigError, ModelResult};
use crate::fusion::PyramidFusion;
use crate::geometry::CropGeometry;
use crate::layers::Conv1x1;
use crate::nn::{Mode, NnModule, Parameter};
use crate::registry::EncoderRegistry;
use crate::REG_CHANNELS_PER_ANCHOR;

// ---------------------------------------------------------------------------
// SensorKind
// ---------------------------------------------------------------------------

/// The sensing source behind a modality.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SensorKind {
    /// Lidar point-cloud modality.
    Lidar,
    /// Camera image modality; requires grid bounds for crop geometry.
    Camera,
}

// ---------------------------------------------------------------------------
// ModalityDescriptor
// ---------------------------------------------------------------------------

/// Immutable identity of one sensing modality, fixed at build time.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ModalityDescriptor {
    /// Unique modality key (`"m0"`, `"m1"`, …).
    pub name: String,
    /// The sensing source behind the modality.
    pub sensor_type: SensorKind,
}

// ---------------------------------------------------------------------------
// Subsystem
// ---------------------------------------------------------------------------

/// Addressable parameter subsystems within one modality pipeline.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Subsystem {
    /// The modality encoder.
    Encoder,
    /// The spatial backbone.
    Backbone,
    /// The cross-modality aligner.
    Aligner,
    /// The pyramid fusion stage.
    Fusion,
    /// The optional shrink header.
    ShrinkHeader,
    /// The optional feature compressor.
    Compressor,
    /// The classification, regression, and direction heads.
    Heads,
}

// ---------------------------------------------------------------------------
// ModalityPipeline
// ---------------------------------------------------------------------------

/// One modality's complete component chain.
pub struct ModalityPipeline {
    descriptor: ModalityDescriptor,
    pub(crate) encoder: Box<dyn FeatureEncoder>,
    pub(crate) backbone: ResBevBackbone,
    pub(crate) aligner: ChannelAligner,
    pub(crate) fusion: PyramidFusion,
    pub(crate) shrink: Option<DownsampleConv>,
    pub(crate) compressor: Option<NaiveCompressor>,
    pub(crate) cls_head: Conv1x1,
    pub(crate) reg_head: Conv1x1,
    pub(crate) dir_head: Conv1x1,
    pub(crate) crop: Option<CropGeometry>,
    calibrator: Option<CalibratorKind>,
    depth_supervision: bool,
}

impl ModalityPipeline {
    /// Identity of the modality this pipeline serves.
    pub fn descriptor(&self) -> &ModalityDescriptor {
        &self.descriptor
    }

    /// Modality name this pipeline serves.
    pub fn name(&self) -> &str {
        &self.descriptor.name
    }

    /// The sensing source behind this pipeline.
    pub fn sensor_type(&self) -> SensorKind {
        self.descriptor.sensor_type
    }

    /// Whether the encoder emits a depth auxiliary output.
    pub fn depth_supervision(&self) -> bool {
        self.depth_supervision
    }

    /// Whether a feature compressor was configured.
    pub fn has_compressor(&self) -> bool {
        self.compressor.is_some()
    }

    /// The configured confidence-calibrator kind, if any.
    pub fn calibrator_kind(&self) -> Option<CalibratorKind> {
        self.calibrator
    }

    /// Crop geometry, present only for camera pipelines.
    pub fn crop_geometry(&self) -> Option<&CropGeometry> {
        self.crop.as_ref()
    }

    /// Visit every parameter of every component in the chain.
    pub fn visit_parameters(&self, visitor: &mut dyn FnMut(&Parameter)) {
        self.encoder.visit_parameters(visitor);
        self.backbone.visit_parameters(visitor);
        self.aligner.visit_parameters(visitor);
        self.fusion.visit_parameters(visitor);
        if let Some(shrink) = &self.shrink {
            shrink.visit_parameters(visitor);
        }
        if let Some(compressor) = &self.compressor {
            compressor.visit_parameters(visitor);
        }
        self.cls_head.visit_parameters(visitor);
        self.reg_head.visit_parameters(visitor);
        self.dir_head.visit_parameters(visitor);
    }

    /// Fully qualified names of every parameter in the chain.
    pub fn all_parameter_names(&self) -> BTreeSet<String> {
        let mut names = BTreeSet::new();
        self.visit_parameters(&mut |p| {
            names.insert(p.name().to_string());
        });
        names
    }

    /// Fully qualified parameter names of one subsystem. Absent optional
    /// subsystems yield an empty set.
    pub fn subsystem_parameter_names(&self, subsystem: Subsystem) -> BTreeSet<String> {
        let mut names = BTreeSet::new();
        let mut collect = |m: &dyn NnModule| {
            m.visit_parameters(&mut |p| {
                names.insert(p.name().to_string());
            });
        };
        match subsystem {
            Subsystem::Encoder => collect(self.encoder.as_ref()),
            Subsystem::Backbone => collect(&self.backbone),
            Subsystem::Aligner => collect(&self.aligner),
            Subsystem::Fusion => collect(&self.fusion),
            Subsystem::ShrinkHeader => {
                if let Some(shrink) = &self.shrink {
                    collect(shrink);
                }
            }
            Subsystem::Compressor => {
                if let Some(compressor) = &self.compressor {
                    collect(compressor);
                }
            }
            Subsystem::Heads => {
                collect(&self.cls_head);
                collect(&self.reg_head);
                collect(&self.dir_head);
            }
        }
        names
    }

    /// Switch every component in the chain between train and eval mode.
    pub fn set_mode(&mut self, mode: Mode) {
        self.encoder.set_mode(mode);
        self.backbone.set_mode(mode);
        self.aligner.set_mode(mode);
        self.fusion.set_mode(mode);
        if let Some(shrink) = &mut self.shrink {
            shrink.set_mode(mode);
        }
        if let Some(compressor) = &mut self.compressor {
            compressor.set_mode(mode);
        }
        self.cls_head.set_mode(mode);
        self.reg_head.set_mode(mode);
        self.dir_head.set_mode(mode);
    }

    /// Switch one subsystem between train and eval mode, leaving the rest
    /// of the chain untouched.
    pub fn set_subsystem_mode(&mut self, subsystem: Subsystem, mode: Mode) {
        match subsystem {
            Subsystem::Encoder => self.encoder.set_mode(mode),
            Subsystem::Backbone => self.backbone.set_mode(mode),
            Subsystem::Aligner => self.aligner.set_mode(mode),
            Subsystem::Fusion => self.fusion.set_mode(mode),
            Subsystem::ShrinkHeader => {
                if let Some(shrink) = &mut self.shrink {
                    shrink.set_mode(mode);
                }
            }
            Subsystem::Compressor => {
                if let Some(compressor) = &mut self.compressor {
                    compressor.set_mode(mode);
                }
            }
            Subsystem::Heads => {
                self.cls_head.set_mode(mode);
                self.reg_head.set_mode(mode);
                self.dir_head.set_mode(mode);
            }
        }
    }
}

impl std::fmt::Debug for ModalityPipeline {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ModalityPipeline")
            .field("name", &self.descriptor.name)
            .field("sensor_type", &self.descriptor.sensor_type)
            .field("has_shrink", &self.shrink.is_some())
            .field("has_compressor", &self.compressor.is_some())
            .field("has_crop", &self.crop.is_some())
            .finish()
    }
}

// ---------------------------------------------------------------------------
// PipelineBuilder
// ---------------------------------------------------------------------------

/// Builds one [`ModalityPipeline`] from its configuration.
pub struct PipelineBuilder;

impl PipelineBuilder {
    /// Assemble the component chain for modality `name`.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::UnknownCoreMethod`] when the encoder
    /// identifier does not resolve, [`ConfigError::MissingCameraGrid`] for a
    /// camera modality without grid bounds, and
    /// [`ConfigError::ZeroGridBound`] for degenerate bounds.
    pub fn build(
        name: &str,
        config: &ModalityConfig,
        lidar_range: &[f64; 6],
        registry: &EncoderRegistry,
        seed: u64,
    ) -> Result<ModalityPipeline, ConfigError> {
        let encoder = registry.build(
            &config.core_method,
            &format!("{name}.encoder"),
            &config.encoder,
            seed,
        )?;

        let crop = match config.sensor_type {
            SensorKind::Lidar => None,
            SensorKind::Camera => {
                let mask = config
                    .camera_mask
                    .as_ref()
                    .ok_or_else(|| ConfigError::MissingCameraGrid {
                        modality: name.to_string(),
                    })?;
                Some(CropGeometry::new(name, lidar_range, &mask.grid_conf)?)
            }
        };

        let calibrator = config
            .calibrator
            .as_ref()
            .map(|args| CalibratorKind::parse(&args.core_method))
            .transpose()?;

        let head_dim = config.head_input_dim();
        let anchors = config.anchor_number;
        let pipeline = ModalityPipeline {
            descriptor: ModalityDescriptor {
                name: name.to_string(),
                sensor_type: config.sensor_type,
            },
            encoder,
            backbone: ResBevBackbone::new(
                &format!("{name}.backbone"),
                &config.backbone,
                seed.wrapping_add(11),
            ),
            aligner: ChannelAligner::new(
                &format!("{name}.aligner"),
                &config.aligner,
                seed.wrapping_add(23),
            ),
            fusion: PyramidFusion::new(
                &format!("{name}.fusion"),
                &config.fusion,
                seed.wrapping_add(37),
            ),
            shrink: config.shrink_header.as_ref().map(|args| {
                DownsampleConv::new(&format!("{name}.shrink"), args, seed.wrapping_add(41))
            }),
            compressor: config.compressor.as_ref().map(|args| {
                NaiveCompressor::new(&format!("{name}.compressor"), args, seed.wrapping_add(43))
            }),
            cls_head: Conv1x1::new(
                &format!("{name}.cls_head"),
                head_dim,
                anchors,
                seed.wrapping_add(53),
            ),
            reg_head: Conv1x1::new(
                &format!("{name}.reg_head"),
                head_dim,
                REG_CHANNELS_PER_ANCHOR * anchors,
                seed.wrapping_add(59),
            ),
            dir_head: Conv1x1::new(
                &format!("{name}.dir_head"),
                head_dim,
                config.dir_args.num_bins * anchors,
                seed.wrapping_add(61),
            ),
            crop,
            calibrator,
            depth_supervision: config.encoder.depth_supervision,
        };
        info!(
            modality = name,
            core_method = %config.core_method,
            params = pipeline.all_parameter_names().len(),
            "assembled modality pipeline"
        );
        Ok(pipeline)
    }
}

// ---------------------------------------------------------------------------
// PerceptionModel
// ---------------------------------------------------------------------------

/// The complete multi-modality model: one pipeline per modality plus the
/// model-wide trainable-parameter set.
///
/// A freshly built model has every parameter trainable; the phased training
/// controller narrows the set per phase.
pub struct PerceptionModel {
    modalities: BTreeMap<String, ModalityPipeline>,
    trainable: BTreeSet<String>,
}

impl PerceptionModel {
    /// Build every configured modality pipeline.
    ///
    /// Validates the configuration first; any validation or assembly error
    /// aborts the build.
    pub fn build(config: &ModelConfig, registry: &EncoderRegistry) -> ModelResult<Self> {
        config.validate()?;
        let mut modalities = BTreeMap::new();
        for (index, (name, modality)) in config.modalities.iter().enumerate() {
            let seed = config.seed.wrapping_add((index as u64) << 16);
            let pipeline =
                PipelineBuilder::build(name, modality, &config.lidar_range, registry, seed)?;
            modalities.insert(name.clone(), pipeline);
        }
        let trainable = modalities
            .values()
            .flat_map(|p| p.all_parameter_names())
            .collect();
        Ok(PerceptionModel {
            modalities,
            trainable,
        })
    }

    /// Names of the configured modalities, in sorted order.
    pub fn modality_names(&self) -> Vec<String> {
        self.modalities.keys().cloned().collect()
    }

    /// Borrow one modality pipeline.
    pub fn pipeline(&self, modality: &str) -> Option<&ModalityPipeline> {
        self.modalities.get(modality)
    }

    /// Iterate over every modality pipeline.
    pub fn pipelines(&self) -> impl Iterator<Item = &ModalityPipeline> {
        self.modalities.values()
    }

    /// Iterate mutably over every modality pipeline.
    pub fn pipelines_mut(&mut self) -> impl Iterator<Item = &mut ModalityPipeline> {
        self.modalities.values_mut()
    }

    /// Fully qualified names of every parameter in the model.
    pub fn all_parameter_names(&self) -> BTreeSet<String> {
        self.modalities
            .values()
            .flat_map(|p| p.all_parameter_names())
            .collect()
    }

    /// The current trainable-parameter set.
    pub fn trainable(&self) -> &BTreeSet<String> {
        &self.trainable
    }

    /// Whether the named parameter is currently trainable.
    pub fn is_trainable(&self, name: &str) -> bool {
        self.trainable.contains(name)
    }

    /// Replace the trainable-parameter set.
    pub fn set_trainable(&mut self, trainable: BTreeSet<String>) {
        self.trainable = trainable;
    }

    /// Mark every parameter trainable.
    pub fn mark_all_trainable(&mut self) {
        self.trainable = self.all_parameter_names();
    }

    /// Clear the trainable-parameter set.
    pub fn freeze_all(&mut self) {
        self.trainable.clear();
    }

    /// Switch every pipeline between train and eval mode.
    pub fn set_mode(&mut self, mode: Mode) {
        for pipeline in self.modalities.values_mut() {
            pipeline.set_mode(mode);
        }
    }
}

impl std::fmt::Debug for PerceptionModel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PerceptionModel")
            .field("modalities", &self.modality_names())
            .field("trainable", &self.trainable.len())
            .finish()
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
