//! Model configuration for the BEV perception pipeline.
//!
//! [`ModelConfig`] is the single source of truth for the per-modality
//! component stack, head sizing, and the shared spatial range. It is
//! serializable via [`serde`] so it can be stored to / restored from JSON
//! files alongside experiment outputs.
//!
//! # Example
//!
//! ```rust
//! use bev_perception::config::ModelConfig;
//!
//! let cfg = ModelConfig::default();
//! cfg.validate().expect("default config is valid");
//!
//! assert_eq!(cfg.modalities.len(), 1);
//! assert_eq!(cfg.modalities["m0"].anchor_number, 2);
//! ```

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::Path;

use crate::error::ConfigError;
use crate::pipeline::SensorKind;

// ---------------------------------------------------------------------------
// Nested component configurations
// ---------------------------------------------------------------------------

/// Encoder sub-configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EncoderArgs {
    /// Number of raw input channels the sensor produces.
    pub input_dim: usize,
    /// Number of feature channels the encoder emits.
    pub feature_dim: usize,
    /// Emit the encoder's depth auxiliary output (camera encoders only).
    #[serde(default)]
    pub depth_supervision: bool,
}

/// Backbone sub-configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BackboneArgs {
    /// Channel count of the incoming `spatial_features` map.
    pub input_dim: usize,
    /// Channel count of the outgoing `spatial_features_2d` map.
    pub output_dim: usize,
    /// Number of residual blocks. Default: **2**.
    #[serde(default = "default_num_blocks")]
    pub num_blocks: usize,
}

fn default_num_blocks() -> usize {
    2
}

/// Aligner sub-configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AlignerArgs {
    /// Channel count of the modality-specific feature map.
    pub input_dim: usize,
    /// Channel count of the shared cross-modality feature space.
    pub output_dim: usize,
}

/// Pyramid fusion sub-configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FusionArgs {
    /// Channel count of the feature map entering the pyramid.
    pub input_dim: usize,
    /// Number of pyramid scale levels. Default: **3**.
    #[serde(default = "default_num_levels")]
    pub num_levels: usize,
}

fn default_num_levels() -> usize {
    3
}

/// Shrink-header sub-configuration (optional dimensionality reduction).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ShrinkArgs {
    /// Channel count of the fused feature map.
    pub input_dim: usize,
    /// Channel count after shrinking.
    pub output_dim: usize,
}

/// Compressor sub-configuration (optional, trainability target only).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CompressorArgs {
    /// Channel count of the feature map to compress.
    pub input_dim: usize,
    /// Bottleneck ratio: the compressed map has `input_dim / compress_ratio`
    /// channels.
    pub compress_ratio: usize,
}

/// Calibrator sub-configuration (optional, post-hoc confidence rescaling).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CalibratorArgs {
    /// Calibrator kind identifier: `"DBS"`, `"Platt"`, or `"Temp"`.
    pub core_method: String,
}

/// Direction-head sub-configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DirArgs {
    /// Number of orientation bins per anchor. Default: **2**.
    #[serde(default = "default_num_bins")]
    pub num_bins: usize,
}

fn default_num_bins() -> usize {
    2
}

/// Camera BEV grid bounds, required for camera modalities.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GridConf {
    /// Native grid x extent `[x0, x1]` in metres.
    pub xbound: [f64; 2],
    /// Native grid y extent `[y0, y1]` in metres.
    pub ybound: [f64; 2],
}

/// Camera mask arguments wrapping the grid configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CameraMaskArgs {
    /// The camera's native BEV grid bounds.
    pub grid_conf: GridConf,
}

// ---------------------------------------------------------------------------
// ModalityConfig
// ---------------------------------------------------------------------------

/// Configuration for one sensing modality's component stack.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModalityConfig {
    /// Encoder implementation identifier, resolved via the
    /// [`EncoderRegistry`](crate::registry::EncoderRegistry).
    pub core_method: String,

    /// The sensing source type for this modality.
    pub sensor_type: SensorKind,

    /// Encoder sub-configuration.
    pub encoder: EncoderArgs,

    /// Backbone sub-configuration.
    pub backbone: BackboneArgs,

    /// Aligner sub-configuration.
    pub aligner: AlignerArgs,

    /// Pyramid fusion sub-configuration.
    pub fusion: FusionArgs,

    /// Camera grid bounds; required iff `sensor_type` is camera.
    #[serde(default)]
    pub camera_mask: Option<CameraMaskArgs>,

    /// Optional shrink header; presence enables the shrink component.
    #[serde(default)]
    pub shrink_header: Option<ShrinkArgs>,

    /// Optional feature compressor; presence enables the compressor.
    #[serde(default)]
    pub compressor: Option<CompressorArgs>,

    /// Optional post-hoc confidence calibrator.
    #[serde(default)]
    pub calibrator: Option<CalibratorArgs>,

    /// Channel count entering the prediction heads.
    pub in_head: usize,

    /// Number of anchors per BEV location.
    pub anchor_number: usize,

    /// Direction-head sizing.
    pub dir_args: DirArgs,
}

impl ModalityConfig {
    /// Channel count the prediction heads must consume: the shrink output
    /// when a shrink header is configured, otherwise the fused feature map.
    pub fn head_input_dim(&self) -> usize {
        match &self.shrink_header {
            Some(shrink) => shrink.output_dim,
            None => self.fusion.input_dim,
        }
    }
}

// ---------------------------------------------------------------------------
// ModelConfig
// ---------------------------------------------------------------------------

/// Complete configuration for a heterogeneous perception model.
///
/// All fields have documented defaults describing a single lidar modality.
/// Use [`ModelConfig::default()`] as a starting point, then override
/// individual fields as needed.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModelConfig {
    /// Shared spatial extent `[xmin, ymin, zmin, xmax, ymax, zmax]` in
    /// metres, identical for all collaborating agents. Only the x/y extents
    /// participate in camera crop geometry.
    pub lidar_range: [f64; 6],

    /// Per-modality component stacks, keyed by modality name (`"m0"`, …).
    pub modalities: BTreeMap<String, ModalityConfig>,

    /// Seed for deterministic parameter initialisation. Default: **42**.
    #[serde(default = "default_seed")]
    pub seed: u64,
}

fn default_seed() -> u64 {
    42
}

impl Default for ModelConfig {
    fn default() -> Self {
        let mut modalities = BTreeMap::new();
        modalities.insert(
            "m0".to_string(),
            ModalityConfig {
                core_method: "point_pillar".to_string(),
                sensor_type: SensorKind::Lidar,
                encoder: EncoderArgs {
                    input_dim: 4,
                    feature_dim: 64,
                    depth_supervision: false,
                },
                backbone: BackboneArgs {
                    input_dim: 64,
                    output_dim: 64,
                    num_blocks: 2,
                },
                aligner: AlignerArgs {
                    input_dim: 64,
                    output_dim: 64,
                },
                fusion: FusionArgs {
                    input_dim: 64,
                    num_levels: 3,
                },
                camera_mask: None,
                shrink_header: None,
                compressor: None,
                calibrator: None,
                in_head: 64,
                anchor_number: 2,
                dir_args: DirArgs { num_bins: 2 },
            },
        );
        ModelConfig {
            lidar_range: [-51.2, -51.2, -3.0, 51.2, 51.2, 1.0],
            modalities,
            seed: 42,
        }
    }
}

impl ModelConfig {
    /// Load a [`ModelConfig`] from a JSON file at `path`.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::FileRead`] if the file cannot be opened,
    /// [`ConfigError::Parse`] if the JSON is malformed, and any
    /// [`validate`](ModelConfig::validate) error for incoherent contents.
    pub fn from_json(path: &Path) -> Result<Self, ConfigError> {
        let contents = std::fs::read_to_string(path).map_err(|source| ConfigError::FileRead {
            path: path.to_path_buf(),
            source,
        })?;
        let cfg: ModelConfig =
            serde_json::from_str(&contents).map_err(|source| ConfigError::Parse {
                path: path.to_path_buf(),
                source,
            })?;
        cfg.validate()?;
        Ok(cfg)
    }

    /// Serialize this configuration to pretty-printed JSON and write it to
    /// `path`, creating parent directories if necessary.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::FileRead`] if the directory cannot be created
    /// or the file cannot be written.
    pub fn to_json(&self, path: &Path) -> Result<(), ConfigError> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(|source| ConfigError::FileRead {
                path: parent.to_path_buf(),
                source,
            })?;
        }
        let json = serde_json::to_string_pretty(self)
            .map_err(|e| ConfigError::invalid_value("(serialization)", e.to_string()))?;
        std::fs::write(path, json).map_err(|source| ConfigError::FileRead {
            path: path.to_path_buf(),
            source,
        })?;
        Ok(())
    }

    /// Validate all fields and return an error describing the first problem
    /// found, or `Ok(())` if the configuration is coherent.
    ///
    /// # Validated invariants
    ///
    /// - At least one modality must be configured.
    /// - The shared x/y extents must be positive.
    /// - All channel counts must be non-zero, and consecutive components
    ///   must agree on their shared channel dimension
    ///   (encoder → backbone → aligner → fusion → heads).
    /// - `in_head` must match the channel count actually reaching the heads.
    /// - Camera modalities must carry grid bounds with non-zero upper edges.
    /// - `compress_ratio` must be non-zero and divide `input_dim`.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.modalities.is_empty() {
            return Err(ConfigError::invalid_value(
                "modalities",
                "at least one modality is required",
            ));
        }
        if self.lidar_range[3] <= self.lidar_range[0] {
            return Err(ConfigError::invalid_value(
                "lidar_range",
                "xmax must be > xmin",
            ));
        }
        if self.lidar_range[4] <= self.lidar_range[1] {
            return Err(ConfigError::invalid_value(
                "lidar_range",
                "ymax must be > ymin",
            ));
        }

        for (name, modality) in &self.modalities {
            modality_checks(name, modality)?;
        }
        Ok(())
    }
}

fn modality_checks(name: &str, m: &ModalityConfig) -> Result<(), ConfigError> {
    if m.core_method.is_empty() {
        return Err(ConfigError::invalid_value("core_method", "must be non-empty"));
    }
    if m.encoder.input_dim == 0 || m.encoder.feature_dim == 0 {
        return Err(ConfigError::invalid_value(
            "encoder",
            "input_dim and feature_dim must be > 0",
        ));
    }
    if m.backbone.input_dim != m.encoder.feature_dim {
        return Err(ConfigError::invalid_value(
            "backbone.input_dim",
            format!(
                "must equal encoder.feature_dim ({}), got {}",
                m.encoder.feature_dim, m.backbone.input_dim
            ),
        ));
    }
    if m.backbone.output_dim == 0 || m.backbone.num_blocks == 0 {
        return Err(ConfigError::invalid_value(
            "backbone",
            "output_dim and num_blocks must be > 0",
        ));
    }
    if m.aligner.input_dim != m.backbone.output_dim {
        return Err(ConfigError::invalid_value(
            "aligner.input_dim",
            format!(
                "must equal backbone.output_dim ({}), got {}",
                m.backbone.output_dim, m.aligner.input_dim
            ),
        ));
    }
    if m.fusion.input_dim != m.aligner.output_dim {
        return Err(ConfigError::invalid_value(
            "fusion.input_dim",
            format!(
                "must equal aligner.output_dim ({}), got {}",
                m.aligner.output_dim, m.fusion.input_dim
            ),
        ));
    }
    if m.fusion.num_levels == 0 {
        return Err(ConfigError::invalid_value(
            "fusion.num_levels",
            "must be > 0",
        ));
    }
    if let Some(shrink) = &m.shrink_header {
        if shrink.input_dim != m.fusion.input_dim {
            return Err(ConfigError::invalid_value(
                "shrink_header.input_dim",
                format!(
                    "must equal fusion.input_dim ({}), got {}",
                    m.fusion.input_dim, shrink.input_dim
                ),
            ));
        }
        if shrink.output_dim == 0 {
            return Err(ConfigError::invalid_value(
                "shrink_header.output_dim",
                "must be > 0",
            ));
        }
    }
    if m.in_head != m.head_input_dim() {
        return Err(ConfigError::invalid_value(
            "in_head",
            format!(
                "must equal the channel count reaching the heads ({}), got {}",
                m.head_input_dim(),
                m.in_head
            ),
        ));
    }
    if m.anchor_number == 0 {
        return Err(ConfigError::invalid_value("anchor_number", "must be > 0"));
    }
    if m.dir_args.num_bins == 0 {
        return Err(ConfigError::invalid_value("dir_args.num_bins", "must be > 0"));
    }
    if let Some(compressor) = &m.compressor {
        if compressor.compress_ratio == 0 {
            return Err(ConfigError::invalid_value(
                "compressor.compress_ratio",
                "must be > 0",
            ));
        }
        if compressor.input_dim == 0 || compressor.input_dim % compressor.compress_ratio != 0 {
            return Err(ConfigError::invalid_value(
                "compressor.input_dim",
                "must be > 0 and divisible by compress_ratio",
            ));
        }
    }
    if m.sensor_type == SensorKind::Camera && m.camera_mask.is_none() {
        return Err(ConfigError::MissingCameraGrid {
            modality: name.to_string(),
        });
    }
    Ok(())
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_is_valid() {
        let cfg = ModelConfig::default();
        cfg.validate().expect("default config should be valid");
    }

    #[test]
    fn empty_modalities_are_invalid() {
        let mut cfg = ModelConfig::default();
        cfg.modalities.clear();
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn inverted_range_is_invalid() {
        let mut cfg = ModelConfig::default();
        cfg.lidar_range = [51.2, -51.2, -3.0, -51.2, 51.2, 1.0];
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn channel_chain_mismatch_is_invalid() {
        let mut cfg = ModelConfig::default();
        cfg.modalities.get_mut("m0").unwrap().backbone.input_dim = 32;
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn in_head_must_match_fused_channels() {
        let mut cfg = ModelConfig::default();
        cfg.modalities.get_mut("m0").unwrap().in_head = 128;
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn shrink_overrides_head_input_dim() {
        let mut cfg = ModelConfig::default();
        {
            let m = cfg.modalities.get_mut("m0").unwrap();
            m.shrink_header = Some(ShrinkArgs {
                input_dim: 64,
                output_dim: 32,
            });
            m.in_head = 32;
        }
        cfg.validate().expect("shrunk head dims should validate");
        assert_eq!(cfg.modalities["m0"].head_input_dim(), 32);
    }

    #[test]
    fn camera_without_grid_is_invalid() {
        let mut cfg = ModelConfig::default();
        cfg.modalities.get_mut("m0").unwrap().sensor_type = SensorKind::Camera;
        let err = cfg.validate().unwrap_err();
        assert!(matches!(err, ConfigError::MissingCameraGrid { .. }));
    }

    #[test]
    fn indivisible_compress_ratio_is_invalid() {
        let mut cfg = ModelConfig::default();
        cfg.modalities.get_mut("m0").unwrap().compressor = Some(CompressorArgs {
            input_dim: 64,
            compress_ratio: 3,
        });
        assert!(cfg.validate().is_err());
    }
}
