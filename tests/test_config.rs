//! Integration tests for configuration loading, storing, and validation.

use bev_perception::config::{CalibratorArgs, CameraMaskArgs, GridConf, ModelConfig, ShrinkArgs};
use bev_perception::pipeline::SensorKind;
use bev_perception::ConfigError;

#[test]
fn test_default_config_validates() {
    let cfg = ModelConfig::default();
    cfg.validate().expect("default config should validate");
    assert_eq!(cfg.modalities.len(), 1);
    assert_eq!(cfg.seed, 42);
}

#[test]
fn test_json_round_trip() {
    let dir = tempfile::tempdir().expect("create temp dir");
    let path = dir.path().join("nested").join("model.json");

    let mut cfg = ModelConfig::default();
    cfg.seed = 7;
    {
        let m = cfg.modalities.get_mut("m0").unwrap();
        m.shrink_header = Some(ShrinkArgs {
            input_dim: 64,
            output_dim: 32,
        });
        m.in_head = 32;
        m.calibrator = Some(CalibratorArgs {
            core_method: "Temp".to_string(),
        });
    }

    cfg.to_json(&path).expect("store config");
    let restored = ModelConfig::from_json(&path).expect("load config");

    assert_eq!(restored.seed, 7);
    assert_eq!(restored.modalities["m0"].in_head, 32);
    assert_eq!(
        restored.modalities["m0"]
            .calibrator
            .as_ref()
            .map(|c| c.core_method.as_str()),
        Some("Temp")
    );
}

#[test]
fn test_missing_file_is_a_read_error() {
    let dir = tempfile::tempdir().expect("create temp dir");
    let err = ModelConfig::from_json(&dir.path().join("absent.json")).unwrap_err();
    assert!(matches!(err, ConfigError::FileRead { .. }));
}

#[test]
fn test_malformed_json_is_a_parse_error() {
    let dir = tempfile::tempdir().expect("create temp dir");
    let path = dir.path().join("broken.json");
    std::fs::write(&path, "{ not json").expect("write file");
    let err = ModelConfig::from_json(&path).unwrap_err();
    assert!(matches!(err, ConfigError::Parse { .. }));
}

#[test]
fn test_loaded_config_is_validated() {
    // Structurally valid JSON that fails semantic validation.
    let dir = tempfile::tempdir().expect("create temp dir");
    let path = dir.path().join("incoherent.json");

    let mut cfg = ModelConfig::default();
    cfg.modalities.get_mut("m0").unwrap().sensor_type = SensorKind::Camera;
    let json = serde_json::to_string(&cfg).expect("serialize");
    std::fs::write(&path, json).expect("write file");

    let err = ModelConfig::from_json(&path).unwrap_err();
    assert!(matches!(err, ConfigError::MissingCameraGrid { .. }));
}

#[test]
fn test_camera_modality_with_grid_validates() {
    let mut cfg = ModelConfig::default();
    {
        let m = cfg.modalities.get_mut("m0").unwrap();
        m.sensor_type = SensorKind::Camera;
        m.core_method = "lift_splat_shoot".to_string();
        m.camera_mask = Some(CameraMaskArgs {
            grid_conf: GridConf {
                xbound: [-102.4, 102.4],
                ybound: [-102.4, 102.4],
            },
        });
    }
    cfg.validate().expect("camera modality with grid validates");
}

#[test]
fn test_channel_chain_is_enforced() {
    let mut cfg = ModelConfig::default();
    cfg.modalities.get_mut("m0").unwrap().aligner.output_dim = 128;
    let err = cfg.validate().unwrap_err();
    assert!(matches!(err, ConfigError::InvalidValue { .. }));
}
