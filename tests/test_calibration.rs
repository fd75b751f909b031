//! Integration tests for the calibration wrapper.

use bev_perception::calibration::{CalibratedModel, CalibratorKind};
use bev_perception::config::{CalibratorArgs, ModelConfig};
use bev_perception::forward::{BatchRecord, ForwardExecutor};
use bev_perception::pipeline::PerceptionModel;
use bev_perception::registry::EncoderRegistry;
use bev_perception::{ConfigError, ModelError, PreconditionError};
use ndarray::{s, Array4};

fn calibrated(kind: &str) -> CalibratedModel {
    let mut cfg = ModelConfig::default();
    cfg.modalities.get_mut("m0").unwrap().calibrator = Some(CalibratorArgs {
        core_method: kind.to_string(),
    });
    let model =
        PerceptionModel::build(&cfg, &EncoderRegistry::with_builtins()).expect("model builds");
    CalibratedModel::new(model).expect("wrapper builds")
}

#[test]
fn test_unknown_calibrator_kind_constructs_nothing() {
    let err = CalibratorKind::parse("histogram_binning").unwrap_err();
    assert!(matches!(err, ConfigError::UnknownCalibrator { .. }));
}

#[test]
fn test_wrapping_requires_a_configured_calibrator() {
    let model = PerceptionModel::build(
        &ModelConfig::default(),
        &EncoderRegistry::with_builtins(),
    )
    .expect("model builds");
    let err = CalibratedModel::new(model).unwrap_err();
    assert!(matches!(
        err,
        ModelError::Config(ConfigError::SubsystemAbsent {
            subsystem: "calibrator",
            ..
        })
    ));
}

#[test]
fn test_only_calibrator_parameters_are_trainable() {
    let wrapper = calibrated("Platt");
    assert!(wrapper.base().trainable().is_empty());
    let trainable = wrapper.trainable();
    assert_eq!(trainable.len(), 2);
    assert!(trainable.iter().all(|n| n.contains(".calibrator.")));
}

#[test]
fn test_forward_requires_exactly_one_modality() {
    let wrapper = calibrated("Temp");

    let mut batch = BatchRecord::single("m0", Array4::ones((2, 4, 8, 8)), vec![2]);
    batch
        .inputs
        .insert("m1".to_string(), Array4::ones((2, 4, 8, 8)));
    let err = wrapper.forward(&batch).unwrap_err();
    assert!(matches!(
        err,
        ModelError::Precondition(PreconditionError::MultipleActiveModalities { count: 2 })
    ));

    let err = wrapper.forward(&BatchRecord::default()).unwrap_err();
    assert!(matches!(
        err,
        ModelError::Precondition(PreconditionError::NoActiveModality)
    ));
}

#[test]
fn test_record_len_must_sum_to_the_batch_dimension() {
    let wrapper = calibrated("Temp");
    let batch = BatchRecord::single("m0", Array4::ones((4, 4, 8, 8)), vec![2, 5]);
    let err = wrapper.forward(&batch).unwrap_err();
    assert!(matches!(
        err,
        ModelError::Precondition(PreconditionError::InvalidRecordLen { batch: 4, .. })
    ));
}

#[test]
fn test_record_len_entries_must_be_positive() {
    let wrapper = calibrated("Temp");
    let batch = BatchRecord::single("m0", Array4::ones((2, 4, 8, 8)), vec![0, 2]);
    let err = wrapper.forward(&batch).unwrap_err();
    assert!(matches!(
        err,
        ModelError::Precondition(PreconditionError::InvalidRecordLen { .. })
    ));
}

#[test]
fn test_every_modality_must_configure_a_calibrator() {
    // Two modalities, one calibrator: the wrapper refuses to build rather
    // than silently passing the uncalibrated modality's logits through.
    let mut cfg = ModelConfig::default();
    let mut second = cfg.modalities["m0"].clone();
    second.calibrator = None;
    cfg.modalities.get_mut("m0").unwrap().calibrator = Some(CalibratorArgs {
        core_method: "Temp".to_string(),
    });
    cfg.modalities.insert("m1".to_string(), second);

    let model =
        PerceptionModel::build(&cfg, &EncoderRegistry::with_builtins()).expect("model builds");
    let err = CalibratedModel::new(model).unwrap_err();
    assert!(matches!(
        err,
        ModelError::Config(ConfigError::MissingCalibrator { .. })
    ));
}

#[test]
fn test_empty_record_len_is_rejected() {
    let wrapper = calibrated("Temp");
    let batch = BatchRecord::single("m0", Array4::ones((2, 4, 8, 8)), vec![]);
    let err = wrapper.forward(&batch).unwrap_err();
    assert!(matches!(
        err,
        ModelError::Precondition(PreconditionError::EmptyRecordLen)
    ));
}

#[test]
fn test_ego_rows_are_selected_from_the_agent_batch() {
    // Two samples of two agents each: ego rows 0 and 2 out of four.
    let wrapper = calibrated("Temp");
    let mut input = Array4::<f32>::zeros((4, 4, 8, 8));
    for agent in 0..4 {
        input
            .slice_mut(s![agent, .., .., ..])
            .fill(agent as f32 * 0.25);
    }
    let batch = BatchRecord::single("m0", input, vec![2, 2]);
    let bundle = wrapper.forward(&batch).expect("forward");
    assert_eq!(bundle.cls_preds.dim().0, 2);
    assert_eq!(bundle.reg_preds.dim().0, 2);
    assert_eq!(bundle.dir_preds.dim().0, 2);
}

#[test]
fn test_identity_calibration_matches_the_base_pass() {
    // All kinds initialise to the identity, so the calibrated forward must
    // reproduce the base all-agents pass at the ego rows, with regression
    // and direction outputs untouched by construction.
    for kind in ["DBS", "Platt", "Temp"] {
        let wrapper = calibrated(kind);
        let batch = BatchRecord::single("m0", Array4::ones((2, 4, 8, 8)), vec![1, 1]);

        let base = ForwardExecutor::run_agents(
            wrapper.base().pipeline("m0").unwrap(),
            &batch,
        )
        .expect("base forward");
        let bundle = wrapper.forward(&batch).expect("calibrated forward");

        assert_eq!(bundle.reg_preds, base.reg_preds);
        assert_eq!(bundle.dir_preds, base.dir_preds);
        for (a, b) in bundle.cls_preds.iter().zip(base.cls_preds.iter()) {
            assert!((a - b).abs() < 1e-4, "{kind}: {a} vs {b}");
        }
    }
}

#[test]
fn test_calibrated_modalities_are_reported() {
    let wrapper = calibrated("DBS");
    assert_eq!(wrapper.calibrated_modalities(), vec!["m0".to_string()]);
}
