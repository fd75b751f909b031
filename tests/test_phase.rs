//! Integration tests for the phased-training freeze controller.

use bev_perception::config::{CalibratorArgs, CompressorArgs, ModelConfig};
use bev_perception::forward::{BatchRecord, ForwardExecutor};
use bev_perception::phase::{TrainingPhase, TrainingPhaseController};
use bev_perception::pipeline::{PerceptionModel, Subsystem};
use bev_perception::registry::EncoderRegistry;
use bev_perception::{ConfigError, ModelError};
use ndarray::Array4;

fn staged_model() -> PerceptionModel {
    let mut cfg = ModelConfig::default();
    {
        let m = cfg.modalities.get_mut("m0").unwrap();
        m.compressor = Some(CompressorArgs {
            input_dim: 64,
            compress_ratio: 4,
        });
        m.calibrator = Some(CalibratorArgs {
            core_method: "DBS".to_string(),
        });
    }
    PerceptionModel::build(&cfg, &EncoderRegistry::with_builtins()).expect("model builds")
}

#[test]
fn test_base_phase_unfreezes_everything() {
    let mut model = staged_model();
    let report = TrainingPhaseController::new(TrainingPhase::Base)
        .apply(&mut model)
        .expect("base phase applies");
    assert_eq!(report.phase, TrainingPhase::Base);
    assert_eq!(report.trainable, model.all_parameter_names());
}

#[test]
fn test_compressor_phase_trainable_set_is_exactly_the_compressor() {
    let mut model = staged_model();
    let report = TrainingPhaseController::new(TrainingPhase::CompressorOnly)
        .apply(&mut model)
        .expect("compressor phase applies");

    let expected = model
        .pipeline("m0")
        .unwrap()
        .subsystem_parameter_names(Subsystem::Compressor);
    assert_eq!(report.trainable, expected);
    assert_eq!(model.trainable(), &expected);

    // Nothing outside the compressor remains trainable.
    for name in model.all_parameter_names() {
        assert_eq!(
            model.is_trainable(&name),
            name.contains(".compressor."),
            "unexpected trainability for {name}"
        );
    }
}

#[test]
fn test_calibrator_phase_freezes_the_whole_base_model() {
    let mut model = staged_model();
    let report = TrainingPhaseController::new(TrainingPhase::CalibratorOnly)
        .apply(&mut model)
        .expect("calibrator phase applies");
    assert!(report.trainable.is_empty());
    assert!(model.trainable().is_empty());
}

#[test]
fn test_phases_fail_closed_on_absent_subsystems() {
    let mut plain = PerceptionModel::build(
        &ModelConfig::default(),
        &EncoderRegistry::with_builtins(),
    )
    .expect("model builds");

    for phase in [TrainingPhase::CompressorOnly, TrainingPhase::CalibratorOnly] {
        let err = TrainingPhaseController::new(phase)
            .apply(&mut plain)
            .unwrap_err();
        assert!(matches!(
            err,
            ModelError::Config(ConfigError::SubsystemAbsent { .. })
        ));
    }
}

#[test]
fn test_frozen_forwards_are_repeatable() {
    // Frozen components run in eval mode, so running statistics never move
    // and repeated forwards are bit-identical.
    let mut model = staged_model();
    TrainingPhaseController::new(TrainingPhase::CalibratorOnly)
        .apply(&mut model)
        .expect("calibrator phase applies");

    let batch = BatchRecord::single("m0", Array4::ones((2, 4, 8, 8)), vec![2]);
    let first =
        ForwardExecutor::run_agents(model.pipeline("m0").unwrap(), &batch).expect("forward");
    for _ in 0..3 {
        let again =
            ForwardExecutor::run_agents(model.pipeline("m0").unwrap(), &batch).expect("forward");
        assert_eq!(first.cls_preds, again.cls_preds);
        assert_eq!(first.reg_preds, again.reg_preds);
        assert_eq!(first.dir_preds, again.dir_preds);
    }
}

#[test]
fn test_reapplying_base_restores_full_trainability() {
    let mut model = staged_model();
    TrainingPhaseController::new(TrainingPhase::CompressorOnly)
        .apply(&mut model)
        .expect("compressor phase applies");
    assert_ne!(model.trainable(), &model.all_parameter_names());

    TrainingPhaseController::new(TrainingPhase::Base)
        .apply(&mut model)
        .expect("base phase applies");
    assert_eq!(model.trainable(), &model.all_parameter_names());
}
