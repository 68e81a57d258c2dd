//! End-to-end tests over a persisted tree-ensemble artifact.

use pkexplain_core::config::PipelineConfig;
use pkexplain_core::error::{PipelineError, ValidationError};
use pkexplain_core::explain::DEFAULT_ADDITIVITY_TOLERANCE;
use pkexplain_core::{
    EvaluationSample, FeatureSchema, Pipeline, RawInput, RawValue, Regressor, load_config,
    load_model,
};
use pretty_assertions::assert_eq;
use std::path::PathBuf;
use std::sync::Arc;

fn fixture() -> PathBuf {
    PathBuf::from(env!("CARGO_MANIFEST_DIR")).join("tests/fixtures/concentration_model.json")
}

fn pipeline() -> Pipeline {
    let model = load_model(&fixture()).unwrap();
    Pipeline::new(FeatureSchema::concentration(), Arc::new(model)).unwrap()
}

fn input(pairs: &[(&str, RawValue)]) -> RawInput {
    pairs
        .iter()
        .map(|(k, v)| (k.to_string(), v.clone()))
        .collect()
}

fn assert_close(actual: f64, expected: f64) {
    assert!(
        (actual - expected).abs() < 1e-9,
        "expected {expected}, got {actual}"
    );
}

#[test]
fn search_envelope_is_unwrapped_to_best_estimator() {
    let model = load_model(&fixture()).unwrap();
    assert_eq!(model.name(), "catboost-concentration");
    assert_eq!(model.trees().len(), 3);
    assert_eq!(model.feature_names(), FeatureSchema::concentration().names());
}

#[test]
fn defaults_only_input_predicts_default_patient() {
    let output = pipeline().run(&RawInput::new()).unwrap();
    // 6.2 + 1.2 (dose < 600, CL < 5) + 0.6 (AGE < 8) + 0.15 (female)
    assert_close(output.prediction, 8.15);
    assert_eq!(output.record.values().len(), 12);
}

#[test]
fn high_daily_dose_moves_prediction_and_dominates_attribution() {
    let pipeline = pipeline();
    let output = pipeline
        .run(&input(&[("Daily_Dose", RawValue::from(800))]))
        .unwrap();
    assert_close(output.prediction, 10.95);

    let attribution = output.attribution.unwrap();
    assert!(attribution.is_additive(DEFAULT_ADDITIVITY_TOLERANCE));
    let top = attribution.top_contributions(1);
    assert_eq!(top[0].name, "Daily_Dose");
    assert!(top[0].contribution > 0.0);
}

#[test]
fn sex_code_reaches_model_as_integer_category() {
    let pipeline = pipeline();
    let male = pipeline
        .run(&input(&[("SEX", RawValue::from(1))]))
        .unwrap();
    assert_close(male.prediction, 7.8);
    assert_eq!(male.record.get("SEX").and_then(|v| v.as_code()), Some(1));
    assert!(male.attribution.unwrap().contribution("SEX").unwrap() < 0.0);
}

#[test]
fn unused_features_contribute_nothing() {
    let attribution = pipeline()
        .run(&input(&[
            ("WT", RawValue::from(70.0)),
            ("ALT", RawValue::from(120)),
        ]))
        .unwrap()
        .attribution
        .unwrap();
    for name in ["WT", "Single_Dose", "SCR", "BUN", "ALT", "AST", "V"] {
        assert_eq!(attribution.contribution(name), Some(0.0), "{name}");
    }
}

#[test]
fn attribution_is_additive_across_patients() {
    let pipeline = pipeline();
    let patients = [
        input(&[]),
        input(&[("AGE", RawValue::from(12)), ("CLCR", RawValue::from(150))]),
        input(&[("AGE", RawValue::from(16)), ("CLCR", RawValue::from(40))]),
        input(&[("CL", RawValue::from(9.5)), ("SEX", RawValue::from(1))]),
        input(&[("Daily_Dose", RawValue::from(1200)), ("CL", RawValue::from(20))]),
    ];
    for raw in &patients {
        let output = pipeline.run(raw).unwrap();
        let attribution = output.attribution.unwrap();
        assert_close(attribution.prediction, output.prediction);
        assert_close(attribution.reconstructed(), output.prediction);
        assert_close(attribution.baseline, pipeline.model().baseline_value());
    }
}

#[test]
fn out_of_range_value_is_reported_not_clamped() {
    let err = pipeline()
        .run(&input(&[("AGE", RawValue::from(25))]))
        .unwrap_err();
    match err {
        PipelineError::Validation(ValidationError { feature, reason }) => {
            assert_eq!(feature, "AGE");
            assert!(reason.contains("25"), "{reason}");
        }
        other => panic!("unexpected error: {other}"),
    }
}

#[test]
fn text_for_categorical_is_rejected() {
    let err = pipeline()
        .run(&input(&[("SEX", RawValue::from("Male"))]))
        .unwrap_err();
    assert!(matches!(err, PipelineError::Validation(_)));
}

#[test]
fn unknown_feature_is_rejected() {
    let err = pipeline()
        .run(&input(&[("HEIGHT", RawValue::from(120))]))
        .unwrap_err();
    assert!(matches!(
        err,
        PipelineError::Validation(ValidationError { ref feature, .. }) if feature == "HEIGHT"
    ));
}

#[test]
fn repeated_runs_are_bit_identical() {
    let pipeline = pipeline();
    let raw = input(&[("AGE", RawValue::from(11.5)), ("CL", RawValue::from(7))]);
    let first = pipeline.run(&raw).unwrap();
    let second = pipeline.run(&raw).unwrap();
    assert_eq!(first.prediction.to_bits(), second.prediction.to_bits());
    assert_eq!(first.attribution.unwrap(), second.attribution.unwrap());
}

#[test]
fn evaluation_reports_reference_metrics() {
    let sample = EvaluationSample::new(
        vec![1.0, 2.0, 3.0, 4.0, 5.0],
        vec![1.1, 2.1, 2.9, 4.1, 5.1],
    );
    let report = pipeline().evaluate(&sample).unwrap();
    assert_eq!(report.n, 5);
    assert_close(report.mae, 0.1);
    assert_close(report.mse, 0.01);
    assert_close(report.r_squared, 0.995);
    // every residual is within the default 20% band
    assert_eq!(report.within_relative, Some(1.0));
}

#[test]
fn pipeline_builds_from_workspace_config() {
    let dir = tempfile::tempdir().unwrap();
    let config_dir = dir.path().join(".pkexplain");
    std::fs::create_dir_all(&config_dir).unwrap();
    std::fs::write(
        config_dir.join("config.toml"),
        format!(
            "[model]\npath = {:?}\n\n[attribution]\ntop_n = 4\n",
            fixture().display().to_string()
        ),
    )
    .unwrap();

    let config = load_config(Some(dir.path()), None).unwrap();
    let pipeline = Pipeline::from_config(&config).unwrap();
    assert_eq!(pipeline.top_n(), 4);
    assert_eq!(pipeline.model_info().name, "catboost-concentration");
}

#[test]
fn missing_model_file_is_a_model_error() {
    let mut config = PipelineConfig::default();
    config.model.path = Some(PathBuf::from("/nonexistent/model.json"));
    assert!(matches!(
        Pipeline::from_config(&config),
        Err(PipelineError::Model(_))
    ));
}
