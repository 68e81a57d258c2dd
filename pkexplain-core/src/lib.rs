//! # pkexplain-core
//!
//! Explainable drug-concentration prediction.
//!
//! Validates patient covariates against a fixed feature schema, predicts a plasma
//! concentration with a trained tree ensemble, decomposes each prediction into
//! additive per-feature contributions, and scores prediction accuracy over held-out data.
//!
//! ## Pipeline
//!
//! 1. [`record::normalize`] turns raw key/value input into a canonical [`FeatureRecord`]
//! 2. [`predict::predict`] scores the record with a shared [`model::Regressor`]
//! 3. [`explain::explain`] returns a baseline plus contributions that sum to the prediction
//! 4. [`accuracy::report`] summarizes MAE, MSE, R² and tolerance hit rates

pub mod accuracy;
pub mod config;
pub mod error;
pub mod explain;
pub mod model;
pub mod pipeline;
pub mod predict;
pub mod record;
pub mod schema;

pub use accuracy::{AccuracyReport, EvaluationSample, Tolerances};
pub use config::{PipelineConfig, load_config};
pub use error::{PipelineError, Result};
pub use explain::{AttributionMethod, AttributionResult, FeatureContribution, SamplingExplainer};
pub use model::{ModelHandle, ModelInfo, Regressor, TreeEnsemble, load_model};
pub use pipeline::{Pipeline, PipelineOutput};
pub use record::{FeatureRecord, FeatureValue, RawInput, RawValue};
pub use schema::{FeatureKind, FeatureSchema, FeatureSpec};
