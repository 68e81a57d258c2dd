//! Error types for the pkexplain core.
//!
//! Uses `thiserror` for a single top-level error wrapping one structured enum per
//! pipeline stage. Every failure is surfaced to the immediate caller; nothing here is
//! retried or downgraded to a default value.

use std::path::PathBuf;

/// Top-level error type for the pkexplain core library.
#[derive(Debug, thiserror::Error)]
pub enum PipelineError {
    #[error("Validation error: {0}")]
    Validation(#[from] ValidationError),

    #[error("Schema error: {0}")]
    Schema(#[from] SchemaError),

    #[error("Prediction error: {0}")]
    Prediction(#[from] PredictionError),

    #[error("Attribution error: {0}")]
    Attribution(#[from] AttributionError),

    #[error("Accuracy error: {0}")]
    Accuracy(#[from] AccuracyError),

    #[error("Model error: {0}")]
    Model(#[from] ModelError),

    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// A caller-supplied value outside its feature's declared domain.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
#[error("invalid value for feature '{feature}': {reason}")]
pub struct ValidationError {
    pub feature: String,
    pub reason: String,
}

impl ValidationError {
    pub fn new(feature: impl Into<String>, reason: impl Into<String>) -> Self {
        Self {
            feature: feature.into(),
            reason: reason.into(),
        }
    }
}

/// Errors from schema construction and column-order checks.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum SchemaError {
    #[error("column order mismatch: expected [{}], found [{}]", .expected.join(", "), .found.join(", "))]
    Mismatch {
        expected: Vec<String>,
        found: Vec<String>,
    },

    #[error("record was validated against schema {found}, pipeline expects {expected}")]
    FingerprintMismatch { expected: String, found: String },

    #[error("schema declares no features")]
    Empty,

    #[error("feature declared more than once: {name}")]
    DuplicateFeature { name: String },

    #[error("invalid domain for feature '{feature}': {reason}")]
    InvalidDomain { feature: String, reason: String },

    #[error("failed to parse schema file {path}: {message}")]
    Parse { path: PathBuf, message: String },
}

/// Errors raised while invoking the underlying regressor.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum PredictionError {
    #[error("model invocation failed: {cause}")]
    Invocation { cause: String },

    #[error("model returned a non-finite value: {value}")]
    NonFinite { value: f64 },
}

/// Errors from the attribution engine.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum AttributionError {
    #[error("model '{model}' does not expose tree structure for exact decomposition")]
    UnsupportedModel { model: String },

    #[error(
        "contributions do not reproduce the prediction: prediction {prediction}, baseline + contributions {reconstructed}"
    )]
    AdditivityViolated { prediction: f64, reconstructed: f64 },

    #[error("invalid background set: {reason}")]
    InvalidBackground { reason: String },
}

/// Errors from accuracy reporting.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum AccuracyError {
    #[error("true and predicted sequences differ in shape: {true_len} vs {predicted_len}")]
    ShapeMismatch { true_len: usize, predicted_len: usize },

    #[error("degenerate evaluation input: {reason}")]
    DegenerateInput { reason: String },
}

/// Errors from loading or validating a persisted model artifact.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum ModelError {
    #[error("failed to load model from {path}: {message}")]
    Load { path: PathBuf, message: String },

    #[error("tree {tree} is malformed: {reason}")]
    InvalidTree { tree: usize, reason: String },

    #[error("model has no trees")]
    EmptyEnsemble,

    #[error("model declares {declared} feature names but splits on feature index {index}")]
    FeatureOutOfRange { declared: usize, index: usize },
}

/// Errors from configuration loading.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to load configuration: {0}")]
    Load(#[from] Box<figment::Error>),

    #[error("invalid configuration value for '{key}': {reason}")]
    Invalid { key: String, reason: String },
}

/// Convenience alias used throughout the crate.
pub type Result<T> = std::result::Result<T, PipelineError>;
