//! Prediction engine.

use crate::error::{PipelineError, PredictionError, SchemaError};
use crate::model::Regressor;
use crate::record::{FeatureRecord, FeatureValue};

/// Predict the concentration for one canonical record.
///
/// The record's columns must match the model's bound ordering exactly; a mismatch is a
/// programming error and fails fast with [`SchemaError::Mismatch`]. A failing or
/// non-finite model output surfaces as [`PredictionError`], never as a default value.
pub fn predict(model: &dyn Regressor, record: &FeatureRecord) -> Result<f64, PipelineError> {
    ensure_aligned(model.feature_names(), record.names())?;
    let value = invoke(model, record.values())?;
    tracing::debug!(model = model.name(), prediction = value, "Predicted concentration");
    Ok(value)
}

/// Fail unless `found` is exactly `expected`, in order.
pub(crate) fn ensure_aligned(expected: &[String], found: &[String]) -> Result<(), SchemaError> {
    if expected != found {
        return Err(SchemaError::Mismatch {
            expected: expected.to_vec(),
            found: found.to_vec(),
        });
    }
    Ok(())
}

/// Call the model and reject non-finite output.
pub(crate) fn invoke(model: &dyn Regressor, values: &[FeatureValue]) -> Result<f64, PredictionError> {
    let value = model.predict(values)?;
    if !value.is_finite() {
        return Err(PredictionError::NonFinite { value });
    }
    Ok(value)
}
