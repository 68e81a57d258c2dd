//! Attribution engine: per-feature contributions to a single prediction.
//!
//! Every result satisfies local accuracy: `baseline + Σ contributions == prediction`
//! within the configured relative tolerance. Exact decomposition is the default and
//! requires a tree-structured model; a model-agnostic sampling explainer is available
//! only by explicit opt-in, with a fixed seed.

pub mod sampling;
pub mod tree_shap;

pub use sampling::SamplingExplainer;

use crate::error::{AttributionError, PipelineError};
use crate::model::Regressor;
use crate::predict::{ensure_aligned, predict};
use crate::record::{FeatureRecord, FeatureValue};
use serde::{Deserialize, Serialize};

/// Default additivity tolerance.
///
/// The bound is `tolerance * max(1, |prediction|)`: relative for predictions above
/// 1 mg/L and absolute below it, so sub-1 predictions are not held to a tighter bound.
pub const DEFAULT_ADDITIVITY_TOLERANCE: f64 = 1e-6;

/// How contributions were computed.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "method", rename_all = "snake_case")]
pub enum AttributionMethod {
    /// Exact path-dependent decomposition over tree structure.
    TreePathDependent,
    /// Seeded permutation sampling against a background set.
    PermutationSampling {
        seed: u64,
        permutations: usize,
        background_size: usize,
    },
}

/// Signed contribution of one feature.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FeatureContribution {
    pub name: String,
    pub value: FeatureValue,
    pub contribution: f64,
}

/// Baseline plus per-feature contributions, aligned to schema order.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AttributionResult {
    pub baseline: f64,
    pub prediction: f64,
    pub contributions: Vec<FeatureContribution>,
    pub method: AttributionMethod,
}

impl AttributionResult {
    /// `baseline + Σ contributions`.
    pub fn reconstructed(&self) -> f64 {
        self.baseline + self.contributions.iter().map(|c| c.contribution).sum::<f64>()
    }

    /// True when `|baseline + Σ contributions - prediction| <= tolerance * max(1, |prediction|)`.
    pub fn is_additive(&self, tolerance: f64) -> bool {
        let scale = self.prediction.abs().max(1.0);
        (self.reconstructed() - self.prediction).abs() <= tolerance * scale
    }

    pub fn contribution(&self, name: &str) -> Option<f64> {
        self.contributions
            .iter()
            .find(|c| c.name == name)
            .map(|c| c.contribution)
    }

    /// The `n` contributions with the largest magnitude, largest first.
    pub fn top_contributions(&self, n: usize) -> Vec<&FeatureContribution> {
        let mut items: Vec<_> = self.contributions.iter().collect();
        items.sort_by(|a, b| b.contribution.abs().total_cmp(&a.contribution.abs()));
        items.truncate(n);
        items
    }

    pub(crate) fn verify(self, tolerance: f64) -> Result<Self, AttributionError> {
        if !self.is_additive(tolerance) {
            return Err(AttributionError::AdditivityViolated {
                prediction: self.prediction,
                reconstructed: self.reconstructed(),
            });
        }
        Ok(self)
    }
}

/// Explain one record exactly, using the default additivity tolerance.
pub fn explain(model: &dyn Regressor, record: &FeatureRecord) -> Result<AttributionResult, PipelineError> {
    explain_with_tolerance(model, record, DEFAULT_ADDITIVITY_TOLERANCE)
}

/// Explain one record exactly.
///
/// Fails with [`AttributionError::UnsupportedModel`] when the model does not expose
/// tree structure; it never falls back to an approximation on its own.
pub fn explain_with_tolerance(
    model: &dyn Regressor,
    record: &FeatureRecord,
    tolerance: f64,
) -> Result<AttributionResult, PipelineError> {
    ensure_aligned(model.feature_names(), record.names())?;
    let ensemble = model
        .tree_structure()
        .ok_or_else(|| AttributionError::UnsupportedModel {
            model: model.name().to_string(),
        })?;

    let prediction = predict(model, record)?;
    let phi = tree_shap::shap_values(ensemble, &record.to_f64_vec());
    let result = AttributionResult {
        baseline: model.baseline_value(),
        prediction,
        contributions: contributions(record, &phi),
        method: AttributionMethod::TreePathDependent,
    }
    .verify(tolerance)?;

    tracing::debug!(
        model = model.name(),
        baseline = result.baseline,
        prediction = result.prediction,
        "Computed exact attribution"
    );
    Ok(result)
}

pub(crate) fn contributions(record: &FeatureRecord, phi: &[f64]) -> Vec<FeatureContribution> {
    record
        .iter()
        .zip(phi.iter())
        .map(|((name, value), contribution)| FeatureContribution {
            name: name.to_string(),
            value,
            contribution: *contribution,
        })
        .collect()
}
