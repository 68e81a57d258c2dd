//! Model-agnostic Shapley estimates by permutation sampling.
//!
//! For each sampled feature ordering and each background record, features are switched
//! from the background value to the explained value one at a time and the change in
//! model output is credited to the switched feature. Each pass telescopes to
//! `f(x) - f(background)`, so the averaged contributions sum exactly to the prediction
//! minus the mean background prediction.
//!
//! Orderings come from a `StdRng` seeded once per call: identical input, background and
//! seed give identical output.

use super::{AttributionMethod, AttributionResult, contributions};
use crate::config::SamplingConfig;
use crate::error::{AttributionError, PipelineError};
use crate::model::Regressor;
use crate::predict::{ensure_aligned, invoke, predict};
use crate::record::{FeatureRecord, FeatureValue};
use rand::SeedableRng;
use rand::rngs::StdRng;
use rand::seq::SliceRandom;

/// Seeded permutation-sampling explainer over a fixed background set.
#[derive(Debug, Clone)]
pub struct SamplingExplainer {
    names: Vec<String>,
    background: Vec<Vec<FeatureValue>>,
    seed: u64,
    permutations: usize,
    tolerance: f64,
}

impl SamplingExplainer {
    pub fn new(
        background: &[FeatureRecord],
        seed: u64,
        permutations: usize,
    ) -> Result<Self, AttributionError> {
        let first = background.first().ok_or_else(|| AttributionError::InvalidBackground {
            reason: "background set is empty".to_string(),
        })?;
        if permutations == 0 {
            return Err(AttributionError::InvalidBackground {
                reason: "at least one permutation is required".to_string(),
            });
        }
        if background.iter().any(|r| r.names() != first.names()) {
            return Err(AttributionError::InvalidBackground {
                reason: "background records disagree on column order".to_string(),
            });
        }
        Ok(Self {
            names: first.names().to_vec(),
            background: background.iter().map(|r| r.values().to_vec()).collect(),
            seed,
            permutations,
            tolerance: super::DEFAULT_ADDITIVITY_TOLERANCE,
        })
    }

    pub fn from_config(
        background: &[FeatureRecord],
        config: &SamplingConfig,
    ) -> Result<Self, AttributionError> {
        Self::new(background, config.seed, config.permutations)
    }

    #[must_use]
    pub fn with_tolerance(mut self, tolerance: f64) -> Self {
        self.tolerance = tolerance;
        self
    }

    pub fn seed(&self) -> u64 {
        self.seed
    }

    /// Estimate contributions for one record.
    pub fn explain(
        &self,
        model: &dyn Regressor,
        record: &FeatureRecord,
    ) -> Result<AttributionResult, PipelineError> {
        ensure_aligned(model.feature_names(), record.names())?;
        ensure_aligned(model.feature_names(), &self.names)?;

        let prediction = predict(model, record)?;
        let target = record.values();
        let n = target.len();

        let mut baseline = 0.0;
        for reference in &self.background {
            baseline += invoke(model, reference)?;
        }
        baseline /= self.background.len() as f64;

        let mut rng = StdRng::seed_from_u64(self.seed);
        let mut order: Vec<usize> = (0..n).collect();
        let mut phi = vec![0.0; n];

        for _ in 0..self.permutations {
            order.shuffle(&mut rng);
            for reference in &self.background {
                let mut current = reference.clone();
                let mut previous = invoke(model, &current)?;
                for &feature in &order {
                    current[feature] = target[feature];
                    let next = invoke(model, &current)?;
                    phi[feature] += next - previous;
                    previous = next;
                }
            }
        }

        let passes = (self.permutations * self.background.len()) as f64;
        for value in &mut phi {
            *value /= passes;
        }

        let result = AttributionResult {
            baseline,
            prediction,
            contributions: contributions(record, &phi),
            method: AttributionMethod::PermutationSampling {
                seed: self.seed,
                permutations: self.permutations,
                background_size: self.background.len(),
            },
        }
        .verify(self.tolerance)?;

        tracing::debug!(
            model = model.name(),
            seed = self.seed,
            permutations = self.permutations,
            "Computed sampled attribution"
        );
        Ok(result)
    }
}
