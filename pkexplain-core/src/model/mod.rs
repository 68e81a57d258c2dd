//! Model contract: the opaque regressor consumed by prediction and attribution.
//!
//! A model is bound to exactly one column ordering, loaded once, and shared read-only
//! for the life of the process. Implementations must not mutate internal state during
//! `predict`, so a single handle can serve concurrent callers without locking.

pub mod tree;

pub use tree::{DecisionTree, TreeEnsemble, TreeNode, load_model};

use crate::error::PredictionError;
use crate::record::FeatureValue;
use serde::{Deserialize, Serialize};
use std::sync::Arc;

/// A trained regressor.
pub trait Regressor: Send + Sync {
    fn name(&self) -> &str;

    /// Column names in the order the model was trained on.
    fn feature_names(&self) -> &[String];

    /// Predict a single scalar for one record. Categorical columns arrive as integer codes.
    fn predict(&self, features: &[FeatureValue]) -> Result<f64, PredictionError>;

    /// Expected model output over the training distribution; the attribution zero-point.
    fn baseline_value(&self) -> f64;

    /// Internal tree structure, when the model can be decomposed exactly.
    fn tree_structure(&self) -> Option<&TreeEnsemble> {
        None
    }
}

/// Shared, read-only model handle.
pub type ModelHandle = Arc<dyn Regressor>;

/// Summary of a loaded model for logging and display.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModelInfo {
    pub name: String,
    pub feature_count: usize,
    pub tree_count: Option<usize>,
    pub baseline: f64,
    pub exact_attribution: bool,
    pub loaded_at: chrono::DateTime<chrono::Utc>,
}

impl ModelInfo {
    pub fn of(model: &dyn Regressor) -> Self {
        let tree = model.tree_structure();
        Self {
            name: model.name().to_string(),
            feature_count: model.feature_names().len(),
            tree_count: tree.map(|t| t.trees().len()),
            baseline: model.baseline_value(),
            exact_attribution: tree.is_some(),
            loaded_at: chrono::Utc::now(),
        }
    }
}
