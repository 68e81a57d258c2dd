//! Additive tree-ensemble regressor loaded from a JSON artifact.
//!
//! The prediction is `base_score + Σ tree(x)`. Each tree is a flat node array rooted at
//! index 0; a split sends a sample left when `x[feature] < threshold`. Every node carries
//! its training cover, which the exact attribution path uses to weight unseen branches.

use super::Regressor;
use crate::error::{ModelError, PredictionError};
use crate::record::FeatureValue;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::path::Path;

/// A node in a decision tree.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum TreeNode {
    Split {
        feature: usize,
        threshold: f64,
        left: usize,
        right: usize,
        cover: f64,
    },
    Leaf {
        value: f64,
        cover: f64,
    },
}

impl TreeNode {
    pub fn cover(&self) -> f64 {
        match self {
            TreeNode::Split { cover, .. } | TreeNode::Leaf { cover, .. } => *cover,
        }
    }
}

/// A single regression tree.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DecisionTree {
    pub nodes: Vec<TreeNode>,
}

impl DecisionTree {
    pub fn new(nodes: Vec<TreeNode>) -> Self {
        Self { nodes }
    }

    /// Walk from the root to a leaf.
    pub fn predict(&self, x: &[f64]) -> f64 {
        let mut index = 0;
        loop {
            match &self.nodes[index] {
                TreeNode::Leaf { value, .. } => return *value,
                TreeNode::Split {
                    feature,
                    threshold,
                    left,
                    right,
                    ..
                } => {
                    index = if x[*feature] < *threshold { *left } else { *right };
                }
            }
        }
    }

    /// Share of the training cover routed to each child of a split.
    pub(crate) fn split_fractions(&self, left: usize, right: usize) -> (f64, f64) {
        let l = self.nodes[left].cover();
        let r = self.nodes[right].cover();
        let total = l + r;
        (l / total, r / total)
    }

    /// Cover-weighted mean leaf value.
    pub fn expected_value(&self) -> f64 {
        self.node_expectation(0)
    }

    fn node_expectation(&self, index: usize) -> f64 {
        match &self.nodes[index] {
            TreeNode::Leaf { value, .. } => *value,
            TreeNode::Split { left, right, .. } => {
                let (fl, fr) = self.split_fractions(*left, *right);
                fl * self.node_expectation(*left) + fr * self.node_expectation(*right)
            }
        }
    }

    fn validate(&self, tree: usize, n_features: usize) -> Result<(), ModelError> {
        let invalid = |reason: String| ModelError::InvalidTree { tree, reason };
        if self.nodes.is_empty() {
            return Err(invalid("tree has no nodes".to_string()));
        }

        let mut parents = vec![0usize; self.nodes.len()];
        for (index, node) in self.nodes.iter().enumerate() {
            let cover = node.cover();
            if !cover.is_finite() || cover <= 0.0 {
                return Err(invalid(format!("node {index} has non-positive cover {cover}")));
            }
            match node {
                TreeNode::Leaf { value, .. } => {
                    if !value.is_finite() {
                        return Err(invalid(format!("leaf {index} has non-finite value")));
                    }
                }
                TreeNode::Split {
                    feature,
                    threshold,
                    left,
                    right,
                    ..
                } => {
                    if *feature >= n_features {
                        return Err(ModelError::FeatureOutOfRange {
                            declared: n_features,
                            index: *feature,
                        });
                    }
                    if !threshold.is_finite() {
                        return Err(invalid(format!("split {index} has non-finite threshold")));
                    }
                    for child in [*left, *right] {
                        // Children follow their parent, which rules out cycles.
                        if child <= index || child >= self.nodes.len() {
                            return Err(invalid(format!(
                                "split {index} points at invalid child {child}"
                            )));
                        }
                        parents[child] += 1;
                    }
                }
            }
        }

        if let Some(orphan) = (1..self.nodes.len()).find(|&i| parents[i] != 1) {
            return Err(invalid(format!(
                "node {orphan} has {} parents, expected exactly one",
                parents[orphan]
            )));
        }
        Ok(())
    }
}

/// On-disk ensemble layout.
#[derive(Debug, Clone, Serialize, Deserialize)]
struct EnsembleDocument {
    #[serde(default = "default_model_name")]
    name: String,
    feature_names: Vec<String>,
    #[serde(default)]
    base_score: f64,
    trees: Vec<DecisionTree>,
}

fn default_model_name() -> String {
    "tree-ensemble".to_string()
}

/// A persisted model: either a bare ensemble or the output of a hyperparameter search
/// wrapping its best estimator.
#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum ModelArtifact {
    Search {
        best_estimator: EnsembleDocument,
        #[serde(default)]
        best_params: serde_json::Value,
        #[serde(default)]
        best_score: Option<f64>,
    },
    Bare(EnsembleDocument),
}

/// Additive ensemble of regression trees.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "EnsembleDocument", into = "EnsembleDocument")]
pub struct TreeEnsemble {
    name: String,
    feature_names: Vec<String>,
    base_score: f64,
    trees: Vec<DecisionTree>,
    expected_value: f64,
}

impl TryFrom<EnsembleDocument> for TreeEnsemble {
    type Error = ModelError;

    fn try_from(doc: EnsembleDocument) -> Result<Self, Self::Error> {
        Self::new(doc.name, doc.feature_names, doc.base_score, doc.trees)
    }
}

impl From<TreeEnsemble> for EnsembleDocument {
    fn from(model: TreeEnsemble) -> Self {
        Self {
            name: model.name,
            feature_names: model.feature_names,
            base_score: model.base_score,
            trees: model.trees,
        }
    }
}

impl TreeEnsemble {
    /// Build and structurally validate an ensemble.
    pub fn new(
        name: impl Into<String>,
        feature_names: Vec<String>,
        base_score: f64,
        trees: Vec<DecisionTree>,
    ) -> Result<Self, ModelError> {
        if trees.is_empty() {
            return Err(ModelError::EmptyEnsemble);
        }
        let mut seen = HashSet::new();
        for name in &feature_names {
            if !seen.insert(name.as_str()) {
                return Err(ModelError::InvalidTree {
                    tree: 0,
                    reason: format!("feature name '{name}' is declared twice"),
                });
            }
        }
        if !base_score.is_finite() {
            return Err(ModelError::InvalidTree {
                tree: 0,
                reason: "base score is not finite".to_string(),
            });
        }
        for (i, tree) in trees.iter().enumerate() {
            tree.validate(i, feature_names.len())?;
        }

        let expected_value = base_score + trees.iter().map(DecisionTree::expected_value).sum::<f64>();
        Ok(Self {
            name: name.into(),
            feature_names,
            base_score,
            trees,
            expected_value,
        })
    }

    /// Parse an artifact, unwrapping a search result to its best estimator.
    pub fn from_json_str(json: &str) -> Result<Self, ModelError> {
        let artifact: ModelArtifact =
            serde_json::from_str(json).map_err(|e| ModelError::Load {
                path: "<memory>".into(),
                message: e.to_string(),
            })?;
        let doc = match artifact {
            ModelArtifact::Search {
                best_estimator,
                best_params,
                best_score,
            } => {
                tracing::debug!(
                    best_params = %best_params,
                    best_score = ?best_score,
                    "Unwrapping best estimator from search result"
                );
                best_estimator
            }
            ModelArtifact::Bare(doc) => doc,
        };
        Self::try_from(doc)
    }

    pub fn base_score(&self) -> f64 {
        self.base_score
    }

    pub fn trees(&self) -> &[DecisionTree] {
        &self.trees
    }

    pub fn n_features(&self) -> usize {
        self.feature_names.len()
    }

    /// Raw prediction over real-valued features.
    pub fn predict_values(&self, x: &[f64]) -> f64 {
        self.base_score + self.trees.iter().map(|t| t.predict(x)).sum::<f64>()
    }
}

impl Regressor for TreeEnsemble {
    fn name(&self) -> &str {
        &self.name
    }

    fn feature_names(&self) -> &[String] {
        &self.feature_names
    }

    fn predict(&self, features: &[FeatureValue]) -> Result<f64, PredictionError> {
        if features.len() != self.feature_names.len() {
            return Err(PredictionError::Invocation {
                cause: format!(
                    "expected {} features, got {}",
                    self.feature_names.len(),
                    features.len()
                ),
            });
        }
        let x: Vec<f64> = features.iter().map(FeatureValue::as_f64).collect();
        Ok(self.predict_values(&x))
    }

    fn baseline_value(&self) -> f64 {
        self.expected_value
    }

    fn tree_structure(&self) -> Option<&TreeEnsemble> {
        Some(self)
    }
}

/// Load a tree-ensemble artifact from a JSON file.
pub fn load_model(path: &Path) -> Result<TreeEnsemble, ModelError> {
    let load_err = |message: String| ModelError::Load {
        path: path.to_path_buf(),
        message,
    };
    let content = std::fs::read_to_string(path).map_err(|e| load_err(e.to_string()))?;
    let model = TreeEnsemble::from_json_str(&content).map_err(|e| match e {
        ModelError::Load { message, .. } => load_err(message),
        other => other,
    })?;
    tracing::info!(
        path = %path.display(),
        model = %model.name,
        trees = model.trees.len(),
        features = model.n_features(),
        baseline = model.expected_value,
        "Loaded model artifact"
    );
    Ok(model)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn stump() -> TreeEnsemble {
        TreeEnsemble::new(
            "stump",
            vec!["AGE".into(), "WT".into()],
            0.5,
            vec![DecisionTree::new(vec![
                TreeNode::Split {
                    feature: 0,
                    threshold: 5.0,
                    left: 1,
                    right: 2,
                    cover: 40.0,
                },
                TreeNode::Leaf {
                    value: 1.0,
                    cover: 30.0,
                },
                TreeNode::Leaf {
                    value: 3.0,
                    cover: 10.0,
                },
            ])],
        )
        .unwrap()
    }

    #[test]
    fn test_predict_routes_by_threshold() {
        let model = stump();
        assert_eq!(model.predict_values(&[2.0, 0.0]), 1.5);
        assert_eq!(model.predict_values(&[5.0, 0.0]), 3.5);
    }

    #[test]
    fn test_baseline_is_cover_weighted() {
        let model = stump();
        // 0.5 + 0.75 * 1.0 + 0.25 * 3.0
        assert!((model.baseline_value() - 2.0).abs() < 1e-12);
    }

    #[test]
    fn test_predict_rejects_wrong_width() {
        let model = stump();
        let err = Regressor::predict(&model, &[FeatureValue::Numeric(1.0)]).unwrap_err();
        assert!(matches!(err, PredictionError::Invocation { .. }));
    }

    #[test]
    fn test_categorical_code_is_split_as_number() {
        let model = TreeEnsemble::new(
            "sex",
            vec!["SEX".into()],
            0.0,
            vec![DecisionTree::new(vec![
                TreeNode::Split {
                    feature: 0,
                    threshold: 0.5,
                    left: 1,
                    right: 2,
                    cover: 2.0,
                },
                TreeNode::Leaf {
                    value: -1.0,
                    cover: 1.0,
                },
                TreeNode::Leaf {
                    value: 1.0,
                    cover: 1.0,
                },
            ])],
        )
        .unwrap();
        assert_eq!(
            Regressor::predict(&model, &[FeatureValue::Categorical(1)]),
            Ok(1.0)
        );
    }

    #[test]
    fn test_rejects_backward_child() {
        let result = TreeEnsemble::new(
            "cyclic",
            vec!["AGE".into()],
            0.0,
            vec![DecisionTree::new(vec![
                TreeNode::Split {
                    feature: 0,
                    threshold: 1.0,
                    left: 0,
                    right: 1,
                    cover: 2.0,
                },
                TreeNode::Leaf {
                    value: 1.0,
                    cover: 1.0,
                },
            ])],
        );
        assert!(matches!(result, Err(ModelError::InvalidTree { .. })));
    }

    #[test]
    fn test_rejects_feature_out_of_range() {
        let result = TreeEnsemble::new(
            "wide",
            vec!["AGE".into()],
            0.0,
            vec![DecisionTree::new(vec![
                TreeNode::Split {
                    feature: 3,
                    threshold: 1.0,
                    left: 1,
                    right: 2,
                    cover: 2.0,
                },
                TreeNode::Leaf {
                    value: 1.0,
                    cover: 1.0,
                },
                TreeNode::Leaf {
                    value: 2.0,
                    cover: 1.0,
                },
            ])],
        );
        assert_eq!(
            result,
            Err(ModelError::FeatureOutOfRange {
                declared: 1,
                index: 3
            })
        );
    }

    #[test]
    fn test_rejects_zero_cover() {
        let result = TreeEnsemble::new(
            "empty-leaf",
            vec!["AGE".into()],
            0.0,
            vec![DecisionTree::new(vec![TreeNode::Leaf {
                value: 1.0,
                cover: 0.0,
            }])],
        );
        assert!(matches!(result, Err(ModelError::InvalidTree { .. })));
    }

    #[test]
    fn test_rejects_empty_ensemble() {
        let result = TreeEnsemble::new("none", vec!["AGE".into()], 0.0, Vec::new());
        assert_eq!(result, Err(ModelError::EmptyEnsemble));
    }

    #[test]
    fn test_from_json_bare_and_search_envelope() {
        let ensemble = r#"{
            "name": "cat",
            "feature_names": ["AGE"],
            "base_score": 1.0,
            "trees": [{"nodes": [
                {"feature": 0, "threshold": 5.0, "left": 1, "right": 2, "cover": 4.0},
                {"value": -1.0, "cover": 2.0},
                {"value": 1.0, "cover": 2.0}
            ]}]
        }"#;
        let bare = TreeEnsemble::from_json_str(ensemble).unwrap();
        let wrapped = TreeEnsemble::from_json_str(&format!(
            r#"{{"best_estimator": {ensemble}, "best_params": {{"depth": 6}}, "best_score": 0.91}}"#
        ))
        .unwrap();
        assert_eq!(bare, wrapped);
        assert_eq!(bare.name(), "cat");
        assert_eq!(bare.predict_values(&[7.0]), 2.0);
    }

    #[test]
    fn test_load_model_from_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("model.json");
        std::fs::write(
            &path,
            r#"{"feature_names": ["AGE"], "trees": [{"nodes": [{"value": 4.2, "cover": 1.0}]}]}"#,
        )
        .unwrap();
        let model = load_model(&path).unwrap();
        assert_eq!(model.name(), "tree-ensemble");
        assert_eq!(model.baseline_value(), 4.2);

        let missing = load_model(&dir.path().join("missing.json")).unwrap_err();
        assert!(matches!(missing, ModelError::Load { .. }));
    }
}
