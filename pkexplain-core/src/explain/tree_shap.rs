//! Exact path-dependent Shapley values for tree ensembles.
//!
//! Polynomial-time recursion of Lundberg et al. (2018), "Consistent Individualized
//! Feature Attribution for Tree Ensembles", Algorithm 2. Branches a feature does not
//! decide are weighted by their training cover, so contributions sum exactly to
//! `prediction - expected_value` where the expected value uses the same cover weights
//! as [`DecisionTree::expected_value`].
//!
//! Deterministic: no sampling is involved.

use crate::model::{DecisionTree, TreeEnsemble, TreeNode};

/// One entry of the unique feature path.
#[derive(Debug, Clone, Copy)]
struct PathElement {
    /// `None` for the root sentinel.
    feature: Option<usize>,
    zero_fraction: f64,
    one_fraction: f64,
    weight: f64,
}

/// Shapley values of every feature for one sample, summed over all trees.
pub fn shap_values(ensemble: &TreeEnsemble, x: &[f64]) -> Vec<f64> {
    let mut phi = vec![0.0; ensemble.n_features()];
    for tree in ensemble.trees() {
        tree_shap(tree, x, &mut phi);
    }
    phi
}

/// Accumulate one tree's contributions into `phi`.
pub fn tree_shap(tree: &DecisionTree, x: &[f64], phi: &mut [f64]) {
    recurse(tree, x, phi, 0, Vec::with_capacity(16), 1.0, 1.0, None);
}

#[allow(clippy::too_many_arguments)]
fn recurse(
    tree: &DecisionTree,
    x: &[f64],
    phi: &mut [f64],
    node: usize,
    mut path: Vec<PathElement>,
    zero_fraction: f64,
    one_fraction: f64,
    feature: Option<usize>,
) {
    extend(&mut path, zero_fraction, one_fraction, feature);

    match &tree.nodes[node] {
        TreeNode::Leaf { value, .. } => {
            for i in 1..path.len() {
                let w = unwound_sum(&path, i);
                let el = path[i];
                if let Some(f) = el.feature {
                    phi[f] += w * (el.one_fraction - el.zero_fraction) * value;
                }
            }
        }
        TreeNode::Split {
            feature: split,
            threshold,
            left,
            right,
            ..
        } => {
            let (left_fraction, right_fraction) = tree.split_fractions(*left, *right);
            let (hot, hot_fraction, cold, cold_fraction) = if x[*split] < *threshold {
                (*left, left_fraction, *right, right_fraction)
            } else {
                (*right, right_fraction, *left, left_fraction)
            };

            // A feature already on the path is undone so this split can redo it.
            let mut incoming_zero = 1.0;
            let mut incoming_one = 1.0;
            if let Some(k) = path.iter().position(|el| el.feature == Some(*split)) {
                incoming_zero = path[k].zero_fraction;
                incoming_one = path[k].one_fraction;
                unwind(&mut path, k);
            }

            recurse(
                tree,
                x,
                phi,
                hot,
                path.clone(),
                hot_fraction * incoming_zero,
                incoming_one,
                Some(*split),
            );
            recurse(
                tree,
                x,
                phi,
                cold,
                path,
                cold_fraction * incoming_zero,
                0.0,
                Some(*split),
            );
        }
    }
}

fn extend(path: &mut Vec<PathElement>, zero_fraction: f64, one_fraction: f64, feature: Option<usize>) {
    let depth = path.len();
    path.push(PathElement {
        feature,
        zero_fraction,
        one_fraction,
        weight: if depth == 0 { 1.0 } else { 0.0 },
    });
    let denom = (depth + 1) as f64;
    for i in (0..depth).rev() {
        path[i + 1].weight += one_fraction * path[i].weight * (i + 1) as f64 / denom;
        path[i].weight = zero_fraction * path[i].weight * (depth - i) as f64 / denom;
    }
}

fn unwind(path: &mut Vec<PathElement>, index: usize) {
    let depth = path.len() - 1;
    let one_fraction = path[index].one_fraction;
    let zero_fraction = path[index].zero_fraction;
    let denom = (depth + 1) as f64;
    let mut next_one_portion = path[depth].weight;

    for i in (0..depth).rev() {
        if one_fraction != 0.0 {
            let tmp = path[i].weight;
            path[i].weight = next_one_portion * denom / ((i + 1) as f64 * one_fraction);
            next_one_portion = tmp - path[i].weight * zero_fraction * (depth - i) as f64 / denom;
        } else {
            path[i].weight = path[i].weight * denom / (zero_fraction * (depth - i) as f64);
        }
    }

    for i in index..depth {
        path[i].feature = path[i + 1].feature;
        path[i].zero_fraction = path[i + 1].zero_fraction;
        path[i].one_fraction = path[i + 1].one_fraction;
    }
    path.pop();
}

/// Total permutation weight of the path with element `index` removed.
fn unwound_sum(path: &[PathElement], index: usize) -> f64 {
    let depth = path.len() - 1;
    let one_fraction = path[index].one_fraction;
    let zero_fraction = path[index].zero_fraction;
    let mut next_one_portion = path[depth].weight;
    let mut total = 0.0;

    if one_fraction != 0.0 {
        for i in (0..depth).rev() {
            let tmp = next_one_portion / ((i + 1) as f64 * one_fraction);
            total += tmp;
            next_one_portion = path[i].weight - tmp * zero_fraction * (depth - i) as f64;
        }
    } else {
        for i in (0..depth).rev() {
            total += path[i].weight / (zero_fraction * (depth - i) as f64);
        }
    }
    total * (depth + 1) as f64
}
