//! Path-dependent TreeSHAP for isolation trees
//!
//! Exact Shapley values of the path-length function of a single tree, using
//! node sample counts as the background distribution (Lundberg et al.,
//! "Consistent Individualized Feature Attribution for Tree Ensembles",
//! Algorithm 2). Runs in O(leaves * depth^2) per row instead of enumerating
//! feature subsets.

use crate::anomaly::{average_path_length, IsolationTree};

#[derive(Debug, Clone, Copy)]
struct PathElement {
    /// `None` for the root sentinel
    feature: Option<usize>,
    zero_fraction: f64,
    one_fraction: f64,
    pweight: f64,
}

/// Shapley values of `tree.path_length(sample)` for every feature.
///
/// The values sum to `tree.path_length(sample, 0) - tree.expected_path_length()`.
pub fn tree_shap(tree: &IsolationTree, sample: &[f64], n_features: usize) -> Vec<f64> {
    let mut phi = vec![0.0; n_features];
    recurse(tree, 0, sample, &mut phi, 0, &[], 1.0, 1.0, None);
    phi
}

#[allow(clippy::too_many_arguments)]
fn recurse(
    node: &IsolationTree,
    depth: usize,
    sample: &[f64],
    phi: &mut [f64],
    unique_depth: usize,
    parent_path: &[PathElement],
    parent_zero_fraction: f64,
    parent_one_fraction: f64,
    parent_feature: Option<usize>,
) {
    let mut path = parent_path[..unique_depth].to_vec();
    extend_path(
        &mut path,
        unique_depth,
        parent_zero_fraction,
        parent_one_fraction,
        parent_feature,
    );

    match node {
        IsolationTree::External { size } => {
            let leaf_value = depth as f64 + average_path_length(*size);
            for i in 1..=unique_depth {
                let w = unwound_path_sum(&path, unique_depth, i);
                let el = path[i];
                if let Some(feature) = el.feature {
                    phi[feature] += w * (el.one_fraction - el.zero_fraction) * leaf_value;
                }
            }
        }
        IsolationTree::Internal {
            feature,
            threshold,
            size,
            left,
            right,
        } => {
            let (hot, cold) = if sample[*feature] < *threshold {
                (left, right)
            } else {
                (right, left)
            };

            let cover = *size as f64;
            let hot_zero_fraction = hot.size() as f64 / cover;
            let cold_zero_fraction = cold.size() as f64 / cover;

            let mut incoming_zero_fraction = 1.0;
            let mut incoming_one_fraction = 1.0;
            let mut unique_depth = unique_depth;

            // A feature split on earlier in the path is unwound and redone here
            if let Some(path_index) = path.iter().position(|el| el.feature == Some(*feature)) {
                incoming_zero_fraction = path[path_index].zero_fraction;
                incoming_one_fraction = path[path_index].one_fraction;
                unwind_path(&mut path, unique_depth, path_index);
                unique_depth -= 1;
            }

            recurse(
                hot,
                depth + 1,
                sample,
                phi,
                unique_depth + 1,
                &path,
                hot_zero_fraction * incoming_zero_fraction,
                incoming_one_fraction,
                Some(*feature),
            );
            recurse(
                cold,
                depth + 1,
                sample,
                phi,
                unique_depth + 1,
                &path,
                cold_zero_fraction * incoming_zero_fraction,
                0.0,
                Some(*feature),
            );
        }
    }
}

fn extend_path(
    path: &mut Vec<PathElement>,
    unique_depth: usize,
    zero_fraction: f64,
    one_fraction: f64,
    feature: Option<usize>,
) {
    path.push(PathElement {
        feature,
        zero_fraction,
        one_fraction,
        pweight: if unique_depth == 0 { 1.0 } else { 0.0 },
    });

    let denom = (unique_depth + 1) as f64;
    for i in (0..unique_depth).rev() {
        path[i + 1].pweight += one_fraction * path[i].pweight * (i + 1) as f64 / denom;
        path[i].pweight = zero_fraction * path[i].pweight * (unique_depth - i) as f64 / denom;
    }
}

fn unwind_path(path: &mut Vec<PathElement>, unique_depth: usize, path_index: usize) {
    let one_fraction = path[path_index].one_fraction;
    let zero_fraction = path[path_index].zero_fraction;
    let mut next_one_portion = path[unique_depth].pweight;
    let denom = (unique_depth + 1) as f64;

    for i in (0..unique_depth).rev() {
        if one_fraction != 0.0 {
            let tmp = path[i].pweight;
            path[i].pweight = next_one_portion * denom / ((i + 1) as f64 * one_fraction);
            next_one_portion =
                tmp - path[i].pweight * zero_fraction * (unique_depth - i) as f64 / denom;
        } else {
            path[i].pweight =
                path[i].pweight * denom / (zero_fraction * (unique_depth - i) as f64);
        }
    }

    for i in path_index..unique_depth {
        path[i].feature = path[i + 1].feature;
        path[i].zero_fraction = path[i + 1].zero_fraction;
        path[i].one_fraction = path[i + 1].one_fraction;
    }
    path.truncate(unique_depth);
}

fn unwound_path_sum(path: &[PathElement], unique_depth: usize, path_index: usize) -> f64 {
    let one_fraction = path[path_index].one_fraction;
    let zero_fraction = path[path_index].zero_fraction;
    let mut next_one_portion = path[unique_depth].pweight;
    let mut total = 0.0;

    if one_fraction != 0.0 {
        for i in (0..unique_depth).rev() {
            let tmp = next_one_portion / ((i + 1) as f64 * one_fraction);
            total += tmp;
            next_one_portion = path[i].pweight - tmp * zero_fraction * (unique_depth - i) as f64;
        }
    } else {
        for i in (0..unique_depth).rev() {
            total += path[i].pweight / (zero_fraction * (unique_depth - i) as f64);
        }
    }

    total * (unique_depth + 1) as f64
}
