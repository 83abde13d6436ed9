//! Model explainability module
//!
//! Additive per-feature attribution of anomaly scores:
//! - Exact path-dependent TreeSHAP on every isolation tree
//! - Ensemble averaging and conversion from path-length to score units
//! - Local (per-row) explanations and a global feature ranking
//!
//! Attribution never fails a pipeline run. Anything that prevents it is
//! reported as [`AttributionOutcome::Unavailable`] with a reason.

mod local_explanations;
mod tree_shap;

pub use local_explanations::{
    AttributionMatrix, AttributionSummary, FeatureContribution, FeatureRank, LocalExplanation,
};
pub use tree_shap::tree_shap;

use crate::anomaly::{AnomalyDetector, TreeEnsemble};
use crate::preprocessing::FeatureMatrix;
use ndarray::{s, Array2};
use serde::{Deserialize, Serialize};
use std::time::Instant;
use tracing::{debug, info, warn};

/// Step for the numerical derivative of the score map when the
/// path-length delta is too small to divide by
const DERIVATIVE_EPS: f64 = 1e-6;

/// Configuration for attribution
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AttributionConfig {
    /// Number of leading rows to explain
    pub max_rows: usize,
}

impl Default for AttributionConfig {
    fn default() -> Self {
        Self { max_rows: 100 }
    }
}

/// Result of an attribution attempt
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum AttributionOutcome {
    Available(AttributionSummary),
    Unavailable { reason: String },
}

impl AttributionOutcome {
    fn unavailable(reason: impl Into<String>) -> Self {
        let reason = reason.into();
        warn!(%reason, "Feature attribution unavailable");
        AttributionOutcome::Unavailable { reason }
    }

    pub fn is_available(&self) -> bool {
        matches!(self, AttributionOutcome::Available(_))
    }

    pub fn summary(&self) -> Option<&AttributionSummary> {
        match self {
            AttributionOutcome::Available(summary) => Some(summary),
            AttributionOutcome::Unavailable { .. } => None,
        }
    }

    pub fn unavailable_reason(&self) -> Option<&str> {
        match self {
            AttributionOutcome::Available(_) => None,
            AttributionOutcome::Unavailable { reason } => Some(reason),
        }
    }
}

/// SHAP-style attributor for tree-ensemble detectors
#[derive(Debug, Clone, Default)]
pub struct Attributor {
    config: AttributionConfig,
}

impl Attributor {
    pub fn new(config: AttributionConfig) -> Self {
        Self { config }
    }

    pub fn with_max_rows(mut self, max_rows: usize) -> Self {
        self.config.max_rows = max_rows;
        self
    }

    pub fn config(&self) -> &AttributionConfig {
        &self.config
    }

    /// Attribute the scores of the first `max_rows` rows of `features`.
    ///
    /// Each row of the resulting matrix sums to that row's decision value
    /// minus the decision value of the ensemble's expected path length.
    pub fn explain(&self, detector: &dyn AnomalyDetector, features: &FeatureMatrix) -> AttributionOutcome {
        let Some(ensemble) = detector.tree_ensemble() else {
            return AttributionOutcome::unavailable(
                "detector does not expose a tree ensemble or is not fitted",
            );
        };

        let trees = ensemble.trees();
        if trees.is_empty() {
            return AttributionOutcome::unavailable("detector has no fitted trees");
        }

        let n_features = features.ncols();
        if ensemble.n_features() != n_features {
            return AttributionOutcome::unavailable(format!(
                "model was fitted on {} features but {} were supplied",
                ensemble.n_features(),
                n_features
            ));
        }

        let n_rows = features.nrows().min(self.config.max_rows);
        if n_rows == 0 {
            return AttributionOutcome::unavailable("no rows to explain");
        }

        let start = Instant::now();
        let inputs = features.values().slice(s![..n_rows, ..]).to_owned();
        let n_trees = trees.len() as f64;
        let base_path_length =
            trees.iter().map(|t| t.expected_path_length()).sum::<f64>() / n_trees;
        let base_score = ensemble.score_from_path_length(base_path_length);

        let mut values = Array2::<f64>::zeros((n_rows, n_features));
        let mut scores = Vec::with_capacity(n_rows);

        for (i, row) in inputs.rows().into_iter().enumerate() {
            let sample = row.to_vec();
            let mut phi = vec![0.0; n_features];
            let mut path_length = 0.0;
            for tree in trees {
                for (acc, v) in phi.iter_mut().zip(tree_shap(tree, &sample, n_features)) {
                    *acc += v;
                }
                path_length += tree.path_length(&sample, 0);
            }
            path_length /= n_trees;

            let score = ensemble.score_from_path_length(path_length);
            let factor = score_per_path_length(ensemble, path_length, base_path_length, score, base_score);

            for (j, v) in phi.into_iter().enumerate() {
                values[[i, j]] = v / n_trees * factor;
            }
            scores.push(score);
        }

        if values.iter().any(|v| !v.is_finite()) {
            return AttributionOutcome::unavailable("attribution produced non-finite contributions");
        }

        debug!(
            n_rows,
            n_features,
            elapsed_ms = start.elapsed().as_millis() as u64,
            "TreeSHAP values computed"
        );

        let matrix = AttributionMatrix {
            feature_names: features.names().to_vec(),
            row_indices: (0..n_rows).collect(),
            values,
            inputs,
            scores,
            base_score,
        };
        let summary = AttributionSummary::from_matrix(matrix);

        if let Some(top) = summary.feature_ranking().first() {
            info!(
                n_rows,
                top_feature = %top.feature_name,
                mean_abs = top.mean_abs_contribution,
                "Feature attribution generated"
            );
        }

        AttributionOutcome::Available(summary)
    }
}

/// Slope of the secant between the base and the row's path length on the
/// score curve. Scaling path-length contributions by it keeps the row sum
/// equal to `score - base_score`.
fn score_per_path_length(
    ensemble: &dyn TreeEnsemble,
    path_length: f64,
    base_path_length: f64,
    score: f64,
    base_score: f64,
) -> f64 {
    let delta = path_length - base_path_length;
    if delta.abs() > 1e-12 {
        (score - base_score) / delta
    } else {
        (ensemble.score_from_path_length(path_length + DERIVATIVE_EPS)
            - ensemble.score_from_path_length(path_length - DERIVATIVE_EPS))
            / (2.0 * DERIVATIVE_EPS)
    }
}
