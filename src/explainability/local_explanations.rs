//! Local explanations and their aggregate summary

use ndarray::Array2;
use serde::{Deserialize, Serialize};

/// Feature contribution to a single row's anomaly score
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FeatureContribution {
    /// Feature index
    pub feature_index: usize,
    /// Feature name
    pub feature_name: String,
    /// Feature value for this row
    pub feature_value: f64,
    /// Contribution to the anomaly score (SHAP value)
    pub contribution: f64,
}

/// Local explanation for a single row
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LocalExplanation {
    /// Row index in the input table
    pub instance_index: usize,
    /// Score of the ensemble's expected path length
    pub base_value: f64,
    /// Actual anomaly score
    pub prediction: f64,
    /// Feature contributions
    pub contributions: Vec<FeatureContribution>,
}

impl LocalExplanation {
    /// Get sum of contributions
    pub fn sum_contributions(&self) -> f64 {
        self.contributions.iter().map(|c| c.contribution).sum()
    }

    /// Get sorted contributions (by absolute value, descending)
    pub fn sorted_contributions(&self) -> Vec<&FeatureContribution> {
        let mut sorted: Vec<&FeatureContribution> = self.contributions.iter().collect();
        sorted.sort_by(|a, b| {
            b.contribution
                .abs()
                .partial_cmp(&a.contribution.abs())
                .unwrap_or(std::cmp::Ordering::Equal)
        });
        sorted
    }

    /// Get top k contributors
    pub fn top_k_contributors(&self, k: usize) -> Vec<&FeatureContribution> {
        self.sorted_contributions().into_iter().take(k).collect()
    }

    /// Contributions pushing the score down (towards anomaly)
    pub fn anomalous_contributors(&self) -> Vec<&FeatureContribution> {
        self.contributions
            .iter()
            .filter(|c| c.contribution < 0.0)
            .collect()
    }
}

/// Per-row, per-feature contributions for a bounded sample of rows.
///
/// Row `i` sums to `scores[i] - base_score`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AttributionMatrix {
    pub feature_names: Vec<String>,
    /// Table rows the matrix rows correspond to
    pub row_indices: Vec<usize>,
    /// rows x features
    pub values: Array2<f64>,
    /// Feature values of the explained rows
    pub inputs: Array2<f64>,
    /// Anomaly score of each explained row
    pub scores: Vec<f64>,
    /// Score of the ensemble's expected path length
    pub base_score: f64,
}

impl AttributionMatrix {
    pub fn nrows(&self) -> usize {
        self.values.nrows()
    }

    pub fn ncols(&self) -> usize {
        self.values.ncols()
    }

    /// Sum of contributions for matrix row `i`
    pub fn row_sum(&self, i: usize) -> f64 {
        self.values.row(i).sum()
    }

    /// Explanation of matrix row `i`
    pub fn explain_row(&self, i: usize) -> Option<LocalExplanation> {
        if i >= self.nrows() {
            return None;
        }
        let contributions = self
            .feature_names
            .iter()
            .enumerate()
            .map(|(j, name)| FeatureContribution {
                feature_index: j,
                feature_name: name.clone(),
                feature_value: self.inputs[[i, j]],
                contribution: self.values[[i, j]],
            })
            .collect();

        Some(LocalExplanation {
            instance_index: self.row_indices[i],
            base_value: self.base_score,
            prediction: self.scores[i],
            contributions,
        })
    }

    /// All row explanations
    pub fn explanations(&self) -> Vec<LocalExplanation> {
        (0..self.nrows()).filter_map(|i| self.explain_row(i)).collect()
    }
}

/// A feature and its mean absolute contribution
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FeatureRank {
    pub feature_name: String,
    pub mean_abs_contribution: f64,
}

/// Summary of SHAP values across the explained rows
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AttributionSummary {
    pub matrix: AttributionMatrix,
    /// Mean absolute SHAP values per feature
    pub mean_abs_shap: Vec<f64>,
    /// Mean SHAP values per feature
    pub mean_shap: Vec<f64>,
    /// Standard deviation of SHAP values per feature
    pub std_shap: Vec<f64>,
    /// Min SHAP values per feature
    pub min_shap: Vec<f64>,
    /// Max SHAP values per feature
    pub max_shap: Vec<f64>,
}

impl AttributionSummary {
    /// Column statistics of an attribution matrix
    pub fn from_matrix(matrix: AttributionMatrix) -> Self {
        let n_features = matrix.ncols();
        let n_rows = matrix.nrows().max(1) as f64;

        let mut mean_abs = vec![0.0; n_features];
        let mut mean = vec![0.0; n_features];
        let mut min_vals = vec![f64::INFINITY; n_features];
        let mut max_vals = vec![f64::NEG_INFINITY; n_features];
        let mut sum_sq = vec![0.0; n_features];

        for row in matrix.values.rows() {
            for (j, &c) in row.iter().enumerate() {
                mean_abs[j] += c.abs();
                mean[j] += c;
                min_vals[j] = min_vals[j].min(c);
                max_vals[j] = max_vals[j].max(c);
            }
        }

        for j in 0..n_features {
            mean_abs[j] /= n_rows;
            mean[j] /= n_rows;
        }

        // Second pass for standard deviation
        for row in matrix.values.rows() {
            for (j, &c) in row.iter().enumerate() {
                sum_sq[j] += (c - mean[j]).powi(2);
            }
        }

        let std: Vec<f64> = sum_sq.into_iter().map(|s| (s / n_rows).sqrt()).collect();

        Self {
            matrix,
            mean_abs_shap: mean_abs,
            mean_shap: mean,
            std_shap: std,
            min_shap: min_vals,
            max_shap: max_vals,
        }
    }

    /// Features ranked by mean absolute contribution, largest first
    pub fn feature_ranking(&self) -> Vec<FeatureRank> {
        let mut ranking: Vec<FeatureRank> = self
            .matrix
            .feature_names
            .iter()
            .zip(self.mean_abs_shap.iter())
            .map(|(name, &v)| FeatureRank {
                feature_name: name.clone(),
                mean_abs_contribution: v,
            })
            .collect();
        ranking.sort_by(|a, b| {
            b.mean_abs_contribution
                .partial_cmp(&a.mean_abs_contribution)
                .unwrap_or(std::cmp::Ordering::Equal)
        });
        ranking
    }
}
