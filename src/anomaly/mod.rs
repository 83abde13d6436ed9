//! Anomaly detection module
//!
//! Unsupervised isolation-based detection for numeric audit-trail features.
//! Scores follow the usual isolation-ensemble convention: lower is more
//! anomalous, and a negative decision value lies beyond the boundary fixed
//! at fit time.

mod isolation_forest;

pub use isolation_forest::{average_path_length, IsolationForest, IsolationForestConfig, IsolationTree};

use crate::error::Result;
use ndarray::{Array1, Array2};
use serde::{Deserialize, Serialize};

/// Binary classification of a row
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum AnomalyLabel {
    Normal,
    Anomaly,
}

impl AnomalyLabel {
    /// Exported sentinel: 1 for normal rows, -1 for anomalies
    pub fn code(self) -> i32 {
        match self {
            AnomalyLabel::Normal => 1,
            AnomalyLabel::Anomaly => -1,
        }
    }

    pub fn from_code(code: i32) -> Option<Self> {
        match code {
            1 => Some(AnomalyLabel::Normal),
            -1 => Some(AnomalyLabel::Anomaly),
            _ => None,
        }
    }

    /// Label for a decision value; negative values are anomalies
    pub fn from_decision(decision: f64) -> Self {
        if decision < 0.0 {
            AnomalyLabel::Anomaly
        } else {
            AnomalyLabel::Normal
        }
    }

    pub fn is_anomaly(self) -> bool {
        self == AnomalyLabel::Anomaly
    }
}

impl std::fmt::Display for AnomalyLabel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            AnomalyLabel::Normal => f.write_str("Normal"),
            AnomalyLabel::Anomaly => f.write_str("Anomaly"),
        }
    }
}

/// Anomaly detection result
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AnomalyResult {
    /// Decision values (lower = more anomalous, negative = anomaly)
    pub scores: Array1<f64>,
    /// Per-row classification
    pub labels: Vec<AnomalyLabel>,
    /// Offset subtracted from raw scores
    pub offset: f64,
    /// Number of anomalies detected
    pub n_anomalies: usize,
}

/// Tree-structured model the attribution engine can walk
pub trait TreeEnsemble {
    /// Fitted isolation trees
    fn trees(&self) -> &[IsolationTree];

    /// Number of features the ensemble was fitted on
    fn n_features(&self) -> usize;

    /// Map an ensemble-mean path length to the decision value
    fn score_from_path_length(&self, mean_path_length: f64) -> f64;
}

/// Trait for anomaly detectors
pub trait AnomalyDetector: Send + Sync {
    /// Fit the detector on training data
    fn fit(&mut self, x: &Array2<f64>) -> Result<()>;

    /// Raw anomaly scores (lower = more anomalous)
    fn score_samples(&self, x: &Array2<f64>) -> Result<Array1<f64>>;

    /// Offset separating normal rows from anomalies in raw-score space
    fn offset(&self) -> f64;

    /// Raw scores shifted by the fitted offset; negative means anomaly
    fn decision_function(&self, x: &Array2<f64>) -> Result<Array1<f64>> {
        let offset = self.offset();
        Ok(self.score_samples(x)?.mapv(|s| s - offset))
    }

    /// Predict labels (-1 = anomaly, 1 = normal)
    fn predict(&self, x: &Array2<f64>) -> Result<Array1<i32>> {
        Ok(self.classify(x)?.into_iter().map(AnomalyLabel::code).collect())
    }

    /// Classify every row
    fn classify(&self, x: &Array2<f64>) -> Result<Vec<AnomalyLabel>> {
        Ok(self
            .decision_function(x)?
            .iter()
            .map(|&d| AnomalyLabel::from_decision(d))
            .collect())
    }

    /// Fit and predict in one step
    fn fit_predict(&mut self, x: &Array2<f64>) -> Result<Array1<i32>> {
        self.fit(x)?;
        self.predict(x)
    }

    /// Get detection results with scores and labels
    fn detect(&self, x: &Array2<f64>) -> Result<AnomalyResult> {
        let scores = self.decision_function(x)?;
        let labels: Vec<AnomalyLabel> = scores
            .iter()
            .map(|&d| AnomalyLabel::from_decision(d))
            .collect();
        let n_anomalies = labels.iter().filter(|l| l.is_anomaly()).count();

        Ok(AnomalyResult {
            scores,
            labels,
            offset: self.offset(),
            n_anomalies,
        })
    }

    /// Tree structure for attribution, when the detector has one
    fn tree_ensemble(&self) -> Option<&dyn TreeEnsemble> {
        None
    }
}
