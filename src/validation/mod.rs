//! Detection accuracy against injected ground truth
//!
//! Only recall is measured: the share of labeled anomalies the detector
//! flagged. Rows flagged without a ground-truth label are not counted as
//! errors, so a detector that flags everything scores 100%.

use crate::anomaly::AnomalyLabel;
use crate::error::{AuditError, Result};
use serde::{Deserialize, Serialize};
use tracing::info;

/// Recall of the detector on labeled anomalies
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ValidationReport {
    /// Rows whose ground truth marks them anomalous
    pub total_labeled_anomalies: usize,
    /// Labeled anomalies the detector also flagged
    pub correctly_detected: usize,
    /// 100 * correctly_detected / total_labeled_anomalies, or 0 with no labels
    pub recall_percent: f64,
}

impl ValidationReport {
    /// Labeled anomalies the detector missed
    pub fn missed(&self) -> usize {
        self.total_labeled_anomalies - self.correctly_detected
    }
}

impl std::fmt::Display for ValidationReport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "Total injected anomalies: {}, correctly detected: {}, recall: {:.2}%",
            self.total_labeled_anomalies, self.correctly_detected, self.recall_percent
        )
    }
}

/// Validation result of a run
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum ValidationOutcome {
    Report(ValidationReport),
    /// The table carries no ground-truth column
    NotApplicable,
}

impl ValidationOutcome {
    pub fn report(&self) -> Option<&ValidationReport> {
        match self {
            ValidationOutcome::Report(report) => Some(report),
            ValidationOutcome::NotApplicable => None,
        }
    }
}

/// Compares detector labels with ground truth
#[derive(Debug, Clone, Copy, Default)]
pub struct Validator;

impl Validator {
    pub fn new() -> Self {
        Self
    }

    /// Recall of `labels` against `ground_truth`, or `NotApplicable` when
    /// there is no ground truth.
    pub fn validate(
        &self,
        labels: &[AnomalyLabel],
        ground_truth: Option<&[bool]>,
    ) -> Result<ValidationOutcome> {
        let Some(truth) = ground_truth else {
            return Ok(ValidationOutcome::NotApplicable);
        };

        if truth.len() != labels.len() {
            return Err(AuditError::ShapeError {
                expected: format!("{} ground-truth rows", labels.len()),
                actual: format!("{} rows", truth.len()),
            });
        }

        let total_labeled_anomalies = truth.iter().filter(|&&t| t).count();
        let correctly_detected = truth
            .iter()
            .zip(labels)
            .filter(|(&t, label)| t && label.is_anomaly())
            .count();

        let recall_percent = if total_labeled_anomalies > 0 {
            correctly_detected as f64 / total_labeled_anomalies as f64 * 100.0
        } else {
            0.0
        };

        let report = ValidationReport {
            total_labeled_anomalies,
            correctly_detected,
            recall_percent,
        };
        info!(
            total = total_labeled_anomalies,
            detected = correctly_detected,
            recall_percent,
            "Validation report generated"
        );

        Ok(ValidationOutcome::Report(report))
    }
}
