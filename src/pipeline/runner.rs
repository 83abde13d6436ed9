//! Pipeline runner
//!
//! Selects features, fits the isolation forest, labels every row, then
//! validates and attributes the result. Nothing is cached between runs.

use polars::prelude::DataFrame;
use std::sync::Arc;
use std::time::Instant;
use tracing::{info, warn};

use crate::anomaly::{AnomalyDetector, AnomalyLabel, IsolationForest};
use crate::audit::{AuditSink, NullAuditSink};
use crate::error::{AuditError, Result};
use crate::explainability::{AttributionOutcome, Attributor};
use crate::export::ModelMetadata;
use crate::preprocessing::{FeatureMatrix, FeatureSelector};
use crate::table::RecordTable;
use crate::utils::TableLoader;
use crate::validation::{ValidationOutcome, Validator};

use super::config::PipelineConfig;

/// Everything a run produces
#[derive(Debug, Clone)]
pub struct PipelineOutput {
    /// Input table with `anomaly_score` and `is_anomaly` appended
    pub table: RecordTable,
    /// Columns the model was fitted on
    pub feature_names: Vec<String>,
    /// Decision value per row; negative means anomaly
    pub scores: Vec<f64>,
    pub labels: Vec<AnomalyLabel>,
    pub n_anomalies: usize,
    pub validation: ValidationOutcome,
    pub attribution: AttributionOutcome,
    /// The fitted forest, immutable after the run
    pub model: IsolationForest,
}

impl PipelineOutput {
    /// Rows labeled `Anomaly`, with their annotations
    pub fn anomalous_rows(&self) -> Result<DataFrame> {
        let mask: Vec<bool> = self.labels.iter().map(|l| l.is_anomaly()).collect();
        self.table.filter_rows(&mask)
    }

    /// Fraction of rows labeled `Anomaly`
    pub fn anomaly_rate(&self) -> f64 {
        if self.labels.is_empty() {
            0.0
        } else {
            self.n_anomalies as f64 / self.labels.len() as f64
        }
    }

    /// Metadata describing the fitted model, for persistence
    pub fn model_metadata(&self) -> ModelMetadata {
        ModelMetadata::for_forest(&self.model, &self.feature_names, self.table.height())
    }
}

/// Fitted model and labels, before review
struct Detection {
    features: FeatureMatrix,
    model: IsolationForest,
    scores: Vec<f64>,
    labels: Vec<AnomalyLabel>,
    n_anomalies: usize,
}

/// Runs the detection pipeline and records each step to an audit sink
pub struct PipelineRunner {
    config: PipelineConfig,
    selector: FeatureSelector,
    audit: Arc<dyn AuditSink>,
}

impl PipelineRunner {
    pub fn new(config: PipelineConfig) -> Self {
        Self {
            config,
            selector: FeatureSelector::new(),
            audit: Arc::new(NullAuditSink),
        }
    }

    pub fn with_audit_sink(mut self, audit: Arc<dyn AuditSink>) -> Self {
        self.audit = audit;
        self
    }

    pub fn with_selector(mut self, selector: FeatureSelector) -> Self {
        self.selector = selector;
        self
    }

    pub fn config(&self) -> &PipelineConfig {
        &self.config
    }

    /// Parse `bytes` with `loader`, then run the pipeline on the table
    pub fn run_bytes(&self, loader: &dyn TableLoader, bytes: &[u8]) -> Result<PipelineOutput> {
        let table = match loader.load(bytes) {
            Ok(table) => table,
            Err(e) => {
                self.audit.record(&format!("Upload error: {}", e));
                return Err(e);
            }
        };
        self.audit.record("File uploaded");
        self.run(table)
    }

    /// Run the pipeline on a loaded table
    pub fn run(&self, table: RecordTable) -> Result<PipelineOutput> {
        let start = Instant::now();
        let result = self.run_stages(table);

        match &result {
            Ok(output) => info!(
                rows = output.table.height(),
                anomalies = output.n_anomalies,
                elapsed_ms = start.elapsed().as_millis() as u64,
                "Pipeline run complete"
            ),
            Err(AuditError::NoFeaturesSelected) => {
                self.audit.record("No features selected");
                warn!("No features selected; model not fitted");
            }
            Err(e) => {
                self.audit.record(&format!("Upload error: {}", e));
                warn!(stage = %e.stage(), error = %e, "Pipeline run failed");
            }
        }

        result
    }

    fn run_stages(&self, table: RecordTable) -> Result<PipelineOutput> {
        self.config.validate()?;

        let detection = self.detect(&table)?;
        let ground_truth = table.ground_truth()?;
        let (validation, attribution) = self.review(
            &detection.model,
            &detection.features,
            &detection.labels,
            ground_truth.as_deref(),
        );

        self.finish(table, detection, validation?, attribution)
    }

    /// Select, fit and label every row
    fn detect(&self, table: &RecordTable) -> Result<Detection> {
        let features = self.select_features(table)?;
        self.audit
            .record(&format!("Selected features: {:?}", features.names()));
        info!(features = ?features.names(), rows = features.nrows(), "Features selected");

        let model = IsolationForest::train(self.config.detector.clone(), features.values())?;
        self.audit.record("IsolationForest model trained");

        let scores = model.decision_function(features.values())?.to_vec();
        let labels: Vec<AnomalyLabel> = scores
            .iter()
            .map(|&d| AnomalyLabel::from_decision(d))
            .collect();
        let n_anomalies = labels.iter().filter(|l| l.is_anomaly()).count();
        self.audit
            .record(&format!("{} anomalies detected", n_anomalies));
        info!(n_anomalies, rows = labels.len(), "Anomalies detected");

        Ok(Detection {
            features,
            model,
            scores,
            labels,
            n_anomalies,
        })
    }

    /// Record the review outcome and annotate the table. An unavailable
    /// attribution is audited but never fails the run.
    fn finish(
        &self,
        table: RecordTable,
        detection: Detection,
        validation: ValidationOutcome,
        attribution: AttributionOutcome,
    ) -> Result<PipelineOutput> {
        if let ValidationOutcome::Report(_) = validation {
            self.audit.record("Validation report generated");
        }
        match &attribution {
            AttributionOutcome::Available(_) => self.audit.record("Feature attribution generated"),
            AttributionOutcome::Unavailable { reason } => self
                .audit
                .record(&format!("Feature attribution error: {}", reason)),
        }

        let Detection {
            features,
            model,
            scores,
            labels,
            n_anomalies,
        } = detection;
        let table = table.with_annotations(&scores, &labels)?;

        Ok(PipelineOutput {
            table,
            feature_names: features.names().to_vec(),
            scores,
            labels,
            n_anomalies,
            validation,
            attribution,
            model,
        })
    }

    fn select_features(&self, table: &RecordTable) -> Result<FeatureMatrix> {
        match &self.config.feature_columns {
            Some(columns) => self.selector.select(table, columns),
            None => self.selector.select_all(table),
        }
    }

    /// Validation and attribution only read the fitted model and the
    /// feature matrix, so they may run side by side
    fn review(
        &self,
        model: &IsolationForest,
        features: &FeatureMatrix,
        labels: &[AnomalyLabel],
        ground_truth: Option<&[bool]>,
    ) -> (Result<ValidationOutcome>, AttributionOutcome) {
        let validator = Validator::new();
        let attributor = Attributor::new(self.config.attribution.clone());

        if self.config.parallel_review {
            rayon::join(
                || validator.validate(labels, ground_truth),
                || attributor.explain(model, features),
            )
        } else {
            (
                validator.validate(labels, ground_truth),
                attributor.explain(model, features),
            )
        }
    }
}

impl Default for PipelineRunner {
    fn default() -> Self {
        Self::new(PipelineConfig::default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audit::MemoryAuditLog;
    use crate::table::{LABEL_COLUMN, SCORE_COLUMN};
    use polars::prelude::*;

    fn audit_table() -> RecordTable {
        let n = 120;
        let temp: Vec<f64> = (0..n)
            .map(|i| if i % 40 == 39 { 60.0 } else { 20.0 + (i % 9) as f64 * 0.2 })
            .collect();
        let ph: Vec<f64> = (0..n).map(|i| 7.0 + (i % 4) as f64 * 0.05).collect();
        let injected: Vec<bool> = (0..n).map(|i| i % 40 == 39).collect();
        RecordTable::new(
            df!(
                "Temp_C" => temp,
                "pH" => ph,
                "InjectedAnomaly" => injected
            )
            .unwrap(),
        )
    }

    #[test]
    fn test_run_annotates_table() {
        let output = PipelineRunner::default().run(audit_table()).unwrap();

        assert_eq!(output.table.height(), 120);
        assert!(output.table.has_column(SCORE_COLUMN));
        assert!(output.table.has_column(LABEL_COLUMN));
        assert_eq!(output.feature_names, vec!["Temp_C", "pH"]);
        assert_eq!(output.scores.len(), 120);
        assert_eq!(output.anomalous_rows().unwrap().height(), output.n_anomalies);

        let report = output.validation.report().unwrap();
        assert_eq!(report.total_labeled_anomalies, 3);
        assert_eq!(report.correctly_detected, 3);
        assert!(output.attribution.is_available());
    }

    #[test]
    fn test_sequential_review_matches_parallel() {
        let parallel = PipelineRunner::default().run(audit_table()).unwrap();
        let sequential = PipelineRunner::new(PipelineConfig::new().with_parallel_review(false))
            .run(audit_table())
            .unwrap();
        assert_eq!(parallel.scores, sequential.scores);
        assert_eq!(parallel.validation, sequential.validation);
        assert_eq!(
            parallel.attribution.summary().unwrap().mean_abs_shap,
            sequential.attribution.summary().unwrap().mean_abs_shap
        );
    }

    #[test]
    fn test_audit_actions_in_order() {
        let log = Arc::new(MemoryAuditLog::new());
        let runner = PipelineRunner::default().with_audit_sink(log.clone());
        let output = runner.run(audit_table()).unwrap();

        assert_eq!(
            log.actions(),
            vec![
                "Selected features: [\"Temp_C\", \"pH\"]".to_string(),
                "IsolationForest model trained".to_string(),
                format!("{} anomalies detected", output.n_anomalies),
                "Validation report generated".to_string(),
                "Feature attribution generated".to_string(),
            ]
        );
    }

    #[test]
    fn test_no_features_is_audited() {
        let log = Arc::new(MemoryAuditLog::new());
        let runner = PipelineRunner::default().with_audit_sink(log.clone());
        let table = RecordTable::new(df!("user" => &["a", "b", "c", "d"]).unwrap());

        let result = runner.run(table);
        assert!(matches!(result, Err(AuditError::NoFeaturesSelected)));
        assert_eq!(log.actions(), vec!["No features selected".to_string()]);
    }

    #[test]
    fn test_unavailable_attribution_keeps_annotations() {
        let log = Arc::new(MemoryAuditLog::new());
        let runner = PipelineRunner::default().with_audit_sink(log.clone());
        let table = audit_table();

        let detection = runner.detect(&table).unwrap();
        let truth = table.ground_truth().unwrap();
        let validation = Validator::new()
            .validate(&detection.labels, truth.as_deref())
            .unwrap();
        let labels = detection.labels.clone();
        let scores = detection.scores.clone();
        let attribution = AttributionOutcome::Unavailable {
            reason: "detector has no fitted trees".to_string(),
        };

        let output = runner.finish(table, detection, validation, attribution).unwrap();

        assert_eq!(
            log.actions().last().map(String::as_str),
            Some("Feature attribution error: detector has no fitted trees")
        );
        assert!(!output.attribution.is_available());
        assert_eq!(output.labels, labels);
        assert_eq!(output.scores, scores);
        assert!(output.validation.report().is_some());

        let codes: Vec<i32> = output
            .table
            .frame()
            .column(LABEL_COLUMN)
            .unwrap()
            .as_materialized_series()
            .i32()
            .unwrap()
            .into_no_null_iter()
            .collect();
        let expected: Vec<i32> = labels.iter().map(|l| l.code()).collect();
        assert_eq!(codes, expected);
    }

    #[test]
    fn test_custom_selector_excludes_column() {
        let runner = PipelineRunner::default()
            .with_selector(FeatureSelector::new().with_excluded("pH"));
        let output = runner.run(audit_table()).unwrap();
        assert_eq!(output.feature_names, vec!["Temp_C"]);
        assert_eq!(output.attribution.summary().unwrap().matrix.ncols(), 1);
    }

    #[test]
    fn test_unknown_feature() {
        let runner = PipelineRunner::new(PipelineConfig::new().with_features(["Pressure"]));
        let err = runner.run(audit_table()).unwrap_err();
        assert!(matches!(err, AuditError::FeatureNotFound(ref c) if c == "Pressure"));
        assert!(err.is_recoverable_by_reselection());
    }
}
