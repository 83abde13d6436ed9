//! Pipeline configuration

use serde::{Deserialize, Serialize};
use std::path::Path;

use crate::anomaly::IsolationForestConfig;
use crate::error::{AuditError, Result};
use crate::explainability::AttributionConfig;

/// Configuration for one pipeline run
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    /// Isolation forest hyperparameters
    pub detector: IsolationForestConfig,

    /// Attribution settings
    pub attribution: AttributionConfig,

    /// Columns to fit on; every numeric candidate when unset
    pub feature_columns: Option<Vec<String>>,

    /// Run validation and attribution on separate threads
    pub parallel_review: bool,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            detector: IsolationForestConfig::default(),
            attribution: AttributionConfig::default(),
            feature_columns: None,
            parallel_review: true,
        }
    }
}

impl PipelineConfig {
    /// Create a new configuration with default values
    pub fn new() -> Self {
        Self::default()
    }

    /// Load a configuration from a JSON file; missing keys take defaults
    pub fn from_json_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path).map_err(|e| {
            AuditError::ConfigError(format!("Failed to read {}: {}", path.display(), e))
        })?;
        let config: Self = serde_json::from_str(&text).map_err(|e| {
            AuditError::ConfigError(format!("Failed to parse {}: {}", path.display(), e))
        })?;
        config.validate()?;
        Ok(config)
    }

    /// Check parameter ranges
    pub fn validate(&self) -> Result<()> {
        self.detector.validate()?;
        if self.attribution.max_rows == 0 {
            return Err(AuditError::InvalidParameter {
                name: "attribution.max_rows".to_string(),
                value: "0".to_string(),
                reason: "at least one row must be explained".to_string(),
            });
        }
        if let Some(columns) = &self.feature_columns {
            if columns.is_empty() {
                return Err(AuditError::NoFeaturesSelected);
            }
        }
        Ok(())
    }

    /// Builder method to set the feature columns
    pub fn with_features<S: Into<String>>(mut self, columns: impl IntoIterator<Item = S>) -> Self {
        self.feature_columns = Some(columns.into_iter().map(Into::into).collect());
        self
    }

    /// Builder method to set the contamination rate
    pub fn with_contamination(mut self, contamination: f64) -> Self {
        self.detector.contamination = contamination;
        self
    }

    /// Builder method to set the random seed
    pub fn with_seed(mut self, seed: u64) -> Self {
        self.detector.seed = seed;
        self
    }

    /// Builder method to set the number of trees
    pub fn with_n_estimators(mut self, n_estimators: usize) -> Self {
        self.detector.n_estimators = n_estimators;
        self
    }

    /// Builder method to set the per-tree subsample cap
    pub fn with_max_samples(mut self, max_samples: usize) -> Self {
        self.detector.max_samples = max_samples;
        self
    }

    /// Builder method to set how many rows are attributed
    pub fn with_attribution_rows(mut self, max_rows: usize) -> Self {
        self.attribution.max_rows = max_rows;
        self
    }

    /// Builder method to toggle concurrent validation and attribution
    pub fn with_parallel_review(mut self, parallel: bool) -> Self {
        self.parallel_review = parallel;
        self
    }
}
