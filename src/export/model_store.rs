//! JSON model store

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fs::{self, File};
use std::io::{BufReader, BufWriter};
use std::path::{Path, PathBuf};
use tracing::info;

use crate::anomaly::IsolationForest;
use crate::error::{AuditError, Result};

/// File name used when the caller does not pick one
pub const DEFAULT_MODEL_FILE: &str = "gxp_anomaly_model.json";

/// Describes a persisted model
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModelMetadata {
    /// Model name
    pub name: String,
    /// Version of the crate that wrote the file
    pub version: String,
    pub trained_at: DateTime<Utc>,
    /// Feature columns, in the order the model expects them
    pub feature_names: Vec<String>,
    pub n_samples: usize,
    pub n_estimators: usize,
    pub contamination: f64,
    pub seed: u64,
}

impl ModelMetadata {
    /// Metadata for a forest fitted on `feature_names` over `n_samples` rows
    pub fn for_forest(forest: &IsolationForest, feature_names: &[String], n_samples: usize) -> Self {
        let config = forest.config();
        Self {
            name: "IsolationForest".to_string(),
            version: env!("CARGO_PKG_VERSION").to_string(),
            trained_at: Utc::now(),
            feature_names: feature_names.to_vec(),
            n_samples,
            n_estimators: config.n_estimators,
            contamination: config.contamination,
            seed: config.seed,
        }
    }
}

/// A model with its metadata, as written to disk
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoredModel {
    pub metadata: ModelMetadata,
    pub model: IsolationForest,
}

/// Destination for fitted models
pub trait ModelSink {
    /// Persist a fitted model, returning where it was written
    fn save(&self, model: &IsolationForest, metadata: &ModelMetadata) -> Result<PathBuf>;
}

/// Writes models as JSON files under a directory
#[derive(Debug, Clone)]
pub struct JsonModelStore {
    dir: PathBuf,
    file_name: String,
}

impl JsonModelStore {
    pub fn new(dir: impl AsRef<Path>) -> Self {
        Self {
            dir: dir.as_ref().to_path_buf(),
            file_name: DEFAULT_MODEL_FILE.to_string(),
        }
    }

    pub fn with_file_name(mut self, file_name: impl Into<String>) -> Self {
        self.file_name = file_name.into();
        self
    }

    /// Full path of the model file
    pub fn path(&self) -> PathBuf {
        self.dir.join(&self.file_name)
    }

    /// Read the stored model back
    pub fn load(&self) -> Result<StoredModel> {
        let path = self.path();
        let file = File::open(&path)?;
        let stored: StoredModel = serde_json::from_reader(BufReader::new(file)).map_err(|e| {
            AuditError::SerializationError(format!("Failed to read {}: {}", path.display(), e))
        })?;

        if !stored.model.is_fitted() {
            return Err(AuditError::ModelNotFitted);
        }
        Ok(stored)
    }
}

impl Default for JsonModelStore {
    fn default() -> Self {
        Self::new("models")
    }
}

impl ModelSink for JsonModelStore {
    fn save(&self, model: &IsolationForest, metadata: &ModelMetadata) -> Result<PathBuf> {
        if !model.is_fitted() {
            return Err(AuditError::ModelNotFitted);
        }

        fs::create_dir_all(&self.dir)?;
        let path = self.path();

        let stored = StoredModel {
            metadata: metadata.clone(),
            model: model.clone(),
        };
        let file = File::create(&path)?;
        serde_json::to_writer_pretty(BufWriter::new(file), &stored)?;

        info!(path = %path.display(), n_features = metadata.feature_names.len(), "Model saved");
        Ok(path)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::anomaly::{AnomalyDetector, IsolationForestConfig};
    use ndarray::Array2;

    fn forest() -> (IsolationForest, Array2<f64>) {
        let x = Array2::from_shape_fn((40, 2), |(i, j)| (i * (j + 1)) as f64 % 7.0);
        let config = IsolationForestConfig {
            n_estimators: 10,
            ..Default::default()
        };
        (IsolationForest::train(config, &x).unwrap(), x)
    }

    #[test]
    fn test_save_and_load() {
        let dir = tempfile::tempdir().unwrap();
        let store = JsonModelStore::new(dir.path().join("models"));
        let (model, x) = forest();
        let names = vec!["Temp_C".to_string(), "pH".to_string()];
        let metadata = ModelMetadata::for_forest(&model, &names, x.nrows());

        let path = store.save(&model, &metadata).unwrap();
        assert!(path.ends_with(DEFAULT_MODEL_FILE));

        let stored = store.load().unwrap();
        assert_eq!(stored.metadata, metadata);
        let before = model.decision_function(&x).unwrap();
        let after = stored.model.decision_function(&x).unwrap();
        for (a, b) in before.iter().zip(after.iter()) {
            assert!((a - b).abs() < 1e-12);
        }
    }

    #[test]
    fn test_unfitted_model_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let store = JsonModelStore::new(dir.path());
        let model = IsolationForest::new();
        let metadata = ModelMetadata::for_forest(&model, &[], 0);
        assert!(matches!(store.save(&model, &metadata), Err(AuditError::ModelNotFitted)));
    }

    #[test]
    fn test_missing_file() {
        let dir = tempfile::tempdir().unwrap();
        let store = JsonModelStore::new(dir.path()).with_file_name("absent.json");
        assert!(matches!(store.load(), Err(AuditError::IoError(_))));
    }
}
