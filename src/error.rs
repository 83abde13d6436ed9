//! Error types for the audit trail validator

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Result type alias for validator operations
pub type Result<T> = std::result::Result<T, AuditError>;

/// Pipeline stage an error originated from
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum PipelineStage {
    Load,
    FeatureSelection,
    Fit,
    Score,
    Validation,
    Persistence,
    Config,
    Internal,
}

impl std::fmt::Display for PipelineStage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            PipelineStage::Load => "load",
            PipelineStage::FeatureSelection => "feature selection",
            PipelineStage::Fit => "fit",
            PipelineStage::Score => "score",
            PipelineStage::Validation => "validation",
            PipelineStage::Persistence => "persistence",
            PipelineStage::Config => "config",
            PipelineStage::Internal => "internal",
        };
        f.write_str(name)
    }
}

/// Main error type for the validator
#[derive(Error, Debug)]
pub enum AuditError {
    #[error("Malformed input: {0}")]
    MalformedInput(String),

    #[error("No numeric features selected")]
    NoFeaturesSelected,

    #[error("Feature not found or not numeric: {0}")]
    FeatureNotFound(String),

    #[error("Invalid feature data in column '{column}' at row {row}: {reason}")]
    InvalidFeatureData {
        column: String,
        row: usize,
        reason: String,
    },

    #[error("Insufficient data: need at least {required} rows, got {actual}")]
    InsufficientData { required: usize, actual: usize },

    #[error("Invalid parameter: {name} = {value}, {reason}")]
    InvalidParameter {
        name: String,
        value: String,
        reason: String,
    },

    #[error("Model not fitted")]
    ModelNotFitted,

    #[error("Invalid shape: expected {expected}, got {actual}")]
    ShapeError { expected: String, actual: String },

    #[error("Configuration error: {0}")]
    ConfigError(String),

    #[error("Data error: {0}")]
    DataError(String),

    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    SerializationError(String),
}

impl AuditError {
    /// Stage of the pipeline this error belongs to
    pub fn stage(&self) -> PipelineStage {
        match self {
            AuditError::MalformedInput(_) => PipelineStage::Load,
            AuditError::NoFeaturesSelected
            | AuditError::FeatureNotFound(_)
            | AuditError::InvalidFeatureData { .. } => PipelineStage::FeatureSelection,
            AuditError::InsufficientData { .. } | AuditError::InvalidParameter { .. } => {
                PipelineStage::Fit
            }
            AuditError::ModelNotFitted | AuditError::ShapeError { .. } => PipelineStage::Score,
            AuditError::ConfigError(_) => PipelineStage::Config,
            AuditError::IoError(_) | AuditError::SerializationError(_) => {
                PipelineStage::Persistence
            }
            AuditError::DataError(_) => PipelineStage::Internal,
        }
    }

    /// Whether the caller can recover by choosing a different feature set
    pub fn is_recoverable_by_reselection(&self) -> bool {
        self.stage() == PipelineStage::FeatureSelection
    }
}

impl From<polars::error::PolarsError> for AuditError {
    fn from(err: polars::error::PolarsError) -> Self {
        AuditError::DataError(err.to_string())
    }
}

impl From<serde_json::Error> for AuditError {
    fn from(err: serde_json::Error) -> Self {
        AuditError::SerializationError(err.to_string())
    }
}

impl From<ndarray::ShapeError> for AuditError {
    fn from(err: ndarray::ShapeError) -> Self {
        AuditError::ShapeError {
            expected: "valid shape".to_string(),
            actual: err.to_string(),
        }
    }
}
