//! GxP Audit Validator - Anomaly review for audit-trail exports
//!
//! This crate flags statistically unusual rows in tabular audit-trail
//! records and explains why they were flagged:
//! - Typed CSV loading and numeric feature selection
//! - Isolation-forest scoring with a contamination-based decision boundary
//! - Recall against injected ground-truth anomalies
//! - Additive per-feature attribution (TreeSHAP)
//! - Timestamped audit log, model persistence and annotated export
//!
//! # Modules
//!
//! ## Core
//! - [`table`] - Record table with an explicit column schema
//! - [`preprocessing`] - Feature selection
//! - [`anomaly`] - Isolation forest detector
//! - [`validation`] - Detection recall against ground truth
//! - [`explainability`] - Feature attribution
//! - [`pipeline`] - End-to-end runner and configuration
//!
//! ## Infrastructure
//! - [`utils`] - CSV loading and saving
//! - [`audit`] - Audit trail sinks
//! - [`export`] - Model persistence
//! - [`cli`] - Command-line interface

// Core error handling
pub mod error;

// Core modules
pub mod table;
pub mod preprocessing;
pub mod anomaly;
pub mod validation;
pub mod explainability;
pub mod pipeline;

// Infrastructure
pub mod utils;
pub mod audit;
pub mod export;

// Services
pub mod cli;

pub use error::{AuditError, PipelineStage, Result};

/// Re-export commonly used types
pub mod prelude {
    // Error handling
    pub use crate::error::{AuditError, PipelineStage, Result};

    // Data
    pub use crate::table::{ColumnKind, RecordTable, GROUND_TRUTH_COLUMN, LABEL_COLUMN, SCORE_COLUMN};
    pub use crate::utils::{DataLoader, DataSaver, TableLoader};
    pub use crate::preprocessing::{FeatureMatrix, FeatureSelector};

    // Detection
    pub use crate::anomaly::{AnomalyDetector, AnomalyLabel, IsolationForest, IsolationForestConfig};

    // Review
    pub use crate::validation::{ValidationOutcome, ValidationReport, Validator};
    pub use crate::explainability::{AttributionConfig, AttributionOutcome, AttributionSummary, Attributor};

    // Pipeline
    pub use crate::pipeline::{PipelineConfig, PipelineOutput, PipelineRunner, ReviewSink};

    // Persistence and audit
    pub use crate::audit::{AuditSink, FileAuditLog, MemoryAuditLog, NullAuditSink};
    pub use crate::export::{JsonModelStore, ModelMetadata, ModelSink};
}
