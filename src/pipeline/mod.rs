//! End-to-end detection pipeline
//!
//! [`PipelineRunner`] chains feature selection, isolation-forest fitting,
//! validation and attribution into one run. Hosts plug in their own
//! presentation through [`ReviewSink`].

mod config;
mod runner;

pub use config::PipelineConfig;
pub use runner::{PipelineOutput, PipelineRunner};

use crate::anomaly::AnomalyLabel;
use crate::table::RecordTable;

/// Default file name of the annotated CSV export
pub const DEFAULT_OUTPUT_FILE: &str = "audit_review_output.csv";

/// Presents a labeled table to a reviewer
pub trait ReviewSink {
    fn review(&self, table: &RecordTable, labels: &[AnomalyLabel]);
}
