//! Audit trail of pipeline actions
//!
//! Every user-visible step of a run (upload, feature selection, training,
//! detection, validation, attribution, persistence) is recorded as a
//! timestamped line. Sinks are append-only and shared behind `&self`.

use chrono::{DateTime, Local};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::fs::OpenOptions;
use std::io::Write;
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

/// Default file name of the plain-text audit log
pub const DEFAULT_AUDIT_LOG: &str = "audit_log.txt";

/// Timestamp layout of an audit line
const TIMESTAMP_FORMAT: &str = "%Y-%m-%d %H:%M:%S%.6f";

/// One recorded action
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AuditEntry {
    pub timestamp: DateTime<Local>,
    pub action: String,
}

impl AuditEntry {
    pub fn now(action: impl Into<String>) -> Self {
        Self {
            timestamp: Local::now(),
            action: action.into(),
        }
    }

    /// `[timestamp] action`
    pub fn to_line(&self) -> String {
        format!("[{}] {}", self.timestamp.format(TIMESTAMP_FORMAT), self.action)
    }
}

/// Destination for audit actions.
///
/// Recording never fails the caller; sinks that can fail log a warning.
pub trait AuditSink: Send + Sync {
    fn record(&self, action: &str);
}

/// Discards every action
#[derive(Debug, Clone, Copy, Default)]
pub struct NullAuditSink;

impl AuditSink for NullAuditSink {
    fn record(&self, _action: &str) {}
}

/// Keeps actions in memory
#[derive(Debug, Default)]
pub struct MemoryAuditLog {
    entries: Mutex<Vec<AuditEntry>>,
}

impl MemoryAuditLog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn entries(&self) -> Vec<AuditEntry> {
        self.entries.lock().clone()
    }

    /// Recorded actions in order, without timestamps
    pub fn actions(&self) -> Vec<String> {
        self.entries.lock().iter().map(|e| e.action.clone()).collect()
    }

    pub fn len(&self) -> usize {
        self.entries.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.lock().is_empty()
    }
}

impl AuditSink for MemoryAuditLog {
    fn record(&self, action: &str) {
        self.entries.lock().push(AuditEntry::now(action));
    }
}

/// Appends `[timestamp] action` lines to a text file
#[derive(Debug)]
pub struct FileAuditLog {
    path: PathBuf,
    // Serializes appends from concurrent recorders
    lock: Mutex<()>,
}

impl FileAuditLog {
    pub fn new(path: impl AsRef<Path>) -> Self {
        Self {
            path: path.as_ref().to_path_buf(),
            lock: Mutex::new(()),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn append(&self, entry: &AuditEntry) -> std::io::Result<()> {
        let _guard = self.lock.lock();
        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)?;
        writeln!(file, "{}", entry.to_line())
    }
}

impl Default for FileAuditLog {
    fn default() -> Self {
        Self::new(DEFAULT_AUDIT_LOG)
    }
}

impl AuditSink for FileAuditLog {
    fn record(&self, action: &str) {
        let entry = AuditEntry::now(action);
        match self.append(&entry) {
            Ok(()) => debug!(path = %self.path.display(), action, "Audit entry written"),
            Err(e) => warn!(path = %self.path.display(), error = %e, action, "Failed to write audit entry"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    #[test]
    fn test_entry_line_format() {
        let entry = AuditEntry::now("File uploaded");
        let line = entry.to_line();
        assert!(line.starts_with('['));
        assert!(line.ends_with("] File uploaded"));
    }

    #[test]
    fn test_memory_log_keeps_order() {
        let log = MemoryAuditLog::new();
        assert!(log.is_empty());
        log.record("File uploaded");
        log.record("IsolationForest model trained");
        assert_eq!(log.len(), 2);
        assert_eq!(
            log.actions(),
            vec!["File uploaded".to_string(), "IsolationForest model trained".to_string()]
        );

        let entries = log.entries();
        assert!(entries[0].timestamp <= entries[1].timestamp);
        assert!(entries[1].to_line().ends_with("] IsolationForest model trained"));
    }

    #[test]
    fn test_memory_log_shared_between_threads() {
        let log = Arc::new(MemoryAuditLog::new());
        let handles: Vec<_> = (0..4)
            .map(|i| {
                let log = Arc::clone(&log);
                std::thread::spawn(move || log.record(&format!("action {}", i)))
            })
            .collect();
        for handle in handles {
            handle.join().unwrap();
        }
        assert_eq!(log.len(), 4);
    }

    #[test]
    fn test_null_sink() {
        NullAuditSink.record("ignored");
    }
}
