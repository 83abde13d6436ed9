//! Data loading utilities

use crate::error::{AuditError, Result};
use crate::table::RecordTable;
use polars::prelude::*;
use std::fs::File;
use std::io::Cursor;
use std::path::Path;
use tracing::debug;

/// Turns raw bytes into a [`RecordTable`]
pub trait TableLoader {
    /// Parse raw bytes, failing with [`AuditError::MalformedInput`] when
    /// the payload cannot be decoded as a table
    fn load(&self, bytes: &[u8]) -> Result<RecordTable>;
}

/// CSV loader backed by the polars reader
#[derive(Debug, Clone)]
pub struct DataLoader {
    /// Rows inspected for type inference (`None` scans the whole file)
    infer_schema_length: Option<usize>,
    /// Field separator
    delimiter: u8,
}

impl Default for DataLoader {
    fn default() -> Self {
        Self::new()
    }
}

impl DataLoader {
    /// Create a new data loader
    pub fn new() -> Self {
        Self {
            infer_schema_length: None,
            delimiter: b',',
        }
    }

    /// Limit the number of rows used for type inference
    pub fn with_infer_schema_length(mut self, rows: usize) -> Self {
        self.infer_schema_length = Some(rows.max(1));
        self
    }

    /// Set the field separator
    pub fn with_delimiter(mut self, delimiter: u8) -> Self {
        self.delimiter = delimiter;
        self
    }

    /// Parse CSV bytes (header row required)
    pub fn load_csv_bytes(&self, bytes: &[u8]) -> Result<RecordTable> {
        if bytes.iter().all(|b| b.is_ascii_whitespace()) {
            return Err(AuditError::MalformedInput("input is empty".to_string()));
        }

        let parse_opts = CsvParseOptions::default().with_separator(self.delimiter);

        let frame = CsvReadOptions::default()
            .with_has_header(true)
            .with_infer_schema_length(self.infer_schema_length)
            .with_parse_options(parse_opts)
            .into_reader_with_file_handle(Cursor::new(bytes.to_vec()))
            .finish()
            .map_err(|e| AuditError::MalformedInput(e.to_string()))?;

        if frame.width() == 0 {
            return Err(AuditError::MalformedInput("table has no columns".to_string()));
        }

        let table = RecordTable::new(frame);
        debug!(rows = table.height(), columns = table.width(), "Parsed CSV table");
        Ok(table)
    }

    /// Load a CSV file from disk
    pub fn load_csv(&self, path: impl AsRef<Path>) -> Result<RecordTable> {
        let bytes = std::fs::read(path.as_ref())?;
        self.load_csv_bytes(&bytes)
    }
}

impl TableLoader for DataLoader {
    fn load(&self, bytes: &[u8]) -> Result<RecordTable> {
        self.load_csv_bytes(bytes)
    }
}

/// Writes tables back out
pub struct DataSaver;

impl DataSaver {
    /// Save to CSV with header, row order unchanged
    pub fn save_csv(table: &RecordTable, path: impl AsRef<Path>) -> Result<()> {
        let mut file = File::create(path.as_ref())?;
        let mut frame = table.frame().clone();

        CsvWriter::new(&mut file)
            .include_header(true)
            .finish(&mut frame)
            .map_err(|e| AuditError::DataError(e.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::table::ColumnKind;

    #[test]
    fn test_load_csv_bytes() {
        let csv = b"Temp_C,pH,operator\n20.1,7.0,alice\n20.4,7.1,bob\n";
        let table = DataLoader::new().load_csv_bytes(csv).unwrap();
        assert_eq!(table.height(), 2);
        assert_eq!(table.width(), 3);
        assert_eq!(table.column_kind("Temp_C"), Some(ColumnKind::Float));
        assert_eq!(table.column_kind("operator"), Some(ColumnKind::Text));
    }

    #[test]
    fn test_load_empty_is_malformed() {
        let result = DataLoader::new().load_csv_bytes(b"   \n");
        assert!(matches!(result, Err(AuditError::MalformedInput(_))));
    }

    #[test]
    fn test_semicolon_delimiter() {
        let csv = b"a;b\n1;2\n3;4\n";
        let table = DataLoader::new().with_delimiter(b';').load(csv).unwrap();
        assert_eq!(table.numeric_columns(), vec!["a", "b"]);
    }
}
