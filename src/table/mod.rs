//! Typed record table
//!
//! A [`RecordTable`] wraps a polars [`DataFrame`] together with an explicit
//! per-column type tag that is fixed when the table is constructed. All
//! numeric-vs-non-numeric decisions downstream are queries over that schema.

use crate::anomaly::AnomalyLabel;
use crate::error::{AuditError, Result};
use polars::prelude::*;
use serde::{Deserialize, Serialize};

/// Column carrying externally supplied ground-truth anomaly labels
pub const GROUND_TRUTH_COLUMN: &str = "InjectedAnomaly";
/// Appended column holding the continuous anomaly score
pub const SCORE_COLUMN: &str = "anomaly_score";
/// Appended column holding the binary classification (1 normal, -1 anomaly)
pub const LABEL_COLUMN: &str = "is_anomaly";

/// Logical type of a column
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ColumnKind {
    Integer,
    Float,
    Boolean,
    Text,
    Other,
}

impl ColumnKind {
    /// Map a polars dtype to its logical kind
    pub fn from_dtype(dtype: &DataType) -> Self {
        if dtype.is_float() {
            ColumnKind::Float
        } else if dtype.is_integer() {
            ColumnKind::Integer
        } else {
            match dtype {
                DataType::Boolean => ColumnKind::Boolean,
                DataType::String => ColumnKind::Text,
                _ => ColumnKind::Other,
            }
        }
    }

    pub fn is_numeric(self) -> bool {
        matches!(self, ColumnKind::Integer | ColumnKind::Float)
    }
}

impl std::fmt::Display for ColumnKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            ColumnKind::Integer => "integer",
            ColumnKind::Float => "float",
            ColumnKind::Boolean => "boolean",
            ColumnKind::Text => "text",
            ColumnKind::Other => "other",
        };
        f.write_str(name)
    }
}

/// Name and kind of one column
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ColumnSpec {
    pub name: String,
    pub kind: ColumnKind,
}

/// Tabular audit-trail records with an explicit schema
#[derive(Debug, Clone)]
pub struct RecordTable {
    frame: DataFrame,
    schema: Vec<ColumnSpec>,
}

impl RecordTable {
    /// Wrap a data frame, fixing its schema
    pub fn new(frame: DataFrame) -> Self {
        let schema = Self::schema_of(&frame);
        Self { frame, schema }
    }

    fn schema_of(frame: &DataFrame) -> Vec<ColumnSpec> {
        frame
            .get_columns()
            .iter()
            .map(|col| ColumnSpec {
                name: col.name().to_string(),
                kind: ColumnKind::from_dtype(col.dtype()),
            })
            .collect()
    }

    /// Underlying data frame
    pub fn frame(&self) -> &DataFrame {
        &self.frame
    }

    /// Number of rows
    pub fn height(&self) -> usize {
        self.frame.height()
    }

    /// Number of columns
    pub fn width(&self) -> usize {
        self.schema.len()
    }

    pub fn schema(&self) -> &[ColumnSpec] {
        &self.schema
    }

    pub fn column_names(&self) -> Vec<&str> {
        self.schema.iter().map(|c| c.name.as_str()).collect()
    }

    pub fn column_kind(&self, name: &str) -> Option<ColumnKind> {
        self.schema.iter().find(|c| c.name == name).map(|c| c.kind)
    }

    pub fn has_column(&self, name: &str) -> bool {
        self.column_kind(name).is_some()
    }

    /// Names of all integer or floating-point columns, in table order
    pub fn numeric_columns(&self) -> Vec<&str> {
        self.schema
            .iter()
            .filter(|c| c.kind.is_numeric())
            .map(|c| c.name.as_str())
            .collect()
    }

    /// Values of a numeric column as f64; nulls are kept as `None`
    pub fn numeric_values(&self, name: &str) -> Result<Vec<Option<f64>>> {
        match self.column_kind(name) {
            Some(kind) if kind.is_numeric() => {}
            _ => return Err(AuditError::FeatureNotFound(name.to_string())),
        }

        let column = self
            .frame
            .column(name)
            .map_err(|_| AuditError::FeatureNotFound(name.to_string()))?;
        let casted = column.cast(&DataType::Float64)?;
        let values = casted.f64()?.into_iter().collect();
        Ok(values)
    }

    /// Ground-truth labels from the `InjectedAnomaly` column, if present.
    ///
    /// Booleans are taken as-is, numbers are true when non-zero and text is
    /// true for `true`, `t`, `yes`, `y` or `1` (case-insensitive). Nulls are
    /// false.
    pub fn ground_truth(&self) -> Result<Option<Vec<bool>>> {
        let kind = match self.column_kind(GROUND_TRUTH_COLUMN) {
            Some(kind) => kind,
            None => return Ok(None),
        };
        let column = self.frame.column(GROUND_TRUTH_COLUMN)?;

        let labels: Vec<bool> = match kind {
            ColumnKind::Boolean => column
                .as_materialized_series()
                .bool()?
                .into_iter()
                .map(|v| v.unwrap_or(false))
                .collect(),
            ColumnKind::Integer | ColumnKind::Float => {
                let casted = column.cast(&DataType::Float64)?;
                let labels = casted
                    .f64()?
                    .into_iter()
                    .map(|v| v.map(|x| x != 0.0).unwrap_or(false))
                    .collect();
                labels
            }
            ColumnKind::Text => column
                .str()?
                .into_iter()
                .map(|v| v.map(is_truthy).unwrap_or(false))
                .collect(),
            ColumnKind::Other => {
                return Err(AuditError::DataError(format!(
                    "column '{}' has an unsupported type for ground-truth labels",
                    GROUND_TRUTH_COLUMN
                )))
            }
        };

        Ok(Some(labels))
    }

    /// Append (or replace) the `anomaly_score` and `is_anomaly` columns
    pub fn with_annotations(mut self, scores: &[f64], labels: &[AnomalyLabel]) -> Result<Self> {
        let n_rows = self.height();
        if scores.len() != n_rows || labels.len() != n_rows {
            return Err(AuditError::ShapeError {
                expected: format!("{} scores and labels", n_rows),
                actual: format!("{} scores, {} labels", scores.len(), labels.len()),
            });
        }

        let codes: Vec<i32> = labels.iter().map(|l| l.code()).collect();
        self.frame
            .with_column(Series::new(SCORE_COLUMN.into(), scores.to_vec()))?;
        self.frame
            .with_column(Series::new(LABEL_COLUMN.into(), codes))?;
        self.schema = Self::schema_of(&self.frame);

        Ok(self)
    }

    /// First `n` rows
    pub fn head(&self, n: usize) -> DataFrame {
        self.frame.head(Some(n))
    }

    /// Rows where `mask` is true
    pub fn filter_rows(&self, mask: &[bool]) -> Result<DataFrame> {
        if mask.len() != self.height() {
            return Err(AuditError::ShapeError {
                expected: format!("mask of length {}", self.height()),
                actual: format!("mask of length {}", mask.len()),
            });
        }
        let mask = BooleanChunked::from_slice("mask".into(), mask);
        Ok(self.frame.filter(&mask)?)
    }

    /// Serialize to CSV with header, preserving row order
    pub fn to_csv_bytes(&self) -> Result<Vec<u8>> {
        let mut buf = Vec::new();
        let mut frame = self.frame.clone();
        CsvWriter::new(&mut buf)
            .include_header(true)
            .finish(&mut frame)?;
        Ok(buf)
    }
}

fn is_truthy(value: &str) -> bool {
    matches!(
        value.trim().to_ascii_lowercase().as_str(),
        "true" | "t" | "yes" | "y" | "1"
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_table() -> RecordTable {
        let frame = df!(
            "batch" => &["A1", "A2", "A3"],
            "Temp_C" => &[20.5, 21.0, 35.2],
            "count" => &[3i64, 4, 5],
            "InjectedAnomaly" => &[false, false, true]
        )
        .unwrap();
        RecordTable::new(frame)
    }

    #[test]
    fn test_schema_kinds() {
        let table = sample_table();
        assert_eq!(table.column_kind("batch"), Some(ColumnKind::Text));
        assert_eq!(table.column_kind("Temp_C"), Some(ColumnKind::Float));
        assert_eq!(table.column_kind("count"), Some(ColumnKind::Integer));
        assert_eq!(table.column_kind("InjectedAnomaly"), Some(ColumnKind::Boolean));
        assert_eq!(table.numeric_columns(), vec!["Temp_C", "count"]);
    }

    #[test]
    fn test_numeric_values_rejects_text() {
        let table = sample_table();
        assert!(matches!(
            table.numeric_values("batch"),
            Err(AuditError::FeatureNotFound(_))
        ));
        let counts = table.numeric_values("count").unwrap();
        assert_eq!(counts, vec![Some(3.0), Some(4.0), Some(5.0)]);
    }

    #[test]
    fn test_ground_truth_from_text() {
        let frame = df!(
            "x" => &[1.0, 2.0, 3.0],
            "InjectedAnomaly" => &["True", "no", "1"]
        )
        .unwrap();
        let table = RecordTable::new(frame);
        assert_eq!(table.ground_truth().unwrap(), Some(vec![true, false, true]));
    }

    #[test]
    fn test_ground_truth_absent() {
        let frame = df!("x" => &[1.0, 2.0]).unwrap();
        assert_eq!(RecordTable::new(frame).ground_truth().unwrap(), None);
    }

    #[test]
    fn test_with_annotations() {
        let table = sample_table();
        let annotated = table
            .with_annotations(
                &[0.1, 0.05, -0.2],
                &[AnomalyLabel::Normal, AnomalyLabel::Normal, AnomalyLabel::Anomaly],
            )
            .unwrap();
        assert_eq!(annotated.width(), 6);
        assert_eq!(annotated.column_kind(SCORE_COLUMN), Some(ColumnKind::Float));
        assert_eq!(annotated.column_kind(LABEL_COLUMN), Some(ColumnKind::Integer));
        assert_eq!(
            annotated.numeric_values(LABEL_COLUMN).unwrap(),
            vec![Some(1.0), Some(1.0), Some(-1.0)]
        );
    }

    #[test]
    fn test_with_annotations_length_mismatch() {
        let result = sample_table().with_annotations(&[0.1], &[AnomalyLabel::Normal]);
        assert!(matches!(result, Err(AuditError::ShapeError { .. })));
    }

    #[test]
    fn test_filter_rows() {
        let table = sample_table();
        let filtered = table.filter_rows(&[false, false, true]).unwrap();
        assert_eq!(filtered.height(), 1);
    }
}
