//! Feature selection
//!
//! Projects a [`RecordTable`] onto a caller-chosen subset of its numeric
//! columns. Ground-truth and previously appended result columns are never
//! offered as features.

use crate::error::{AuditError, Result};
use crate::table::{RecordTable, GROUND_TRUTH_COLUMN, LABEL_COLUMN, SCORE_COLUMN};
use ndarray::{s, Array2, ArrayView2};
use serde::{Deserialize, Serialize};

/// Rectangular numeric matrix with named columns, all values finite
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FeatureMatrix {
    names: Vec<String>,
    values: Array2<f64>,
}

impl FeatureMatrix {
    /// Build a matrix, enforcing a non-empty column set and finite values
    pub fn new(names: Vec<String>, values: Array2<f64>) -> Result<Self> {
        if names.is_empty() || values.ncols() == 0 {
            return Err(AuditError::NoFeaturesSelected);
        }
        if names.len() != values.ncols() {
            return Err(AuditError::ShapeError {
                expected: format!("{} columns", names.len()),
                actual: format!("{} columns", values.ncols()),
            });
        }
        for ((row, col), v) in values.indexed_iter() {
            if !v.is_finite() {
                return Err(AuditError::InvalidFeatureData {
                    column: names[col].clone(),
                    row,
                    reason: format!("non-finite value {}", v),
                });
            }
        }
        Ok(Self { names, values })
    }

    pub fn names(&self) -> &[String] {
        &self.names
    }

    pub fn values(&self) -> &Array2<f64> {
        &self.values
    }

    pub fn nrows(&self) -> usize {
        self.values.nrows()
    }

    pub fn ncols(&self) -> usize {
        self.values.ncols()
    }

    /// View of the first `n` rows
    pub fn head(&self, n: usize) -> ArrayView2<'_, f64> {
        let n = n.min(self.nrows());
        self.values.slice(s![..n, ..])
    }
}

/// Chooses and validates the numeric feature columns of a table
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FeatureSelector {
    /// Columns never offered as features
    excluded: Vec<String>,
}

impl Default for FeatureSelector {
    fn default() -> Self {
        Self::new()
    }
}

impl FeatureSelector {
    /// Selector excluding the ground-truth and result columns
    pub fn new() -> Self {
        Self {
            excluded: vec![
                GROUND_TRUTH_COLUMN.to_string(),
                SCORE_COLUMN.to_string(),
                LABEL_COLUMN.to_string(),
            ],
        }
    }

    /// Exclude an additional column (e.g. a record id stored as an integer)
    pub fn with_excluded(mut self, column: impl Into<String>) -> Self {
        let column = column.into();
        if !self.excluded.contains(&column) {
            self.excluded.push(column);
        }
        self
    }

    /// Numeric columns eligible as features, in table order
    pub fn candidate_features(&self, table: &RecordTable) -> Vec<String> {
        table
            .numeric_columns()
            .into_iter()
            .filter(|name| !self.excluded.iter().any(|e| e == name))
            .map(|name| name.to_string())
            .collect()
    }

    /// Project `table` onto `columns`
    pub fn select<S: AsRef<str>>(&self, table: &RecordTable, columns: &[S]) -> Result<FeatureMatrix> {
        let candidates = self.candidate_features(table);
        if candidates.is_empty() || columns.is_empty() {
            return Err(AuditError::NoFeaturesSelected);
        }

        let mut names: Vec<String> = Vec::with_capacity(columns.len());
        for column in columns {
            let column = column.as_ref();
            if !candidates.iter().any(|c| c == column) {
                return Err(AuditError::FeatureNotFound(column.to_string()));
            }
            if !names.iter().any(|n| n == column) {
                names.push(column.to_string());
            }
        }

        let n_rows = table.height();
        let col_data: Vec<Vec<f64>> = names
            .iter()
            .map(|name| {
                table
                    .numeric_values(name)?
                    .into_iter()
                    .enumerate()
                    .map(|(row, v)| match v {
                        Some(x) if x.is_finite() => Ok(x),
                        Some(x) => Err(AuditError::InvalidFeatureData {
                            column: name.clone(),
                            row,
                            reason: format!("non-finite value {}", x),
                        }),
                        None => Err(AuditError::InvalidFeatureData {
                            column: name.clone(),
                            row,
                            reason: "missing value".to_string(),
                        }),
                    })
                    .collect::<Result<Vec<f64>>>()
            })
            .collect::<Result<Vec<Vec<f64>>>>()?;

        let values = Array2::from_shape_fn((n_rows, names.len()), |(r, c)| col_data[c][r]);
        FeatureMatrix::new(names, values)
    }

    /// Project onto every candidate feature
    pub fn select_all(&self, table: &RecordTable) -> Result<FeatureMatrix> {
        let candidates = self.candidate_features(table);
        self.select(table, &candidates)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use polars::prelude::*;

    fn table() -> RecordTable {
        RecordTable::new(
            df!(
                "Temp_C" => &[20.0, 21.0, 22.0, 40.0],
                "pH" => &[7.0, 7.1, 6.9, 3.0],
                "user" => &["a", "b", "c", "d"],
                "InjectedAnomaly" => &[0i64, 0, 0, 1]
            )
            .unwrap(),
        )
    }

    #[test]
    fn test_candidates_exclude_ground_truth() {
        let selector = FeatureSelector::new();
        assert_eq!(selector.candidate_features(&table()), vec!["Temp_C", "pH"]);
    }

    #[test]
    fn test_select_projects_in_requested_order() {
        let m = FeatureSelector::new().select(&table(), &["pH", "Temp_C"]).unwrap();
        assert_eq!(m.names(), &["pH".to_string(), "Temp_C".to_string()]);
        assert_eq!(m.values()[[3, 0]], 3.0);
        assert_eq!(m.values()[[3, 1]], 40.0);
    }

    #[test]
    fn test_empty_selection() {
        let empty: [&str; 0] = [];
        let result = FeatureSelector::new().select(&table(), &empty);
        assert!(matches!(result, Err(AuditError::NoFeaturesSelected)));
    }

    #[test]
    fn test_no_numeric_columns() {
        let t = RecordTable::new(df!("user" => &["a", "b"]).unwrap());
        let result = FeatureSelector::new().select_all(&t);
        assert!(matches!(result, Err(AuditError::NoFeaturesSelected)));
    }

    #[test]
    fn test_text_column_rejected() {
        let result = FeatureSelector::new().select(&table(), &["user"]);
        assert!(matches!(result, Err(AuditError::FeatureNotFound(ref c)) if c == "user"));
    }

    #[test]
    fn test_ground_truth_not_selectable() {
        let result = FeatureSelector::new().select(&table(), &["InjectedAnomaly"]);
        assert!(matches!(result, Err(AuditError::FeatureNotFound(_))));
    }

    #[test]
    fn test_missing_value_rejected() {
        let t = RecordTable::new(
            df!("x" => &[Some(1.0), None, Some(3.0)]).unwrap(),
        );
        let result = FeatureSelector::new().select_all(&t);
        assert!(matches!(
            result,
            Err(AuditError::InvalidFeatureData { row: 1, .. })
        ));
    }

    #[test]
    fn test_nan_rejected() {
        let t = RecordTable::new(df!("x" => &[1.0, f64::NAN, 3.0]).unwrap());
        let result = FeatureSelector::new().select_all(&t);
        assert!(matches!(
            result,
            Err(AuditError::InvalidFeatureData { ref column, row: 1, .. }) if column == "x"
        ));
    }

    #[test]
    fn test_excluded_column() {
        let selector = FeatureSelector::new().with_excluded("pH");
        assert_eq!(selector.candidate_features(&table()), vec!["Temp_C"]);
    }
}
