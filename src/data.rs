//! # Cohort Table Loading and Eligibility
//!
//! This module is the exclusive entry point for user-provided data. It reads
//! a flat delimited file (one row per subject), keeps only the columns the
//! requested configuration needs, and represents every cell as `f64` with
//! `NaN` encoding missingness. Unparseable cells load as missing rather than
//! failing the run: eligibility is decided per evaluation, not globally.
//!
//! - Missingness-aware: a row is excluded from an evaluation only when the
//!   columns that evaluation needs are jointly incomplete. The same row may
//!   participate in a smaller feature set.
//! - User-centric errors: failures are assumed to be user-input errors, and
//!   `DataError` is written to give actionable feedback.

use ndarray::{Array1, Array2};
use polars::prelude::*;
use std::collections::{HashMap, HashSet};
use std::fs::File;
use std::path::Path;
use thiserror::Error;

/// A comprehensive error type for data loading and shape failures.
#[derive(Error, Debug)]
pub enum DataError {
    #[error("error from the underlying Polars DataFrame library: {0}")]
    Polars(#[from] PolarsError),
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("the required column '{0}' was not found in the input file; check spelling and case")]
    ColumnNotFound(String),
    #[error("the column '{column_name}' could not be read as numeric data (found type: {found_type})")]
    ColumnWrongType {
        column_name: String,
        found_type: String,
    },
    #[error("the input file contains no data rows")]
    EmptyTable,
    #[error("column '{column}' has {found} rows, expected {expected}")]
    RaggedColumns {
        column: String,
        expected: usize,
        found: usize,
    },
    #[error("time and event vectors differ in length: {time} vs {event}")]
    LabelShapeMismatch { time: usize, event: usize },
    #[error("event indicator in column '{column}' must be 0 or 1, found {value}")]
    NonBinaryEvent { column: String, value: f64 },
}

/// In-memory cohort: named numeric columns of equal length.
#[derive(Debug, Clone)]
pub struct CohortTable {
    columns: HashMap<String, Array1<f64>>,
    n_rows: usize,
}

impl CohortTable {
    /// Builds a table directly from column vectors. Used by tests and by
    /// callers that synthesize cohorts in memory.
    pub fn from_columns(columns: Vec<(String, Vec<f64>)>) -> Result<Self, DataError> {
        let n_rows = columns.first().map(|(_, values)| values.len()).unwrap_or(0);
        if n_rows == 0 {
            return Err(DataError::EmptyTable);
        }
        let mut map = HashMap::with_capacity(columns.len());
        for (name, values) in columns {
            if values.len() != n_rows {
                return Err(DataError::RaggedColumns {
                    column: name,
                    expected: n_rows,
                    found: values.len(),
                });
            }
            map.insert(name, Array1::from_vec(values));
        }
        Ok(Self {
            columns: map,
            n_rows,
        })
    }

    /// Reads a delimited text file, keeping only the `required` columns.
    ///
    /// Every kept cell becomes `f64`; nulls and cells that do not parse as
    /// numbers become `NaN`.
    pub fn load_csv(path: &Path, separator: u8, required: &[String]) -> Result<Self, DataError> {
        let df = CsvReader::new(File::open(path)?)
            .with_options(
                CsvReadOptions::default()
                    .with_has_header(true)
                    .with_parse_options(CsvParseOptions::default().with_separator(separator)),
            )
            .finish()?;

        if df.height() == 0 {
            return Err(DataError::EmptyTable);
        }

        let present: HashSet<String> = df
            .get_column_names()
            .into_iter()
            .map(|name| name.to_string())
            .collect();

        let mut columns = HashMap::with_capacity(required.len());
        let mut seen: HashSet<&str> = HashSet::with_capacity(required.len());
        for name in required {
            if !seen.insert(name.as_str()) {
                continue;
            }
            if !present.contains(name.as_str()) {
                return Err(DataError::ColumnNotFound(name.clone()));
            }
            let values = extract_numeric_column(&df, name)?;
            columns.insert(name.clone(), Array1::from_vec(values));
        }

        Ok(Self {
            columns,
            n_rows: df.height(),
        })
    }

    pub fn n_rows(&self) -> usize {
        self.n_rows
    }

    pub fn column(&self, name: &str) -> Option<&Array1<f64>> {
        self.columns.get(name)
    }

    /// Rows jointly complete on the outcome's time column and every feature
    /// column, with the event cell exactly 0 or 1. Row order is preserved.
    pub fn eligible_rows(
        &self,
        time_column: &str,
        event_column: &str,
        feature_columns: &[String],
    ) -> Result<Vec<usize>, DataError> {
        let time = self
            .column(time_column)
            .ok_or_else(|| DataError::ColumnNotFound(time_column.to_string()))?;
        let event = self
            .column(event_column)
            .ok_or_else(|| DataError::ColumnNotFound(event_column.to_string()))?;
        let mut features = Vec::with_capacity(feature_columns.len());
        for name in feature_columns {
            features.push(
                self.column(name)
                    .ok_or_else(|| DataError::ColumnNotFound(name.clone()))?,
            );
        }

        let rows = (0..self.n_rows)
            .filter(|&row| {
                time[row].is_finite()
                    && (event[row] == 0.0 || event[row] == 1.0)
                    && features.iter().all(|column| column[row].is_finite())
            })
            .collect();
        Ok(rows)
    }

    /// True when the given rows contain both event and censored subjects.
    pub fn has_event_variation(
        &self,
        event_column: &str,
        rows: &[usize],
    ) -> Result<bool, DataError> {
        let event = self
            .column(event_column)
            .ok_or_else(|| DataError::ColumnNotFound(event_column.to_string()))?;
        let mut saw_censored = false;
        let mut saw_event = false;
        for &row in rows {
            if event[row] == 0.0 {
                saw_censored = true;
            } else if event[row] == 1.0 {
                saw_event = true;
            }
            if saw_censored && saw_event {
                return Ok(true);
            }
        }
        Ok(false)
    }

    /// Assembles the feature matrix for the given rows, columns in the order
    /// requested.
    pub fn feature_matrix(
        &self,
        feature_columns: &[String],
        rows: &[usize],
    ) -> Result<Array2<f64>, DataError> {
        let mut matrix = Array2::zeros((rows.len(), feature_columns.len()));
        for (j, name) in feature_columns.iter().enumerate() {
            let column = self
                .column(name)
                .ok_or_else(|| DataError::ColumnNotFound(name.clone()))?;
            for (i, &row) in rows.iter().enumerate() {
                matrix[[i, j]] = column[row];
            }
        }
        Ok(matrix)
    }
}

fn extract_numeric_column(df: &DataFrame, column_name: &str) -> Result<Vec<f64>, DataError> {
    let series = df.column(column_name)?;

    // Non-strict cast: unparseable cells become null, which we carry as NaN.
    let casted = match series.cast(&DataType::Float64) {
        Ok(casted) => casted,
        Err(_) => {
            return Err(DataError::ColumnWrongType {
                column_name: column_name.to_string(),
                found_type: format!("{:?}", series.dtype()),
            });
        }
    };

    let chunked = casted.f64()?.rechunk();
    Ok(chunked
        .into_iter()
        .map(|value| value.unwrap_or(f64::NAN))
        .collect())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::Builder;

    fn write_csv(contents: &str) -> tempfile::NamedTempFile {
        let mut file = Builder::new()
            .suffix(".csv")
            .tempfile()
            .expect("tempfile should be created");
        file.write_all(contents.as_bytes())
            .expect("csv contents should be written");
        file.flush().expect("csv contents should be flushed");
        file
    }

    fn required(names: &[&str]) -> Vec<String> {
        names.iter().map(|name| name.to_string()).collect()
    }

    #[test]
    fn loads_nulls_and_unparseable_cells_as_nan() {
        let file = write_csv("time,event,lab\n1.5,1,0.2\n,0,oops\n3.0,1,\n");
        let table = CohortTable::load_csv(file.path(), b',', &required(&["time", "event", "lab"]))
            .expect("load should succeed");

        assert_eq!(table.n_rows(), 3);
        let time = table.column("time").expect("time column present");
        assert_eq!(time[0], 1.5);
        assert!(time[1].is_nan());
        let lab = table.column("lab").expect("lab column present");
        assert!(lab[1].is_nan());
        assert!(lab[2].is_nan());
        assert_eq!(lab[0], 0.2);
    }

    #[test]
    fn missing_required_column_is_reported_by_name() {
        let file = write_csv("time,event\n1.0,1\n");
        let err = CohortTable::load_csv(file.path(), b',', &required(&["time", "absent"]))
            .expect_err("missing column must fail");
        assert!(matches!(err, DataError::ColumnNotFound(name) if name == "absent"));
    }

    #[test]
    fn respects_alternate_separator() {
        let file = write_csv("time;event\n1.0;1\n2.0;0\n");
        let table = CohortTable::load_csv(file.path(), b';', &required(&["time", "event"]))
            .expect("load should succeed");
        assert_eq!(table.n_rows(), 2);
        assert_eq!(table.column("event").expect("event column")[1], 0.0);
    }

    #[test]
    fn eligibility_requires_joint_completeness_and_binary_event() {
        let table = CohortTable::from_columns(vec![
            ("time".to_string(), vec![1.0, f64::NAN, 3.0, 4.0, 5.0, 6.0]),
            ("event".to_string(), vec![1.0, 1.0, f64::NAN, 2.0, 0.0, 1.0]),
            ("x".to_string(), vec![0.1, 0.2, 0.3, 0.4, f64::NAN, 0.6]),
        ])
        .expect("table should build");

        let rows = table
            .eligible_rows("time", "event", &required(&["x"]))
            .expect("columns are present");
        // Row 1 has NaN time, row 2 NaN event, row 3 event=2, row 4 NaN feature.
        assert_eq!(rows, vec![0, 5]);
    }

    #[test]
    fn rows_excluded_for_one_feature_set_can_serve_another() {
        let table = CohortTable::from_columns(vec![
            ("time".to_string(), vec![1.0, 2.0, 3.0]),
            ("event".to_string(), vec![1.0, 0.0, 1.0]),
            ("dx".to_string(), vec![0.0, 1.0, 0.0]),
            ("lab".to_string(), vec![0.5, f64::NAN, 0.7]),
        ])
        .expect("table should build");

        let small = table
            .eligible_rows("time", "event", &required(&["dx"]))
            .expect("columns are present");
        let wide = table
            .eligible_rows("time", "event", &required(&["dx", "lab"]))
            .expect("columns are present");
        assert_eq!(small, vec![0, 1, 2]);
        assert_eq!(wide, vec![0, 2]);
    }

    #[test]
    fn event_variation_detects_single_class_subsets() {
        let table = CohortTable::from_columns(vec![
            ("event".to_string(), vec![0.0, 0.0, 1.0, 0.0]),
        ])
        .expect("table should build");
        assert!(!table
            .has_event_variation("event", &[0, 1, 3])
            .expect("column present"));
        assert!(table
            .has_event_variation("event", &[0, 2])
            .expect("column present"));
    }

    #[test]
    fn feature_matrix_keeps_requested_column_order() {
        let table = CohortTable::from_columns(vec![
            ("a".to_string(), vec![1.0, 2.0, 3.0]),
            ("b".to_string(), vec![10.0, 20.0, 30.0]),
        ])
        .expect("table should build");
        let matrix = table
            .feature_matrix(&required(&["b", "a"]), &[2, 0])
            .expect("columns are present");
        assert_eq!(matrix.shape(), &[2, 2]);
        assert_eq!(matrix[[0, 0]], 30.0);
        assert_eq!(matrix[[0, 1]], 3.0);
        assert_eq!(matrix[[1, 0]], 10.0);
        assert_eq!(matrix[[1, 1]], 1.0);
    }

    #[test]
    fn ragged_columns_are_rejected() {
        let err = CohortTable::from_columns(vec![
            ("a".to_string(), vec![1.0, 2.0]),
            ("b".to_string(), vec![1.0]),
        ])
        .expect_err("ragged input must fail");
        assert!(matches!(err, DataError::RaggedColumns { column, .. } if column == "b"));
    }
}
