//! Survival label adapter.
//!
//! Pairs each subject's follow-up time with the binary event indicator into
//! the one label structure every model and metric consumes. Labels are
//! rebuilt per eligible row subset and never cached across feature sets:
//! missingness differs per feature set, and stale labels would silently
//! misalign with the feature matrix.

use crate::data::{CohortTable, DataError};
use ndarray::{Array1, Axis};

/// Row-aligned (time-to-event, event-indicator) labels.
///
/// `event` is 1 when the event was observed and 0 when the subject was
/// censored at `time`.
#[derive(Debug, Clone)]
pub struct SurvivalLabels {
    time: Array1<f64>,
    event: Array1<u8>,
}

impl SurvivalLabels {
    pub fn new(time: Array1<f64>, event: Array1<u8>) -> Result<Self, DataError> {
        if time.len() != event.len() {
            return Err(DataError::LabelShapeMismatch {
                time: time.len(),
                event: event.len(),
            });
        }
        if let Some(&bad) = event.iter().find(|&&e| e > 1) {
            return Err(DataError::NonBinaryEvent {
                column: "event".to_string(),
                value: f64::from(bad),
            });
        }
        Ok(Self { time, event })
    }

    /// Builds labels for the given rows of a cohort table.
    ///
    /// Rows are expected to be pre-filtered for eligibility; a non-binary or
    /// missing event cell here means the caller skipped that filter.
    pub fn from_table(
        table: &CohortTable,
        time_column: &str,
        event_column: &str,
        rows: &[usize],
    ) -> Result<Self, DataError> {
        let time_col = table
            .column(time_column)
            .ok_or_else(|| DataError::ColumnNotFound(time_column.to_string()))?;
        let event_col = table
            .column(event_column)
            .ok_or_else(|| DataError::ColumnNotFound(event_column.to_string()))?;

        let mut time = Vec::with_capacity(rows.len());
        let mut event = Vec::with_capacity(rows.len());
        for &row in rows {
            time.push(time_col[row]);
            let value = event_col[row];
            if value == 0.0 {
                event.push(0u8);
            } else if value == 1.0 {
                event.push(1u8);
            } else {
                return Err(DataError::NonBinaryEvent {
                    column: event_column.to_string(),
                    value,
                });
            }
        }
        Self::new(Array1::from_vec(time), Array1::from_vec(event))
    }

    pub fn len(&self) -> usize {
        self.time.len()
    }

    pub fn is_empty(&self) -> bool {
        self.time.is_empty()
    }

    pub fn time(&self) -> &Array1<f64> {
        &self.time
    }

    pub fn event(&self) -> &Array1<u8> {
        &self.event
    }

    pub fn is_event(&self, row: usize) -> bool {
        self.event[row] == 1
    }

    pub fn n_events(&self) -> usize {
        self.event.iter().filter(|&&e| e == 1).count()
    }

    /// True when both event and censored subjects are present.
    pub fn has_both_classes(&self) -> bool {
        let events = self.n_events();
        events > 0 && events < self.len()
    }

    pub fn min_time(&self) -> f64 {
        self.time.iter().copied().fold(f64::INFINITY, f64::min)
    }

    pub fn max_time(&self) -> f64 {
        self.time.iter().copied().fold(f64::NEG_INFINITY, f64::max)
    }

    /// New labels containing only the given rows, in the given order.
    pub fn select(&self, rows: &[usize]) -> SurvivalLabels {
        SurvivalLabels {
            time: self.time.select(Axis(0), rows),
            event: self.event.select(Axis(0), rows),
        }
    }
}
