//! Time-indexed numeric tables
//!
//! `TimeFrame` is the single table type used for both inference inputs and
//! prediction outputs: a row-major `f64` matrix with named columns and a
//! naive-UTC timestamp index. Frames are immutable once constructed;
//! every transformation returns a new frame, so concurrent requests can
//! share a reference frame without defensive copying.

use chrono::{Datelike, Duration, NaiveDateTime, Timelike};

use crate::error::FrameError;

/// Derived cyclical time-feature column names, in derivation order
pub const TIME_FEATURE_COLUMNS: [&str; 6] = [
    "min_of_day_sin",
    "day_of_week_sin",
    "day_of_year_sin",
    "min_of_day_cos",
    "day_of_week_cos",
    "day_of_year_cos",
];

/// Returns true for columns produced by [`TimeFrame::with_time_features`]
#[must_use]
pub fn is_time_feature(column: &str) -> bool {
    TIME_FEATURE_COLUMNS.contains(&column)
}

/// A time-indexed numeric table
#[derive(Debug, Clone, PartialEq)]
pub struct TimeFrame {
    index: Vec<NaiveDateTime>,
    columns: Vec<String>,
    rows: Vec<Vec<f64>>,
}

impl TimeFrame {
    /// Build a frame, validating that every row matches the column count
    /// and the index matches the row count.
    ///
    /// # Errors
    ///
    /// Returns [`FrameError::IndexMismatch`] or [`FrameError::ShapeMismatch`].
    pub fn new(
        index: Vec<NaiveDateTime>,
        columns: Vec<String>,
        rows: Vec<Vec<f64>>,
    ) -> Result<Self, FrameError> {
        if index.len() != rows.len() {
            return Err(FrameError::IndexMismatch {
                index_len: index.len(),
                rows: rows.len(),
            });
        }
        for (i, row) in rows.iter().enumerate() {
            if row.len() != columns.len() {
                return Err(FrameError::ShapeMismatch {
                    row: i,
                    got: row.len(),
                    expected: columns.len(),
                });
            }
        }
        Ok(Self {
            index,
            columns,
            rows,
        })
    }

    /// Frame of NaN values over a future index: `periods` steps of `step`
    /// starting at `start` (inclusive).
    #[must_use]
    pub fn future(
        start: NaiveDateTime,
        step: Duration,
        periods: usize,
        columns: Vec<String>,
    ) -> Self {
        let index: Vec<NaiveDateTime> = (0..periods)
            .map(|i| start + step * i32::try_from(i).unwrap_or(i32::MAX))
            .collect();
        let width = columns.len();
        Self {
            index,
            columns,
            rows: vec![vec![f64::NAN; width]; periods],
        }
    }

    /// Number of rows
    #[must_use]
    pub fn n_rows(&self) -> usize {
        self.rows.len()
    }

    /// Number of columns
    #[must_use]
    pub fn n_cols(&self) -> usize {
        self.columns.len()
    }

    /// True when the frame has no rows
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    /// Column names in storage order
    #[must_use]
    pub fn columns(&self) -> &[String] {
        &self.columns
    }

    /// Timestamp index
    #[must_use]
    pub fn index(&self) -> &[NaiveDateTime] {
        &self.index
    }

    /// Row values at position `i`
    #[must_use]
    pub fn row(&self, i: usize) -> &[f64] {
        &self.rows[i]
    }

    /// Position of a named column
    #[must_use]
    pub fn column_position(&self, name: &str) -> Option<usize> {
        self.columns.iter().position(|c| c == name)
    }

    /// All values of a named column
    ///
    /// # Errors
    ///
    /// Returns [`FrameError::UnknownColumn`] when the column is absent.
    pub fn column_values(&self, name: &str) -> Result<Vec<f64>, FrameError> {
        let pos = self
            .column_position(name)
            .ok_or_else(|| FrameError::UnknownColumn(name.to_string()))?;
        Ok(self.rows.iter().map(|r| r[pos]).collect())
    }

    /// Column names excluding derived time features
    #[must_use]
    pub fn feature_columns(&self) -> Vec<String> {
        self.columns
            .iter()
            .filter(|c| !is_time_feature(c))
            .cloned()
            .collect()
    }

    /// Number of distinct instants in the index
    #[must_use]
    pub fn unique_instants(&self) -> usize {
        let mut seen: Vec<NaiveDateTime> = self.index.clone();
        seen.sort_unstable();
        seen.dedup();
        seen.len()
    }

    /// New frame with rows reordered by ascending timestamp (stable)
    #[must_use]
    pub fn sort_by_time(&self) -> Self {
        let mut order: Vec<usize> = (0..self.index.len()).collect();
        order.sort_by_key(|&i| self.index[i]);
        Self {
            index: order.iter().map(|&i| self.index[i]).collect(),
            columns: self.columns.clone(),
            rows: order.iter().map(|&i| self.rows[i].clone()).collect(),
        }
    }

    /// Infer the single uniform timestep of the index
    ///
    /// # Errors
    ///
    /// Returns [`FrameError::TooFewRows`] for fewer than 2 rows,
    /// [`FrameError::ZeroStep`] when adjacent instants repeat, and
    /// [`FrameError::NonUniformIndex`] when deltas differ.
    pub fn uniform_step(&self) -> Result<Duration, FrameError> {
        if self.index.len() < 2 {
            return Err(FrameError::TooFewRows {
                rows: self.index.len(),
            });
        }
        let expected = self.index[1] - self.index[0];
        if expected.is_zero() {
            return Err(FrameError::ZeroStep { at: 1 });
        }
        for (i, pair) in self.index.windows(2).enumerate().skip(1) {
            let step = pair[1] - pair[0];
            if step.is_zero() {
                return Err(FrameError::ZeroStep { at: i + 1 });
            }
            if step != expected {
                return Err(FrameError::NonUniformIndex {
                    expected_secs: expected.num_seconds(),
                    found_secs: step.num_seconds(),
                    at: i + 1,
                });
            }
        }
        Ok(expected)
    }

    /// New frame with the six cyclical time-feature columns appended
    /// (replacing any that already exist).
    #[must_use]
    pub fn with_time_features(&self) -> Self {
        let base = self.drop_columns(&TIME_FEATURE_COLUMNS);
        let mut columns = base.columns.clone();
        columns.extend(TIME_FEATURE_COLUMNS.iter().map(|s| (*s).to_string()));
        let rows = base
            .rows
            .iter()
            .zip(base.index.iter())
            .map(|(row, ts)| {
                let mut out = row.clone();
                out.extend(time_features_for(*ts));
                out
            })
            .collect();
        Self {
            index: base.index,
            columns,
            rows,
        }
    }

    /// New frame without the named columns (absent names are ignored)
    #[must_use]
    pub fn drop_columns(&self, names: &[&str]) -> Self {
        let keep: Vec<usize> = (0..self.columns.len())
            .filter(|&i| !names.contains(&self.columns[i].as_str()))
            .collect();
        Self {
            index: self.index.clone(),
            columns: keep.iter().map(|&i| self.columns[i].clone()).collect(),
            rows: self
                .rows
                .iter()
                .map(|r| keep.iter().map(|&i| r[i]).collect())
                .collect(),
        }
    }

    /// New frame restricted to the named columns, in the given order
    ///
    /// # Errors
    ///
    /// Returns [`FrameError::UnknownColumn`] for a missing name.
    pub fn select_columns(&self, names: &[String]) -> Result<Self, FrameError> {
        let positions: Vec<usize> = names
            .iter()
            .map(|n| {
                self.column_position(n)
                    .ok_or_else(|| FrameError::UnknownColumn(n.clone()))
            })
            .collect::<Result<_, _>>()?;
        Ok(Self {
            index: self.index.clone(),
            columns: names.to_vec(),
            rows: self
                .rows
                .iter()
                .map(|r| positions.iter().map(|&i| r[i]).collect())
                .collect(),
        })
    }

    /// Overwrite a single cell; only the executor builds frames in place.
    pub(crate) fn set_value(&mut self, row: usize, col: usize, value: f64) {
        self.rows[row][col] = value;
    }
}

/// Cyclical encodings for one instant, in [`TIME_FEATURE_COLUMNS`] order
#[must_use]
pub fn time_features_for(ts: NaiveDateTime) -> [f64; 6] {
    use std::f64::consts::TAU;
    let min_of_day = f64::from(ts.hour() * 60 + ts.minute()) / 1440.0;
    let day_of_week = f64::from(ts.weekday().num_days_from_monday()) / 7.0;
    let day_of_year = f64::from(ts.ordinal()) / 366.0;
    [
        (min_of_day * TAU).sin(),
        (day_of_week * TAU).sin(),
        (day_of_year * TAU).sin(),
        (min_of_day * TAU).cos(),
        (day_of_week * TAU).cos(),
        (day_of_year * TAU).cos(),
    ]
}
