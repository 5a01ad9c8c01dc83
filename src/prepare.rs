//! Request payload validation and normalization
//!
//! Turns an inbound dict-of-arrays payload into a sorted, timezone-naive,
//! numeric [`TimeFrame`] with cyclical time features appended. Every
//! failure mode maps to a distinct [`PrepareError`] so the endpoint can
//! return a precise 4xx detail, and all of it happens before a
//! concurrency slot is consumed.

use std::collections::BTreeMap;

use chrono::{DateTime, NaiveDate, NaiveDateTime};
use serde_json::Value;
use tracing::debug;

use crate::error::PrepareError;
use crate::frame::TimeFrame;

/// Timestamp column names probed in order when `index_col` is absent
pub const INDEX_CANDIDATES: [&str; 4] = ["ts", "timestamp", "time", "date"];

/// Validates and normalizes prediction request payloads
#[derive(Debug, Clone, Copy, Default)]
pub struct RequestPreparer;

impl RequestPreparer {
    /// Run the full validation chain
    ///
    /// `required_base` lists the feature columns the loaded model expects
    /// (time features excluded); pass an empty slice when no model is
    /// loaded. Returns the prepared frame plus the column list actually
    /// enforced, for error reporting by the caller.
    ///
    /// # Errors
    ///
    /// One [`PrepareError`] variant per failed validation step.
    pub fn prepare(
        &self,
        data: &BTreeMap<String, Vec<Value>>,
        index_col: Option<&str>,
        required_base: &[String],
    ) -> Result<(TimeFrame, Vec<String>), PrepareError> {
        if data.is_empty() || data.values().all(Vec::is_empty) {
            return Err(PrepareError::EmptyPayload);
        }

        let index_name = resolve_index_column(data, index_col)?;
        let raw_index = &data[&index_name];
        let n_rows = raw_index.len();

        for (name, values) in data {
            if name != &index_name && values.len() != n_rows {
                return Err(PrepareError::RaggedColumns {
                    detail: format!(
                        "column '{}' has {} values, '{}' has {}",
                        name,
                        values.len(),
                        index_name,
                        n_rows
                    ),
                });
            }
        }

        // Null timestamp cells drop their rows; everything else must parse.
        let mut index = Vec::with_capacity(n_rows);
        let mut keep = Vec::with_capacity(n_rows);
        for (i, value) in raw_index.iter().enumerate() {
            if value.is_null() {
                continue;
            }
            index.push(parse_timestamp(value).ok_or_else(|| PrepareError::InvalidTimestamp {
                column: index_name.clone(),
            })?);
            keep.push(i);
        }
        debug!(
            column = %index_name,
            rows = index.len(),
            dropped = n_rows - index.len(),
            "timestamp column parsed"
        );

        if index.is_empty() {
            return Err(PrepareError::EmptyAfterNormalization);
        }

        // The degenerate-index check runs before numeric coercion so a
        // collapsed index is reported even when value columns are also
        // malformed.
        let mut distinct = index.clone();
        distinct.sort_unstable();
        distinct.dedup();
        if index.len() > 1 && distinct.len() == 1 {
            return Err(PrepareError::DuplicateTimestamps {
                rows: index.len(),
                instant: index[0].format("%Y-%m-%dT%H:%M:%S").to_string(),
            });
        }

        let columns: Vec<String> = data.keys().filter(|k| *k != &index_name).cloned().collect();
        let mut failed: Vec<String> = Vec::new();
        let mut rows: Vec<Vec<f64>> = vec![Vec::with_capacity(columns.len()); index.len()];
        for name in &columns {
            let values = &data[name];
            let mut parsed = Vec::with_capacity(keep.len());
            let mut ok = true;
            for &i in &keep {
                match coerce_numeric(&values[i]) {
                    Some(v) => parsed.push(v),
                    None => {
                        ok = false;
                        break;
                    }
                }
            }
            if ok {
                for (row, v) in rows.iter_mut().zip(parsed) {
                    row.push(v);
                }
            } else {
                failed.push(name.clone());
            }
        }
        if !failed.is_empty() {
            failed.sort();
            return Err(PrepareError::NonNumericColumns { columns: failed });
        }

        let frame = TimeFrame::new(index, columns, rows)
            .map_err(|e| PrepareError::RaggedColumns {
                detail: e.to_string(),
            })?
            .sort_by_time();

        let mut enforced: Vec<String> = required_base.to_vec();
        enforced.sort();
        if !enforced.is_empty() {
            let missing: Vec<String> = enforced
                .iter()
                .filter(|c| frame.column_position(c).is_none())
                .cloned()
                .collect();
            if !missing.is_empty() {
                return Err(PrepareError::MissingFeatureColumns { columns: missing });
            }
        }

        Ok((frame.with_time_features(), enforced))
    }
}

fn resolve_index_column(
    data: &BTreeMap<String, Vec<Value>>,
    index_col: Option<&str>,
) -> Result<String, PrepareError> {
    if let Some(explicit) = index_col {
        if data.contains_key(explicit) {
            return Ok(explicit.to_string());
        }
    }
    for candidate in INDEX_CANDIDATES {
        if data.contains_key(candidate) {
            return Ok(candidate.to_string());
        }
    }
    Err(PrepareError::NoTimestampColumn)
}

/// Parse one timestamp cell to a naive-UTC instant
///
/// Accepts RFC 3339 (offset stripped to UTC), `YYYY-MM-DDTHH:MM:SS[.f]`,
/// `YYYY-MM-DD HH:MM:SS[.f]`, bare dates, and integer epoch seconds.
#[must_use]
pub fn parse_timestamp(value: &Value) -> Option<NaiveDateTime> {
    match value {
        Value::String(s) => {
            let s = s.trim();
            if let Ok(dt) = DateTime::parse_from_rfc3339(s) {
                return Some(dt.naive_utc());
            }
            for fmt in ["%Y-%m-%dT%H:%M:%S%.f", "%Y-%m-%d %H:%M:%S%.f"] {
                if let Ok(dt) = NaiveDateTime::parse_from_str(s, fmt) {
                    return Some(dt);
                }
            }
            NaiveDate::parse_from_str(s, "%Y-%m-%d")
                .ok()
                .and_then(|d| d.and_hms_opt(0, 0, 0))
        }
        Value::Number(n) => {
            let secs = n.as_i64()?;
            DateTime::from_timestamp(secs, 0).map(|dt| dt.naive_utc())
        }
        _ => None,
    }
}

fn coerce_numeric(value: &Value) -> Option<f64> {
    match value {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.trim().parse().ok(),
        Value::Bool(b) => Some(f64::from(u8::from(*b))),
        Value::Null => Some(f64::NAN),
        _ => None,
    }
}
