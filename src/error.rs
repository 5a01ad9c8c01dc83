//! Error types for the forecast serving service
//!
//! Two layers: `PrepareError` covers everything a caller can get wrong in a
//! request payload and always maps to a 4xx response; `PronosticarError` is
//! the crate-wide taxonomy the serving endpoint translates into HTTP
//! outcomes. Validation failures are raised before a concurrency slot is
//! consumed; execution failures are caught at the endpoint boundary after
//! the slot guard has been taken, so the slot is released on every path.

use thiserror::Error;

/// Result alias used throughout the crate
pub type Result<T> = std::result::Result<T, PronosticarError>;

/// Client-input validation failures
///
/// Each variant corresponds to one step of the request preparation chain
/// and carries enough context to name the offending columns in the
/// response detail.
#[derive(Debug, Clone, Error, PartialEq)]
pub enum PrepareError {
    /// Payload had no `data` object or the object was empty
    #[error("request payload must include a non-empty 'data' object")]
    EmptyPayload,

    /// Column arrays in the payload have differing lengths
    #[error("column arrays have differing lengths: {detail}")]
    RaggedColumns {
        /// Human-readable description of the mismatch
        detail: String,
    },

    /// No timestamp column could be resolved
    #[error("request must include a timestamp column (index_col or ts/timestamp/time/date)")]
    NoTimestampColumn,

    /// A timestamp value failed to parse
    #[error("column '{column}' contains invalid timestamps")]
    InvalidTimestamp {
        /// Name of the column that failed to parse
        column: String,
    },

    /// All rows were dropped during normalization
    #[error("request data must include at least one row after normalization")]
    EmptyAfterNormalization,

    /// Multiple rows collapsed onto a single instant
    ///
    /// Guards against the degenerate case where frequency inference would
    /// later see a zero timestep.
    #[error("all {rows} timestamps are identical ({instant}); expected unique timestamps for time-series inference")]
    DuplicateTimestamps {
        /// Total number of rows in the payload
        rows: usize,
        /// The single instant every row carried
        instant: String,
    },

    /// One or more columns could not be coerced to numeric values
    #[error("columns contain non-numeric values: {}", columns.join(", "))]
    NonNumericColumns {
        /// Offending column names, sorted
        columns: Vec<String>,
    },

    /// Required base feature columns are absent from the payload
    #[error("missing required feature columns: {}", columns.join(", "))]
    MissingFeatureColumns {
        /// Missing column names, sorted
        columns: Vec<String>,
    },
}

/// Frame-level structural errors
#[derive(Debug, Clone, Error, PartialEq)]
pub enum FrameError {
    /// Column count of a row does not match the frame's columns
    #[error("row {row} has {got} values, expected {expected}")]
    ShapeMismatch {
        /// Row position
        row: usize,
        /// Values found
        got: usize,
        /// Values expected
        expected: usize,
    },

    /// Index and row counts differ
    #[error("index has {index_len} entries but {rows} rows were provided")]
    IndexMismatch {
        /// Index length
        index_len: usize,
        /// Row count
        rows: usize,
    },

    /// Not enough rows to infer a timestep
    #[error("at least 2 rows are required to infer a timestep, got {rows}")]
    TooFewRows {
        /// Row count
        rows: usize,
    },

    /// Adjacent timestamps are identical
    #[error("time frequency is zero at row {at}")]
    ZeroStep {
        /// Row position of the duplicate instant
        at: usize,
    },

    /// Index deltas are not all equal
    #[error("non-uniform index: expected step {expected_secs}s, found {found_secs}s at row {at}")]
    NonUniformIndex {
        /// First observed step in seconds
        expected_secs: i64,
        /// Conflicting step in seconds
        found_secs: i64,
        /// Row position of the conflict
        at: usize,
    },

    /// A named column does not exist in the frame
    #[error("unknown column '{0}'")]
    UnknownColumn(String),
}

/// Crate-wide error taxonomy
#[derive(Debug, Error)]
pub enum PronosticarError {
    /// Client-input validation failure (maps to 400)
    #[error(transparent)]
    Prepare(#[from] PrepareError),

    /// Frame construction or frequency inference failure
    #[error("frame error: {0}")]
    Frame(#[from] FrameError),

    /// Neither request data nor a cached reference frame was available
    #[error("no cached dataframe available and no data provided")]
    NoData,

    /// No model is loaded yet; callers should poll or back off
    #[error("inference service not ready")]
    NotReady,

    /// Input too short for the configured windows; expected during cold start
    #[error("inference skipped: insufficient rows ({rows} < {min_required})")]
    Skipped {
        /// Rows available in the input
        rows: usize,
        /// input_window_len + output_window_len
        min_required: usize,
    },

    /// Unexpected failure inside a forecasting branch
    #[error("inference execution failed: {0}")]
    Execution(String),

    /// Model-loading collaborator failure
    #[error("model load failed: {0}")]
    Load(String),

    /// Log-sink write failure (best-effort; never fails a prediction)
    #[error("log sink write failed: {0}")]
    Sink(String),
}

impl PronosticarError {
    /// Short machine-readable tag recorded into `last_error_kind`
    #[must_use]
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Prepare(_) => "ClientInput",
            Self::Frame(_) => "FrameError",
            Self::NoData => "NoData",
            Self::NotReady => "NotReady",
            Self::Skipped { .. } => "Skipped",
            Self::Execution(_) => "ExecutionFailed",
            Self::Load(_) => "LoadFailed",
            Self::Sink(_) => "SinkWriteFailure",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn prepare_errors_name_offending_columns() {
        let err = PrepareError::NonNumericColumns {
            columns: vec!["label".to_string(), "note".to_string()],
        };
        assert_eq!(
            err.to_string(),
            "columns contain non-numeric values: label, note"
        );

        let err = PrepareError::MissingFeatureColumns {
            columns: vec!["up".to_string(), "value".to_string()],
        };
        assert!(err.to_string().contains("up, value"));
    }

    #[test]
    fn duplicate_timestamps_message_carries_row_count_and_instant() {
        let err = PrepareError::DuplicateTimestamps {
            rows: 5,
            instant: "2024-01-01T00:00:00".to_string(),
        };
        let msg = err.to_string();
        assert!(msg.contains("all 5 timestamps"));
        assert!(msg.contains("2024-01-01T00:00:00"));
    }

    #[test]
    fn error_kinds_are_distinct() {
        assert_eq!(PronosticarError::NotReady.kind(), "NotReady");
        assert_eq!(
            PronosticarError::Skipped {
                rows: 3,
                min_required: 13
            }
            .kind(),
            "Skipped"
        );
        assert_eq!(
            PronosticarError::Execution("boom".to_string()).kind(),
            "ExecutionFailed"
        );
        assert_eq!(
            PronosticarError::Prepare(PrepareError::EmptyPayload).kind(),
            "ClientInput"
        );
    }
}
