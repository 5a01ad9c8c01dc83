//! API request and response types
//!
//! Wire structures for the serving endpoints. Request payloads use
//! `BTreeMap` for the data object so column iteration order is
//! deterministic across identical requests, which keeps the result-sink
//! fingerprint stable.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::metrics::QueueMetricsSnapshot;

/// Prediction request
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PredictRequest {
    /// Column-oriented input data; omitted to forecast from the cached
    /// reference table
    pub data: Option<BTreeMap<String, Vec<Value>>>,
    /// Name of the timestamp column, when it is not one of the
    /// conventional names
    pub index_col: Option<String>,
    /// Forecast horizon in steps; omitted to use the configured default
    pub inference_length: Option<usize>,
}

/// One forecast row on the wire
///
/// Non-finite values serialize as `null`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ForecastRow {
    /// Row timestamp, `YYYY-MM-DDTHH:MM:SS`
    pub timestamp: String,
    /// Values in `columns` order
    pub values: Vec<Option<f64>>,
}

/// Prediction response
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PredictResponse {
    /// `SUCCESS` or `SUCCESS_CACHED`
    pub status: String,
    /// Per-request identifier
    pub request_id: String,
    /// True when served from the last-response cache
    pub cached: bool,
    /// Deployment identifier
    pub identifier: String,
    /// Training run of the serving model
    pub run_id: String,
    /// Model type tag
    pub model_type: String,
    /// Forecast length in steps
    pub horizon: usize,
    /// Column the forecast targets
    pub target_column: String,
    /// Output column names
    pub columns: Vec<String>,
    /// Forecast rows, oldest first
    pub rows: Vec<ForecastRow>,
    /// Mean absolute error against real rows, when any overlapped
    pub mean_abs_error: Option<f64>,
    /// Execution time in milliseconds
    pub exec_ms: u64,
}

/// Error response body
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorResponse {
    /// Human-readable error detail
    pub error: String,
    /// Machine-readable error tag
    pub kind: String,
}

/// Health check response
#[derive(Debug, Serialize, Deserialize)]
pub struct HealthResponse {
    /// Always `ok` when the process is up
    pub status: String,
    /// Crate version
    pub version: String,
    /// Whether a model is currently loaded
    pub model_loaded: bool,
    /// Milliseconds startup spent waiting for the first model, once known
    pub startup_ready_ms: Option<u64>,
}

/// Readiness response
#[derive(Debug, Serialize, Deserialize)]
pub struct ReadyResponse {
    /// True when a model is installed and requests can be served
    pub ready: bool,
    /// Training run of the serving model, when loaded
    pub run_id: Option<String>,
    /// Model type tag, when loaded
    pub model_type: Option<String>,
}

/// Lightweight ping response exercising the request path without a model
#[derive(Debug, Serialize, Deserialize)]
pub struct PingResponse {
    /// Always `ok`
    pub status: String,
    /// Per-request identifier
    pub request_id: String,
    /// Whether a model is currently loaded
    pub model_loaded: bool,
    /// Whether the loaded model carries a reference frame
    pub has_reference_frame: bool,
    /// Executions currently running on the blocking pool
    pub active_jobs: usize,
    /// Input window length of the loaded model
    pub input_window_len: Option<usize>,
    /// Output window length of the loaded model
    pub output_window_len: Option<usize>,
}

/// JSON metrics response
#[derive(Debug, Serialize, Deserialize)]
pub struct MetricsResponse {
    /// Queue and latency counters
    pub queue: QueueMetricsSnapshot,
    /// Concurrency gate capacity
    pub capacity: usize,
    /// Executions currently running on the blocking pool
    pub active_jobs: usize,
    /// Whether a model is currently loaded
    pub model_ready: bool,
}

/// Reload response
#[derive(Debug, Serialize, Deserialize)]
pub struct ReloadResponse {
    /// True when a newer finished run was installed
    pub reloaded: bool,
    /// Training run now being served, when any
    pub run_id: Option<String>,
}
