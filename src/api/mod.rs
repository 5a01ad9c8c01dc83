//! HTTP API for forecast serving
//!
//! ## Endpoints
//!
//! - `POST /predict` - Run a forecast (admission controlled)
//! - `GET /predict_ping` - Exercise the request path without a model
//! - `GET /healthz` - Liveness check
//! - `GET /ready` - Readiness check (503 until a model is installed)
//! - `GET /metrics` - JSON queue and latency counters
//! - `GET /prometheus` - Prometheus-formatted metrics
//! - `POST /reload_latest` - Install the newest finished training run
//!
//! ## Example
//!
//! ```rust,ignore
//! use pronosticar::api::{create_router, AppState};
//!
//! let app = create_router(state);
//! axum::serve(listener, app).await?;
//! ```

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Instant;

use axum::{
    extract::{Query, State},
    http::{header, StatusCode},
    response::IntoResponse,
    routing::{get, post},
    Json, Router,
};
use chrono::Utc;
use tracing::{info, warn};

use crate::{
    config::{ServeConfig, MAX_INFERENCE_LENGTH},
    error::PronosticarError,
    executor::{Forecast, InferenceExecutor},
    frame::TimeFrame,
    gate::ConcurrencyGate,
    loader::ModelWatcher,
    metrics::QueueMetrics,
    model::{ModelSlot, ModelState},
    prepare::RequestPreparer,
    sink::ResultSink,
};

pub mod types;

pub use types::{
    ErrorResponse, ForecastRow, HealthResponse, MetricsResponse, PingResponse, PredictRequest,
    PredictResponse, ReadyResponse, ReloadResponse,
};

type ApiError = (StatusCode, Json<ErrorResponse>);

/// Application state shared across handlers
#[derive(Clone)]
pub struct AppState {
    /// Serving configuration, fixed at startup
    pub config: Arc<ServeConfig>,
    /// Hot-swappable model holder
    pub slot: Arc<ModelSlot>,
    /// Admission gate over inference executions
    pub gate: Arc<ConcurrencyGate>,
    /// Queue and latency counters
    pub metrics: Arc<QueueMetrics>,
    /// Forecast executor
    pub executor: Arc<InferenceExecutor>,
    /// Result publisher
    pub sink: Arc<ResultSink>,
    /// Model installation driver, for `/reload_latest`
    pub watcher: Arc<ModelWatcher>,
    preparer: RequestPreparer,
    last_response: Arc<Mutex<Option<PredictResponse>>>,
    request_counter: Arc<AtomicU64>,
}

impl AppState {
    /// Assemble the shared state from its collaborators
    #[must_use]
    pub fn new(
        config: Arc<ServeConfig>,
        slot: Arc<ModelSlot>,
        gate: Arc<ConcurrencyGate>,
        metrics: Arc<QueueMetrics>,
        executor: Arc<InferenceExecutor>,
        sink: Arc<ResultSink>,
        watcher: Arc<ModelWatcher>,
    ) -> Self {
        Self {
            config,
            slot,
            gate,
            metrics,
            executor,
            sink,
            watcher,
            preparer: RequestPreparer,
            last_response: Arc::new(Mutex::new(None)),
            request_counter: Arc::new(AtomicU64::new(0)),
        }
    }

    fn next_request_id(&self) -> String {
        format!("{:08x}", self.request_counter.fetch_add(1, Ordering::SeqCst))
    }

    fn cached_response(&self, request_id: &str) -> Option<PredictResponse> {
        let cached = self
            .last_response
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .clone()?;
        Some(PredictResponse {
            status: "SUCCESS_CACHED".to_string(),
            request_id: request_id.to_string(),
            cached: true,
            ..cached
        })
    }

    fn store_response(&self, response: &PredictResponse) {
        *self
            .last_response
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner) = Some(response.clone());
    }
}

/// Build the service router
pub fn create_router(state: AppState) -> Router {
    Router::new()
        .route("/predict", post(predict_handler))
        .route("/predict_ping", get(predict_ping_handler))
        .route("/healthz", get(health_handler))
        .route("/ready", get(ready_handler))
        .route("/metrics", get(metrics_handler))
        .route("/prometheus", get(prometheus_handler))
        .route("/reload_latest", post(reload_handler))
        .with_state(state)
}

fn api_error(state: &AppState, err: &PronosticarError) -> ApiError {
    state.metrics.record_error(err.kind());
    let status = match err {
        PronosticarError::Prepare(_) | PronosticarError::NoData | PronosticarError::Frame(_) => {
            StatusCode::BAD_REQUEST
        }
        PronosticarError::NotReady => StatusCode::SERVICE_UNAVAILABLE,
        _ => StatusCode::INTERNAL_SERVER_ERROR,
    };
    (
        status,
        Json(ErrorResponse {
            error: err.to_string(),
            kind: err.kind().to_string(),
        }),
    )
}

/// Run a forecast
///
/// Validation happens before a concurrency slot is taken; the execution
/// itself runs on the blocking pool while the request holds a gate
/// permit. An empty request body replays the last successful response
/// when caching is enabled.
pub async fn predict_handler(
    State(state): State<AppState>,
    Query(query): Query<PredictQuery>,
    Json(request): Json<PredictRequest>,
) -> Result<Json<PredictResponse>, ApiError> {
    let request_id = state.next_request_id();
    let prep_started = Instant::now();
    let requested_horizon = query.inference_length.or(request.inference_length);

    if state.config.cache_enabled && request.data.is_none() && requested_horizon.is_none() {
        if let Some(cached) = state.cached_response(&request_id) {
            state.metrics.record_cached();
            info!(request_id = %request_id, "served cached response");
            return Ok(Json(cached));
        }
    }

    let snapshot = state.slot.load();
    let required = snapshot
        .as_ref()
        .map(|s| s.expected_feature_columns())
        .unwrap_or_default();

    let input: TimeFrame = match &request.data {
        Some(data) => {
            let (frame, _) = state
                .preparer
                .prepare(data, request.index_col.as_deref(), &required)
                .map_err(|e| api_error(&state, &e.into()))?;
            frame
        }
        None => {
            let reference = snapshot
                .as_ref()
                .and_then(|s| s.reference_frame.as_ref())
                .ok_or_else(|| api_error(&state, &PronosticarError::NoData))?;
            (**reference).clone()
        }
    };

    let horizon = requested_horizon.unwrap_or(state.config.default_inference_length);
    if horizon == 0 || horizon > MAX_INFERENCE_LENGTH {
        return Err(bad_horizon(&state, horizon));
    }
    state.metrics.record_prep(prep_started.elapsed());

    state.metrics.mark_enqueued();
    let _permit = state.gate.acquire().await;

    let Some(model) = snapshot.or_else(|| state.slot.load()) else {
        return Err(api_error(&state, &PronosticarError::NotReady));
    };

    let exec_started = Instant::now();
    let forecast = run_on_blocking_pool(&state, model.clone(), input, horizon)
        .await
        .map_err(|e| api_error(&state, &e))?;
    let exec_elapsed = exec_started.elapsed();
    state.metrics.record_exec(exec_elapsed);

    #[allow(clippy::cast_possible_truncation)]
    let response = build_response(
        &state,
        &request_id,
        &model,
        &forecast,
        exec_elapsed.as_millis() as u64,
    );
    state.store_response(&response);
    info!(
        request_id = %request_id,
        horizon,
        exec_ms = response.exec_ms,
        run_id = %model.run_id,
        "forecast completed"
    );
    Ok(Json(response))
}

async fn run_on_blocking_pool(
    state: &AppState,
    model: Arc<ModelState>,
    input: TimeFrame,
    horizon: usize,
) -> crate::error::Result<Forecast> {
    let executor = Arc::clone(&state.executor);
    let sink = Arc::clone(&state.sink);
    tokio::task::spawn_blocking(move || {
        let forecast = executor.run(&model, &input, horizon)?;
        // Publication is best effort; a sink outage must not fail the
        // prediction that produced the forecast.
        if let Err(e) = sink.publish(&forecast, &model, Utc::now()) {
            warn!(error = %e, "forecast result publication failed");
        }
        Ok(forecast)
    })
    .await
    .map_err(|e| PronosticarError::Execution(format!("execution task failed: {e}")))?
}

fn build_response(
    state: &AppState,
    request_id: &str,
    model: &ModelState,
    forecast: &Forecast,
    exec_ms: u64,
) -> PredictResponse {
    let frame = &forecast.frame;
    let rows = (0..frame.n_rows())
        .map(|i| ForecastRow {
            timestamp: frame.index()[i].format("%Y-%m-%dT%H:%M:%S").to_string(),
            values: frame
                .row(i)
                .iter()
                .map(|&v| if v.is_finite() { Some(v) } else { None })
                .collect(),
        })
        .collect();
    PredictResponse {
        status: "SUCCESS".to_string(),
        request_id: request_id.to_string(),
        cached: false,
        identifier: state.config.identifier.clone(),
        run_id: model.run_id.clone(),
        model_type: model.model_type.clone(),
        horizon: frame.n_rows(),
        target_column: forecast.target_column.clone(),
        columns: frame.columns().to_vec(),
        rows,
        mean_abs_error: forecast.mean_abs_error,
        exec_ms,
    }
}

fn bad_horizon(state: &AppState, horizon: usize) -> ApiError {
    state.metrics.record_error("ClientInput");
    (
        StatusCode::BAD_REQUEST,
        Json(ErrorResponse {
            error: format!(
                "inference_length must be between 1 and {MAX_INFERENCE_LENGTH}, got {horizon}"
            ),
            kind: "ClientInput".to_string(),
        }),
    )
}

/// Query-string overrides for `/predict`
///
/// A query `inference_length` takes precedence over the body field.
#[derive(Debug, Default, serde::Deserialize)]
pub struct PredictQuery {
    /// Forecast horizon in steps
    pub inference_length: Option<usize>,
}

/// Liveness check
pub async fn health_handler(State(state): State<AppState>) -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok".to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
        model_loaded: state.slot.is_loaded(),
        startup_ready_ms: state.watcher.startup_ready_ms(),
    })
}

/// Readiness check; 503 until a model is installed
pub async fn ready_handler(State(state): State<AppState>) -> impl IntoResponse {
    match state.slot.load() {
        Some(model) => (
            StatusCode::OK,
            Json(ReadyResponse {
                ready: true,
                run_id: Some(model.run_id.clone()),
                model_type: Some(model.model_type.clone()),
            }),
        ),
        None => (
            StatusCode::SERVICE_UNAVAILABLE,
            Json(ReadyResponse {
                ready: false,
                run_id: None,
                model_type: None,
            }),
        ),
    }
}

/// Exercise the request path and report serving capacity without running
/// an inference
pub async fn predict_ping_handler(State(state): State<AppState>) -> Json<PingResponse> {
    let snapshot = state.slot.load();
    Json(PingResponse {
        status: "ok".to_string(),
        request_id: state.next_request_id(),
        model_loaded: snapshot.is_some(),
        has_reference_frame: snapshot
            .as_ref()
            .is_some_and(|s| s.reference_frame.is_some()),
        active_jobs: state.executor.active_jobs(),
        input_window_len: snapshot.as_ref().map(|s| s.input_window_len),
        output_window_len: snapshot.map(|s| s.output_window_len),
    })
}

/// JSON queue and latency counters
pub async fn metrics_handler(State(state): State<AppState>) -> Json<MetricsResponse> {
    Json(MetricsResponse {
        queue: state.metrics.snapshot(),
        capacity: state.gate.capacity(),
        active_jobs: state.executor.active_jobs(),
        model_ready: state.slot.is_loaded(),
    })
}

/// Prometheus-formatted metrics
pub async fn prometheus_handler(State(state): State<AppState>) -> impl IntoResponse {
    let body = state
        .metrics
        .to_prometheus(state.gate.capacity(), state.slot.is_loaded());
    (
        [(header::CONTENT_TYPE, "text/plain; version=0.0.4")],
        body,
    )
}

/// Install the newest finished training run
pub async fn reload_handler(
    State(state): State<AppState>,
) -> Result<Json<ReloadResponse>, ApiError> {
    let reloaded = state
        .watcher
        .reload_latest()
        .await
        .map_err(|e| api_error(&state, &e))?;
    Ok(Json(ReloadResponse {
        reloaded,
        run_id: state.slot.load().map(|m| m.run_id.clone()),
    }))
}
