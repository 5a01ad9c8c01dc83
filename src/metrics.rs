//! Queue and latency telemetry for the serving endpoint
//!
//! Counters answer one question quickly: is the server saturated? Every
//! request updates wait/exec/prep aggregates; the `/metrics` handler takes
//! a snapshot in a single lock acquisition. All fields of a logical group
//! move under one mutex so multi-field updates are never torn under
//! concurrency.

use std::sync::Mutex;
use std::time::{Duration, Instant};

use serde::{Deserialize, Serialize};

#[derive(Debug, Default, Clone)]
struct DurationStats {
    last_ms: u64,
    max_ms: u64,
    total_ms: f64,
    samples: u64,
}

impl DurationStats {
    #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
    fn record(&mut self, d: Duration) {
        let ms = d.as_secs_f64() * 1000.0;
        let ms_int = ms as u64;
        self.last_ms = ms_int;
        if ms_int > self.max_ms {
            self.max_ms = ms_int;
        }
        self.total_ms += ms;
        self.samples += 1;
    }

    #[allow(clippy::cast_precision_loss)]
    fn avg_ms(&self) -> f64 {
        if self.samples == 0 {
            0.0
        } else {
            self.total_ms / self.samples as f64
        }
    }
}

#[derive(Debug, Default)]
struct Counters {
    enqueued: u64,
    active: u64,
    completed: u64,
    served_cached: u64,
    error_total: u64,
    last_error_kind: Option<String>,
    wait: DurationStats,
    exec: DurationStats,
    prep: DurationStats,
}

/// Process-wide request counters
///
/// Initialized once at startup; reset only by [`QueueMetrics::reset`],
/// which exists for test harnesses.
#[derive(Debug)]
pub struct QueueMetrics {
    inner: Mutex<Counters>,
    started: Instant,
}

impl Default for QueueMetrics {
    fn default() -> Self {
        Self::new()
    }
}

impl QueueMetrics {
    /// New zeroed collector
    #[must_use]
    pub fn new() -> Self {
        Self {
            inner: Mutex::new(Counters::default()),
            started: Instant::now(),
        }
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Counters> {
        self.inner
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
    }

    /// A request has entered the admission queue
    pub fn mark_enqueued(&self) {
        self.lock().enqueued += 1;
    }

    /// A slot was acquired after `wait`; increments the active count
    pub fn record_acquired(&self, wait: Duration) {
        let mut c = self.lock();
        c.active += 1;
        c.wait.record(wait);
    }

    /// A slot was released (every exit path)
    pub fn record_released(&self) {
        let mut c = self.lock();
        c.active = c.active.saturating_sub(1);
    }

    /// Preparation/validation finished for one request
    pub fn record_prep(&self, d: Duration) {
        self.lock().prep.record(d);
    }

    /// An execution completed successfully
    pub fn record_exec(&self, d: Duration) {
        let mut c = self.lock();
        c.completed += 1;
        c.exec.record(d);
        c.last_error_kind = None;
    }

    /// A request failed; `kind` is a short machine-readable tag
    pub fn record_error(&self, kind: &str) {
        let mut c = self.lock();
        c.error_total += 1;
        c.last_error_kind = Some(kind.to_string());
    }

    /// A cached response was served without consuming a slot
    pub fn record_cached(&self) {
        self.lock().served_cached += 1;
    }

    /// Current active count (requests holding a slot)
    #[must_use]
    pub fn active(&self) -> u64 {
        self.lock().active
    }

    /// Consistent snapshot of all counters
    #[must_use]
    pub fn snapshot(&self) -> QueueMetricsSnapshot {
        let c = self.lock();
        QueueMetricsSnapshot {
            enqueued: c.enqueued,
            active: c.active,
            completed: c.completed,
            served_cached: c.served_cached,
            error_total: c.error_total,
            last_error_kind: c.last_error_kind.clone(),
            last_wait_ms: c.wait.last_ms,
            max_wait_ms: c.wait.max_ms,
            avg_wait_ms: round2(c.wait.avg_ms()),
            last_exec_ms: c.exec.last_ms,
            max_exec_ms: c.exec.max_ms,
            avg_exec_ms: round2(c.exec.avg_ms()),
            last_prep_ms: c.prep.last_ms,
            max_prep_ms: c.prep.max_ms,
            avg_prep_ms: round2(c.prep.avg_ms()),
            uptime_secs: self.started.elapsed().as_secs(),
        }
    }

    /// Export in Prometheus text format
    #[must_use]
    pub fn to_prometheus(&self, capacity: usize, model_ready: bool) -> String {
        let s = self.snapshot();
        format!(
            "# HELP pronosticar_requests_enqueued_total Requests admitted to the queue\n\
             # TYPE pronosticar_requests_enqueued_total counter\n\
             pronosticar_requests_enqueued_total {}\n\
             # HELP pronosticar_requests_completed_total Successfully completed requests\n\
             # TYPE pronosticar_requests_completed_total counter\n\
             pronosticar_requests_completed_total {}\n\
             # HELP pronosticar_requests_error_total Failed requests\n\
             # TYPE pronosticar_requests_error_total counter\n\
             pronosticar_requests_error_total {}\n\
             # HELP pronosticar_requests_cached_total Responses served from cache\n\
             # TYPE pronosticar_requests_cached_total counter\n\
             pronosticar_requests_cached_total {}\n\
             # HELP pronosticar_active_requests Requests currently holding a slot\n\
             # TYPE pronosticar_active_requests gauge\n\
             pronosticar_active_requests {}\n\
             # HELP pronosticar_slot_capacity Configured concurrency gate capacity\n\
             # TYPE pronosticar_slot_capacity gauge\n\
             pronosticar_slot_capacity {}\n\
             # HELP pronosticar_wait_ms_max Maximum observed queue wait\n\
             # TYPE pronosticar_wait_ms_max gauge\n\
             pronosticar_wait_ms_max {}\n\
             # HELP pronosticar_exec_ms_max Maximum observed execution time\n\
             # TYPE pronosticar_exec_ms_max gauge\n\
             pronosticar_exec_ms_max {}\n\
             # HELP pronosticar_model_ready Whether a model is loaded (1=yes,0=no)\n\
             # TYPE pronosticar_model_ready gauge\n\
             pronosticar_model_ready {}\n",
            s.enqueued,
            s.completed,
            s.error_total,
            s.served_cached,
            s.active,
            capacity,
            s.max_wait_ms,
            s.max_exec_ms,
            u8::from(model_ready),
        )
    }

    /// Zero every counter. Test harness use only.
    pub fn reset(&self) {
        *self.lock() = Counters::default();
    }
}

/// Serializable view over [`QueueMetrics`]
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QueueMetricsSnapshot {
    /// Requests admitted to the queue
    pub enqueued: u64,
    /// Requests currently holding a slot
    pub active: u64,
    /// Successfully completed requests
    pub completed: u64,
    /// Responses served from the last-response cache
    pub served_cached: u64,
    /// Failed requests
    pub error_total: u64,
    /// Tag of the most recent failure, if any
    pub last_error_kind: Option<String>,
    /// Most recent queue wait in milliseconds
    pub last_wait_ms: u64,
    /// Maximum queue wait
    pub max_wait_ms: u64,
    /// Mean queue wait
    pub avg_wait_ms: f64,
    /// Most recent execution duration
    pub last_exec_ms: u64,
    /// Maximum execution duration
    pub max_exec_ms: u64,
    /// Mean execution duration
    pub avg_exec_ms: f64,
    /// Most recent preparation duration
    pub last_prep_ms: u64,
    /// Maximum preparation duration
    pub max_prep_ms: u64,
    /// Mean preparation duration
    pub avg_prep_ms: f64,
    /// Seconds since the collector was created
    pub uptime_secs: u64,
}

fn round2(v: f64) -> f64 {
    (v * 100.0).round() / 100.0
}
