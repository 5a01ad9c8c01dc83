//! Best-effort forecast result logging
//!
//! Every completed forecast is summarized into a JSONL record and appended
//! to a date-partitioned object key. Publication is deduplicated per
//! (run id, content hash) so a replayed request does not double-log, and
//! write failures are retried a bounded number of times. A sink failure
//! never fails the prediction that produced it; the endpoint logs and
//! moves on.

use std::collections::{BTreeMap, HashSet};
use std::io::Write;
use std::path::PathBuf;
use std::sync::Mutex;

use chrono::{DateTime, Utc};
use serde::Serialize;
use sha2::{Digest, Sha256};
use tracing::{debug, warn};

use crate::error::{PronosticarError, Result};
use crate::executor::{Forecast, StageTimings};
use crate::model::ModelState;

/// Append-only destination for JSONL result lines
pub trait LogSink: Send + Sync {
    /// Append `lines` under `object_key`, creating the key if needed
    ///
    /// # Errors
    ///
    /// Any I/O failure; the caller retries.
    fn append(&self, object_key: &str, lines: &[String]) -> std::io::Result<()>;
}

/// Publication policy knobs
#[derive(Debug, Clone)]
pub struct SinkPolicy {
    /// Rows hashed into the dedup fingerprint
    pub hash_rows: usize,
    /// Maximum write attempts per record
    pub max_retries: usize,
    /// Feature values kept per sample row
    pub sample_feature_limit: usize,
}

impl Default for SinkPolicy {
    fn default() -> Self {
        Self {
            hash_rows: 3,
            max_retries: 3,
            sample_feature_limit: 3,
        }
    }
}

/// Outcome of a publish attempt
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PublishOutcome {
    /// The record was appended under the given key
    Written {
        /// Destination object key
        object_key: String,
    },
    /// An identical record was already published; nothing was written
    Duplicate,
}

/// One logged forecast summary
#[derive(Debug, Serialize)]
pub struct ForecastRecord {
    /// Publication instant, RFC 3339
    pub timestamp: String,
    /// Deployment identifier
    pub identifier: String,
    /// Training run the serving model came from
    pub run_id: String,
    /// Model type tag
    pub model_type: String,
    /// Training configuration fingerprint, when known
    pub config_hash: Option<String>,
    /// Always "SUCCESS" for published records
    pub status: String,
    /// Forecast quality and timing summary
    pub metrics: RecordMetrics,
    /// Spot-check rows from the forecast
    pub samples: Vec<SampleRow>,
}

/// Summary metrics embedded in a [`ForecastRecord`]
#[derive(Debug, Serialize)]
pub struct RecordMetrics {
    /// Forecast length in steps
    pub horizon: usize,
    /// Mean absolute error against real rows, when available
    pub mean_abs_error: Option<f64>,
    /// Number of per-step errors collected
    pub error_steps: usize,
    /// Stage timings of the execution
    pub timings: StageTimings,
}

/// One spot-check row
#[derive(Debug, Serialize)]
pub struct SampleRow {
    /// Row position within the forecast
    pub position: usize,
    /// Row timestamp
    pub timestamp: String,
    /// Leading feature values (capped by the sink policy)
    pub values: BTreeMap<String, f64>,
}

/// Deduplicating, retrying publisher over a [`LogSink`]
pub struct ResultSink {
    sink: Box<dyn LogSink>,
    policy: SinkPolicy,
    identifier: String,
    published: Mutex<HashSet<(String, String)>>,
}

impl std::fmt::Debug for ResultSink {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ResultSink")
            .field("identifier", &self.identifier)
            .field("policy", &self.policy)
            .finish_non_exhaustive()
    }
}

impl ResultSink {
    /// New publisher writing through `sink`
    #[must_use]
    pub fn new(sink: Box<dyn LogSink>, policy: SinkPolicy, identifier: String) -> Self {
        Self {
            sink,
            policy,
            identifier,
            published: Mutex::new(HashSet::new()),
        }
    }

    /// Publish one forecast summary
    ///
    /// # Errors
    ///
    /// Returns [`PronosticarError::Sink`] after `max_retries` failed write
    /// attempts. Duplicate records return [`PublishOutcome::Duplicate`]
    /// without touching the sink.
    pub fn publish(
        &self,
        forecast: &Forecast,
        state: &ModelState,
        now: DateTime<Utc>,
    ) -> Result<PublishOutcome> {
        let fingerprint = self.fingerprint(forecast);
        let dedup_key = (state.run_id.clone(), fingerprint);
        {
            let published = self
                .published
                .lock()
                .unwrap_or_else(std::sync::PoisonError::into_inner);
            if published.contains(&dedup_key) {
                debug!(run_id = %state.run_id, "forecast already published, skipping");
                return Ok(PublishOutcome::Duplicate);
            }
        }

        let record = self.build_record(forecast, state, now);
        let line = serde_json::to_string(&record)
            .map_err(|e| PronosticarError::Sink(e.to_string()))?;
        let object_key = format!(
            "{}/{}/results.jsonl",
            self.identifier,
            now.format("%Y%m%d")
        );

        let mut last_err = None;
        for attempt in 1..=self.policy.max_retries.max(1) {
            match self.sink.append(&object_key, &[line.clone()]) {
                Ok(()) => {
                    self.published
                        .lock()
                        .unwrap_or_else(std::sync::PoisonError::into_inner)
                        .insert(dedup_key);
                    debug!(key = %object_key, attempt, "forecast record published");
                    return Ok(PublishOutcome::Written { object_key });
                }
                Err(e) => {
                    warn!(key = %object_key, attempt, error = %e, "sink write failed");
                    last_err = Some(e);
                }
            }
        }
        Err(PronosticarError::Sink(
            last_err.map_or_else(|| "unknown write failure".to_string(), |e| e.to_string()),
        ))
    }

    /// First 16 hex chars of the SHA-256 of the leading forecast rows
    fn fingerprint(&self, forecast: &Forecast) -> String {
        let mut hasher = Sha256::new();
        let frame = &forecast.frame;
        for i in 0..frame.n_rows().min(self.policy.hash_rows) {
            hasher.update(frame.index()[i].format("%Y-%m-%dT%H:%M:%S").to_string());
            for v in frame.row(i) {
                hasher.update(v.to_bits().to_le_bytes());
            }
        }
        let digest = hasher.finalize();
        let hex: String = digest.iter().map(|b| format!("{b:02x}")).collect();
        hex[..16].to_string()
    }

    fn build_record(
        &self,
        forecast: &Forecast,
        state: &ModelState,
        now: DateTime<Utc>,
    ) -> ForecastRecord {
        let frame = &forecast.frame;
        let n = frame.n_rows();
        let mut positions = vec![0, n / 10, n / 2, 9 * n / 10, n.saturating_sub(1)];
        positions.sort_unstable();
        positions.dedup();

        let samples = positions
            .into_iter()
            .filter(|&p| p < n)
            .map(|p| SampleRow {
                position: p,
                timestamp: frame.index()[p].format("%Y-%m-%dT%H:%M:%S").to_string(),
                values: frame
                    .columns()
                    .iter()
                    .zip(frame.row(p))
                    .take(self.policy.sample_feature_limit)
                    .map(|(c, &v)| (c.clone(), v))
                    .collect(),
            })
            .collect();

        ForecastRecord {
            timestamp: now.to_rfc3339(),
            identifier: self.identifier.clone(),
            run_id: state.run_id.clone(),
            model_type: state.model_type.clone(),
            config_hash: state.config_fingerprint.clone(),
            status: "SUCCESS".to_string(),
            metrics: RecordMetrics {
                horizon: n,
                mean_abs_error: forecast.mean_abs_error,
                error_steps: forecast.step_errors.len(),
                timings: forecast.timings.clone(),
            },
            samples,
        }
    }
}

/// In-memory sink used by tests and local runs
#[derive(Debug, Default)]
pub struct MemoryLogSink {
    objects: Mutex<BTreeMap<String, Vec<String>>>,
}

impl MemoryLogSink {
    /// New empty sink
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Lines currently stored under `object_key`
    #[must_use]
    pub fn lines(&self, object_key: &str) -> Vec<String> {
        self.objects
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .get(object_key)
            .cloned()
            .unwrap_or_default()
    }

    /// All object keys with at least one line
    #[must_use]
    pub fn keys(&self) -> Vec<String> {
        self.objects
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .keys()
            .cloned()
            .collect()
    }
}

impl LogSink for MemoryLogSink {
    fn append(&self, object_key: &str, lines: &[String]) -> std::io::Result<()> {
        self.objects
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .entry(object_key.to_string())
            .or_default()
            .extend(lines.iter().cloned());
        Ok(())
    }
}

/// Filesystem sink appending JSONL files under a root directory
#[derive(Debug)]
pub struct FileLogSink {
    root: PathBuf,
}

impl FileLogSink {
    /// Sink rooted at `root`; directories are created on demand
    #[must_use]
    pub fn new(root: PathBuf) -> Self {
        Self { root }
    }
}

impl LogSink for FileLogSink {
    fn append(&self, object_key: &str, lines: &[String]) -> std::io::Result<()> {
        let path = self.root.join(object_key);
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let mut file = std::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(path)?;
        for line in lines {
            writeln!(file, "{line}")?;
        }
        Ok(())
    }
}
