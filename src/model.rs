//! Model snapshot types and the hot-swap slot
//!
//! A loaded model is captured as an immutable [`ModelState`]: predictor,
//! optional scaler, window metadata, and run lineage. [`ModelSlot`] holds
//! the current state behind an `Arc` swap: writers install a fully-formed
//! snapshot, readers clone the `Arc` once and keep it for the whole
//! request, so a mid-flight reload can never expose a half-updated
//! predictor/scaler pair.

use std::sync::{Arc, RwLock};

use chrono::Duration;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::error::FrameError;
use crate::frame::TimeFrame;

/// Closed set of supported model families
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ModelClass {
    /// Multi-step recurrent models (windowed/recursive execution)
    Sequence,
    /// Additive trend + seasonality models (single full-horizon call)
    Seasonal,
    /// Statistical multi-horizon models (single call, optional resampling)
    MultiHorizonStats,
}

/// Error raised by a predictor call
#[derive(Debug, Clone, Error)]
#[error("predictor error: {0}")]
pub struct PredictError(pub String);

/// Shape-tagged input handed to a predictor
///
/// The executor tries the variants in a fixed order when a predictor
/// rejects the natural shape: batched 3-D first, then the squeezed 2-D
/// window, then a fully flattened single row.
#[derive(Debug, Clone)]
pub enum PredictorInput<'a> {
    /// `[1, window_len, n_features]`
    Batched3d {
        /// Window rows, oldest first
        window: &'a [Vec<f64>],
    },
    /// `[window_len, n_features]` (leading batch dimension removed)
    Window2d {
        /// Window rows, oldest first
        window: &'a [Vec<f64>],
    },
    /// `[1, window_len * n_features]`
    Flat2d {
        /// Concatenated window values
        values: Vec<f64>,
    },
    /// Horizon request for seasonal / stats models
    Horizon {
        /// Number of future steps to produce
        steps: usize,
        /// Exogenous time-feature frame covering the horizon
        exog: Option<&'a TimeFrame>,
    },
}

/// A loaded forecasting model
///
/// Output contract: one inner `Vec` per produced step, each holding either
/// the full feature vector or a single target value.
pub trait Predictor: Send + Sync {
    /// Produce predictions for the given input
    ///
    /// # Errors
    ///
    /// Returns [`PredictError`] when the input shape is unsupported or the
    /// underlying model fails.
    fn predict(&self, input: &PredictorInput<'_>) -> Result<Vec<Vec<f64>>, PredictError>;
}

/// Per-column affine inverse transform (MinMax-style)
///
/// Stored as sklearn does: `scaled = raw * scale + offset`, so
/// `raw = (scaled - offset) / scale`. Zero scales are repaired to `1.0`
/// at construction to avoid division by zero.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Scaler {
    feature_names: Vec<String>,
    scale: Vec<f64>,
    offset: Vec<f64>,
}

impl Scaler {
    /// Build a scaler, repairing any zero scale entries
    ///
    /// # Errors
    ///
    /// Returns [`FrameError::IndexMismatch`] when the vectors disagree in
    /// length.
    pub fn new(
        feature_names: Vec<String>,
        scale: Vec<f64>,
        offset: Vec<f64>,
    ) -> Result<Self, FrameError> {
        if feature_names.len() != scale.len() || scale.len() != offset.len() {
            return Err(FrameError::IndexMismatch {
                index_len: feature_names.len(),
                rows: scale.len(),
            });
        }
        let scale = scale
            .into_iter()
            .map(|s| if s == 0.0 || !s.is_finite() { 1.0 } else { s })
            .collect();
        Ok(Self {
            feature_names,
            scale,
            offset,
        })
    }

    /// Columns this scaler was fitted on
    #[must_use]
    pub fn feature_names(&self) -> &[String] {
        &self.feature_names
    }

    /// Restricted view over a subset of the fitted columns
    ///
    /// # Errors
    ///
    /// Returns [`FrameError::UnknownColumn`] when a requested column was
    /// not part of the fit.
    pub fn subset(&self, columns: &[String]) -> Result<Self, FrameError> {
        let mut scale = Vec::with_capacity(columns.len());
        let mut offset = Vec::with_capacity(columns.len());
        for col in columns {
            let pos = self
                .feature_names
                .iter()
                .position(|n| n == col)
                .ok_or_else(|| FrameError::UnknownColumn(col.clone()))?;
            scale.push(self.scale[pos]);
            offset.push(self.offset[pos]);
        }
        Ok(Self {
            feature_names: columns.to_vec(),
            scale,
            offset,
        })
    }

    /// Inverse-transform a frame column by column
    ///
    /// Frame columns must match the scaler's columns exactly (build a
    /// [`Scaler::subset`] view first when they differ).
    ///
    /// # Errors
    ///
    /// Returns [`FrameError::UnknownColumn`] on a column mismatch.
    pub fn inverse_frame(&self, frame: &TimeFrame) -> Result<TimeFrame, FrameError> {
        let positions: Vec<usize> = frame
            .columns()
            .iter()
            .map(|c| {
                self.feature_names
                    .iter()
                    .position(|n| n == c)
                    .ok_or_else(|| FrameError::UnknownColumn(c.clone()))
            })
            .collect::<Result<_, _>>()?;
        let rows = (0..frame.n_rows())
            .map(|r| {
                frame
                    .row(r)
                    .iter()
                    .zip(positions.iter())
                    .map(|(&v, &p)| (v - self.offset[p]) / self.scale[p])
                    .collect()
            })
            .collect();
        TimeFrame::new(frame.index().to_vec(), frame.columns().to_vec(), rows)
    }
}

/// Downsampling configuration for multi-horizon-stats models
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ResampleSpec {
    /// Native frequency of the training data
    pub native: Duration,
    /// Downsampling period the model was trained at
    pub downsampling: Duration,
}

impl ResampleSpec {
    /// Horizon length at the model's internal frequency:
    /// `ceil(horizon * native / downsampling)`
    #[must_use]
    pub fn internal_horizon(&self, horizon: usize) -> usize {
        let native_ms = self.native.num_milliseconds().max(1);
        let down_ms = self.downsampling.num_milliseconds().max(1);
        let scaled = horizon as u128 * native_ms as u128;
        usize::try_from(scaled.div_ceil(down_ms as u128)).unwrap_or(usize::MAX)
    }

    /// True when no internal resampling is needed
    #[must_use]
    pub fn is_identity(&self) -> bool {
        self.native == self.downsampling || self.downsampling.is_zero()
    }
}

/// Immutable snapshot of the currently served model
pub struct ModelState {
    /// The loaded predictor
    pub predictor: Arc<dyn Predictor>,
    /// Fitted scaler, when one was trained alongside the model
    pub scaler: Option<Scaler>,
    /// Model family, selecting the execution strategy
    pub model_class: ModelClass,
    /// Input window length (0 for non-windowed families)
    pub input_window_len: usize,
    /// Output block length per predictor call
    pub output_window_len: usize,
    /// Hash of the training configuration, for lineage
    pub config_fingerprint: Option<String>,
    /// Training run this model came from
    pub run_id: String,
    /// Human-readable model type tag (e.g. "GRU", "PROPHET")
    pub model_type: String,
    /// Cached reference table served when a request carries no data
    pub reference_frame: Option<Arc<TimeFrame>>,
    /// Downsampling configuration (stats models only)
    pub resample: Option<ResampleSpec>,
}

impl std::fmt::Debug for ModelState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ModelState")
            .field("model_class", &self.model_class)
            .field("model_type", &self.model_type)
            .field("run_id", &self.run_id)
            .field("input_window_len", &self.input_window_len)
            .field("output_window_len", &self.output_window_len)
            .field("has_scaler", &self.scaler.is_some())
            .finish_non_exhaustive()
    }
}

impl ModelState {
    /// Base feature columns a request must provide, derived from the
    /// reference frame (time features excluded).
    #[must_use]
    pub fn expected_feature_columns(&self) -> Vec<String> {
        self.reference_frame
            .as_ref()
            .map(|f| f.feature_columns())
            .unwrap_or_default()
    }
}

/// Hot-swappable holder of the current [`ModelState`]
///
/// Created empty at process start; populated atomically by the load and
/// fallback paths; read concurrently by every inference call.
#[derive(Default)]
pub struct ModelSlot {
    inner: RwLock<Option<Arc<ModelState>>>,
}

impl ModelSlot {
    /// New empty slot
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Snapshot of the current state, if any
    ///
    /// The returned `Arc` stays valid for the caller even if the slot is
    /// swapped while the request is in flight.
    #[must_use]
    pub fn load(&self) -> Option<Arc<ModelState>> {
        self.inner
            .read()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .clone()
    }

    /// Install a fully-formed state, replacing any previous one
    pub fn install(&self, state: Arc<ModelState>) {
        *self
            .inner
            .write()
            .unwrap_or_else(std::sync::PoisonError::into_inner) = Some(state);
    }

    /// True when a model is currently loaded
    #[must_use]
    pub fn is_loaded(&self) -> bool {
        self.inner
            .read()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .is_some()
    }
}
