//! Forecast execution strategies
//!
//! One executor, three strategies selected by [`ModelClass`]:
//!
//! - `Sequence`: slide a fixed-length window over the input, predicting one
//!   output block per call; once real rows run out the window is extended
//!   recursively from the model's own predictions.
//! - `Seasonal`: a single full-horizon call with the cyclical time features
//!   of the future index passed as exogenous regressors.
//! - `MultiHorizonStats`: a single call, optionally at the model's internal
//!   downsampled frequency with forward-fill back to the native step.
//!
//! Execution is CPU-bound and synchronous; the endpoint runs it on the
//! blocking pool while holding a gate slot.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Instant;

use serde::Serialize;
use tracing::{debug, warn};

use crate::config::ServeConfig;
use crate::error::{PronosticarError, Result};
use crate::frame::{TimeFrame, TIME_FEATURE_COLUMNS};
use crate::model::{ModelClass, ModelState, Predictor, PredictorInput};

/// Per-stage wall-clock timings for one execution, in milliseconds
#[derive(Debug, Clone, Default, Serialize)]
pub struct StageTimings {
    /// Shape and window prechecks
    pub precheck_ms: u64,
    /// Future-frame construction including time features
    pub frame_build_ms: u64,
    /// Total time inside predictor calls
    pub predict_ms: u64,
    /// Number of predictor calls issued
    pub predict_calls: u64,
    /// Inverse scaling of the finished frame
    pub inverse_scale_ms: u64,
    /// End-to-end execution time
    pub overall_ms: u64,
}

/// A finished forecast
#[derive(Debug, Clone)]
pub struct Forecast {
    /// Predicted rows, inverse-scaled, time-feature columns removed
    pub frame: TimeFrame,
    /// Name of the target column predictions were written to
    pub target_column: String,
    /// Per-step absolute error against real rows, where they existed
    pub step_errors: Vec<f64>,
    /// Mean of `step_errors`, when any were collected
    pub mean_abs_error: Option<f64>,
    /// Stage timings for this execution
    pub timings: StageTimings,
}

/// Runs forecasts against a loaded model snapshot
#[derive(Debug)]
pub struct InferenceExecutor {
    sample_offset: usize,
    max_error_steps: usize,
    active_jobs: AtomicUsize,
}

struct JobGuard<'a>(&'a AtomicUsize);

impl<'a> JobGuard<'a> {
    fn new(counter: &'a AtomicUsize) -> Self {
        counter.fetch_add(1, Ordering::SeqCst);
        Self(counter)
    }
}

impl Drop for JobGuard<'_> {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::SeqCst);
    }
}

impl InferenceExecutor {
    /// Executor configured from the serving config
    #[must_use]
    pub fn new(config: &ServeConfig) -> Self {
        Self {
            sample_offset: config.sample_offset,
            max_error_steps: config.max_error_steps,
            active_jobs: AtomicUsize::new(0),
        }
    }

    /// Number of executions currently in flight
    #[must_use]
    pub fn active_jobs(&self) -> usize {
        self.active_jobs.load(Ordering::SeqCst)
    }

    /// Produce a `horizon`-step forecast from `input`
    ///
    /// `input` must be prepared: sorted, numeric, time features appended.
    ///
    /// # Errors
    ///
    /// [`PronosticarError::Skipped`] when the input is shorter than the
    /// model's window requirement, [`PronosticarError::Frame`] when the
    /// index is not uniformly spaced, and [`PronosticarError::Execution`]
    /// when every predictor input shape is rejected.
    pub fn run(
        &self,
        state: &ModelState,
        input: &TimeFrame,
        horizon: usize,
    ) -> Result<Forecast> {
        let _job = JobGuard::new(&self.active_jobs);
        let overall = Instant::now();
        let mut timings = StageTimings::default();

        let forecast = match state.model_class {
            ModelClass::Sequence => self.run_sequence(state, input, horizon, &mut timings),
            ModelClass::Seasonal => self.run_seasonal(state, input, horizon, &mut timings),
            ModelClass::MultiHorizonStats => {
                self.run_stats(state, input, horizon, &mut timings)
            }
        }?;

        timings.overall_ms = elapsed_ms(overall);
        Ok(Forecast {
            timings,
            ..forecast
        })
    }

    fn run_sequence(
        &self,
        state: &ModelState,
        input: &TimeFrame,
        horizon: usize,
        timings: &mut StageTimings,
    ) -> Result<Forecast> {
        let precheck = Instant::now();
        let in_w = state.input_window_len;
        let out_w = state.output_window_len.max(1);
        if in_w == 0 {
            return Err(PronosticarError::Execution(
                "sequence model has no input window".to_string(),
            ));
        }
        let rows = input.n_rows();
        let min_required = in_w + out_w;
        if rows < min_required {
            return Err(PronosticarError::Skipped { rows, min_required });
        }
        let step = input.uniform_step()?;
        let target_pos = target_position(input)?;
        let base_positions = base_feature_positions(input);

        let mut start_pos = self.sample_offset + in_w;
        if start_pos >= rows {
            warn!(
                sample_offset = self.sample_offset,
                input_window = in_w,
                rows,
                "sample offset beyond input, clamping forecast start to last row"
            );
            start_pos = rows - 1;
        }
        timings.precheck_ms = elapsed_ms(precheck);

        let build = Instant::now();
        let mut frame = TimeFrame::future(
            input.index()[start_pos],
            step,
            horizon,
            input.columns().to_vec(),
        )
        .with_time_features();
        timings.frame_build_ms = elapsed_ms(build);

        let n_cols = input.n_cols();
        let mut window: VecDeque<Vec<f64>> = (start_pos - in_w..start_pos)
            .map(|i| input.row(i).to_vec())
            .collect();
        let mut step_errors = Vec::new();
        let mut dim_warned = false;
        let mut pad_logged = false;
        let mut produced = 0usize;

        while produced < horizon {
            let window_rows: Vec<Vec<f64>> = window.iter().cloned().collect();
            let predict = Instant::now();
            let preds = predict_adaptive(state.predictor.as_ref(), &window_rows)
                .map_err(|e| PronosticarError::Execution(e.to_string()))?;
            timings.predict_ms += elapsed_ms(predict);
            timings.predict_calls += 1;
            if preds.is_empty() {
                return Err(PronosticarError::Execution(
                    "predictor returned no steps".to_string(),
                ));
            }

            let take = preds.len().min(horizon - produced);
            for pred in preds.iter().take(take) {
                let row_idx = produced;
                write_step(&mut frame, row_idx, pred, target_pos, &base_positions, &mut dim_warned);

                let src = start_pos + row_idx;
                if src < rows && step_errors.len() < self.max_error_steps {
                    let actual = input.row(src)[target_pos];
                    let predicted = frame.row(row_idx)[target_pos];
                    if actual.is_finite() && predicted.is_finite() {
                        step_errors.push((predicted - actual).abs());
                    }
                }

                let next = if src < rows {
                    input.row(src).to_vec()
                } else {
                    if !pad_logged {
                        debug!(
                            at_step = row_idx,
                            "real rows exhausted, extending window recursively"
                        );
                        pad_logged = true;
                    }
                    let last = window.back().cloned().unwrap_or_default();
                    (0..n_cols)
                        .map(|c| {
                            let v = frame.row(row_idx)[c];
                            if v.is_finite() {
                                v
                            } else {
                                last.get(c).copied().unwrap_or(f64::NAN)
                            }
                        })
                        .collect()
                };
                window.pop_front();
                window.push_back(next);
                produced += 1;
            }
        }

        self.finish(state, frame, target_pos, input, step_errors, timings)
    }

    fn run_seasonal(
        &self,
        state: &ModelState,
        input: &TimeFrame,
        horizon: usize,
        timings: &mut StageTimings,
    ) -> Result<Forecast> {
        let precheck = Instant::now();
        let step = input.uniform_step()?;
        let target_pos = target_position(input)?;
        let base_positions = base_feature_positions(input);
        let last = input.index()[input.n_rows() - 1];
        timings.precheck_ms = elapsed_ms(precheck);

        let build = Instant::now();
        let mut frame =
            TimeFrame::future(last + step, step, horizon, input.columns().to_vec())
                .with_time_features();
        let exog_cols: Vec<String> =
            TIME_FEATURE_COLUMNS.iter().map(|s| (*s).to_string()).collect();
        let exog = frame.select_columns(&exog_cols)?;
        timings.frame_build_ms = elapsed_ms(build);

        let predict = Instant::now();
        let preds = state
            .predictor
            .predict(&PredictorInput::Horizon {
                steps: horizon,
                exog: Some(&exog),
            })
            .map_err(|e| PronosticarError::Execution(e.to_string()))?;
        timings.predict_ms = elapsed_ms(predict);
        timings.predict_calls = 1;

        if preds.len() < horizon {
            warn!(
                produced = preds.len(),
                horizon, "seasonal model produced fewer steps than requested"
            );
        }
        let mut dim_warned = false;
        for (i, pred) in preds.iter().take(horizon).enumerate() {
            write_step(&mut frame, i, pred, target_pos, &base_positions, &mut dim_warned);
        }

        self.finish(state, frame, target_pos, input, Vec::new(), timings)
    }

    fn run_stats(
        &self,
        state: &ModelState,
        input: &TimeFrame,
        horizon: usize,
        timings: &mut StageTimings,
    ) -> Result<Forecast> {
        let precheck = Instant::now();
        let step = input.uniform_step()?;
        let target_pos = target_position(input)?;
        let base_positions = base_feature_positions(input);
        let last = input.index()[input.n_rows() - 1];

        let resample = state.resample.filter(|r| !r.is_identity());
        let internal_steps = resample.map_or(horizon, |r| r.internal_horizon(horizon));
        timings.precheck_ms = elapsed_ms(precheck);

        let build = Instant::now();
        let mut frame =
            TimeFrame::future(last + step, step, horizon, input.columns().to_vec())
                .with_time_features();
        let exog_cols: Vec<String> =
            TIME_FEATURE_COLUMNS.iter().map(|s| (*s).to_string()).collect();
        // Exogenous regressors at the model's internal frequency: the
        // native prediction frame for the identity case, a frame rebuilt
        // at the downsampling step otherwise.
        let exog = match resample {
            Some(r) => {
                TimeFrame::future(last + r.downsampling, r.downsampling, internal_steps, Vec::new())
                    .with_time_features()
                    .select_columns(&exog_cols)?
            }
            None => frame.select_columns(&exog_cols)?,
        };
        timings.frame_build_ms = elapsed_ms(build);

        let predict = Instant::now();
        let preds = state
            .predictor
            .predict(&PredictorInput::Horizon {
                steps: internal_steps,
                exog: Some(&exog),
            })
            .map_err(|e| PronosticarError::Execution(e.to_string()))?;
        timings.predict_ms = elapsed_ms(predict);
        timings.predict_calls = 1;

        if preds.is_empty() {
            return Err(PronosticarError::Execution(
                "predictor returned no steps".to_string(),
            ));
        }

        let mut dim_warned = false;
        for i in 0..horizon {
            // Forward-fill from the internal (downsampled) step covering
            // this native step.
            let j = resample.map_or(i, |r| {
                let native_ms = r.native.num_milliseconds().max(1) as u128;
                let down_ms = r.downsampling.num_milliseconds().max(1) as u128;
                usize::try_from(i as u128 * native_ms / down_ms).unwrap_or(usize::MAX)
            });
            let j = j.min(preds.len() - 1);
            write_step(&mut frame, i, &preds[j], target_pos, &base_positions, &mut dim_warned);
        }

        self.finish(state, frame, target_pos, input, Vec::new(), timings)
    }

    #[allow(clippy::unused_self)]
    fn finish(
        &self,
        state: &ModelState,
        frame: TimeFrame,
        target_pos: usize,
        input: &TimeFrame,
        step_errors: Vec<f64>,
        timings: &mut StageTimings,
    ) -> Result<Forecast> {
        let target_column = input.columns()[target_pos].clone();

        let inverse = Instant::now();
        let out = frame.drop_columns(&TIME_FEATURE_COLUMNS);
        let out = match &state.scaler {
            Some(scaler) => match scaler
                .subset(out.columns())
                .and_then(|s| s.inverse_frame(&out))
            {
                Ok(f) => f,
                Err(e) => {
                    warn!(error = %e, "inverse scaling failed, returning raw predictions");
                    out
                }
            },
            None => out,
        };
        timings.inverse_scale_ms = elapsed_ms(inverse);

        #[allow(clippy::cast_precision_loss)]
        let mean_abs_error = if step_errors.is_empty() {
            None
        } else {
            Some(step_errors.iter().sum::<f64>() / step_errors.len() as f64)
        };

        Ok(Forecast {
            frame: out,
            target_column,
            step_errors,
            mean_abs_error,
            timings: timings.clone(),
        })
    }
}

/// Try predictor input shapes in declining order of structure
///
/// The first error is surfaced when every shape is rejected, since it
/// names the model's natural input contract.
fn predict_adaptive(
    predictor: &dyn Predictor,
    window: &[Vec<f64>],
) -> std::result::Result<Vec<Vec<f64>>, crate::model::PredictError> {
    let first = match predictor.predict(&PredictorInput::Batched3d { window }) {
        Ok(p) => return Ok(p),
        Err(e) => e,
    };
    if let Ok(p) = predictor.predict(&PredictorInput::Window2d { window }) {
        return Ok(p);
    }
    let values: Vec<f64> = window.iter().flatten().copied().collect();
    predictor
        .predict(&PredictorInput::Flat2d { values })
        .map_err(|_| first)
}

/// Column the forecast is written to: `value` when present, else the first
/// non-time-feature column.
fn target_position(input: &TimeFrame) -> Result<usize> {
    if let Some(pos) = input.column_position("value") {
        return Ok(pos);
    }
    input
        .columns()
        .iter()
        .position(|c| !crate::frame::is_time_feature(c))
        .ok_or_else(|| {
            PronosticarError::Execution("input has no forecastable columns".to_string())
        })
}

fn base_feature_positions(input: &TimeFrame) -> Vec<usize> {
    (0..input.n_cols())
        .filter(|&i| !crate::frame::is_time_feature(&input.columns()[i]))
        .collect()
}

/// Write one predicted step into the output frame, tolerating the three
/// output dimensionalities models produce.
fn write_step(
    frame: &mut TimeFrame,
    row: usize,
    pred: &[f64],
    target_pos: usize,
    base_positions: &[usize],
    dim_warned: &mut bool,
) {
    if pred.len() == frame.n_cols() {
        for &c in base_positions {
            frame.set_value(row, c, pred[c]);
        }
    } else if pred.len() == base_positions.len() {
        for (v, &c) in pred.iter().zip(base_positions) {
            frame.set_value(row, c, *v);
        }
    } else if pred.len() == 1 {
        frame.set_value(row, target_pos, pred[0]);
    } else {
        if !*dim_warned {
            warn!(
                got = pred.len(),
                expected = base_positions.len(),
                "unexpected prediction dimension, writing first value to target"
            );
            *dim_warned = true;
        }
        if let Some(first) = pred.first() {
            frame.set_value(row, target_pos, *first);
        }
    }
}

#[allow(clippy::cast_possible_truncation)]
fn elapsed_ms(since: Instant) -> u64 {
    since.elapsed().as_millis() as u64
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{ModelSlot, PredictError, ResampleSpec, Scaler};
    use chrono::{Duration, NaiveDate, NaiveDateTime};
    use std::sync::atomic::AtomicU64;
    use std::sync::{Arc, Mutex};

    fn ts(minute: i64) -> NaiveDateTime {
        NaiveDate::from_ymd_opt(2024, 1, 1)
            .expect("date")
            .and_hms_opt(0, 0, 0)
            .expect("time")
            + Duration::minutes(minute)
    }

    /// 2-minute cadence, value column equal to the row position.
    fn input_frame(rows: usize) -> TimeFrame {
        #[allow(clippy::cast_precision_loss)]
        let frame = TimeFrame::new(
            (0..rows).map(|i| ts(2 * i as i64)).collect(),
            vec!["value".to_string()],
            (0..rows).map(|i| vec![i as f64]).collect(),
        )
        .expect("frame");
        frame.with_time_features()
    }

    fn state(predictor: Arc<dyn Predictor>, class: ModelClass, in_w: usize) -> ModelState {
        ModelState {
            predictor,
            scaler: None,
            model_class: class,
            input_window_len: in_w,
            output_window_len: 1,
            config_fingerprint: None,
            run_id: "run-t".to_string(),
            model_type: "TEST".to_string(),
            reference_frame: None,
            resample: None,
        }
    }

    fn executor() -> InferenceExecutor {
        InferenceExecutor::new(&ServeConfig::default())
    }

    /// Predicts last window target + 1, only accepting the batched shape.
    struct NextValue;

    impl Predictor for NextValue {
        fn predict(
            &self,
            input: &PredictorInput<'_>,
        ) -> std::result::Result<Vec<Vec<f64>>, PredictError> {
            match input {
                PredictorInput::Batched3d { window } => {
                    let last = window.last().ok_or_else(|| {
                        PredictError("empty window".to_string())
                    })?;
                    Ok(vec![vec![last[0] + 1.0]])
                }
                _ => Err(PredictError("unsupported shape".to_string())),
            }
        }
    }

    #[test]
    fn sequence_forecast_aligns_with_real_rows() {
        let input = input_frame(30);
        let state = state(Arc::new(NextValue), ModelClass::Sequence, 12);
        let fc = executor().run(&state, &input, 5).expect("forecast");

        assert_eq!(fc.frame.n_rows(), 5);
        // Forecast starts at the first post-window instant.
        assert_eq!(fc.frame.index()[0], ts(24));
        assert_eq!(fc.frame.index()[4], ts(32));
        // value[i] = i, so predicting last+1 reproduces the real series.
        assert_eq!(
            fc.frame.column_values("value").expect("col"),
            vec![12.0, 13.0, 14.0, 15.0, 16.0]
        );
        assert_eq!(fc.step_errors.len(), 5);
        assert_eq!(fc.mean_abs_error, Some(0.0));
        // Time features never appear in the output.
        assert_eq!(fc.frame.columns(), &["value".to_string()]);
        assert_eq!(fc.timings.predict_calls, 5);
    }

    #[test]
    fn sequence_continues_recursively_past_real_rows() {
        let input = input_frame(14);
        let state = state(Arc::new(NextValue), ModelClass::Sequence, 12);
        // Only 2 real rows past the first window; the rest is recursive.
        let fc = executor().run(&state, &input, 6).expect("forecast");
        assert_eq!(
            fc.frame.column_values("value").expect("col"),
            vec![12.0, 13.0, 14.0, 15.0, 16.0, 17.0]
        );
        // Errors only where real rows existed.
        assert_eq!(fc.step_errors.len(), 2);
    }

    #[test]
    fn short_input_is_skipped_not_failed() {
        let input = input_frame(5);
        let state = state(Arc::new(NextValue), ModelClass::Sequence, 12);
        let err = executor().run(&state, &input, 3).unwrap_err();
        match err {
            PronosticarError::Skipped { rows, min_required } => {
                assert_eq!(rows, 5);
                assert_eq!(min_required, 13);
            }
            other => panic!("expected Skipped, got {other:?}"),
        }
    }

    #[test]
    fn oversized_sample_offset_clamps_to_last_row() {
        let input = input_frame(20);
        let state = state(Arc::new(NextValue), ModelClass::Sequence, 12);
        let exec = InferenceExecutor {
            sample_offset: 500,
            max_error_steps: 200,
            active_jobs: AtomicUsize::new(0),
        };
        let fc = exec.run(&state, &input, 2).expect("forecast");
        // Start clamped to the final input instant.
        assert_eq!(fc.frame.index()[0], ts(38));
    }

    #[test]
    fn step_error_collection_is_capped() {
        let input = input_frame(40);
        let state = state(Arc::new(NextValue), ModelClass::Sequence, 12);
        let exec = InferenceExecutor {
            sample_offset: 0,
            max_error_steps: 3,
            active_jobs: AtomicUsize::new(0),
        };
        let fc = exec.run(&state, &input, 10).expect("forecast");
        assert_eq!(fc.step_errors.len(), 3);
    }

    /// Rejects the batched shape, accepts the squeezed window, counts calls.
    struct SqueezeOnly {
        batched_rejections: AtomicU64,
    }

    impl Predictor for SqueezeOnly {
        fn predict(
            &self,
            input: &PredictorInput<'_>,
        ) -> std::result::Result<Vec<Vec<f64>>, PredictError> {
            match input {
                PredictorInput::Batched3d { .. } => {
                    self.batched_rejections.fetch_add(1, Ordering::SeqCst);
                    Err(PredictError("batched input not supported".to_string()))
                }
                PredictorInput::Window2d { window } => {
                    Ok(vec![vec![window.last().expect("window")[0] + 1.0]])
                }
                _ => Err(PredictError("unsupported shape".to_string())),
            }
        }
    }

    #[test]
    fn adapter_falls_back_to_squeezed_window() {
        let input = input_frame(20);
        let mock = Arc::new(SqueezeOnly {
            batched_rejections: AtomicU64::new(0),
        });
        let state = state(Arc::clone(&mock) as Arc<dyn Predictor>, ModelClass::Sequence, 12);
        let fc = executor().run(&state, &input, 2).expect("forecast");
        assert_eq!(
            fc.frame.column_values("value").expect("col"),
            vec![12.0, 13.0]
        );
        // Batched shape tried (and rejected) once per call.
        assert_eq!(mock.batched_rejections.load(Ordering::SeqCst), 2);
    }

    struct AlwaysFails;

    impl Predictor for AlwaysFails {
        fn predict(
            &self,
            input: &PredictorInput<'_>,
        ) -> std::result::Result<Vec<Vec<f64>>, PredictError> {
            match input {
                PredictorInput::Batched3d { .. } => {
                    Err(PredictError("natural shape rejected".to_string()))
                }
                _ => Err(PredictError("fallback rejected".to_string())),
            }
        }
    }

    #[test]
    fn all_shapes_rejected_surfaces_first_error() {
        let input = input_frame(20);
        let state = state(Arc::new(AlwaysFails), ModelClass::Sequence, 12);
        let err = executor().run(&state, &input, 1).unwrap_err();
        assert!(err.to_string().contains("natural shape rejected"));
    }

    struct ConstantHorizon {
        value: f64,
        require_exog: bool,
    }

    impl Predictor for ConstantHorizon {
        fn predict(
            &self,
            input: &PredictorInput<'_>,
        ) -> std::result::Result<Vec<Vec<f64>>, PredictError> {
            match input {
                PredictorInput::Horizon { steps, exog } => {
                    if self.require_exog && exog.is_none() {
                        return Err(PredictError("missing exogenous frame".to_string()));
                    }
                    if let Some(frame) = exog {
                        assert_eq!(frame.n_rows(), *steps);
                    }
                    Ok((0..*steps).map(|_| vec![self.value]).collect())
                }
                _ => Err(PredictError("horizon models take no window".to_string())),
            }
        }
    }

    #[test]
    fn seasonal_forecast_starts_after_the_input() {
        let input = input_frame(10);
        let state = state(
            Arc::new(ConstantHorizon {
                value: 42.0,
                require_exog: true,
            }),
            ModelClass::Seasonal,
            0,
        );
        let fc = executor().run(&state, &input, 4).expect("forecast");
        assert_eq!(fc.frame.index()[0], ts(20));
        assert_eq!(
            fc.frame.column_values("value").expect("col"),
            vec![42.0; 4]
        );
        assert_eq!(fc.timings.predict_calls, 1);
        assert!(fc.step_errors.is_empty());
    }

    /// Ramp over the horizon; refuses to run without the exogenous
    /// time-feature frame, like the statistical backends it stands in for.
    struct RampHorizon;

    impl Predictor for RampHorizon {
        fn predict(
            &self,
            input: &PredictorInput<'_>,
        ) -> std::result::Result<Vec<Vec<f64>>, PredictError> {
            match input {
                PredictorInput::Horizon { steps, exog } => {
                    let frame = exog.ok_or_else(|| {
                        PredictError("missing exogenous frame".to_string())
                    })?;
                    assert_eq!(frame.n_rows(), *steps);
                    assert_eq!(frame.n_cols(), TIME_FEATURE_COLUMNS.len());
                    #[allow(clippy::cast_precision_loss)]
                    Ok((0..*steps).map(|i| vec![(i + 1) as f64 * 10.0]).collect())
                }
                _ => Err(PredictError("horizon models take no window".to_string())),
            }
        }
    }

    #[test]
    fn stats_downsampling_forward_fills_to_native_step() {
        let input = input_frame(10);
        let mut st = state(Arc::new(RampHorizon), ModelClass::MultiHorizonStats, 0);
        st.resample = Some(ResampleSpec {
            native: Duration::minutes(2),
            downsampling: Duration::minutes(4),
        });
        // horizon 4 at 2min -> internal 2 steps at 4min, each covering 2 rows
        let fc = executor().run(&st, &input, 4).expect("forecast");
        assert_eq!(
            fc.frame.column_values("value").expect("col"),
            vec![10.0, 10.0, 20.0, 20.0]
        );
    }

    #[test]
    fn stats_identity_resample_predicts_at_native_step() {
        let input = input_frame(10);
        let st = state(Arc::new(RampHorizon), ModelClass::MultiHorizonStats, 0);
        let fc = executor().run(&st, &input, 3).expect("forecast");
        assert_eq!(
            fc.frame.column_values("value").expect("col"),
            vec![10.0, 20.0, 30.0]
        );
    }

    /// Records the exogenous index it was handed.
    struct ExogRecorder {
        seen: Mutex<Vec<NaiveDateTime>>,
    }

    impl Predictor for ExogRecorder {
        fn predict(
            &self,
            input: &PredictorInput<'_>,
        ) -> std::result::Result<Vec<Vec<f64>>, PredictError> {
            match input {
                PredictorInput::Horizon { steps, exog } => {
                    let frame = exog.ok_or_else(|| {
                        PredictError("missing exogenous frame".to_string())
                    })?;
                    *self.seen.lock().expect("lock") = frame.index().to_vec();
                    Ok((0..*steps).map(|_| vec![1.0]).collect())
                }
                _ => Err(PredictError("horizon models take no window".to_string())),
            }
        }
    }

    #[test]
    fn stats_exog_covers_the_forecast_at_native_step() {
        let input = input_frame(10);
        let rec = Arc::new(ExogRecorder {
            seen: Mutex::new(Vec::new()),
        });
        let st = state(
            Arc::clone(&rec) as Arc<dyn Predictor>,
            ModelClass::MultiHorizonStats,
            0,
        );
        executor().run(&st, &input, 3).expect("forecast");
        // Input ends at minute 18; exog tracks the prediction index.
        assert_eq!(
            rec.seen.lock().expect("lock").clone(),
            vec![ts(20), ts(22), ts(24)]
        );
    }

    #[test]
    fn downsampled_stats_exog_is_rebuilt_at_the_coarse_step() {
        let input = input_frame(10);
        let rec = Arc::new(ExogRecorder {
            seen: Mutex::new(Vec::new()),
        });
        let mut st = state(
            Arc::clone(&rec) as Arc<dyn Predictor>,
            ModelClass::MultiHorizonStats,
            0,
        );
        st.resample = Some(ResampleSpec {
            native: Duration::minutes(2),
            downsampling: Duration::minutes(4),
        });
        executor().run(&st, &input, 4).expect("forecast");
        // Internal horizon 2 at the 4-minute cadence, starting one coarse
        // step past the input.
        assert_eq!(
            rec.seen.lock().expect("lock").clone(),
            vec![ts(22), ts(26)]
        );
    }

    #[test]
    fn scaled_predictions_are_inverse_transformed() {
        let input = input_frame(20);
        let mut st = state(Arc::new(NextValue), ModelClass::Sequence, 12);
        // scaled = raw * 0.1 + 1.0 -> raw = (scaled - 1.0) / 0.1
        st.scaler = Some(
            Scaler::new(vec!["value".to_string()], vec![0.1], vec![1.0]).expect("scaler"),
        );
        let fc = executor().run(&st, &input, 1).expect("forecast");
        let got = fc.frame.column_values("value").expect("col")[0];
        assert!((got - 110.0).abs() < 1e-9);
        // Errors are computed in model space, before inverse scaling.
        assert_eq!(fc.mean_abs_error, Some(0.0));
    }

    #[test]
    fn non_uniform_input_is_a_frame_error() {
        let frame = TimeFrame::new(
            vec![ts(0), ts(2), ts(5)],
            vec!["value".to_string()],
            vec![vec![1.0], vec![2.0], vec![3.0]],
        )
        .expect("frame")
        .with_time_features();
        let state = state(Arc::new(NextValue), ModelClass::Sequence, 2);
        let err = executor().run(&state, &frame, 2).unwrap_err();
        assert!(matches!(err, PronosticarError::Frame(_)));
    }

    #[test]
    fn hot_swap_mid_flight_keeps_request_snapshot() {
        let slot = ModelSlot::new();
        slot.install(Arc::new(state(Arc::new(NextValue), ModelClass::Sequence, 12)));
        let snapshot = slot.load().expect("loaded");
        // Swap in a different model while the first request holds its Arc.
        slot.install(Arc::new(state(
            Arc::new(ConstantHorizon {
                value: 0.0,
                require_exog: false,
            }),
            ModelClass::Seasonal,
            0,
        )));
        let input = input_frame(20);
        let fc = executor().run(&snapshot, &input, 1).expect("forecast");
        assert_eq!(fc.frame.column_values("value").expect("col"), vec![12.0]);
    }
}
