//! Model acquisition and startup readiness
//!
//! The serving process never trains; it watches for a promoted model and
//! installs it into the [`ModelSlot`]. Startup follows a small state
//! machine: poll for the promoted model until a deadline, then fall back
//! to the most recent finished training run, then give up and serve 503s
//! until a reload succeeds. Where the model comes from is abstracted
//! behind [`ModelLoader`] so the registry client stays out of the serving
//! path.

use std::sync::{Arc, OnceLock};

use tokio::time::{sleep, Duration, Instant};
use tracing::{error, info, warn};

use crate::config::ServeConfig;
use crate::error::{PronosticarError, Result};
use crate::executor::InferenceExecutor;
use crate::model::{ModelSlot, ModelState};

/// Delay between promoted-model polls during startup
pub const POLL_INTERVAL: Duration = Duration::from_secs(1);

/// Which model a load request targets
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoadSelection {
    /// The explicitly promoted production model
    Promoted,
    /// The newest finished training run, promoted or not
    LatestFinished,
}

/// Source of loadable model snapshots
///
/// Implementations block; callers run them off the async runtime when
/// latency matters. `Ok(None)` means no matching model exists yet, which
/// is an expected state during cold start.
pub trait ModelLoader: Send + Sync {
    /// Load the model matching `selection`
    ///
    /// # Errors
    ///
    /// Returns [`PronosticarError::Load`] on registry or deserialization
    /// failures.
    fn load(&self, selection: LoadSelection) -> Result<Option<ModelState>>;
}

/// Terminal state of the startup sequence
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StartupOutcome {
    /// The promoted model was installed
    Ready {
        /// Milliseconds spent waiting
        waited_ms: u64,
    },
    /// No promoted model appeared; the latest finished run was installed
    FallbackReady {
        /// Milliseconds spent waiting
        waited_ms: u64,
    },
    /// No model could be installed; the service starts not-ready
    NotReady,
}

/// Drives model installation into the shared slot
pub struct ModelWatcher {
    slot: Arc<ModelSlot>,
    loader: Arc<dyn ModelLoader>,
    startup_ready_ms: OnceLock<u64>,
}

impl std::fmt::Debug for ModelWatcher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ModelWatcher")
            .field("loaded", &self.slot.is_loaded())
            .finish_non_exhaustive()
    }
}

impl ModelWatcher {
    /// New watcher installing into `slot` from `loader`
    #[must_use]
    pub fn new(slot: Arc<ModelSlot>, loader: Arc<dyn ModelLoader>) -> Self {
        Self {
            slot,
            loader,
            startup_ready_ms: OnceLock::new(),
        }
    }

    /// Milliseconds startup waited before the first model installed, once
    /// that has happened.
    #[must_use]
    pub fn startup_ready_ms(&self) -> Option<u64> {
        self.startup_ready_ms.get().copied()
    }

    /// Run the startup state machine to completion
    ///
    /// With `wait_for_model` disabled this makes a single opportunistic
    /// attempt and returns. Otherwise it polls for the promoted model
    /// until `model_wait_timeout_secs`, then tries the latest finished
    /// run once.
    pub async fn run_startup(
        &self,
        config: &ServeConfig,
        executor: &InferenceExecutor,
    ) -> StartupOutcome {
        let started = Instant::now();

        if !config.wait_for_model {
            return match self.try_load(LoadSelection::Promoted) {
                Some(state) => {
                    self.install(state, config, executor);
                    let _ = self.startup_ready_ms.set(0);
                    StartupOutcome::Ready { waited_ms: 0 }
                }
                None => {
                    info!("startup wait disabled and no promoted model yet");
                    StartupOutcome::NotReady
                }
            };
        }

        let deadline = started + Duration::from_secs(config.model_wait_timeout_secs);
        loop {
            if let Some(state) = self.try_load(LoadSelection::Promoted) {
                let waited_ms = elapsed_ms(started);
                self.install(state, config, executor);
                let _ = self.startup_ready_ms.set(waited_ms);
                info!(waited_ms, "promoted model installed");
                return StartupOutcome::Ready { waited_ms };
            }
            if Instant::now() >= deadline {
                break;
            }
            sleep(POLL_INTERVAL).await;
        }

        warn!(
            timeout_secs = config.model_wait_timeout_secs,
            "no promoted model within the startup window, trying latest finished run"
        );
        match self.try_load(LoadSelection::LatestFinished) {
            Some(state) => {
                let waited_ms = elapsed_ms(started);
                self.install(state, config, executor);
                let _ = self.startup_ready_ms.set(waited_ms);
                warn!(waited_ms, "serving an unpromoted fallback model");
                StartupOutcome::FallbackReady { waited_ms }
            }
            None => {
                error!("no loadable model found, serving not-ready");
                StartupOutcome::NotReady
            }
        }
    }

    /// Install the newest finished run, replacing the current model
    ///
    /// The load runs on the blocking pool so in-flight requests are not
    /// stalled.
    ///
    /// # Errors
    ///
    /// Returns [`PronosticarError::Load`] when the loader fails. `Ok(false)`
    /// means no finished run exists.
    pub async fn reload_latest(&self) -> Result<bool> {
        let loader = Arc::clone(&self.loader);
        let state = tokio::task::spawn_blocking(move || loader.load(LoadSelection::LatestFinished))
            .await
            .map_err(|e| PronosticarError::Load(e.to_string()))??;
        match state {
            Some(state) => {
                info!(run_id = %state.run_id, model_type = %state.model_type, "model reloaded");
                self.slot.install(Arc::new(state));
                Ok(true)
            }
            None => Ok(false),
        }
    }

    fn try_load(&self, selection: LoadSelection) -> Option<ModelState> {
        match self.loader.load(selection) {
            Ok(found) => found,
            Err(e) => {
                warn!(error = %e, ?selection, "model load attempt failed");
                None
            }
        }
    }

    fn install(&self, state: ModelState, config: &ServeConfig, executor: &InferenceExecutor) {
        let state = Arc::new(state);
        self.slot.install(Arc::clone(&state));
        if config.prewarm {
            if let Some(frame) = state.reference_frame.as_deref() {
                match executor.run(&state, frame, 1) {
                    Ok(_) => info!("prewarm inference completed"),
                    Err(e) => warn!(error = %e, "prewarm inference failed"),
                }
            }
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
    use crate::frame::TimeFrame;
    use crate::model::{ModelClass, PredictError, Predictor, PredictorInput};
    use chrono::{Duration as ChronoDuration, NaiveDate};
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct ConstantSeasonal {
        calls: Arc<AtomicUsize>,
    }

    impl Predictor for ConstantSeasonal {
        fn predict(
            &self,
            input: &PredictorInput<'_>,
        ) -> std::result::Result<Vec<Vec<f64>>, PredictError> {
            match input {
                PredictorInput::Horizon { steps, .. } => {
                    self.calls.fetch_add(1, Ordering::SeqCst);
                    Ok((0..*steps).map(|_| vec![1.0]).collect())
                }
                _ => Err(PredictError("unsupported".to_string())),
            }
        }
    }

    fn reference_frame() -> Arc<TimeFrame> {
        #[allow(clippy::cast_precision_loss)]
        let frame = TimeFrame::new(
            (0..4)
                .map(|i| {
                    NaiveDate::from_ymd_opt(2024, 1, 1)
                        .expect("date")
                        .and_hms_opt(0, 0, 0)
                        .expect("time")
                        + ChronoDuration::minutes(2 * i)
                })
                .collect(),
            vec!["value".to_string()],
            (0..4).map(|i| vec![i as f64]).collect(),
        )
        .expect("frame");
        Arc::new(frame.with_time_features())
    }

    fn seasonal_state(calls: Arc<AtomicUsize>, run_id: &str) -> ModelState {
        ModelState {
            predictor: Arc::new(ConstantSeasonal { calls }),
            scaler: None,
            model_class: ModelClass::Seasonal,
            input_window_len: 0,
            output_window_len: 1,
            config_fingerprint: None,
            run_id: run_id.to_string(),
            model_type: "PROPHET".to_string(),
            reference_frame: Some(reference_frame()),
            resample: None,
        }
    }

    struct ScriptedLoader {
        promoted_after: usize,
        has_fallback: bool,
        attempts: AtomicUsize,
        calls: Arc<AtomicUsize>,
    }

    impl ScriptedLoader {
        fn new(promoted_after: usize, has_fallback: bool) -> Self {
            Self {
                promoted_after,
                has_fallback,
                attempts: AtomicUsize::new(0),
                calls: Arc::new(AtomicUsize::new(0)),
            }
        }
    }

    impl ModelLoader for ScriptedLoader {
        fn load(&self, selection: LoadSelection) -> Result<Option<ModelState>> {
            match selection {
                LoadSelection::Promoted => {
                    let n = self.attempts.fetch_add(1, Ordering::SeqCst) + 1;
                    if n >= self.promoted_after && self.promoted_after > 0 {
                        Ok(Some(seasonal_state(Arc::clone(&self.calls), "promoted")))
                    } else {
                        Ok(None)
                    }
                }
                LoadSelection::LatestFinished => {
                    if self.has_fallback {
                        Ok(Some(seasonal_state(Arc::clone(&self.calls), "latest")))
                    } else {
                        Ok(None)
                    }
                }
            }
        }
    }

    fn watcher(loader: ScriptedLoader) -> (ModelWatcher, Arc<ModelSlot>) {
        let slot = Arc::new(ModelSlot::new());
        (
            ModelWatcher::new(Arc::clone(&slot), Arc::new(loader)),
            slot,
        )
    }

    fn waiting_config(timeout_secs: u64) -> ServeConfig {
        ServeConfig {
            wait_for_model: true,
            model_wait_timeout_secs: timeout_secs,
            ..ServeConfig::default()
        }
    }

    #[tokio::test(start_paused = true)]
    async fn promoted_model_installs_immediately() {
        let (watcher, slot) = watcher(ScriptedLoader::new(1, false));
        let executor = InferenceExecutor::new(&ServeConfig::default());
        let outcome = watcher.run_startup(&waiting_config(10), &executor).await;
        assert!(matches!(outcome, StartupOutcome::Ready { .. }));
        assert_eq!(slot.load().expect("loaded").run_id, "promoted");
    }

    #[tokio::test(start_paused = true)]
    async fn polling_retries_until_the_model_appears() {
        let (watcher, slot) = watcher(ScriptedLoader::new(3, false));
        let executor = InferenceExecutor::new(&ServeConfig::default());
        let outcome = watcher.run_startup(&waiting_config(30), &executor).await;
        assert!(matches!(outcome, StartupOutcome::Ready { .. }));
        assert!(slot.is_loaded());
    }

    #[tokio::test(start_paused = true)]
    async fn timeout_falls_back_to_latest_finished_run() {
        let (watcher, slot) = watcher(ScriptedLoader::new(0, true));
        let executor = InferenceExecutor::new(&ServeConfig::default());
        let outcome = watcher.run_startup(&waiting_config(3), &executor).await;
        assert!(matches!(outcome, StartupOutcome::FallbackReady { .. }));
        assert_eq!(slot.load().expect("loaded").run_id, "latest");
    }

    #[tokio::test(start_paused = true)]
    async fn no_model_anywhere_starts_not_ready() {
        let (watcher, slot) = watcher(ScriptedLoader::new(0, false));
        let executor = InferenceExecutor::new(&ServeConfig::default());
        let outcome = watcher.run_startup(&waiting_config(2), &executor).await;
        assert_eq!(outcome, StartupOutcome::NotReady);
        assert!(!slot.is_loaded());
    }

    #[tokio::test]
    async fn disabled_wait_attempts_once_without_sleeping() {
        let loader = ScriptedLoader::new(0, true);
        let (watcher, slot) = watcher(loader);
        let executor = InferenceExecutor::new(&ServeConfig::default());
        let outcome = watcher
            .run_startup(&ServeConfig::default(), &executor)
            .await;
        assert_eq!(outcome, StartupOutcome::NotReady);
        assert!(!slot.is_loaded());
    }

    #[tokio::test(start_paused = true)]
    async fn prewarm_runs_one_inference_after_install() {
        let loader = ScriptedLoader::new(1, false);
        let calls = Arc::clone(&loader.calls);
        let (watcher, _slot) = watcher(loader);
        let executor = InferenceExecutor::new(&ServeConfig::default());
        let config = ServeConfig {
            prewarm: true,
            ..waiting_config(10)
        };
        watcher.run_startup(&config, &executor).await;
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn reload_latest_swaps_the_served_model() {
        let (watcher, slot) = watcher(ScriptedLoader::new(1, true));
        let executor = InferenceExecutor::new(&ServeConfig::default());
        watcher.run_startup(&waiting_config(5), &executor).await;
        assert_eq!(slot.load().expect("loaded").run_id, "promoted");

        let swapped = watcher.reload_latest().await.expect("reload");
        assert!(swapped);
        assert_eq!(slot.load().expect("loaded").run_id, "latest");
    }

    #[tokio::test]
    async fn reload_with_no_finished_runs_reports_false() {
        let (watcher, slot) = watcher(ScriptedLoader::new(0, false));
        let swapped = watcher.reload_latest().await.expect("reload");
        assert!(!swapped);
        assert!(!slot.is_loaded());
    }
}
