//! Serving configuration read from the environment
//!
//! All knobs are fixed at process start. Concurrency defaults to the
//! machine's available parallelism; everything else mirrors the deployment
//! environment variables of the inference container.

use serde::Serialize;

/// Hard upper bound on a requested forecast horizon
pub const MAX_INFERENCE_LENGTH: usize = 10_000;

/// Runtime configuration for the serving endpoint
#[derive(Debug, Clone, Serialize)]
pub struct ServeConfig {
    /// Concurrency gate capacity (`PREDICT_MAX_CONCURRENCY`)
    pub max_concurrency: usize,
    /// Whether startup blocks readiness on a model arriving (`WAIT_FOR_MODEL`)
    pub wait_for_model: bool,
    /// Seconds to wait for a model before attempting fallback (`MODEL_WAIT_TIMEOUT`)
    pub model_wait_timeout_secs: u64,
    /// Run a one-shot inference after the first successful load (`ENABLE_PREWARM`)
    pub prewarm: bool,
    /// Serve the last successful response for empty requests (`ENABLE_PREDICT_CACHE`)
    pub cache_enabled: bool,
    /// Logical identifier attached to responses and log records (`IDENTIFIER`)
    pub identifier: String,
    /// Offset into the window list where forecasting starts (`SAMPLE_IDX`)
    pub sample_offset: usize,
    /// Default horizon when the request carries none (`INFERENCE_LENGTH`)
    pub default_inference_length: usize,
    /// Cap on per-step error entries kept for logging (`PREDICT_MAX_ERROR_STEPS`)
    pub max_error_steps: usize,
}

impl ServeConfig {
    /// Build configuration from the process environment
    #[must_use]
    pub fn from_env() -> Self {
        let default_parallelism = std::thread::available_parallelism()
            .map(std::num::NonZeroUsize::get)
            .unwrap_or(1);
        Self {
            max_concurrency: env_usize("PREDICT_MAX_CONCURRENCY", default_parallelism).max(1),
            wait_for_model: env_flag("WAIT_FOR_MODEL", true),
            model_wait_timeout_secs: env_u64("MODEL_WAIT_TIMEOUT", 120),
            prewarm: env_flag("ENABLE_PREWARM", false),
            cache_enabled: env_flag("ENABLE_PREDICT_CACHE", true),
            identifier: std::env::var("IDENTIFIER")
                .ok()
                .filter(|s| !s.is_empty())
                .unwrap_or_else(|| "default".to_string()),
            sample_offset: env_usize("SAMPLE_IDX", 0),
            default_inference_length: env_usize("INFERENCE_LENGTH", 1).max(1),
            max_error_steps: env_usize("PREDICT_MAX_ERROR_STEPS", 200),
        }
    }
}

impl Default for ServeConfig {
    fn default() -> Self {
        Self {
            max_concurrency: 1,
            wait_for_model: false,
            model_wait_timeout_secs: 120,
            prewarm: false,
            cache_enabled: true,
            identifier: "default".to_string(),
            sample_offset: 0,
            default_inference_length: 1,
            max_error_steps: 200,
        }
    }
}

fn env_flag(name: &str, default: bool) -> bool {
    match std::env::var(name) {
        Ok(raw) => matches!(raw.trim().to_ascii_lowercase().as_str(), "1" | "true" | "yes"),
        Err(_) => default,
    }
}

fn env_usize(name: &str, default: usize) -> usize {
    std::env::var(name)
        .ok()
        .and_then(|s| s.trim().parse().ok())
        .unwrap_or(default)
}

fn env_u64(name: &str, default: u64) -> u64 {
    std::env::var(name)
        .ok()
        .and_then(|s| s.trim().parse().ok())
        .unwrap_or(default)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn flag_parsing_accepts_truthy_spellings() {
        std::env::set_var("PRON_TEST_FLAG_A", "TRUE");
        assert!(env_flag("PRON_TEST_FLAG_A", false));
        std::env::set_var("PRON_TEST_FLAG_A", "0");
        assert!(!env_flag("PRON_TEST_FLAG_A", true));
        std::env::remove_var("PRON_TEST_FLAG_A");
        assert!(env_flag("PRON_TEST_FLAG_A", true));
    }

    #[test]
    fn invalid_numbers_fall_back_to_default() {
        std::env::set_var("PRON_TEST_NUM_A", "not-a-number");
        assert_eq!(env_usize("PRON_TEST_NUM_A", 7), 7);
        std::env::set_var("PRON_TEST_NUM_A", " 42 ");
        assert_eq!(env_usize("PRON_TEST_NUM_A", 7), 42);
        std::env::remove_var("PRON_TEST_NUM_A");
    }

    #[test]
    fn default_config_is_single_slot_no_wait() {
        let cfg = ServeConfig::default();
        assert_eq!(cfg.max_concurrency, 1);
        assert!(!cfg.wait_for_model);
        assert_eq!(cfg.identifier, "default");
        assert_eq!(cfg.default_inference_length, 1);
    }
}
