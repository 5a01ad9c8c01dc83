//! Pronosticar CLI - forecast serving endpoint
//!
//! # Commands
//!
//! - `serve` - Start the forecast serving endpoint
//! - `info` - Show version and configuration info

use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;

use clap::{Parser, Subcommand};
use pronosticar::{
    api::{create_router, AppState},
    config::ServeConfig,
    error::{PronosticarError, Result},
    executor::InferenceExecutor,
    frame::TimeFrame,
    gate::ConcurrencyGate,
    loader::{LoadSelection, ModelLoader, ModelWatcher},
    metrics::QueueMetrics,
    model::{ModelClass, ModelSlot, ModelState, PredictError, Predictor, PredictorInput},
    sink::{FileLogSink, ResultSink, SinkPolicy},
};

/// Pronosticar - time-series forecast serving
#[derive(Parser)]
#[command(name = "pronosticar")]
#[command(version, about, long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Start the forecast serving endpoint
    ///
    /// Runtime behavior (concurrency, startup waits, caching) is
    /// configured through environment variables; see `info`.
    Serve {
        /// Host to bind to
        #[arg(short = 'H', long, default_value = "127.0.0.1")]
        host: String,

        /// Port to bind to
        #[arg(short, long, default_value = "8080")]
        port: u16,

        /// Serve a built-in persistence model over synthetic data
        #[arg(long)]
        demo: bool,

        /// Directory for JSONL result logs
        #[arg(long, default_value = "./results")]
        results_dir: PathBuf,
    },
    /// Show version and configuration info
    Info,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "pronosticar=info,tower_http=info".into()),
        )
        .init();

    let cli = Cli::parse();
    match cli.command {
        Commands::Serve {
            host,
            port,
            demo,
            results_dir,
        } => {
            if !demo {
                eprintln!("Error: only --demo serving is available in this build");
                eprintln!();
                eprintln!("Usage:");
                eprintln!("  pronosticar serve --demo           # Built-in persistence model");
                eprintln!();
                eprintln!("Registry-backed model loading is wired in at deployment time");
                eprintln!("through the ModelLoader trait.");
                std::process::exit(1);
            }
            serve(&host, port, results_dir).await?;
        }
        Commands::Info => {
            println!("Pronosticar v{}", pronosticar::VERSION);
            println!("Time-series forecast serving endpoint");
            println!();
            println!("Environment:");
            println!("  PREDICT_MAX_CONCURRENCY - gate capacity (default: CPU count)");
            println!("  WAIT_FOR_MODEL          - block readiness on a model (default: true)");
            println!("  MODEL_WAIT_TIMEOUT      - startup wait seconds (default: 120)");
            println!("  ENABLE_PREWARM          - one-shot inference after load (default: false)");
            println!("  ENABLE_PREDICT_CACHE    - replay last response (default: true)");
            println!("  IDENTIFIER              - deployment identifier (default: default)");
            println!("  SAMPLE_IDX              - forecast start offset (default: 0)");
            println!("  INFERENCE_LENGTH        - default horizon (default: 1)");
        }
    }

    Ok(())
}

async fn serve(host: &str, port: u16, results_dir: PathBuf) -> Result<()> {
    let config = Arc::new(ServeConfig::from_env());
    let metrics = Arc::new(QueueMetrics::new());
    let slot = Arc::new(ModelSlot::new());
    let gate = Arc::new(ConcurrencyGate::new(
        config.max_concurrency,
        Arc::clone(&metrics),
    ));
    let executor = Arc::new(InferenceExecutor::new(&config));
    let sink = Arc::new(ResultSink::new(
        Box::new(FileLogSink::new(results_dir)),
        SinkPolicy::default(),
        config.identifier.clone(),
    ));
    let watcher = Arc::new(ModelWatcher::new(Arc::clone(&slot), Arc::new(DemoLoader)));

    {
        let watcher = Arc::clone(&watcher);
        let config = Arc::clone(&config);
        let executor = Arc::clone(&executor);
        tokio::spawn(async move {
            let outcome = watcher.run_startup(&config, &executor).await;
            tracing::info!(?outcome, "startup sequence finished");
        });
    }

    let state = AppState::new(
        Arc::clone(&config),
        slot,
        gate,
        metrics,
        executor,
        sink,
        watcher,
    );
    let app = create_router(state);

    let addr: SocketAddr = format!("{host}:{port}")
        .parse()
        .map_err(|e| PronosticarError::Execution(format!("invalid address: {e}")))?;

    println!("Pronosticar listening on http://{addr}");
    println!();
    println!("Endpoints:");
    println!("  POST /predict       - Run a forecast");
    println!("  GET  /healthz       - Liveness check");
    println!("  GET  /ready         - Readiness check");
    println!("  GET  /metrics       - JSON metrics");
    println!("  GET  /prometheus    - Prometheus metrics");
    println!("  POST /reload_latest - Reload the newest model");
    println!();

    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .map_err(|e| PronosticarError::Execution(format!("failed to bind: {e}")))?;

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .map_err(|e| PronosticarError::Execution(format!("server error: {e}")))?;

    Ok(())
}

async fn shutdown_signal() {
    if tokio::signal::ctrl_c().await.is_ok() {
        tracing::info!("shutdown signal received");
    }
}

/// Persistence forecaster: predicts the last observed target value.
struct Persistence;

impl Predictor for Persistence {
    fn predict(
        &self,
        input: &PredictorInput<'_>,
    ) -> std::result::Result<Vec<Vec<f64>>, PredictError> {
        match input {
            PredictorInput::Batched3d { window } => {
                let last = window
                    .last()
                    .ok_or_else(|| PredictError("empty window".to_string()))?;
                Ok(vec![vec![last[0]]])
            }
            _ => Err(PredictError("persistence model takes a window".to_string())),
        }
    }
}

/// Loader for demo mode: always returns the built-in persistence model
/// over a synthetic daily sine wave.
struct DemoLoader;

impl ModelLoader for DemoLoader {
    fn load(&self, _selection: LoadSelection) -> Result<Option<ModelState>> {
        let start = chrono::NaiveDate::from_ymd_opt(2024, 1, 1)
            .and_then(|d| d.and_hms_opt(0, 0, 0))
            .ok_or_else(|| PronosticarError::Load("invalid demo epoch".to_string()))?;
        let rows = 48usize;
        #[allow(clippy::cast_precision_loss)]
        let frame = TimeFrame::new(
            (0..rows)
                .map(|i| start + chrono::Duration::minutes(30 * i as i64))
                .collect(),
            vec!["value".to_string()],
            (0..rows)
                .map(|i| {
                    let phase = i as f64 * std::f64::consts::TAU / 48.0;
                    vec![50.0 + 10.0 * phase.sin()]
                })
                .collect(),
        )
        .map_err(|e| PronosticarError::Load(e.to_string()))?;

        Ok(Some(ModelState {
            predictor: Arc::new(Persistence),
            scaler: None,
            model_class: ModelClass::Sequence,
            input_window_len: 12,
            output_window_len: 1,
            config_fingerprint: None,
            run_id: "demo".to_string(),
            model_type: "PERSISTENCE".to_string(),
            reference_frame: Some(Arc::new(frame.with_time_features())),
            resample: None,
        }))
    }
}
