//! # Pronosticar
//!
//! Synchronous time-series forecast serving.
//!
//! Pronosticar (Spanish: "to forecast") serves trained forecasting models
//! behind a single admission-controlled predict endpoint. It does not
//! train; it installs promoted model snapshots, validates inbound
//! time-series payloads, runs windowed or full-horizon forecasts, and
//! logs every result to an append-only sink.
//!
//! ## Architecture
//!
//! - [`frame::TimeFrame`] - immutable time-indexed numeric tables
//! - [`prepare::RequestPreparer`] - payload validation and normalization
//! - [`gate::ConcurrencyGate`] - bounded-slot admission control
//! - [`model::ModelSlot`] - hot-swappable model snapshot holder
//! - [`executor::InferenceExecutor`] - windowed, seasonal, and
//!   multi-horizon forecast strategies
//! - [`sink::ResultSink`] - deduplicated JSONL result publication
//! - [`api`] - the axum HTTP surface
//!
//! ## Example
//!
//! ```rust,ignore
//! use pronosticar::api::{create_router, AppState};
//!
//! let app = create_router(state);
//! axum::serve(listener, app).await?;
//! ```

#![deny(missing_docs)]
#![deny(clippy::all)]
#![warn(clippy::pedantic)]
// Clippy allows (MUST come after deny/warn to override them)
#![allow(clippy::module_name_repetitions)]
#![allow(clippy::must_use_candidate)]
#![allow(clippy::missing_panics_doc)]
#![allow(clippy::float_cmp)] // Allow float comparisons in tests
#![allow(clippy::doc_markdown)]

pub mod api;
pub mod config;
pub mod error;
pub mod executor;
pub mod frame;
pub mod gate;
pub mod loader;
pub mod metrics;
pub mod model;
pub mod prepare;
pub mod sink;

/// Library version from Cargo.toml
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
