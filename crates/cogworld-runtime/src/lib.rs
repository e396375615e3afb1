//! `cogworld-runtime` – per-device world models for a reasoning layer.
//!
//! Wires the perception engines and the uncertainty reasoner into one
//! aggregator per device and renders what it knows for downstream
//! consumers.
//!
//! # Modules
//!
//! - [`world_model`] – [`CognitiveWorldModel`]: routes observations through
//!   tracking, temporal coherence, change detection, belief fusion and
//!   cadence learning; produces [`WorldSnapshot`]s and a textual cognitive
//!   analysis meant to be embedded verbatim into a prompt.
//! - [`registry`] – [`WorldModelRegistry`]: explicit device id → model map
//!   owned by the host.
//! - [`config`] – [`WorldModelConfig`]: every engine's tuning in one TOML
//!   file, with `COGWORLD_*` environment overrides.
//! - [`telemetry`] – [`init_tracing`][telemetry::init_tracing]: installs the
//!   `tracing` subscriber, optionally exporting spans over OTLP/HTTP.  Set
//!   `OTEL_EXPORTER_OTLP_ENDPOINT` to ship them to Jaeger, Grafana Tempo or
//!   any OTLP-compatible collector.

pub mod config;
pub mod registry;
pub mod telemetry;
pub mod world_model;

pub use config::WorldModelConfig;
pub use registry::WorldModelRegistry;
pub use telemetry::{TelemetryConfig, TracerProviderGuard, init_tracing};
pub use world_model::{
    CognitiveWorldModel, EntitySnapshot, ObservationOutcome, TickReport, WorldSnapshot,
    world_snapshot_schema,
};

/// Serializes unit tests that read or write process environment variables.
#[cfg(test)]
pub(crate) fn env_lock() -> std::sync::MutexGuard<'static, ()> {
    static LOCK: std::sync::Mutex<()> = std::sync::Mutex::new(());
    LOCK.lock().unwrap_or_else(std::sync::PoisonError::into_inner)
}
