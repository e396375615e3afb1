//! Tracing initialisation for hosts embedding the world model.
//!
//! The engines only emit `tracing` events; installing a subscriber is the
//! host's job.  [`init_tracing`] does that once at startup, optionally with
//! an OTLP/HTTP span exporter.
//!
//! | Variable | Effect |
//! |---|---|
//! | `RUST_LOG` | Log filter (default `"info"`). |
//! | `COGWORLD_LOG_FORMAT=json` | Newline-delimited JSON logs. |
//! | `OTEL_EXPORTER_OTLP_ENDPOINT` | Collector base URL; enables span export. |
//!
//! ```rust,no_run
//! use cogworld_runtime::telemetry::{TelemetryConfig, init_tracing};
//!
//! let _guard = init_tracing(&TelemetryConfig::from_env());
//! ```

use opentelemetry::trace::TracerProvider as _;
use opentelemetry_otlp::WithExportConfig;
use opentelemetry_sdk::{Resource, trace::SdkTracerProvider};
use serde::{Deserialize, Serialize};
use tracing_subscriber::{EnvFilter, layer::SubscriberExt, util::SubscriberInitExt};

// ─────────────────────────────────────────────────────────────────────────────
// Configuration
// ─────────────────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TelemetryConfig {
    /// `service.name` resource attribute on exported spans.
    pub service_name: String,
    /// Fallback filter directive when `RUST_LOG` is unset.
    pub log_filter: String,
    pub json_logs: bool,
    /// OTLP/HTTP collector base URL, e.g. `http://localhost:4318`.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub otlp_endpoint: Option<String>,
}

impl Default for TelemetryConfig {
    fn default() -> Self {
        Self {
            service_name: "cogworld".to_string(),
            log_filter: "info".to_string(),
            json_logs: false,
            otlp_endpoint: None,
        }
    }
}

impl TelemetryConfig {
    /// Defaults overridden by the process environment.
    pub fn from_env() -> Self {
        let mut config = Self::default();
        config.apply_env_overrides();
        config
    }

    pub fn apply_env_overrides(&mut self) {
        if let Ok(filter) = std::env::var("RUST_LOG") {
            self.log_filter = filter;
        }
        if let Ok(format) = std::env::var("COGWORLD_LOG_FORMAT") {
            self.json_logs = format.eq_ignore_ascii_case("json");
        }
        if let Ok(endpoint) = std::env::var("OTEL_EXPORTER_OTLP_ENDPOINT")
            && !endpoint.is_empty()
        {
            self.otlp_endpoint = Some(endpoint);
        }
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Public API
// ─────────────────────────────────────────────────────────────────────────────

/// Install the global `tracing` subscriber.
///
/// With an `otlp_endpoint` every span is also forwarded to the collector;
/// without one, or when the exporter cannot be built, only the console
/// formatter is installed.
///
/// Hold the returned guard for the lifetime of the process; dropping it
/// flushes pending spans.
pub fn init_tracing(config: &TelemetryConfig) -> TracerProviderGuard {
    let env_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&config.log_filter));
    let provider = build_provider(config);

    if let Some(ref p) = provider {
        let otel_layer = tracing_opentelemetry::layer().with_tracer(p.tracer("cogworld"));
        if config.json_logs {
            tracing_subscriber::registry()
                .with(env_filter)
                .with(otel_layer)
                .with(tracing_subscriber::fmt::layer().json())
                .init();
        } else {
            tracing_subscriber::registry()
                .with(env_filter)
                .with(otel_layer)
                .with(tracing_subscriber::fmt::layer().compact())
                .init();
        }
    } else if config.json_logs {
        tracing_subscriber::registry()
            .with(env_filter)
            .with(tracing_subscriber::fmt::layer().json())
            .init();
    } else {
        tracing_subscriber::registry()
            .with(env_filter)
            .with(tracing_subscriber::fmt::layer().compact())
            .init();
    }

    TracerProviderGuard(provider)
}

/// Shuts the OTel provider down on drop.
pub struct TracerProviderGuard(Option<SdkTracerProvider>);

impl TracerProviderGuard {
    /// `true` when spans are being exported.
    pub fn is_exporting(&self) -> bool {
        self.0.is_some()
    }
}

impl Drop for TracerProviderGuard {
    fn drop(&mut self) {
        if let Some(provider) = self.0.take()
            && let Err(e) = provider.shutdown()
        {
            eprintln!("[cogworld] OpenTelemetry provider shutdown error: {e}");
        }
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Internal helpers
// ─────────────────────────────────────────────────────────────────────────────

fn build_provider(config: &TelemetryConfig) -> Option<SdkTracerProvider> {
    let endpoint = config.otlp_endpoint.clone()?;

    let exporter = opentelemetry_otlp::SpanExporter::builder()
        .with_http()
        .with_endpoint(endpoint)
        .build()
        .map_err(|e| eprintln!("[cogworld] OTLP exporter init failed: {e}"))
        .ok()?;

    let resource = Resource::builder()
        .with_service_name(config.service_name.clone())
        .build();

    // The simple exporter needs no async runtime; the engines are synchronous.
    Some(
        SdkTracerProvider::builder()
            .with_resource(resource)
            .with_simple_exporter(exporter)
            .build(),
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn no_provider_without_endpoint() {
        let config = TelemetryConfig::default();
        assert!(build_provider(&config).is_none());
    }

    #[test]
    fn empty_guard_drops_cleanly() {
        let guard = TracerProviderGuard(None);
        assert!(!guard.is_exporting());
        drop(guard);
    }

    #[test]
    fn log_format_override_selects_json() {
        let _env = crate::env_lock();
        // SAFETY: every test in this crate that touches the environment holds
        // `env_lock`, so no other thread reads or writes it concurrently.
        unsafe { std::env::set_var("COGWORLD_LOG_FORMAT", "JSON") };
        let mut config = TelemetryConfig::default();
        config.apply_env_overrides();
        unsafe { std::env::remove_var("COGWORLD_LOG_FORMAT") };
        assert!(config.json_logs);
    }

    #[test]
    fn telemetry_section_round_trips_through_toml() {
        let config = TelemetryConfig {
            otlp_endpoint: Some("http://collector:4318".into()),
            ..TelemetryConfig::default()
        };
        let raw = toml::to_string(&config).unwrap();
        let back: TelemetryConfig = toml::from_str(&raw).unwrap();
        assert_eq!(back, config);

        let partial: TelemetryConfig = toml::from_str("json_logs = true").unwrap();
        assert!(partial.json_logs);
        assert_eq!(partial.service_name, "cogworld");
        assert!(partial.otlp_endpoint.is_none());
    }
}
