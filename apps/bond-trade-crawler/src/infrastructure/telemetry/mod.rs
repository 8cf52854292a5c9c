//! Logging and Trace Export
//!
//! One `tracing` subscriber for the whole process. Log lines always go to
//! the fmt layer; spans are also shipped over OTLP when `OTEL_ENABLED=true`
//! and the exporter can be built.
//!
//! # Environment Variables
//!
//! - `OTEL_ENABLED`: "true" turns on OTLP export (default: false)
//! - `OTEL_EXPORTER_OTLP_ENDPOINT`: Collector address (default: http://localhost:4317)
//! - `OTEL_SERVICE_NAME`: Reported service name (default: bond-trade-crawler)
//! - `RUST_LOG`: Extra filter directives
//!
//! # Usage
//!
//! ```ignore
//! use bond_trade_crawler::infrastructure::telemetry;
//!
//! let _guard = telemetry::init(config.debug);
//! ```

use opentelemetry::trace::TracerProvider as _;
use opentelemetry_otlp::{SpanExporter, WithExportConfig};
use opentelemetry_sdk::Resource;
use opentelemetry_sdk::trace::SdkTracerProvider;
use tracing_subscriber::EnvFilter;
use tracing_subscriber::filter::Directive;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;

const DEFAULT_SERVICE_NAME: &str = "bond-trade-crawler";

const DEFAULT_OTLP_ENDPOINT: &str = "http://localhost:4317";

/// HTTP stack targets that only log at warn or above.
const QUIET_TARGETS: [&str; 2] = ["reqwest=warn", "hyper=warn"];

/// Flushes and stops the span exporter on drop.
pub struct TelemetryGuard {
    provider: Option<SdkTracerProvider>,
}

impl TelemetryGuard {
    /// Whether spans are being exported.
    #[must_use]
    pub const fn is_exporting(&self) -> bool {
        self.provider.is_some()
    }
}

impl Drop for TelemetryGuard {
    fn drop(&mut self) {
        let Some(provider) = self.provider.take() else {
            return;
        };
        if let Err(e) = provider.shutdown() {
            eprintln!("Trace exporter did not shut down cleanly: {e}");
        }
    }
}

/// Subscriber settings.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TelemetryConfig {
    /// Export spans over OTLP.
    pub enabled: bool,
    /// Collector endpoint.
    pub otlp_endpoint: String,
    /// Reported service name.
    pub service_name: String,
    /// Log the crawler at debug instead of info.
    pub debug: bool,
}

impl Default for TelemetryConfig {
    fn default() -> Self {
        Self::from_lookup(false, |_| None)
    }
}

impl TelemetryConfig {
    /// Read settings from the process environment.
    #[must_use]
    pub fn from_env(debug: bool) -> Self {
        Self::from_lookup(debug, |key| std::env::var(key).ok())
    }

    /// Read settings through `lookup`.
    #[must_use]
    pub fn from_lookup<F>(debug: bool, lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        Self {
            enabled: lookup("OTEL_ENABLED").is_some_and(|v| v.eq_ignore_ascii_case("true")),
            otlp_endpoint: lookup("OTEL_EXPORTER_OTLP_ENDPOINT")
                .unwrap_or_else(|| DEFAULT_OTLP_ENDPOINT.to_string()),
            service_name: lookup("OTEL_SERVICE_NAME")
                .unwrap_or_else(|| DEFAULT_SERVICE_NAME.to_string()),
            debug,
        }
    }

    /// Level directive for this crate.
    #[must_use]
    pub const fn crate_directive(&self) -> &'static str {
        if self.debug {
            "bond_trade_crawler=debug"
        } else {
            "bond_trade_crawler=info"
        }
    }

    fn env_filter(&self) -> EnvFilter {
        std::iter::once(self.crate_directive())
            .chain(QUIET_TARGETS)
            .filter_map(|directive| directive.parse::<Directive>().ok())
            .fold(EnvFilter::from_default_env(), EnvFilter::add_directive)
    }

    fn tracer_provider(&self) -> Option<SdkTracerProvider> {
        if !self.enabled {
            return None;
        }

        let exporter = SpanExporter::builder()
            .with_tonic()
            .with_endpoint(&self.otlp_endpoint)
            .build()
            .map_err(|e| eprintln!("OTLP export disabled, {}: {e}", self.otlp_endpoint))
            .ok()?;

        Some(
            SdkTracerProvider::builder()
                .with_batch_exporter(exporter)
                .with_resource(
                    Resource::builder()
                        .with_service_name(self.service_name.clone())
                        .build(),
                )
                .build(),
        )
    }
}

/// Install the subscriber using environment settings.
///
/// Hold the returned guard until shutdown.
#[must_use]
pub fn init(debug: bool) -> TelemetryGuard {
    init_with_config(&TelemetryConfig::from_env(debug))
}

/// Install the subscriber using `config`.
#[must_use]
pub fn init_with_config(config: &TelemetryConfig) -> TelemetryGuard {
    let provider = config.tracer_provider();
    let otel_layer = provider.as_ref().map(|provider| {
        tracing_opentelemetry::layer().with_tracer(provider.tracer(config.service_name.clone()))
    });

    let fmt_layer = tracing_subscriber::fmt::layer()
        .with_target(true)
        .with_thread_ids(false)
        .with_file(false)
        .with_line_number(false);

    tracing_subscriber::registry()
        .with(config.env_filter())
        .with(fmt_layer)
        .with(otel_layer)
        .init();

    TelemetryGuard { provider }
}
