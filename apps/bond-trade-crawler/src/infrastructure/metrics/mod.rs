//! Prometheus Metrics Module
//!
//! Exposes crawler metrics via Prometheus format for monitoring.
//!
//! # Metrics Categories
//!
//! - **Circuit**: Readiness probe results
//! - **Session**: Login attempts by result
//! - **Fetch**: Search requests by outcome, trades emitted
//! - **Workers**: Supervisor terminations by reason
//! - **Latency**: Search round-trip time
//!
//! # Integration
//!
//! Metrics are exposed at `/metrics` on the health server port.

use std::sync::OnceLock;
use std::time::Duration;

use metrics::{counter, describe_counter, describe_histogram, histogram};
use metrics_exporter_prometheus::{BuildError, PrometheusBuilder, PrometheusHandle};

// =============================================================================
// Global Metrics Handle
// =============================================================================

static PROMETHEUS_HANDLE: OnceLock<PrometheusHandle> = OnceLock::new();

/// Initialize the Prometheus metrics recorder.
///
/// Repeated calls return the handle installed by the first call.
///
/// # Errors
///
/// Returns an error if another global recorder is already installed.
pub fn init_metrics() -> Result<PrometheusHandle, BuildError> {
    if let Some(handle) = PROMETHEUS_HANDLE.get() {
        return Ok(handle.clone());
    }

    let handle = PrometheusBuilder::new().install_recorder()?;
    register_metrics();
    Ok(PROMETHEUS_HANDLE.get_or_init(|| handle).clone())
}

/// Get the Prometheus handle for rendering metrics.
///
/// Returns `None` if metrics have not been initialized.
#[must_use]
pub fn get_metrics_handle() -> Option<PrometheusHandle> {
    PROMETHEUS_HANDLE.get().cloned()
}

// =============================================================================
// Metric Registration
// =============================================================================

fn register_metrics() {
    describe_counter!(
        "bond_crawler_circuit_checks_total",
        "Circuit readiness probes by result"
    );
    describe_counter!(
        "bond_crawler_login_attempts_total",
        "Login attempts by result"
    );
    describe_counter!(
        "bond_crawler_fetches_total",
        "Search requests by outcome"
    );
    describe_counter!(
        "bond_crawler_trades_emitted_total",
        "Trades forwarded to the sink"
    );
    describe_counter!(
        "bond_crawler_worker_terminations_total",
        "Workers terminated by reason"
    );
    describe_histogram!(
        "bond_crawler_fetch_seconds",
        "Search request round-trip time"
    );
}

// =============================================================================
// Metric Recording Functions
// =============================================================================

/// Metric labels for fetch outcomes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FetchResult {
    /// Trade block decoded.
    Trades,
    /// Session expired.
    Unauthenticated,
    /// Request or decode failure.
    Error,
}

impl FetchResult {
    const fn as_str(self) -> &'static str {
        match self {
            Self::Trades => "trades",
            Self::Unauthenticated => "unauthenticated",
            Self::Error => "error",
        }
    }
}

/// Record a circuit readiness probe.
pub fn record_circuit_check(live: bool) {
    counter!(
        "bond_crawler_circuit_checks_total",
        "result" => if live { "live" } else { "down" }
    )
    .increment(1);
}

/// Record a login attempt.
pub fn record_login_attempt(authenticated: bool) {
    counter!(
        "bond_crawler_login_attempts_total",
        "result" => if authenticated { "authenticated" } else { "incomplete" }
    )
    .increment(1);
}

/// Record a failed login request.
pub fn record_login_error() {
    counter!("bond_crawler_login_attempts_total", "result" => "error").increment(1);
}

/// Record a completed search request.
pub fn record_fetch(result: FetchResult, duration: Duration) {
    counter!(
        "bond_crawler_fetches_total",
        "outcome" => result.as_str()
    )
    .increment(1);
    histogram!("bond_crawler_fetch_seconds").record(duration.as_secs_f64());
}

/// Record trades forwarded to the sink.
pub fn record_trades_emitted(count: u64) {
    counter!("bond_crawler_trades_emitted_total").increment(count);
}

/// Record a worker termination.
pub fn record_termination(reason: &'static str) {
    counter!(
        "bond_crawler_worker_terminations_total",
        "reason" => reason
    )
    .increment(1);
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fetch_result_as_str() {
        assert_eq!(FetchResult::Trades.as_str(), "trades");
        assert_eq!(FetchResult::Unauthenticated.as_str(), "unauthenticated");
        assert_eq!(FetchResult::Error.as_str(), "error");
    }

    #[test]
    fn recording_without_recorder_is_noop() {
        record_circuit_check(true);
        record_login_attempt(false);
        record_fetch(FetchResult::Trades, Duration::from_millis(5));
        record_trades_emitted(3);
        record_termination("circuit_failed");
    }
}
