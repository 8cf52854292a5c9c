//! Port Interfaces
//!
//! Defines the interfaces (ports) the supervisor drives, following the
//! Hexagonal Architecture pattern. Infrastructure adapters implement them;
//! tests substitute stubs.
//!
//! ## Driven Ports (Outbound)
//!
//! - `CircuitPort`: bring the anonymizing circuit up
//! - `SessionPort`: perform one login attempt
//! - `TradeFetchPort`: run one search for a target
//! - `TradeSink`: deliver decoded trades downstream

use std::time::Duration;

use async_trait::async_trait;

use crate::domain::session::AuthState;
use crate::domain::target::Target;
use crate::domain::trade::{FetchOutcome, TradeRecord};

// =============================================================================
// Errors
// =============================================================================

/// Circuit establishment failures.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum CircuitError {
    /// The proxy process could not be spawned.
    #[error("failed to launch proxy process: {0}")]
    LaunchFailed(String),

    /// No probe succeeded before the deadline.
    #[error("circuit not live after {0:?}")]
    Timeout(Duration),
}

/// Login failures.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum AuthError {
    /// The login request itself failed.
    #[error("login request failed: {0}")]
    RequestFailed(String),

    /// Too many failed attempts.
    #[error("max login attempts exceeded ({attempts} attempts, max {max})")]
    MaxAttemptsExceeded {
        /// Attempts made.
        attempts: u32,
        /// Configured ceiling.
        max: u32,
    },
}

/// Fetch pipeline failures.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum FetchError {
    /// HTTP request failed (transport, timeout, status).
    #[error("search request failed: {0}")]
    RequestFailed(String),

    /// Compressed body could not be decoded.
    #[error("failed to decode response body: {0}")]
    DecodeError(String),

    /// Body was not the expected JSON shape.
    #[error("malformed search payload: {0}")]
    MalformedPayload(String),

    /// Request could not be built; configuration defect, never retried.
    #[error("invalid search request: {0}")]
    InvalidRequest(String),
}

impl FetchError {
    /// Whether the error is a configuration defect rather than a transient fault.
    #[must_use]
    pub const fn is_fatal(&self) -> bool {
        matches!(self, Self::InvalidRequest(_))
    }
}

/// Sink delivery failures.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum SinkError {
    /// Downstream consumer is gone.
    #[error("trade sink closed")]
    Closed,
}

// =============================================================================
// Ports
// =============================================================================

/// Anonymizing circuit lifecycle.
#[async_trait]
pub trait CircuitPort: Send + Sync {
    /// Return once traffic can be trusted to the circuit.
    async fn ensure_live(&self) -> Result<(), CircuitError>;
}

/// One login attempt against the target host.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait SessionPort: Send + Sync {
    /// Perform a login request and report which session cookies are present.
    async fn attempt_login(&self) -> Result<AuthState, AuthError>;
}

/// One search request for a target.
#[async_trait]
pub trait TradeFetchPort: Send + Sync {
    /// Fetch and decode trades for `target`.
    async fn fetch(&self, target: &Target) -> Result<FetchOutcome, FetchError>;
}

/// Downstream consumer of trades.
#[async_trait]
pub trait TradeSink: Send + Sync {
    /// Deliver trades in arrival order.
    async fn publish(&self, trades: Vec<TradeRecord>) -> Result<(), SinkError>;
}
