#![cfg_attr(
    test,
    allow(
        clippy::unwrap_used,
        clippy::expect_used,
        clippy::float_cmp,
        clippy::significant_drop_tightening,
        clippy::too_many_lines,
        clippy::match_same_arms,
        clippy::needless_pass_by_value,
        clippy::items_after_statements,
        clippy::or_fun_call
    )
)]

//! Bond Trade Crawler - Anonymized Trade Search Poller
//!
//! Polls a bond trade search endpoint for a fixed set of instruments. Each
//! worker owns one Tor SOCKS port, keeps a cookie-authenticated session
//! on it, and fetches one target per tick in round-robin order.
//!
//! # Layers (inside → outside)
//!
//! - **Domain**: Core crawler types and rules
//!   - `target`: Search targets and tick rotation
//!   - `trade`: Decoded trade records
//!   - `session`: Cookie-derived authentication state
//!   - `supervisor`: Supervisor states and legal transitions
//!
//! - **Application**: Use cases and port definitions
//!   - `ports`: Interfaces for the circuit, login, search and sink
//!   - `services`: Crawler supervisor, worker pool, login backoff
//!
//! - **Infrastructure**: Adapters and external integrations
//!   - `circuit`: Tor process launch and circuit probing
//!   - `market`: Login and search HTTP flows, payload codec
//!   - `sink`: Channel-backed trade sink and stdout listener
//!   - `config`: Configuration and dependency injection
//!   - `health`: Health check HTTP endpoint
//!
//! # Data Flow
//!
//! ```text
//!              ┌────────────┐   login    ┌────────────┐
//! Tor :9050 ◄──┤ Supervisor ├───────────►│ Market     │
//!              │  worker 0  │◄───────────┤ host       │
//!              └─────┬──────┘   trades   └────────────┘
//!                    │
//! Tor :9051 ◄── ...  ├──────► Trade channel ──► stdout listener
//!                    │
//! Tor :905N ◄── ...  ┘
//! ```

#![forbid(unsafe_code)]
#![warn(missing_docs)]
#![warn(clippy::pedantic)]

// =============================================================================
// Module Declarations
// =============================================================================

/// Domain layer - Core crawler types with no external dependencies.
pub mod domain;

/// Application layer - Use cases and port definitions.
pub mod application;

/// Infrastructure layer - Adapters and external integrations.
pub mod infrastructure;

// =============================================================================
// Re-exports
// =============================================================================

// Domain types
pub use domain::session::{AuthState, LoginAttemptCounter};
pub use domain::supervisor::{FatalReason, SupervisorState};
pub use domain::target::{Target, TargetError, TargetRegistry};
pub use domain::trade::{FetchOutcome, TradeRecord};

// Ports
pub use application::ports::{
    AuthError, CircuitError, CircuitPort, FetchError, SessionPort, SinkError, TradeFetchPort,
    TradeSink,
};

// Services
pub use application::services::{
    CrawlerSupervisor, PoolConfig, RetryConfig, SupervisorConfig, SupervisorError, WorkerPool,
    WorkerPorts, WorkerReport, WorkerSnapshot, WorkerStatus,
};

// Infrastructure config
pub use infrastructure::config::{
    CircuitSettings, ConfigError, CrawlerConfig, PoolSettings, ServerSettings, SessionSettings,
    WorkerFactory,
};

// Health server
pub use infrastructure::health::{HealthServer, HealthServerError, HealthServerState};

// Market adapters (for integration tests)
pub use infrastructure::market::{
    ClientConfig, MarketClient, MarketEndpoints, MarketFetcher, SessionAuthenticator,
};

// Sink
pub use infrastructure::sink::{ChannelSink, run_listener};

// Metrics
pub use infrastructure::metrics::init_metrics;

// Telemetry
pub use infrastructure::telemetry::{TelemetryConfig, TelemetryGuard, init as init_telemetry};
