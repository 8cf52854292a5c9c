//! Infrastructure Layer - Adapters and external integrations.
//!
//! This layer contains the concrete implementations of the port interfaces
//! defined in the application layer.

/// SOCKS proxy circuit lifecycle (launch, probe, shutdown).
pub mod circuit;

/// Market host HTTP adapters (login, search, payload codec).
pub mod market;

/// Trade sink and stdout listener.
pub mod sink;

/// Configuration and dependency injection.
pub mod config;

/// Health check HTTP endpoint.
pub mod health;

/// Prometheus metrics instrumentation.
pub mod metrics;

/// OpenTelemetry tracing integration.
pub mod telemetry;
