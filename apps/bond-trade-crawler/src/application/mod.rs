//! Application Layer - Use cases and port definitions.
//!
//! This layer contains the crawler state machine, the worker pool and the
//! port interfaces they drive.

/// Port interfaces for the circuit, session, fetch pipeline and sink.
pub mod ports;

/// Crawler supervisor and worker pool.
pub mod services;
