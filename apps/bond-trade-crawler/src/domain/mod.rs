//! Domain Layer - Core crawler types and state rules.
//!
//! This layer contains the crawler's data model with no I/O. Everything
//! here is plain Rust with serialization support where records leave
//! the process.

/// Search targets and round-robin rotation.
pub mod target;

/// Decoded trade records.
pub mod trade;

/// Cookie-derived authentication state and login attempt counting.
pub mod session;

/// Supervisor state machine states and transitions.
pub mod supervisor;
