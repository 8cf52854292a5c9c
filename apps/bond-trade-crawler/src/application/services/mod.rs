//! Application Services
//!
//! Services that orchestrate domain logic and coordinate between ports.
//!
//! - `CrawlerSupervisor`: circuit → login → polling lifecycle for one proxy
//! - `WorkerPool`: runs one supervisor per proxy port and collects reports
//! - `RetryPolicy`: backoff between login attempts

/// Proxy-bound worker pool.
pub mod pool;

/// Login retry backoff.
pub mod retry;

/// Per-proxy crawler state machine.
pub mod supervisor;

pub use pool::{PoolConfig, WorkerPool, WorkerPorts, WorkerReport};
pub use retry::{RetryConfig, RetryPolicy};
pub use supervisor::{
    CrawlerSupervisor, SupervisorConfig, SupervisorError, WorkerSnapshot, WorkerStatus,
};
