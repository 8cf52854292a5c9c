//! Configuration Module
//!
//! Configuration loading and dependency injection for the crawler.

mod settings;
mod wiring;

pub use settings::{
    CircuitSettings, ConfigError, CrawlerConfig, DEFAULT_END_DATE, DEFAULT_MARKET_HOST,
    DEFAULT_PROBE_URL, DEFAULT_START_DATE, DEFAULT_TARGETS, PoolSettings, ServerSettings,
    SessionSettings, parse_targets,
};
pub use wiring::{WiringError, WorkerFactory};
