//! Crawler Configuration Settings
//!
//! Configuration types for the crawler, loaded from environment variables.
//! Every component receives its slice of this struct at construction; there
//! is no global configuration state.

use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use crate::application::services::{PoolConfig, RetryConfig, SupervisorConfig};
use crate::domain::target::{Target, TargetError, TargetRegistry};

/// Default instruments polled when `CRAWLER_TARGETS` is unset.
pub const DEFAULT_TARGETS: &str = "C765371,C577245";

/// Default search window start.
pub const DEFAULT_START_DATE: &str = "05/29/2018";

/// Default search window end.
pub const DEFAULT_END_DATE: &str = "05/29/2019";

/// Default market data host.
pub const DEFAULT_MARKET_HOST: &str = "finra-markets.morningstar.com";

/// Default circuit readiness probe.
pub const DEFAULT_PROBE_URL: &str = "https://check.torproject.org";

// =============================================================================
// Settings Groups
// =============================================================================

/// Worker pool settings.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PoolSettings {
    /// Number of proxy-bound workers.
    pub workers: usize,
    /// SOCKS port of the first worker.
    pub base_port: u16,
}

impl Default for PoolSettings {
    fn default() -> Self {
        Self {
            workers: 1,
            base_port: 9050,
        }
    }
}

/// Login and polling settings.
#[derive(Debug, Clone, PartialEq)]
pub struct SessionSettings {
    /// Failed logins tolerated before a worker terminates.
    pub max_login_attempts: u32,
    /// Delay before the first login retry (0 = immediate).
    pub login_backoff_initial: Duration,
    /// Maximum login retry delay.
    pub login_backoff_max: Duration,
    /// Login retry delay multiplier.
    pub login_backoff_multiplier: f64,
    /// Consecutive fetch failures tolerated (0 = unlimited).
    pub max_fetch_failures: u32,
    /// Interval between fetches.
    pub poll_interval: Duration,
    /// Per-request HTTP timeout.
    pub request_timeout: Duration,
}

impl Default for SessionSettings {
    fn default() -> Self {
        Self {
            max_login_attempts: 5,
            login_backoff_initial: Duration::ZERO,
            login_backoff_max: Duration::from_secs(30),
            login_backoff_multiplier: 2.0,
            max_fetch_failures: 10,
            poll_interval: Duration::from_secs(10),
            request_timeout: Duration::from_secs(10),
        }
    }
}

/// Proxy circuit settings.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CircuitSettings {
    /// Proxy executable.
    pub binary: String,
    /// Root directory for per-port proxy data directories.
    pub data_dir: PathBuf,
    /// Time allowed for the circuit to become live after launch.
    pub timeout: Duration,
    /// Pause after launching before the first probe.
    pub setup_delay: Duration,
    /// URL fetched through the proxy to confirm the circuit.
    pub probe_url: String,
}

impl Default for CircuitSettings {
    fn default() -> Self {
        Self {
            binary: "tor".to_string(),
            data_dir: std::env::temp_dir().join("bond-trade-crawler"),
            timeout: Duration::from_secs(5),
            setup_delay: Duration::from_secs(5),
            probe_url: DEFAULT_PROBE_URL.to_string(),
        }
    }
}

/// Server port settings.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServerSettings {
    /// Health check HTTP port (0 = disabled).
    pub health_port: u16,
}

impl Default for ServerSettings {
    fn default() -> Self {
        Self { health_port: 8083 }
    }
}

// =============================================================================
// Crawler Config
// =============================================================================

/// Complete crawler configuration.
#[derive(Debug, Clone, PartialEq)]
pub struct CrawlerConfig {
    /// Verbose logging.
    pub debug: bool,
    /// Market data host (no scheme).
    pub market_host: String,
    /// Instruments and date windows to poll.
    pub targets: Vec<Target>,
    /// Worker pool settings.
    pub pool: PoolSettings,
    /// Login and polling settings.
    pub session: SessionSettings,
    /// Proxy circuit settings.
    pub circuit: CircuitSettings,
    /// Server port settings.
    pub server: ServerSettings,
}

impl CrawlerConfig {
    /// Create configuration from environment variables.
    ///
    /// # Errors
    ///
    /// Returns an error if a variable is set to an unparseable value, a
    /// target is malformed, or the worker count cannot be satisfied.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Create configuration from an arbitrary variable source.
    ///
    /// # Errors
    ///
    /// See [`CrawlerConfig::from_env`].
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let env = Env(lookup);

        let debug = env.bool("CRAWLER_DEBUG", false)?;

        let pool = PoolSettings {
            workers: env.parse("CRAWLER_WORKERS", PoolSettings::default().workers)?,
            base_port: env.parse("CRAWLER_PROXY_BASE_PORT", PoolSettings::default().base_port)?,
        };

        let defaults = SessionSettings::default();
        let session = SessionSettings {
            max_login_attempts: env
                .parse("CRAWLER_MAX_LOGIN_ATTEMPTS", defaults.max_login_attempts)?,
            login_backoff_initial: env.millis(
                "CRAWLER_LOGIN_BACKOFF_INITIAL_MS",
                defaults.login_backoff_initial,
            )?,
            login_backoff_max: env
                .secs("CRAWLER_LOGIN_BACKOFF_MAX_SECS", defaults.login_backoff_max)?,
            login_backoff_multiplier: env.parse(
                "CRAWLER_LOGIN_BACKOFF_MULTIPLIER",
                defaults.login_backoff_multiplier,
            )?,
            max_fetch_failures: env
                .parse("CRAWLER_MAX_FETCH_FAILURES", defaults.max_fetch_failures)?,
            poll_interval: env.secs("CRAWLER_POLL_INTERVAL_SECS", defaults.poll_interval)?,
            request_timeout: env.secs("CRAWLER_REQUEST_TIMEOUT_SECS", defaults.request_timeout)?,
        };

        let defaults = CircuitSettings::default();
        let circuit = CircuitSettings {
            binary: env.string("CRAWLER_PROXY_BINARY", &defaults.binary),
            data_dir: env
                .get("CRAWLER_PROXY_DATA_DIR")
                .map_or(defaults.data_dir, PathBuf::from),
            timeout: env.secs("CRAWLER_CIRCUIT_TIMEOUT_SECS", defaults.timeout)?,
            setup_delay: env.secs("CRAWLER_CIRCUIT_SETUP_DELAY_SECS", defaults.setup_delay)?,
            probe_url: env.string("CRAWLER_CIRCUIT_PROBE_URL", &defaults.probe_url),
        };

        let server = ServerSettings {
            health_port: env.parse("CRAWLER_HEALTH_PORT", ServerSettings::default().health_port)?,
        };

        let market_host = env.string("CRAWLER_MARKET_HOST", DEFAULT_MARKET_HOST);
        let start_date = env.string("CRAWLER_START_DATE", DEFAULT_START_DATE);
        let end_date = env.string("CRAWLER_END_DATE", DEFAULT_END_DATE);
        let targets = parse_targets(
            &env.string("CRAWLER_TARGETS", DEFAULT_TARGETS),
            &start_date,
            &end_date,
        )?;

        let config = Self {
            debug,
            market_host,
            targets,
            pool,
            session,
            circuit,
            server,
        };
        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> Result<(), ConfigError> {
        if self.pool.workers == 0 {
            return Err(ConfigError::InvalidValue {
                key: "CRAWLER_WORKERS".to_string(),
                value: "0".to_string(),
            });
        }
        if self.pool.workers > self.targets.len() {
            return Err(ConfigError::TooManyWorkers {
                workers: self.pool.workers,
                targets: self.targets.len(),
            });
        }
        let last_port = u16::try_from(self.pool.workers - 1)
            .ok()
            .and_then(|offset| self.pool.base_port.checked_add(offset));
        if last_port.is_none() {
            return Err(ConfigError::InvalidValue {
                key: "CRAWLER_PROXY_BASE_PORT".to_string(),
                value: self.pool.base_port.to_string(),
            });
        }
        if self.session.poll_interval.is_zero() {
            return Err(ConfigError::InvalidValue {
                key: "CRAWLER_POLL_INTERVAL_SECS".to_string(),
                value: "0".to_string(),
            });
        }
        Ok(())
    }

    /// Supervisor tuning derived from the session settings.
    #[must_use]
    pub fn supervisor_config(&self) -> SupervisorConfig {
        SupervisorConfig {
            poll_interval: self.session.poll_interval,
            max_login_attempts: self.session.max_login_attempts,
            max_fetch_failures: self.session.max_fetch_failures,
            login_retry: RetryConfig {
                initial_delay: self.session.login_backoff_initial,
                max_delay: self.session.login_backoff_max,
                multiplier: self.session.login_backoff_multiplier,
                ..RetryConfig::default()
            },
        }
    }

    /// Pool sizing.
    #[must_use]
    pub const fn pool_config(&self) -> PoolConfig {
        PoolConfig {
            workers: self.pool.workers,
            base_port: self.pool.base_port,
        }
    }

    /// Target registry over all configured targets.
    ///
    /// # Errors
    ///
    /// Returns `ConfigError::NoTargets` if the target list is empty.
    pub fn target_registry(&self) -> Result<TargetRegistry, ConfigError> {
        TargetRegistry::new(self.targets.clone()).map_err(|_| ConfigError::NoTargets)
    }
}

/// Configuration error.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ConfigError {
    /// Environment variable has a value that cannot be parsed.
    #[error("invalid value for {key}: {value:?}")]
    InvalidValue {
        /// Variable name.
        key: String,
        /// Offending value.
        value: String,
    },
    /// A target entry is malformed.
    #[error("invalid target {entry:?}: {reason}")]
    InvalidTarget {
        /// Offending entry.
        entry: String,
        /// Why it was rejected.
        reason: String,
    },
    /// No targets configured.
    #[error("no targets configured")]
    NoTargets,
    /// More workers than targets.
    #[error("{workers} workers requested but only {targets} targets configured")]
    TooManyWorkers {
        /// Requested workers.
        workers: usize,
        /// Available targets.
        targets: usize,
    },
}

/// Parse a `CRAWLER_TARGETS` list.
///
/// Entries are comma-separated, either `ID` (uses the default window) or
/// `ID:START:END`.
///
/// # Errors
///
/// Returns `ConfigError::InvalidTarget` for a malformed entry and
/// `ConfigError::NoTargets` if the list is empty.
pub fn parse_targets(
    raw: &str,
    default_start: &str,
    default_end: &str,
) -> Result<Vec<Target>, ConfigError> {
    let targets = raw
        .split(',')
        .map(str::trim)
        .filter(|entry| !entry.is_empty())
        .map(|entry| {
            let parts: Vec<&str> = entry.split(':').collect();
            let result = match parts.as_slice() {
                [id] => Target::new(*id, default_start, default_end),
                [id, start, end] => Target::new(*id, *start, *end),
                _ => {
                    return Err(ConfigError::InvalidTarget {
                        entry: entry.to_string(),
                        reason: "expected ID or ID:START:END".to_string(),
                    });
                }
            };
            result.map_err(|e: TargetError| ConfigError::InvalidTarget {
                entry: entry.to_string(),
                reason: e.to_string(),
            })
        })
        .collect::<Result<Vec<_>, _>>()?;

    if targets.is_empty() {
        return Err(ConfigError::NoTargets);
    }
    Ok(targets)
}

// =============================================================================
// Env helpers
// =============================================================================

struct Env<F>(F);

impl<F> Env<F>
where
    F: Fn(&str) -> Option<String>,
{
    fn get(&self, key: &str) -> Option<String> {
        (self.0)(key).filter(|v| !v.trim().is_empty())
    }

    fn string(&self, key: &str, default: &str) -> String {
        self.get(key)
            .map_or_else(|| default.to_string(), |v| v.trim().to_string())
    }

    fn parse<T: FromStr>(&self, key: &str, default: T) -> Result<T, ConfigError> {
        match self.get(key) {
            None => Ok(default),
            Some(v) => v.trim().parse().map_err(|_| ConfigError::InvalidValue {
                key: key.to_string(),
                value: v,
            }),
        }
    }

    fn bool(&self, key: &str, default: bool) -> Result<bool, ConfigError> {
        match self.get(key) {
            None => Ok(default),
            Some(v) => match v.trim().to_lowercase().as_str() {
                "1" | "true" | "yes" | "on" => Ok(true),
                "0" | "false" | "no" | "off" => Ok(false),
                _ => Err(ConfigError::InvalidValue {
                    key: key.to_string(),
                    value: v,
                }),
            },
        }
    }

    fn secs(&self, key: &str, default: Duration) -> Result<Duration, ConfigError> {
        self.get(key)
            .map_or(Ok(default), |_| self.parse(key, 0u64).map(Duration::from_secs))
    }

    fn millis(&self, key: &str, default: Duration) -> Result<Duration, ConfigError> {
        self.get(key)
            .map_or(Ok(default), |_| self.parse(key, 0u64).map(Duration::from_millis))
    }
}
