//! Worker Wiring
//!
//! Builds the adapters for one worker: a proxied [`MarketClient`] whose
//! cookie jar is shared by the login and search flows, and the
//! [`ProxyCircuit`] on the worker's port.

use std::sync::Arc;
use std::time::Duration;

use thiserror::Error;

use super::settings::CrawlerConfig;
use crate::application::services::WorkerPorts;
use crate::infrastructure::circuit::{
    CircuitConfig, HttpCircuitProbe, ProxyCircuit, ProxyLauncher, TorLauncher,
};
use crate::infrastructure::market::{
    ClientConfig, ClientError, MarketClient, MarketFetcher, SessionAuthenticator,
};

/// Errors building a worker's adapters.
#[derive(Debug, Error)]
pub enum WiringError {
    /// Market client could not be built.
    #[error("worker {worker_id}: {source}")]
    Client {
        /// Worker index.
        worker_id: usize,
        /// Underlying error.
        #[source]
        source: ClientError,
    },

    /// Circuit probe client could not be built.
    #[error("worker {worker_id}: circuit probe: {source}")]
    Probe {
        /// Worker index.
        worker_id: usize,
        /// Underlying error.
        #[source]
        source: reqwest::Error,
    },
}

/// Builds [`WorkerPorts`] from the crawler configuration.
///
/// Circuits are kept so the caller can stop their proxies on shutdown.
pub struct WorkerFactory {
    market_host: String,
    request_timeout: Duration,
    circuit: CircuitConfig,
    probe_url: String,
    launcher: Arc<dyn ProxyLauncher>,
    circuits: Vec<Arc<ProxyCircuit>>,
}

impl WorkerFactory {
    /// Create a factory launching the configured proxy binary.
    #[must_use]
    pub fn new(config: &CrawlerConfig) -> Self {
        let launcher = TorLauncher::new(
            config.circuit.binary.clone(),
            config.circuit.data_dir.clone(),
        );
        Self::with_launcher(config, Arc::new(launcher))
    }

    /// Create a factory with a custom launcher.
    #[must_use]
    pub fn with_launcher(config: &CrawlerConfig, launcher: Arc<dyn ProxyLauncher>) -> Self {
        let mut circuit = CircuitConfig::new(config.pool.base_port);
        circuit.timeout = config.circuit.timeout;
        circuit.setup_delay = config.circuit.setup_delay;

        Self {
            market_host: config.market_host.clone(),
            request_timeout: config.session.request_timeout,
            circuit,
            probe_url: config.circuit.probe_url.clone(),
            launcher,
            circuits: Vec::new(),
        }
    }

    /// Build the adapters for `worker_id` on `proxy_port`.
    ///
    /// # Errors
    ///
    /// Returns `WiringError` if an HTTP client cannot be built.
    pub fn build(&mut self, worker_id: usize, proxy_port: u16) -> Result<WorkerPorts, WiringError> {
        let client = MarketClient::new(&ClientConfig {
            host: self.market_host.clone(),
            proxy_port: Some(proxy_port),
            timeout: self.request_timeout,
        })
        .map_err(|source| WiringError::Client { worker_id, source })?;

        let probe = HttpCircuitProbe::new(proxy_port, self.probe_url.clone(), self.request_timeout)
            .map_err(|source| WiringError::Probe { worker_id, source })?;

        let circuit = Arc::new(ProxyCircuit::new(
            CircuitConfig {
                port: proxy_port,
                ..self.circuit
            },
            Arc::clone(&self.launcher),
            Arc::new(probe),
        ));
        self.circuits.push(Arc::clone(&circuit));

        tracing::debug!(worker_id, proxy_port, user_agent = client.user_agent(), "Worker wired");

        Ok(WorkerPorts {
            circuit,
            session: Arc::new(SessionAuthenticator::new(client.clone())),
            fetcher: Arc::new(MarketFetcher::new(client)),
        })
    }

    /// Stop every proxy launched by the built circuits.
    pub async fn shutdown(&self) {
        for circuit in &self.circuits {
            circuit.shutdown().await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::application::ports::CircuitError;
    use crate::infrastructure::circuit::{CircuitStatus, ProxyProcess};

    struct NoLaunch;

    #[async_trait::async_trait]
    impl ProxyLauncher for NoLaunch {
        async fn launch(&self, _port: u16) -> Result<ProxyProcess, CircuitError> {
            Ok(ProxyProcess::external())
        }
    }

    fn config() -> CrawlerConfig {
        CrawlerConfig::from_lookup(|_| None).unwrap()
    }

    #[test]
    fn builds_one_circuit_per_worker() {
        let mut factory = WorkerFactory::with_launcher(&config(), Arc::new(NoLaunch));
        assert!(factory.build(0, 9050).is_ok());
        assert!(factory.build(1, 9051).is_ok());

        assert_eq!(factory.circuits.len(), 2);
        assert!(
            factory
                .circuits
                .iter()
                .all(|c| c.status() == CircuitStatus::Unchecked)
        );
    }

    #[test]
    fn invalid_host_is_reported_with_worker() {
        let mut config = config();
        config.market_host = "bad host".to_string();
        let mut factory = WorkerFactory::with_launcher(&config, Arc::new(NoLaunch));

        let err = factory.build(3, 9053).err().unwrap();
        assert!(matches!(err, WiringError::Client { worker_id: 3, .. }));
    }
}
