//! Proxy Circuit
//!
//! Brings up the anonymizing SOCKS proxy for one worker and waits until
//! traffic through it reaches the outside world.
//!
//! # Sequence
//!
//! 1. Probe once; an already running proxy on the port is reused.
//! 2. Otherwise launch the proxy process and give it `setup_delay` to build
//!    a circuit.
//! 3. Probe repeatedly until one succeeds or `timeout` expires.
//!
//! The launched process is owned by the circuit and killed when the circuit
//! is shut down or dropped.

use std::path::PathBuf;
use std::process::Stdio;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde::Serialize;
use tokio::process::{Child, Command};

use crate::application::ports::{CircuitError, CircuitPort};
use crate::infrastructure::metrics;

// =============================================================================
// Status
// =============================================================================

/// Circuit lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum CircuitStatus {
    /// Not checked yet.
    #[default]
    Unchecked,
    /// Launch or probing in progress.
    Establishing,
    /// Probe succeeded.
    Live,
    /// Launch failed or timed out.
    Failed,
}

// =============================================================================
// Launcher
// =============================================================================

/// Handle to a launched proxy process.
#[derive(Debug)]
pub struct ProxyProcess {
    child: Option<Child>,
}

impl ProxyProcess {
    /// Wrap a spawned child process.
    #[must_use]
    pub const fn from_child(child: Child) -> Self {
        Self { child: Some(child) }
    }

    /// A proxy whose lifetime is managed elsewhere.
    #[must_use]
    pub const fn external() -> Self {
        Self { child: None }
    }

    /// OS process id, if the process is owned and still running.
    #[must_use]
    pub fn id(&self) -> Option<u32> {
        self.child.as_ref().and_then(Child::id)
    }

    async fn kill(&mut self) {
        let Some(child) = self.child.as_mut() else {
            return;
        };
        if let Err(e) = child.kill().await {
            tracing::warn!(error = %e, "Failed to kill proxy process");
        }
    }
}

/// Starts a proxy process listening on a SOCKS port.
#[async_trait]
pub trait ProxyLauncher: Send + Sync {
    /// Spawn the proxy for `port`.
    ///
    /// # Errors
    ///
    /// Returns `CircuitError::LaunchFailed` if the process cannot be spawned.
    async fn launch(&self, port: u16) -> Result<ProxyProcess, CircuitError>;
}

/// Launches `tor` with a per-port data directory.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TorLauncher {
    binary: String,
    data_dir: PathBuf,
}

impl TorLauncher {
    /// Create a launcher.
    #[must_use]
    pub fn new(binary: impl Into<String>, data_dir: impl Into<PathBuf>) -> Self {
        Self {
            binary: binary.into(),
            data_dir: data_dir.into(),
        }
    }

    /// Data directory used for `port`.
    #[must_use]
    pub fn data_dir_for(&self, port: u16) -> PathBuf {
        self.data_dir.join(format!("tor-{port}"))
    }
}

#[async_trait]
impl ProxyLauncher for TorLauncher {
    async fn launch(&self, port: u16) -> Result<ProxyProcess, CircuitError> {
        let data_dir = self.data_dir_for(port);
        tokio::fs::create_dir_all(&data_dir).await.map_err(|e| {
            CircuitError::LaunchFailed(format!("{}: {e}", data_dir.display()))
        })?;

        let child = Command::new(&self.binary)
            .arg("--SocksPort")
            .arg(port.to_string())
            .arg("--DataDirectory")
            .arg(&data_dir)
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| CircuitError::LaunchFailed(format!("{}: {e}", self.binary)))?;

        tracing::info!(port, pid = ?child.id(), binary = %self.binary, "Launched proxy");
        Ok(ProxyProcess::from_child(child))
    }
}

// =============================================================================
// Probe
// =============================================================================

/// Checks whether the circuit carries traffic.
#[async_trait]
pub trait CircuitProbe: Send + Sync {
    /// One probe. `Err` carries a human-readable reason.
    async fn probe(&self) -> Result<(), String>;
}

/// Fetches a check URL through the proxy.
#[derive(Debug, Clone)]
pub struct HttpCircuitProbe {
    client: reqwest::Client,
    url: String,
}

impl HttpCircuitProbe {
    /// Create a probe routed through the SOCKS proxy on `port`.
    ///
    /// # Errors
    ///
    /// Returns an error if reqwest rejects the proxy configuration.
    pub fn new(port: u16, url: impl Into<String>, timeout: Duration) -> Result<Self, reqwest::Error> {
        let client = reqwest::Client::builder()
            .proxy(reqwest::Proxy::all(format!("socks5h://127.0.0.1:{port}"))?)
            .timeout(timeout)
            .build()?;
        Ok(Self::with_client(client, url))
    }

    /// Create a probe using an existing client.
    #[must_use]
    pub fn with_client(client: reqwest::Client, url: impl Into<String>) -> Self {
        Self {
            client,
            url: url.into(),
        }
    }
}

#[async_trait]
impl CircuitProbe for HttpCircuitProbe {
    async fn probe(&self) -> Result<(), String> {
        let response = self
            .client
            .get(&self.url)
            .send()
            .await
            .map_err(|e| e.to_string())?;
        let status = response.status();
        if status.is_success() {
            Ok(())
        } else {
            Err(format!("probe returned {status}"))
        }
    }
}

// =============================================================================
// Circuit
// =============================================================================

/// Circuit timing.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CircuitConfig {
    /// SOCKS port.
    pub port: u16,
    /// Time allowed for probing after setup.
    pub timeout: Duration,
    /// Pause between launch and the first probe.
    pub setup_delay: Duration,
    /// Pause between failed probes.
    pub probe_interval: Duration,
}

impl CircuitConfig {
    /// Defaults for `port`.
    #[must_use]
    pub const fn new(port: u16) -> Self {
        Self {
            port,
            timeout: Duration::from_secs(5),
            setup_delay: Duration::from_secs(5),
            probe_interval: Duration::from_millis(500),
        }
    }
}

/// Proxy circuit for one worker.
pub struct ProxyCircuit {
    config: CircuitConfig,
    launcher: Arc<dyn ProxyLauncher>,
    probe: Arc<dyn CircuitProbe>,
    status: parking_lot::RwLock<CircuitStatus>,
    process: tokio::sync::Mutex<Option<ProxyProcess>>,
}

impl ProxyCircuit {
    /// Create a circuit.
    #[must_use]
    pub fn new(
        config: CircuitConfig,
        launcher: Arc<dyn ProxyLauncher>,
        probe: Arc<dyn CircuitProbe>,
    ) -> Self {
        Self {
            config,
            launcher,
            probe,
            status: parking_lot::RwLock::new(CircuitStatus::Unchecked),
            process: tokio::sync::Mutex::new(None),
        }
    }

    /// Current status.
    #[must_use]
    pub fn status(&self) -> CircuitStatus {
        *self.status.read()
    }

    fn set_status(&self, status: CircuitStatus) {
        *self.status.write() = status;
    }

    /// Bring the circuit up, launching the proxy if needed.
    ///
    /// # Errors
    ///
    /// Returns `CircuitError::LaunchFailed` if the proxy cannot be spawned
    /// and `CircuitError::Timeout` if no probe succeeds within `timeout`.
    pub async fn establish(
        &self,
        timeout: Duration,
        setup_delay: Duration,
    ) -> Result<(), CircuitError> {
        if self.status() == CircuitStatus::Live {
            return Ok(());
        }
        self.set_status(CircuitStatus::Establishing);
        let port = self.config.port;

        match self.probe.probe().await {
            Ok(()) => {
                metrics::record_circuit_check(true);
                tracing::info!(port, "Existing proxy circuit found");
                self.set_status(CircuitStatus::Live);
                return Ok(());
            }
            Err(reason) => {
                metrics::record_circuit_check(false);
                tracing::debug!(port, %reason, "No existing circuit, launching proxy");
            }
        }

        let process = match self.launcher.launch(port).await {
            Ok(process) => process,
            Err(e) => {
                self.set_status(CircuitStatus::Failed);
                return Err(e);
            }
        };
        *self.process.lock().await = Some(process);

        tokio::time::sleep(setup_delay).await;

        let poll = async {
            loop {
                match self.probe.probe().await {
                    Ok(()) => {
                        metrics::record_circuit_check(true);
                        return;
                    }
                    Err(reason) => {
                        metrics::record_circuit_check(false);
                        tracing::debug!(port, %reason, "Circuit not ready");
                        tokio::time::sleep(self.config.probe_interval).await;
                    }
                }
            }
        };

        tokio::select! {
            () = poll => {
                tracing::info!(port, "Proxy circuit live");
                self.set_status(CircuitStatus::Live);
                Ok(())
            }
            () = tokio::time::sleep(timeout) => {
                tracing::error!(port, timeout_secs = timeout.as_secs(), "Proxy circuit timed out");
                self.set_status(CircuitStatus::Failed);
                Err(CircuitError::Timeout(timeout))
            }
        }
    }

    /// Kill the launched proxy process, if any.
    pub async fn shutdown(&self) {
        if let Some(mut process) = self.process.lock().await.take() {
            tracing::info!(port = self.config.port, pid = ?process.id(), "Stopping proxy");
            process.kill().await;
        }
    }
}

#[async_trait]
impl CircuitPort for ProxyCircuit {
    async fn ensure_live(&self) -> Result<(), CircuitError> {
        self.establish(self.config.timeout, self.config.setup_delay)
            .await
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};

    use super::*;

    /// Fails the first `failures` probes, then succeeds.
    struct CountingProbe {
        calls: AtomicUsize,
        failures: usize,
    }

    impl CountingProbe {
        fn new(failures: usize) -> Self {
            Self {
                calls: AtomicUsize::new(0),
                failures,
            }
        }
    }

    #[async_trait]
    impl CircuitProbe for CountingProbe {
        async fn probe(&self) -> Result<(), String> {
            let n = self.calls.fetch_add(1, Ordering::SeqCst);
            if n < self.failures {
                Err("connection refused".to_string())
            } else {
                Ok(())
            }
        }
    }

    #[derive(Default)]
    struct FakeLauncher {
        launches: AtomicUsize,
    }

    #[async_trait]
    impl ProxyLauncher for FakeLauncher {
        async fn launch(&self, _port: u16) -> Result<ProxyProcess, CircuitError> {
            self.launches.fetch_add(1, Ordering::SeqCst);
            Ok(ProxyProcess::external())
        }
    }

    fn circuit(
        probe: Arc<CountingProbe>,
        launcher: Arc<dyn ProxyLauncher>,
    ) -> ProxyCircuit {
        ProxyCircuit::new(CircuitConfig::new(9050), launcher, probe)
    }

    #[tokio::test(start_paused = true)]
    async fn existing_circuit_is_reused() {
        let probe = Arc::new(CountingProbe::new(0));
        let launcher = Arc::new(FakeLauncher::default());
        let circuit = circuit(probe.clone(), launcher.clone());

        circuit.ensure_live().await.unwrap();
        assert_eq!(circuit.status(), CircuitStatus::Live);
        assert_eq!(launcher.launches.load(Ordering::SeqCst), 0);
        assert_eq!(probe.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn launched_circuit_goes_live() {
        let probe = Arc::new(CountingProbe::new(3));
        let launcher = Arc::new(FakeLauncher::default());
        let circuit = circuit(probe.clone(), launcher.clone());

        circuit.ensure_live().await.unwrap();
        assert_eq!(circuit.status(), CircuitStatus::Live);
        assert_eq!(launcher.launches.load(Ordering::SeqCst), 1);
        assert_eq!(probe.calls.load(Ordering::SeqCst), 4);
    }

    #[tokio::test(start_paused = true)]
    async fn probe_that_never_succeeds_times_out() {
        let probe = Arc::new(CountingProbe::new(usize::MAX));
        let launcher = Arc::new(FakeLauncher::default());
        let circuit = circuit(probe, launcher);

        let err = circuit
            .establish(Duration::from_secs(2), Duration::from_secs(1))
            .await
            .unwrap_err();
        assert_eq!(err, CircuitError::Timeout(Duration::from_secs(2)));
        assert_eq!(circuit.status(), CircuitStatus::Failed);
    }

    #[tokio::test]
    async fn missing_binary_fails_to_launch() {
        let dir = tempfile::tempdir().unwrap();
        let launcher = Arc::new(TorLauncher::new(
            dir.path().join("no-such-proxy").display().to_string(),
            dir.path(),
        ));
        let circuit = circuit(Arc::new(CountingProbe::new(usize::MAX)), launcher);

        let err = circuit.ensure_live().await.unwrap_err();
        assert!(matches!(err, CircuitError::LaunchFailed(_)));
        assert_eq!(circuit.status(), CircuitStatus::Failed);
    }

    #[tokio::test]
    async fn launch_prepares_data_dir_before_spawning() {
        let dir = tempfile::tempdir().unwrap();
        let launcher = TorLauncher::new(
            dir.path().join("no-such-proxy").display().to_string(),
            dir.path().join("state"),
        );

        let err = launcher.launch(9052).await.unwrap_err();
        assert!(matches!(err, CircuitError::LaunchFailed(_)));
        assert!(launcher.data_dir_for(9052).is_dir());
    }

    #[test]
    fn data_dir_is_per_port() {
        let launcher = TorLauncher::new("tor", "/var/lib/crawler");
        assert_eq!(
            launcher.data_dir_for(9051),
            PathBuf::from("/var/lib/crawler/tor-9051")
        );
    }
}
