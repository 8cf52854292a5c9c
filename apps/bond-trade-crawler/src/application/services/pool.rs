//! Worker Pool
//!
//! Runs one [`CrawlerSupervisor`] per proxy port. Targets are dealt
//! round-robin across workers, so each worker owns a disjoint rotation.
//! Every worker reports on a shared completion channel and the pool waits
//! for all of them; a fatal worker never stops its siblings.

use std::sync::Arc;

use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use super::supervisor::{CrawlerSupervisor, SupervisorConfig, SupervisorError, WorkerStatus};
use crate::application::ports::{CircuitPort, SessionPort, TradeFetchPort, TradeSink};
use crate::domain::target::{TargetError, TargetRegistry};

/// Pool sizing.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PoolConfig {
    /// Number of workers.
    pub workers: usize,
    /// SOCKS port of worker 0; worker `i` uses `base_port + i`.
    pub base_port: u16,
}

impl PoolConfig {
    /// Proxy port for a worker.
    #[must_use]
    pub fn port_for(&self, worker_id: usize) -> u16 {
        let offset = u16::try_from(worker_id).unwrap_or(u16::MAX);
        self.base_port.saturating_add(offset)
    }
}

/// Adapters bound to one worker's circuit.
#[derive(Clone)]
pub struct WorkerPorts {
    /// Circuit on this worker's port.
    pub circuit: Arc<dyn CircuitPort>,
    /// Login flow sharing this worker's cookie jar.
    pub session: Arc<dyn SessionPort>,
    /// Search flow sharing this worker's cookie jar.
    pub fetcher: Arc<dyn TradeFetchPort>,
}

/// Final outcome of one worker.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WorkerReport {
    /// Worker index.
    pub worker_id: usize,
    /// SOCKS port the worker used.
    pub proxy_port: u16,
    /// `Ok` when stopped by cancellation, otherwise the fatal error.
    pub outcome: Result<(), SupervisorError>,
}

/// Pool of proxy-bound supervisors.
pub struct WorkerPool {
    config: PoolConfig,
    supervisor: SupervisorConfig,
    partitions: Vec<TargetRegistry>,
    statuses: Vec<Arc<WorkerStatus>>,
    sink: Arc<dyn TradeSink>,
    cancel: CancellationToken,
}

impl WorkerPool {
    /// Create a pool, splitting `targets` across `config.workers`.
    ///
    /// # Errors
    ///
    /// Returns `TargetError::Empty` if there are fewer targets than workers.
    pub fn new(
        config: PoolConfig,
        supervisor: SupervisorConfig,
        targets: &TargetRegistry,
        sink: Arc<dyn TradeSink>,
        cancel: CancellationToken,
    ) -> Result<Self, TargetError> {
        let partitions = targets.partition(config.workers)?;
        let statuses = (0..config.workers)
            .map(|id| Arc::new(WorkerStatus::new(id, config.port_for(id))))
            .collect();

        Ok(Self {
            config,
            supervisor,
            partitions,
            statuses,
            sink,
            cancel,
        })
    }

    /// Status handles, one per worker, in worker order.
    #[must_use]
    pub fn statuses(&self) -> Vec<Arc<WorkerStatus>> {
        self.statuses.iter().map(Arc::clone).collect()
    }

    /// Run every worker to completion.
    ///
    /// `build` creates the adapters for a worker from its id and proxy port.
    /// All adapters are built before any worker starts. Reports are
    /// returned in worker order.
    ///
    /// # Errors
    ///
    /// Returns the first error from `build`; no worker is started then.
    pub async fn run<F, E>(self, mut build: F) -> Result<Vec<WorkerReport>, E>
    where
        F: FnMut(usize, u16) -> Result<WorkerPorts, E>,
    {
        let ports = self
            .statuses
            .iter()
            .map(|status| build(status.worker_id(), status.proxy_port()))
            .collect::<Result<Vec<_>, E>>()?;

        let (done_tx, mut done_rx) = mpsc::channel::<WorkerReport>(self.config.workers.max(1));

        for (worker_id, ((targets, status), ports)) in self
            .partitions
            .into_iter()
            .zip(self.statuses)
            .zip(ports)
            .enumerate()
        {
            let proxy_port = status.proxy_port();
            let supervisor = CrawlerSupervisor::new(
                self.supervisor.clone(),
                targets,
                ports.circuit,
                ports.session,
                ports.fetcher,
                Arc::clone(&self.sink),
                status,
                self.cancel.clone(),
            );

            tracing::info!(worker_id, proxy_port, "Starting worker");
            let done_tx = done_tx.clone();
            tokio::spawn(async move {
                let outcome = supervisor.run().await;
                let _ = done_tx
                    .send(WorkerReport {
                        worker_id,
                        proxy_port,
                        outcome,
                    })
                    .await;
            });
        }
        drop(done_tx);

        let mut reports = Vec::with_capacity(self.config.workers);
        while let Some(report) = done_rx.recv().await {
            match &report.outcome {
                Ok(()) => tracing::info!(worker_id = report.worker_id, "Worker stopped"),
                Err(e) => tracing::error!(
                    worker_id = report.worker_id,
                    proxy_port = report.proxy_port,
                    error = %e,
                    "Worker terminated"
                ),
            }
            reports.push(report);
        }
        reports.sort_by_key(|r| r.worker_id);
        Ok(reports)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ports_are_offset_from_base() {
        let config = PoolConfig {
            workers: 3,
            base_port: 9050,
        };
        assert_eq!(config.port_for(0), 9050);
        assert_eq!(config.port_for(2), 9052);
    }
}
