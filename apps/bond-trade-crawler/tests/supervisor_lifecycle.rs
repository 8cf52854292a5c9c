//! Supervisor Lifecycle Integration Tests
//!
//! Drives supervisors and the worker pool through the public API with
//! scripted adapters and a paused clock.

#![allow(clippy::unwrap_used, clippy::expect_used)]

use std::collections::VecDeque;
use std::str::FromStr;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use rust_decimal::Decimal;
use tokio_util::sync::CancellationToken;

use bond_trade_crawler::{
    AuthError, AuthState, CircuitError, CircuitPort, CrawlerSupervisor, FatalReason, FetchError,
    FetchOutcome, PoolConfig, SessionPort, SinkError, SupervisorConfig, SupervisorError,
    SupervisorState, Target, TargetRegistry, TradeFetchPort, TradeRecord, TradeSink, WorkerPool,
    WorkerPorts, WorkerStatus,
};

// =============================================================================
// Scripted adapters
// =============================================================================

struct StubCircuit {
    result: Result<(), CircuitError>,
    calls: AtomicUsize,
}

impl StubCircuit {
    fn live() -> Arc<Self> {
        Arc::new(Self {
            result: Ok(()),
            calls: AtomicUsize::new(0),
        })
    }

    fn timing_out() -> Arc<Self> {
        Arc::new(Self {
            result: Err(CircuitError::Timeout(Duration::from_secs(5))),
            calls: AtomicUsize::new(0),
        })
    }
}

#[async_trait]
impl CircuitPort for StubCircuit {
    async fn ensure_live(&self) -> Result<(), CircuitError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.result.clone()
    }
}

/// Replays scripted login results, then authenticates forever.
struct ScriptedSession {
    script: Mutex<VecDeque<AuthState>>,
    calls: AtomicUsize,
}

impl ScriptedSession {
    fn new(script: Vec<AuthState>) -> Arc<Self> {
        Arc::new(Self {
            script: Mutex::new(script.into()),
            calls: AtomicUsize::new(0),
        })
    }
}

#[async_trait]
impl SessionPort for ScriptedSession {
    async fn attempt_login(&self) -> Result<AuthState, AuthError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Ok(self
            .script
            .lock()
            .pop_front()
            .unwrap_or(AuthState::AUTHENTICATED))
    }
}

/// Returns one trade per fetch, except on the listed (1-based) calls,
/// which answer unauthenticated.
struct RecordingFetcher {
    seen: Mutex<Vec<String>>,
    expired_on: Vec<usize>,
}

impl RecordingFetcher {
    fn new(expired_on: Vec<usize>) -> Arc<Self> {
        Arc::new(Self {
            seen: Mutex::new(Vec::new()),
            expired_on,
        })
    }

    fn seen(&self) -> Vec<String> {
        self.seen.lock().clone()
    }
}

#[async_trait]
impl TradeFetchPort for RecordingFetcher {
    async fn fetch(&self, target: &Target) -> Result<FetchOutcome, FetchError> {
        let call = {
            let mut seen = self.seen.lock();
            seen.push(target.instrument_id().to_string());
            seen.len()
        };
        if self.expired_on.contains(&call) {
            return Ok(FetchOutcome::Unauthenticated);
        }
        Ok(FetchOutcome::Trades(vec![trade(target.instrument_id())]))
    }
}

#[derive(Default)]
struct CollectingSink {
    trades: Mutex<Vec<TradeRecord>>,
}

#[async_trait]
impl TradeSink for CollectingSink {
    async fn publish(&self, trades: Vec<TradeRecord>) -> Result<(), SinkError> {
        self.trades.lock().extend(trades);
        Ok(())
    }
}

// =============================================================================
// Helpers
// =============================================================================

fn trade(id: &str) -> TradeRecord {
    TradeRecord {
        quantity: "100".to_string(),
        instrument_id: id.to_string(),
        price: Decimal::from_str("101.5").unwrap(),
        trade_date: "05/29/2019".to_string(),
        execution_time: "10:00:00".to_string(),
    }
}

fn registry(ids: &[&str]) -> TargetRegistry {
    TargetRegistry::new(
        ids.iter()
            .map(|id| Target::new(*id, "05/29/2018", "05/29/2019").unwrap())
            .collect(),
    )
    .unwrap()
}

struct Harness {
    circuit: Arc<StubCircuit>,
    session: Arc<ScriptedSession>,
    fetcher: Arc<RecordingFetcher>,
    sink: Arc<CollectingSink>,
    cancel: CancellationToken,
}

impl Harness {
    fn new(
        circuit: Arc<StubCircuit>,
        session: Arc<ScriptedSession>,
        fetcher: Arc<RecordingFetcher>,
    ) -> Self {
        Self {
            circuit,
            session,
            fetcher,
            sink: Arc::new(CollectingSink::default()),
            cancel: CancellationToken::new(),
        }
    }

    fn supervisor(&self, targets: &[&str]) -> (CrawlerSupervisor, Arc<WorkerStatus>) {
        let status = Arc::new(WorkerStatus::new(0, 9050));
        let supervisor = CrawlerSupervisor::new(
            SupervisorConfig::default(),
            registry(targets),
            self.circuit.clone(),
            self.session.clone(),
            self.fetcher.clone(),
            self.sink.clone(),
            Arc::clone(&status),
            self.cancel.clone(),
        );
        (supervisor, status)
    }
}

// =============================================================================
// Supervisor
// =============================================================================

#[tokio::test(start_paused = true)]
async fn polls_targets_round_robin() {
    let harness = Harness::new(
        StubCircuit::live(),
        ScriptedSession::new(Vec::new()),
        RecordingFetcher::new(Vec::new()),
    );
    let (supervisor, status) = harness.supervisor(&["A", "B", "C"]);
    let handle = tokio::spawn(supervisor.run());

    tokio::time::sleep(Duration::from_secs(75)).await;
    harness.cancel.cancel();

    assert_eq!(handle.await.unwrap(), Ok(()));
    assert_eq!(
        harness.fetcher.seen(),
        vec!["A", "B", "C", "A", "B", "C", "A"]
    );
    assert_eq!(harness.sink.trades.lock().len(), 7);
    assert_eq!(status.fetches(), 7);
    assert_eq!(status.trades_emitted(), 7);
    assert_eq!(status.state(), SupervisorState::Stopped);
}

#[tokio::test(start_paused = true)]
async fn circuit_timeout_never_logs_in() {
    let harness = Harness::new(
        StubCircuit::timing_out(),
        ScriptedSession::new(Vec::new()),
        RecordingFetcher::new(Vec::new()),
    );
    let (supervisor, status) = harness.supervisor(&["A"]);

    let result = supervisor.run().await;

    assert_eq!(
        result,
        Err(SupervisorError::Circuit(CircuitError::Timeout(
            Duration::from_secs(5)
        )))
    );
    assert_eq!(harness.circuit.calls.load(Ordering::SeqCst), 1);
    assert_eq!(harness.session.calls.load(Ordering::SeqCst), 0);
    assert!(harness.fetcher.seen().is_empty());
    assert_eq!(
        status.state(),
        SupervisorState::Terminated(FatalReason::CircuitFailed)
    );
    assert!(status.last_error().is_some());
}

#[tokio::test(start_paused = true)]
async fn incomplete_logins_are_retried() {
    let harness = Harness::new(
        StubCircuit::live(),
        ScriptedSession::new(vec![AuthState::EMPTY, AuthState::EDGE_ID]),
        RecordingFetcher::new(Vec::new()),
    );
    let (supervisor, status) = harness.supervisor(&["A"]);
    let handle = tokio::spawn(supervisor.run());

    tokio::time::sleep(Duration::from_secs(15)).await;
    harness.cancel.cancel();

    assert_eq!(handle.await.unwrap(), Ok(()));
    assert_eq!(harness.session.calls.load(Ordering::SeqCst), 3);
    assert_eq!(status.login_attempts(), 3);
    assert_eq!(harness.fetcher.seen(), vec!["A"]);
}

#[tokio::test(start_paused = true)]
async fn expired_session_triggers_login_and_rotation_continues() {
    let harness = Harness::new(
        StubCircuit::live(),
        ScriptedSession::new(Vec::new()),
        RecordingFetcher::new(vec![2]),
    );
    let (supervisor, _status) = harness.supervisor(&["A", "B", "C"]);
    let handle = tokio::spawn(supervisor.run());

    tokio::time::sleep(Duration::from_secs(35)).await;
    harness.cancel.cancel();

    assert_eq!(handle.await.unwrap(), Ok(()));
    assert_eq!(harness.session.calls.load(Ordering::SeqCst), 2);
    assert_eq!(harness.fetcher.seen(), vec!["A", "B", "C"]);

    let emitted: Vec<String> = harness
        .sink
        .trades
        .lock()
        .iter()
        .map(|t| t.instrument_id.clone())
        .collect();
    assert_eq!(emitted, vec!["A", "C"]);
}

// =============================================================================
// Pool
// =============================================================================

#[tokio::test(start_paused = true)]
async fn pool_reports_each_worker_independently() {
    let cancel = CancellationToken::new();
    let sink = Arc::new(CollectingSink::default());
    let pool = WorkerPool::new(
        PoolConfig {
            workers: 2,
            base_port: 9050,
        },
        SupervisorConfig::default(),
        &registry(&["A", "B", "C", "D"]),
        sink.clone(),
        cancel.clone(),
    )
    .unwrap();
    let statuses = pool.statuses();

    let healthy_fetcher = RecordingFetcher::new(Vec::new());
    let fetcher = healthy_fetcher.clone();
    let run = tokio::spawn(async move {
        pool.run(move |worker_id, proxy_port| {
            assert_eq!(proxy_port, 9050 + u16::try_from(worker_id).unwrap());
            let circuit = if worker_id == 0 {
                StubCircuit::timing_out()
            } else {
                StubCircuit::live()
            };
            Ok::<_, std::convert::Infallible>(WorkerPorts {
                circuit,
                session: ScriptedSession::new(Vec::new()),
                fetcher: fetcher.clone(),
            })
        })
        .await
    });

    tokio::time::sleep(Duration::from_secs(25)).await;
    cancel.cancel();

    let reports = run.await.unwrap().unwrap();
    assert_eq!(reports.len(), 2);
    assert_eq!(reports[0].worker_id, 0);
    assert_eq!(reports[0].proxy_port, 9050);
    assert!(matches!(
        reports[0].outcome,
        Err(SupervisorError::Circuit(_))
    ));
    assert_eq!(reports[1].outcome, Ok(()));

    // Worker 1 owns targets B and D.
    assert_eq!(healthy_fetcher.seen(), vec!["B", "D"]);
    assert_eq!(
        statuses[0].state(),
        SupervisorState::Terminated(FatalReason::CircuitFailed)
    );
    assert_eq!(statuses[1].state(), SupervisorState::Stopped);
}

#[test]
fn pool_rejects_more_workers_than_targets() {
    let result = WorkerPool::new(
        PoolConfig {
            workers: 3,
            base_port: 9050,
        },
        SupervisorConfig::default(),
        &registry(&["A", "B"]),
        Arc::new(CollectingSink::default()),
        CancellationToken::new(),
    );
    assert!(result.is_err());
}
