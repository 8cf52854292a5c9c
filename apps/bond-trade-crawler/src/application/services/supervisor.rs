//! Crawler Supervisor
//!
//! Drives one proxy-bound worker through its lifecycle:
//!
//! 1. Bring the circuit up (once).
//! 2. Log in until all session cookies are present, up to the ceiling.
//! 3. Poll one target per tick, round-robin, forwarding trades to the sink.
//! 4. Drop back to login whenever the search endpoint answers unauthenticated.
//!
//! A single event loop owns all mutable session state. Login and fetch
//! attempts run on spawned tasks and report back over an mpsc channel, so
//! a slow request never blocks the timer or another report.

use std::sync::Arc;
use std::sync::atomic::{AtomicU32, AtomicU64, Ordering};
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::sync::mpsc;
use tokio::time::{Instant, Interval, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::Instrument;
use uuid::Uuid;

use super::retry::{RetryConfig, RetryPolicy};
use crate::application::ports::{
    AuthError, CircuitError, CircuitPort, FetchError, SessionPort, TradeFetchPort, TradeSink,
};
use crate::domain::session::{AuthState, LoginAttemptCounter};
use crate::domain::supervisor::{FatalReason, SupervisorState};
use crate::domain::target::{Target, TargetRegistry};
use crate::domain::trade::FetchOutcome;

// =============================================================================
// Error Type
// =============================================================================

/// Fatal supervisor failures. Any of these terminates the worker.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum SupervisorError {
    /// Circuit never became live.
    #[error("circuit failed: {0}")]
    Circuit(#[from] CircuitError),

    /// Login ceiling exceeded.
    #[error("authentication failed: {0}")]
    Auth(#[from] AuthError),

    /// A search request could not be built.
    #[error("{0}")]
    InvalidRequest(FetchError),

    /// Too many consecutive fetch failures.
    #[error("fetch failed {failures} times in a row (max {max})")]
    FetchFailuresExceeded {
        /// Consecutive failures observed.
        failures: u32,
        /// Configured ceiling.
        max: u32,
    },
}

impl SupervisorError {
    /// Terminal reason recorded in the worker status.
    #[must_use]
    pub const fn reason(&self) -> FatalReason {
        match self {
            Self::Circuit(_) => FatalReason::CircuitFailed,
            Self::Auth(_) => FatalReason::LoginAttemptsExceeded,
            Self::InvalidRequest(_) => FatalReason::InvalidRequest,
            Self::FetchFailuresExceeded { .. } => FatalReason::FetchFailuresExceeded,
        }
    }
}

// =============================================================================
// Configuration
// =============================================================================

/// Supervisor tuning.
#[derive(Debug, Clone, PartialEq)]
pub struct SupervisorConfig {
    /// Interval between fetches once polling.
    pub poll_interval: Duration,
    /// Failed logins tolerated before giving up.
    pub max_login_attempts: u32,
    /// Consecutive fetch failures tolerated (0 = unlimited).
    pub max_fetch_failures: u32,
    /// Backoff between login attempts.
    pub login_retry: RetryConfig,
}

impl Default for SupervisorConfig {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_secs(10),
            max_login_attempts: 5,
            max_fetch_failures: 10,
            login_retry: RetryConfig::default(),
        }
    }
}

// =============================================================================
// Worker Status
// =============================================================================

/// Shared, observable state of one worker.
///
/// Written only by the owning supervisor; read by the health server.
#[derive(Debug)]
pub struct WorkerStatus {
    worker_id: usize,
    proxy_port: u16,
    session_id: parking_lot::RwLock<Option<Uuid>>,
    state: parking_lot::RwLock<SupervisorState>,
    last_error: parking_lot::RwLock<Option<String>>,
    last_fetch_at: parking_lot::RwLock<Option<DateTime<Utc>>>,
    login_attempts: AtomicU32,
    fetches: AtomicU64,
    fetch_failures: AtomicU64,
    trades_emitted: AtomicU64,
}

impl WorkerStatus {
    /// Create status for a worker that has not started.
    #[must_use]
    pub fn new(worker_id: usize, proxy_port: u16) -> Self {
        Self {
            worker_id,
            proxy_port,
            session_id: parking_lot::RwLock::new(None),
            state: parking_lot::RwLock::new(SupervisorState::Init),
            last_error: parking_lot::RwLock::new(None),
            last_fetch_at: parking_lot::RwLock::new(None),
            login_attempts: AtomicU32::new(0),
            fetches: AtomicU64::new(0),
            fetch_failures: AtomicU64::new(0),
            trades_emitted: AtomicU64::new(0),
        }
    }

    /// Apply a state transition if it is legal. Returns whether it was applied.
    pub fn transition(&self, next: SupervisorState) -> bool {
        let mut state = self.state.write();
        if !state.can_transition_to(next) {
            return false;
        }
        *state = next;
        true
    }

    /// Current state.
    #[must_use]
    pub fn state(&self) -> SupervisorState {
        *self.state.read()
    }

    /// Worker index.
    #[must_use]
    pub const fn worker_id(&self) -> usize {
        self.worker_id
    }

    /// SOCKS port of the worker's circuit.
    #[must_use]
    pub const fn proxy_port(&self) -> u16 {
        self.proxy_port
    }

    /// Total login attempts made.
    #[must_use]
    pub fn login_attempts(&self) -> u32 {
        self.login_attempts.load(Ordering::Relaxed)
    }

    /// Total fetches completed (success or failure).
    #[must_use]
    pub fn fetches(&self) -> u64 {
        self.fetches.load(Ordering::Relaxed)
    }

    /// Total trades forwarded to the sink.
    #[must_use]
    pub fn trades_emitted(&self) -> u64 {
        self.trades_emitted.load(Ordering::Relaxed)
    }

    /// Last recorded error.
    #[must_use]
    pub fn last_error(&self) -> Option<String> {
        self.last_error.read().clone()
    }

    fn set_session_id(&self, id: Uuid) {
        *self.session_id.write() = Some(id);
    }

    fn set_error(&self, message: String) {
        *self.last_error.write() = Some(message);
    }

    fn record_login_attempt(&self) {
        self.login_attempts.fetch_add(1, Ordering::Relaxed);
    }

    fn record_fetch(&self, failed: bool) {
        self.fetches.fetch_add(1, Ordering::Relaxed);
        if failed {
            self.fetch_failures.fetch_add(1, Ordering::Relaxed);
        } else {
            *self.last_fetch_at.write() = Some(Utc::now());
        }
    }

    fn record_trades(&self, count: usize) {
        self.trades_emitted
            .fetch_add(u64::try_from(count).unwrap_or(u64::MAX), Ordering::Relaxed);
    }

    /// Point-in-time copy for reporting.
    #[must_use]
    pub fn snapshot(&self) -> WorkerSnapshot {
        WorkerSnapshot {
            worker_id: self.worker_id,
            proxy_port: self.proxy_port,
            session_id: *self.session_id.read(),
            state: self.state(),
            last_error: self.last_error(),
            last_fetch_at: *self.last_fetch_at.read(),
            login_attempts: self.login_attempts(),
            fetches: self.fetches(),
            fetch_failures: self.fetch_failures.load(Ordering::Relaxed),
            trades_emitted: self.trades_emitted(),
        }
    }
}

/// Serializable view of a [`WorkerStatus`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct WorkerSnapshot {
    /// Worker index.
    pub worker_id: usize,
    /// SOCKS port.
    pub proxy_port: u16,
    /// Session id of the current run.
    pub session_id: Option<Uuid>,
    /// Lifecycle state.
    pub state: SupervisorState,
    /// Last error message.
    pub last_error: Option<String>,
    /// Time of the last successful fetch.
    pub last_fetch_at: Option<DateTime<Utc>>,
    /// Login attempts made.
    pub login_attempts: u32,
    /// Fetches completed.
    pub fetches: u64,
    /// Fetches that failed.
    pub fetch_failures: u64,
    /// Trades forwarded.
    pub trades_emitted: u64,
}

// =============================================================================
// Events
// =============================================================================

#[derive(Debug)]
enum SupervisorEvent {
    LoginCompleted(Result<AuthState, AuthError>),
    FetchCompleted {
        target: Arc<Target>,
        result: Result<FetchOutcome, FetchError>,
    },
}

/// Mutable state owned by the event loop.
struct RunState {
    counter: LoginAttemptCounter,
    retry: RetryPolicy,
    ticker: Option<Interval>,
    tick: usize,
    fetch_failures: u32,
    login_in_flight: bool,
}

// =============================================================================
// Supervisor
// =============================================================================

/// State machine for one proxy-bound worker.
pub struct CrawlerSupervisor {
    config: SupervisorConfig,
    targets: TargetRegistry,
    circuit: Arc<dyn CircuitPort>,
    session: Arc<dyn SessionPort>,
    fetcher: Arc<dyn TradeFetchPort>,
    sink: Arc<dyn TradeSink>,
    status: Arc<WorkerStatus>,
    cancel: CancellationToken,
}

impl CrawlerSupervisor {
    /// Create a supervisor.
    #[must_use]
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        config: SupervisorConfig,
        targets: TargetRegistry,
        circuit: Arc<dyn CircuitPort>,
        session: Arc<dyn SessionPort>,
        fetcher: Arc<dyn TradeFetchPort>,
        sink: Arc<dyn TradeSink>,
        status: Arc<WorkerStatus>,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            config,
            targets,
            circuit,
            session,
            fetcher,
            sink,
            status,
            cancel,
        }
    }

    /// Shared status handle.
    #[must_use]
    pub fn status(&self) -> Arc<WorkerStatus> {
        Arc::clone(&self.status)
    }

    /// Run until cancelled or a fatal error occurs.
    ///
    /// # Errors
    ///
    /// Returns the fatal error that terminated the worker. Cancellation
    /// returns `Ok(())`.
    pub async fn run(self) -> Result<(), SupervisorError> {
        let session_id = Uuid::new_v4();
        self.status.set_session_id(session_id);
        let span = tracing::info_span!(
            "supervisor",
            worker_id = self.status.worker_id(),
            proxy_port = self.status.proxy_port(),
            %session_id
        );
        self.run_inner().instrument(span).await
    }

    async fn run_inner(self) -> Result<(), SupervisorError> {
        self.status.transition(SupervisorState::CircuitPending);
        tracing::info!(targets = self.targets.len(), "Waiting for proxy circuit");

        let circuit = Arc::clone(&self.circuit);
        let live = tokio::select! {
            () = self.cancel.cancelled() => {
                self.status.transition(SupervisorState::Stopped);
                tracing::info!("Supervisor cancelled before circuit was live");
                return Ok(());
            }
            result = circuit.ensure_live() => result,
        };

        // Child token aborts in-flight login/fetch tasks on exit.
        let tasks = self.cancel.child_token();
        let _abort_on_exit = tasks.clone().drop_guard();

        if let Err(e) = live {
            let err = SupervisorError::from(e);
            self.terminate(&err, &tasks);
            return Err(err);
        }

        tracing::info!("Circuit live, logging in");
        self.status.transition(SupervisorState::Authenticating);

        let (events_tx, mut events_rx) = mpsc::channel::<SupervisorEvent>(64);
        let mut run = RunState {
            counter: LoginAttemptCounter::new(self.config.max_login_attempts),
            retry: RetryPolicy::new(self.config.login_retry.clone()),
            ticker: None,
            tick: 0,
            fetch_failures: 0,
            login_in_flight: false,
        };
        self.spawn_login(&mut run, Duration::ZERO, &tasks, &events_tx);

        loop {
            let step = tokio::select! {
                () = self.cancel.cancelled() => {
                    tasks.cancel();
                    self.status.transition(SupervisorState::Stopped);
                    tracing::info!("Supervisor stopped");
                    return Ok(());
                }
                Some(event) = events_rx.recv() => match event {
                    SupervisorEvent::LoginCompleted(result) => {
                        self.on_login(&mut run, result, &tasks, &events_tx)
                    }
                    SupervisorEvent::FetchCompleted { target, result } => {
                        self.on_fetch(&mut run, &target, result, &tasks, &events_tx).await
                    }
                },
                () = next_tick(&mut run.ticker) => {
                    self.on_tick(&mut run, &tasks, &events_tx);
                    Ok(())
                }
            };

            if let Err(err) = step {
                self.terminate(&err, &tasks);
                return Err(err);
            }
        }
    }

    // -------------------------------------------------------------------------
    // Event handlers
    // -------------------------------------------------------------------------

    fn on_login(
        &self,
        run: &mut RunState,
        result: Result<AuthState, AuthError>,
        tasks: &CancellationToken,
        events: &mpsc::Sender<SupervisorEvent>,
    ) -> Result<(), SupervisorError> {
        run.login_in_flight = false;
        self.status.record_login_attempt();

        match result {
            Ok(state) if state.is_authenticated() => {
                run.counter.reset();
                run.retry.reset();
                self.status.transition(SupervisorState::Polling);
                tracing::info!(auth_state = %state, "Session authenticated");

                if run.ticker.is_none() {
                    let period = self.config.poll_interval;
                    let mut ticker = tokio::time::interval_at(Instant::now() + period, period);
                    ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
                    run.ticker = Some(ticker);
                }
                return Ok(());
            }
            Ok(state) => {
                tracing::debug!(
                    auth_state = %state,
                    missing = ?state.missing_cookies(),
                    "Login incomplete"
                );
            }
            Err(e) => {
                tracing::warn!(error = %e, "Login attempt failed");
                self.status.set_error(e.to_string());
            }
        }

        if run.counter.record_failure() {
            let delay = run.retry.next_delay();
            tracing::debug!(
                failures = run.counter.failures(),
                max = run.counter.max_attempts(),
                delay_ms = delay.as_millis(),
                "Retrying login"
            );
            self.spawn_login(run, delay, tasks, events);
            Ok(())
        } else {
            tracing::error!(
                attempts = run.counter.failures(),
                max = run.counter.max_attempts(),
                "Max login attempts exceeded"
            );
            Err(SupervisorError::Auth(AuthError::MaxAttemptsExceeded {
                attempts: run.counter.failures(),
                max: run.counter.max_attempts(),
            }))
        }
    }

    async fn on_fetch(
        &self,
        run: &mut RunState,
        target: &Target,
        result: Result<FetchOutcome, FetchError>,
        tasks: &CancellationToken,
        events: &mpsc::Sender<SupervisorEvent>,
    ) -> Result<(), SupervisorError> {
        match result {
            Ok(FetchOutcome::Trades(trades)) => {
                run.fetch_failures = 0;
                self.status.record_fetch(false);
                tracing::debug!(target = %target, count = trades.len(), "Fetched trades");

                if !trades.is_empty() {
                    let count = trades.len();
                    match self.sink.publish(trades).await {
                        Ok(()) => self.status.record_trades(count),
                        Err(e) => tracing::warn!(error = %e, count, "Dropped trades"),
                    }
                }
            }
            Ok(FetchOutcome::Unauthenticated) => {
                run.fetch_failures = 0;
                self.status.record_fetch(false);

                if self.status.transition(SupervisorState::Authenticating) {
                    tracing::info!(target = %target, "Session expired, logging in again");
                    self.spawn_login(run, Duration::ZERO, tasks, events);
                }
            }
            Err(e) if e.is_fatal() => {
                self.status.record_fetch(true);
                tracing::error!(target = %target, error = %e, "Search request is invalid");
                return Err(SupervisorError::InvalidRequest(e));
            }
            Err(e) => {
                run.fetch_failures = run.fetch_failures.saturating_add(1);
                self.status.record_fetch(true);
                self.status.set_error(e.to_string());
                tracing::warn!(
                    target = %target,
                    error = %e,
                    consecutive = run.fetch_failures,
                    "Fetch failed"
                );

                let max = self.config.max_fetch_failures;
                if max > 0 && run.fetch_failures > max {
                    tracing::error!(
                        failures = run.fetch_failures,
                        max,
                        "Max consecutive fetch failures exceeded"
                    );
                    return Err(SupervisorError::FetchFailuresExceeded {
                        failures: run.fetch_failures,
                        max,
                    });
                }
            }
        }
        Ok(())
    }

    fn on_tick(
        &self,
        run: &mut RunState,
        tasks: &CancellationToken,
        events: &mpsc::Sender<SupervisorEvent>,
    ) {
        if !self.status.state().is_polling() {
            tracing::debug!("Skipping tick while authenticating");
            return;
        }

        let target = Arc::clone(self.targets.target_for_tick(run.tick));
        run.tick = run.tick.wrapping_add(1);
        self.spawn_fetch(target, tasks, events);
    }

    // -------------------------------------------------------------------------
    // Task spawning
    // -------------------------------------------------------------------------

    fn spawn_login(
        &self,
        run: &mut RunState,
        delay: Duration,
        tasks: &CancellationToken,
        events: &mpsc::Sender<SupervisorEvent>,
    ) {
        if run.login_in_flight {
            return;
        }
        run.login_in_flight = true;

        let session = Arc::clone(&self.session);
        let tasks = tasks.clone();
        let events = events.clone();
        tokio::spawn(
            async move {
                let attempt = async {
                    if !delay.is_zero() {
                        tokio::time::sleep(delay).await;
                    }
                    session.attempt_login().await
                };
                tokio::select! {
                    () = tasks.cancelled() => {}
                    result = attempt => {
                        let _ = events.send(SupervisorEvent::LoginCompleted(result)).await;
                    }
                }
            }
            .in_current_span(),
        );
    }

    fn spawn_fetch(
        &self,
        target: Arc<Target>,
        tasks: &CancellationToken,
        events: &mpsc::Sender<SupervisorEvent>,
    ) {
        let fetcher = Arc::clone(&self.fetcher);
        let tasks = tasks.clone();
        let events = events.clone();
        tokio::spawn(
            async move {
                tokio::select! {
                    () = tasks.cancelled() => {}
                    result = fetcher.fetch(&target) => {
                        let _ = events
                            .send(SupervisorEvent::FetchCompleted { target, result })
                            .await;
                    }
                }
            }
            .in_current_span(),
        );
    }

    fn terminate(&self, err: &SupervisorError, tasks: &CancellationToken) {
        tasks.cancel();
        self.status.set_error(err.to_string());
        self.status
            .transition(SupervisorState::Terminated(err.reason()));
        tracing::error!(reason = err.reason().as_str(), error = %err, "Supervisor terminated");
    }
}

/// Wait for the next tick, or forever if polling has not started.
async fn next_tick(ticker: &mut Option<Interval>) {
    match ticker {
        Some(ticker) => {
            ticker.tick().await;
        }
        None => std::future::pending::<()>().await,
    }
}
