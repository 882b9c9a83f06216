//! Reconnection state machine for the shared database handle
//!
//! ```text
//!   Connected --probe fails--> Reconnecting --connect+swap ok--> Connected
//!                                   |   ^
//!                                   +---+ attempt fails: retry_count++, back off
//! ```
//!
//! The active handle lives in an atomic cell so readers never wait on the
//! retry loop. Bookkeeping lives behind one async `RwLock`. Values are copied
//! out of that lock before anything is reported to the logger or analyzer.

use arc_swap::ArcSwapOption;
use chrono::Local;
use serde::Serialize;
use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{Mutex, RwLock};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use super::error_analyzer::ErrorAnalyzer;
use super::gateway::{ConnectionGateway, DbHandle, GatewayError};
use super::logger::{LogAggregator, LogLevel, ReconnectionLogger, DEFAULT_PROGRESS_INTERVAL};
use crate::metrics;

/// Entries kept in [`ConnectionState::error_history`]
pub const MAX_ERROR_HISTORY: usize = 10;

/// Exponential backoff: `initial`, doubling after every failure, capped at `max`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BackoffPolicy {
    pub initial: Duration,
    pub max: Duration,
}

impl Default for BackoffPolicy {
    fn default() -> Self {
        Self {
            initial: Duration::from_secs(1),
            max: Duration::from_secs(30),
        }
    }
}

impl BackoffPolicy {
    /// A fresh delay sequence; every reconnection loop starts its own
    pub fn delays(&self) -> Backoff {
        Backoff {
            next: self.initial.min(self.max),
            max: self.max,
        }
    }
}

/// Infinite iterator over backoff delays
#[derive(Debug, Clone)]
pub struct Backoff {
    next: Duration,
    max: Duration,
}

impl Iterator for Backoff {
    type Item = Duration;

    fn next(&mut self) -> Option<Duration> {
        let current = self.next;
        self.next = current.saturating_mul(2).min(self.max);
        Some(current)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ConnectionState {
    pub is_connected: bool,
    pub reconnecting: bool,
    /// Failed attempts since the last successful reconnection
    pub retry_count: u32,
    pub last_error: Option<String>,
    /// `[YYYY-MM-DD HH:MM:SS] message`, oldest first, at most [`MAX_ERROR_HISTORY`]
    pub error_history: VecDeque<String>,
}

impl ConnectionState {
    fn record_error(&mut self, context: &str, error: &GatewayError) {
        self.last_error = Some(error.to_string());
        if self.error_history.len() >= MAX_ERROR_HISTORY {
            self.error_history.pop_front();
        }
        self.error_history.push_back(format!(
            "[{}] {}: {}",
            Local::now().format("%Y-%m-%d %H:%M:%S"),
            context,
            error
        ));
    }
}

/// The handle currently served to request handlers
pub struct ActiveConnection {
    handle: Box<dyn DbHandle>,
}

impl ActiveConnection {
    fn new(handle: Box<dyn DbHandle>) -> Self {
        Self { handle }
    }

    pub fn handle(&self) -> &dyn DbHandle {
        self.handle.as_ref()
    }
}

/// Result of probing the active handle
pub enum ProbeOutcome {
    NoHandle,
    Alive(Arc<ActiveConnection>),
    Lost(GatewayError),
}

#[derive(Debug, Clone, Copy)]
pub struct ReconnectSettings {
    pub backoff: BackoffPolicy,
    pub progress_interval: Duration,
}

impl Default for ReconnectSettings {
    fn default() -> Self {
        Self {
            backoff: BackoffPolicy::default(),
            progress_interval: DEFAULT_PROGRESS_INTERVAL,
        }
    }
}

struct Shared {
    state: ConnectionState,
    /// Bumped on every start and stop; a loop only finalises its own run
    generation: u64,
    /// Set by [`Reconnector::shutdown`]; no loop starts until [`Reconnector::reopen`]
    closed: bool,
}

struct ReconnectTask {
    token: CancellationToken,
    handle: JoinHandle<()>,
}

/// Owns the shared connection handle and the single background retry loop.
///
/// Built once at startup and shared as `Arc<Reconnector>`.
pub struct Reconnector {
    gateway: Arc<dyn ConnectionGateway>,
    dsn: String,
    settings: ReconnectSettings,
    current: ArcSwapOption<ActiveConnection>,
    shared: RwLock<Shared>,
    // lock order: `task` before `shared`
    task: Mutex<Option<ReconnectTask>>,
    logger: Arc<LogAggregator>,
    analyzer: Arc<ErrorAnalyzer>,
}

impl Reconnector {
    pub fn new(
        gateway: Arc<dyn ConnectionGateway>,
        dsn: impl Into<String>,
        settings: ReconnectSettings,
        logger: Arc<LogAggregator>,
        analyzer: Arc<ErrorAnalyzer>,
    ) -> Self {
        Self {
            gateway,
            dsn: dsn.into(),
            settings,
            current: ArcSwapOption::empty(),
            shared: RwLock::new(Shared {
                state: ConnectionState::default(),
                generation: 0,
                closed: false,
            }),
            task: Mutex::new(None),
            logger,
            analyzer,
        }
    }

    pub(crate) fn gateway(&self) -> &Arc<dyn ConnectionGateway> {
        &self.gateway
    }

    pub(crate) fn dsn(&self) -> &str {
        &self.dsn
    }

    /// The active handle, if any. Never blocks on the retry loop.
    pub fn current(&self) -> Option<Arc<ActiveConnection>> {
        self.current.load_full()
    }

    pub async fn is_connected(&self) -> bool {
        self.shared.read().await.state.is_connected
    }

    pub async fn is_reconnecting(&self) -> bool {
        self.shared.read().await.state.reconnecting
    }

    pub async fn retry_count(&self) -> u32 {
        self.shared.read().await.state.retry_count
    }

    pub async fn last_error(&self) -> Option<String> {
        self.shared.read().await.state.last_error.clone()
    }

    pub async fn error_history(&self) -> Vec<String> {
        self.shared
            .read()
            .await
            .state
            .error_history
            .iter()
            .cloned()
            .collect()
    }

    pub async fn snapshot(&self) -> ConnectionState {
        self.shared.read().await.state.clone()
    }

    /// Launch the retry loop unless one is already running or the
    /// reconnector has been shut down
    pub async fn start_reconnection(self: &Arc<Self>) {
        let mut task = self.task.lock().await;

        let generation = {
            let mut shared = self.shared.write().await;
            if shared.closed || shared.state.reconnecting {
                return;
            }
            shared.state.reconnecting = true;
            shared.generation += 1;
            shared.generation
        };

        let token = CancellationToken::new();
        let this = Arc::clone(self);
        let loop_token = token.clone();
        let handle = tokio::spawn(async move {
            this.reconnection_loop(generation, loop_token).await;
        });

        // a previous run has already finished or been cancelled
        if let Some(previous) = task.replace(ReconnectTask { token, handle }) {
            previous.token.cancel();
        }
    }

    /// Cancel the retry loop and clear the reconnecting flag. A loop blocked
    /// in its backoff delay wakes immediately.
    pub async fn stop_reconnection(&self) {
        self.cancel_loop(false).await;
    }

    /// Stop the loop, wait until it has exited and refuse new loops until
    /// [`Self::reopen`]. Probes still in flight cannot restart reconnection.
    pub async fn shutdown(&self) {
        if let Some(handle) = self.cancel_loop(true).await {
            if let Err(e) = handle.await {
                tracing::warn!(error = %e, "Reconnection task ended abnormally");
            }
        }
    }

    /// Allow reconnection again after [`Self::shutdown`]
    pub async fn reopen(&self) {
        self.shared.write().await.closed = false;
    }

    async fn cancel_loop(&self, close: bool) -> Option<JoinHandle<()>> {
        let mut task = self.task.lock().await;
        {
            let mut shared = self.shared.write().await;
            shared.state.reconnecting = false;
            shared.generation += 1;
            shared.closed |= close;
        }
        task.take().map(|running| {
            running.token.cancel();
            running.handle
        })
    }

    /// Connection loss reported by a probe: mark disconnected and make sure a
    /// retry loop is running.
    pub async fn on_connection_lost(self: &Arc<Self>) {
        self.mark_disconnected().await;

        self.logger
            .warn("Database connection lost, starting reconnection");
        self.start_reconnection().await;
    }

    /// Ping the active handle. A failed ping triggers [`Self::on_connection_lost`].
    pub async fn probe(self: &Arc<Self>) -> ProbeOutcome {
        let Some(connection) = self.current() else {
            return ProbeOutcome::NoHandle;
        };

        match connection.handle().ping().await {
            Ok(()) => {
                self.mark_connected().await;
                ProbeOutcome::Alive(connection)
            }
            Err(e) => {
                self.on_connection_lost().await;
                ProbeOutcome::Lost(e)
            }
        }
    }

    pub async fn check_connection(self: &Arc<Self>) -> bool {
        matches!(self.probe().await, ProbeOutcome::Alive(_))
    }

    pub(crate) async fn mark_connected(&self) {
        self.shared.write().await.state.is_connected = true;
        metrics::set_connected(true);
    }

    pub(crate) async fn mark_disconnected(&self) {
        self.shared.write().await.state.is_connected = false;
        metrics::set_connected(false);
    }

    /// Swap `handle` in as the shared handle, then close the one it replaced
    pub(crate) async fn install_handle(&self, handle: Box<dyn DbHandle>) {
        let previous = self.current.swap(Some(Arc::new(ActiveConnection::new(handle))));
        if let Some(previous) = previous {
            if let Err(e) = previous.handle().close().await {
                self.logger.log(
                    LogLevel::Error,
                    "Failed to close replaced database connection",
                    e.to_string(),
                );
            }
        }
    }

    /// Detach the shared handle without closing it
    pub(crate) fn take_handle(&self) -> Option<Arc<ActiveConnection>> {
        self.current.swap(None)
    }

    pub(crate) async fn record_failure(&self, context: &str, error: &GatewayError) {
        self.shared.write().await.state.record_error(context, error);
    }

    /// Open and probe a fresh handle; on success it replaces the shared one.
    /// Failures are recorded and leave the shared handle untouched.
    async fn try_connect(&self) -> bool {
        let handle = match self.gateway.open(&self.dsn).await {
            Ok(handle) => handle,
            Err(e) => {
                self.record_failure("failed to open database connection", &e)
                    .await;
                return false;
            }
        };

        if let Err(e) = handle.ping().await {
            self.record_failure("database connection probe failed", &e)
                .await;
            if let Err(close_err) = handle.close().await {
                self.logger.log(
                    LogLevel::Error,
                    "Failed to close probe connection",
                    close_err.to_string(),
                );
            }
            return false;
        }

        self.install_handle(handle).await;
        true
    }

    async fn reconnection_loop(self: Arc<Self>, generation: u64, token: CancellationToken) {
        let mut delays = self.settings.backoff.delays();
        let mut reporter =
            ReconnectionLogger::new(self.logger.clone(), self.settings.progress_interval);
        reporter.start();

        loop {
            if token.is_cancelled() {
                break;
            }

            metrics::record_reconnect_attempt();
            if self.try_connect().await {
                let total_retries = self.finish_run(generation).await;
                metrics::record_reconnect_success();
                reporter.log_success(total_retries);
                return;
            }

            let (retry_count, last_error) = {
                let mut shared = self.shared.write().await;
                shared.state.retry_count += 1;
                (shared.state.retry_count, shared.state.last_error.clone())
            };

            if let Some(err) = &last_error {
                self.analyzer.analyze_error(err, retry_count);
            }

            let delay = delays.next().unwrap_or(self.settings.backoff.max);
            reporter.log_retry(retry_count, delay, last_error.as_deref());

            tokio::select! {
                _ = token.cancelled() => break,
                _ = tokio::time::sleep(delay) => {}
            }
        }

        reporter.log_stopped(self.retry_count().await);
    }

    /// Record a successful reconnection; returns the failed attempts it took
    async fn finish_run(&self, generation: u64) -> u32 {
        let mut shared = self.shared.write().await;
        let total_retries = shared.state.retry_count;
        shared.state.is_connected = true;
        if shared.generation == generation {
            shared.state.reconnecting = false;
            shared.state.retry_count = 0;
            shared.state.last_error = None;
        }
        drop(shared);

        metrics::set_connected(true);
        total_retries
    }
}
