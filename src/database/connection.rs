//! Lifecycle and status of the shared database connection

use serde::Serialize;
use std::sync::Arc;
use tokio::sync::Mutex;

use super::error_analyzer::{ErrorAnalyzer, ErrorDetails};
use super::gateway::{ConnectionGateway, GatewayError};
use super::logger::{ConnectionInfo, LogAggregator, LogLevel};
use super::reconnector::{ProbeOutcome, ReconnectSettings, Reconnector};
use crate::metrics;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum StatusKind {
    #[serde(rename = "OK")]
    Ok,
    #[serde(rename = "Not Connected")]
    NotConnected,
    Reconnecting,
    Failed,
}

impl StatusKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Ok => "OK",
            Self::NotConnected => "Not Connected",
            Self::Reconnecting => "Reconnecting",
            Self::Failed => "Failed",
        }
    }
}

/// Answer to a status request. Connectivity problems are reported here,
/// never as an `Err`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DbStatus {
    pub status: StatusKind,
    /// Server clock, only when the status is OK
    #[serde(skip_serializing_if = "Option::is_none")]
    pub timestamp: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_details: Option<ErrorDetails>,
}

impl DbStatus {
    fn ok(timestamp: String) -> Self {
        Self {
            status: StatusKind::Ok,
            timestamp: Some(timestamp),
            error: None,
            error_details: None,
        }
    }

    fn not_initialized() -> Self {
        Self::failure(
            StatusKind::NotConnected,
            "Database not initialized".to_string(),
            ErrorDetails::not_initialized(),
        )
    }

    fn failure(status: StatusKind, error: String, details: ErrorDetails) -> Self {
        Self {
            status,
            timestamp: None,
            error: Some(error),
            error_details: Some(details),
        }
    }
}

/// The single database service of the process: owns the reconnector and
/// shares the logger and analyzer with the HTTP layer.
pub struct DatabaseService {
    reconnector: Arc<Reconnector>,
    logger: Arc<LogAggregator>,
    analyzer: Arc<ErrorAnalyzer>,
    connection_info: ConnectionInfo,
    init_lock: Mutex<()>,
}

impl DatabaseService {
    pub fn new(
        gateway: Arc<dyn ConnectionGateway>,
        dsn: impl Into<String>,
        connection_info: ConnectionInfo,
        settings: ReconnectSettings,
        logger: Arc<LogAggregator>,
        analyzer: Arc<ErrorAnalyzer>,
    ) -> Self {
        let reconnector = Arc::new(Reconnector::new(
            gateway,
            dsn,
            settings,
            logger.clone(),
            analyzer.clone(),
        ));

        Self {
            reconnector,
            logger,
            analyzer,
            connection_info,
            init_lock: Mutex::new(()),
        }
    }

    pub fn reconnector(&self) -> &Arc<Reconnector> {
        &self.reconnector
    }

    pub fn logger(&self) -> &Arc<LogAggregator> {
        &self.logger
    }

    pub fn analyzer(&self) -> &Arc<ErrorAnalyzer> {
        &self.analyzer
    }

    pub fn connection_info(&self) -> &ConnectionInfo {
        &self.connection_info
    }

    /// Establish the initial connection.
    ///
    /// Does nothing if a handle is installed or a retry loop is running.
    /// An open failure starts reconnection and is returned to the caller; a
    /// failed probe installs the handle anyway and starts reconnection.
    pub async fn init_db(&self) -> Result<(), GatewayError> {
        let _guard = self.init_lock.lock().await;
        if self.reconnector.current().is_some() || self.reconnector.is_reconnecting().await {
            return Ok(());
        }
        self.reconnector.reopen().await;

        let handle = match self.reconnector.gateway().open(self.reconnector.dsn()).await {
            Ok(handle) => handle,
            Err(e) => {
                self.report_init_failure("failed to open database connection", &e)
                    .await;
                self.reconnector.start_reconnection().await;
                return Err(e);
            }
        };

        if let Err(e) = handle.ping().await {
            self.report_init_failure("database connection probe failed", &e)
                .await;
            self.reconnector.install_handle(handle).await;
            self.reconnector.start_reconnection().await;
            return Ok(());
        }

        self.reconnector.install_handle(handle).await;
        self.reconnector.mark_connected().await;

        let info = &self.connection_info;
        self.logger.log_with_connection(
            LogLevel::Info,
            "Database connection established",
            format!("{}@{}:{}/{}", info.username, info.host, info.port, info.database),
            info.clone(),
        );
        Ok(())
    }

    async fn report_init_failure(&self, context: &str, error: &GatewayError) {
        self.reconnector.record_failure(context, error).await;
        let details = self.analyzer.analyze_error(error, 0);
        self.logger.log_with_connection(
            LogLevel::Error,
            format!("Initial database connection failed: {}", context),
            format!("[{}] {}", details.code, error),
            self.connection_info.clone(),
        );
    }

    /// Stop reconnecting, wait for the loop to exit, then close the handle.
    /// Safe to call repeatedly.
    pub async fn close_db(&self) -> Result<(), GatewayError> {
        let _guard = self.init_lock.lock().await;
        self.reconnector.shutdown().await;

        let Some(connection) = self.reconnector.take_handle() else {
            return Ok(());
        };
        self.reconnector.mark_disconnected().await;

        match connection.handle().close().await {
            Ok(()) => {
                self.logger.info("Database connection closed");
                Ok(())
            }
            Err(e) => {
                self.logger.log(
                    LogLevel::Error,
                    "Failed to close database connection",
                    e.to_string(),
                );
                Err(e)
            }
        }
    }

    /// Probe the active handle and read the server clock
    pub async fn check_status(&self) -> DbStatus {
        let status = match self.reconnector.probe().await {
            ProbeOutcome::NoHandle => DbStatus::not_initialized(),
            ProbeOutcome::Lost(e) => {
                let details = self
                    .analyzer
                    .analyze_error(&e, self.reconnector.retry_count().await);
                if self.reconnector.is_reconnecting().await {
                    DbStatus::failure(
                        StatusKind::Reconnecting,
                        "Attempting to reconnect to database...".to_string(),
                        details,
                    )
                } else {
                    DbStatus::failure(
                        StatusKind::NotConnected,
                        format!("Database connection failed: {}", e),
                        details,
                    )
                }
            }
            ProbeOutcome::Alive(connection) => match connection.handle().server_time().await {
                Ok(timestamp) => DbStatus::ok(timestamp),
                Err(e) => {
                    let details = self
                        .analyzer
                        .analyze_error(&e, self.reconnector.retry_count().await);
                    DbStatus::failure(StatusKind::Failed, format!("Query failed: {}", e), details)
                }
            },
        };

        metrics::record_status_check(status.status.as_str());
        status
    }
}
