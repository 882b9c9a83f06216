//! Connection resilience: logging, error classification and reconnection

pub mod connection;
pub mod error_analyzer;
pub mod gateway;
pub mod logger;
pub mod reconnector;

pub use connection::{DatabaseService, DbStatus, StatusKind};
pub use error_analyzer::{
    match_error_pattern, ErrorAnalyzer, ErrorCategory, ErrorDetails, ErrorPattern, ErrorSummary,
    ErrorTrends,
};
pub use gateway::{ConnectionGateway, DbHandle, GatewayError, MySqlGateway, PoolLimits};
pub use logger::{
    ConnectionInfo, LogAggregator, LogEntry, LogLevel, LogSummary, LoggerSettings,
    ReconnectionLogger,
};
pub use reconnector::{BackoffPolicy, ConnectionState, ReconnectSettings, Reconnector};
