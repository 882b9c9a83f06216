//! Connection gateway: the boundary to the database engine
//!
//! The resilience code only ever needs to open a handle, probe it, read the
//! server clock for status pages, and close it. `MySqlGateway` backs this with
//! an sqlx pool; tests substitute scripted gateways.

use async_trait::async_trait;
use sqlx::mysql::{MySqlPool, MySqlPoolOptions};
use sqlx::Connection;
use std::time::Duration;
use thiserror::Error;

/// Failures reported by a gateway. The payload is the driver's own text,
/// which is what the error analyzer classifies.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum GatewayError {
    #[error("invalid connection string: {0}")]
    InvalidDsn(String),
    #[error("{0}")]
    Open(String),
    #[error("{0}")]
    Ping(String),
    #[error("{0}")]
    Query(String),
    #[error("{0}")]
    Close(String),
}

/// A live (pooled) connection to the database
#[async_trait]
pub trait DbHandle: Send + Sync {
    /// Liveness probe: one cheap round trip
    async fn ping(&self) -> Result<(), GatewayError>;

    /// Server clock as text, used as the status timestamp
    async fn server_time(&self) -> Result<String, GatewayError>;

    async fn close(&self) -> Result<(), GatewayError>;
}

#[async_trait]
pub trait ConnectionGateway: Send + Sync {
    /// Create a handle for `dsn`. Opening does not guarantee connectivity;
    /// callers probe with [`DbHandle::ping`].
    async fn open(&self, dsn: &str) -> Result<Box<dyn DbHandle>, GatewayError>;
}

/// Pool limits applied once to every handle the gateway creates
#[derive(Debug, Clone, Copy)]
pub struct PoolLimits {
    pub max_open_conns: u32,
    pub conn_max_lifetime: Duration,
    pub connect_timeout: Duration,
}

impl Default for PoolLimits {
    fn default() -> Self {
        Self {
            max_open_conns: 10,
            conn_max_lifetime: Duration::from_secs(3600),
            connect_timeout: Duration::from_secs(5),
        }
    }
}

pub struct MySqlGateway {
    limits: PoolLimits,
}

impl MySqlGateway {
    pub fn new(limits: PoolLimits) -> Self {
        Self { limits }
    }
}

#[async_trait]
impl ConnectionGateway for MySqlGateway {
    async fn open(&self, dsn: &str) -> Result<Box<dyn DbHandle>, GatewayError> {
        let pool = MySqlPoolOptions::new()
            .max_connections(self.limits.max_open_conns)
            .max_lifetime(self.limits.conn_max_lifetime)
            .acquire_timeout(self.limits.connect_timeout)
            .connect_lazy(dsn)
            .map_err(|e| GatewayError::InvalidDsn(e.to_string()))?;

        Ok(Box::new(MySqlHandle { pool }))
    }
}

struct MySqlHandle {
    pool: MySqlPool,
}

#[async_trait]
impl DbHandle for MySqlHandle {
    async fn ping(&self) -> Result<(), GatewayError> {
        let mut conn = self
            .pool
            .acquire()
            .await
            .map_err(|e| GatewayError::Ping(e.to_string()))?;
        conn.ping()
            .await
            .map_err(|e| GatewayError::Ping(e.to_string()))
    }

    async fn server_time(&self) -> Result<String, GatewayError> {
        sqlx::query_scalar::<_, String>("SELECT CAST(NOW() AS CHAR)")
            .fetch_one(&self.pool)
            .await
            .map_err(|e| GatewayError::Query(e.to_string()))
    }

    async fn close(&self) -> Result<(), GatewayError> {
        self.pool.close().await;
        Ok(())
    }
}
