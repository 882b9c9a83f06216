//! Scripted database gateway shared by the integration tests

#![allow(dead_code)]

use async_trait::async_trait;
use db_inspector::database::{ConnectionGateway, DbHandle, GatewayError};
use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

pub const SERVER_TIME: &str = "2026-03-14 09:26:53";
pub const REFUSED: &str = "dial tcp 10.0.0.5:3306: connect: connection refused";

/// Pretend database: reachability can be flipped while handles are alive,
/// and individual `open` calls can be scripted to fail.
pub struct FakeDatabase {
    reachable: AtomicBool,
    failure: Mutex<String>,
    open_script: Mutex<VecDeque<GatewayError>>,
    pub opens: AtomicUsize,
    pub closes: AtomicUsize,
}

impl FakeDatabase {
    pub fn new(reachable: bool) -> Arc<Self> {
        Arc::new(Self {
            reachable: AtomicBool::new(reachable),
            failure: Mutex::new(REFUSED.to_string()),
            open_script: Mutex::new(VecDeque::new()),
            opens: AtomicUsize::new(0),
            closes: AtomicUsize::new(0),
        })
    }

    pub fn set_reachable(&self, reachable: bool) {
        self.reachable.store(reachable, Ordering::SeqCst);
    }

    /// Error text returned by probes while unreachable
    pub fn set_failure(&self, message: &str) {
        *self.failure.lock().unwrap() = message.to_string();
    }

    /// The next `open` calls fail with these errors, in order
    pub fn script_open_failures(&self, errors: impl IntoIterator<Item = GatewayError>) {
        self.open_script.lock().unwrap().extend(errors);
    }

    pub fn opens(&self) -> usize {
        self.opens.load(Ordering::SeqCst)
    }

    pub fn closes(&self) -> usize {
        self.closes.load(Ordering::SeqCst)
    }

    fn probe(&self) -> Result<(), GatewayError> {
        if self.reachable.load(Ordering::SeqCst) {
            Ok(())
        } else {
            Err(GatewayError::Ping(self.failure.lock().unwrap().clone()))
        }
    }
}

pub struct ScriptedGateway {
    pub database: Arc<FakeDatabase>,
}

impl ScriptedGateway {
    pub fn new(database: &Arc<FakeDatabase>) -> Arc<Self> {
        Arc::new(Self {
            database: database.clone(),
        })
    }
}

#[async_trait]
impl ConnectionGateway for ScriptedGateway {
    async fn open(&self, _dsn: &str) -> Result<Box<dyn DbHandle>, GatewayError> {
        self.database.opens.fetch_add(1, Ordering::SeqCst);
        if let Some(err) = self.database.open_script.lock().unwrap().pop_front() {
            return Err(err);
        }
        Ok(Box::new(FakeHandle {
            database: self.database.clone(),
            closed: AtomicBool::new(false),
        }))
    }
}

struct FakeHandle {
    database: Arc<FakeDatabase>,
    closed: AtomicBool,
}

#[async_trait]
impl DbHandle for FakeHandle {
    async fn ping(&self) -> Result<(), GatewayError> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(GatewayError::Ping("sql: database is closed".to_string()));
        }
        self.database.probe()
    }

    async fn server_time(&self) -> Result<String, GatewayError> {
        self.ping()
            .await
            .map_err(|e| GatewayError::Query(e.to_string()))?;
        Ok(SERVER_TIME.to_string())
    }

    async fn close(&self) -> Result<(), GatewayError> {
        if !self.closed.swap(true, Ordering::SeqCst) {
            self.database.closes.fetch_add(1, Ordering::SeqCst);
        }
        Ok(())
    }
}
