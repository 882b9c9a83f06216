//! In-memory log aggregation for the database subsystem
//!
//! Keeps a bounded ring of recent entries for the status API, collapsing
//! consecutive duplicates into a single counted entry. Every accepted entry is
//! also forwarded to `tracing`, which stays the process-wide log sink.

use chrono::{DateTime, Local};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, VecDeque};
use std::fmt;
use std::str::FromStr;
use std::sync::{Arc, PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};
use std::time::Duration;
use tokio::time::Instant;

/// Default ring capacity
pub const DEFAULT_MAX_ENTRIES: usize = 100;

/// Default spacing between throttled progress lines of a long reconnection
pub const DEFAULT_PROGRESS_INTERVAL: Duration = Duration::from_secs(30);

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    Debug,
    Info,
    Warn,
    Error,
    /// Recorded like any other level; never terminates the process
    Fatal,
}

impl LogLevel {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Debug => "debug",
            Self::Info => "info",
            Self::Warn => "warn",
            Self::Error => "error",
            Self::Fatal => "fatal",
        }
    }
}

impl fmt::Display for LogLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for LogLevel {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "debug" => Ok(Self::Debug),
            "info" => Ok(Self::Info),
            "warn" | "warning" => Ok(Self::Warn),
            "error" => Ok(Self::Error),
            "fatal" => Ok(Self::Fatal),
            other => Err(format!("invalid log level: {}", other)),
        }
    }
}

/// Snapshot of where a connection points, attached to selected entries.
/// Credentials are never part of it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConnectionInfo {
    pub host: String,
    pub port: u16,
    pub username: String,
    pub database: String,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct LogEntry {
    pub level: LogLevel,
    pub message: String,
    pub timestamp: DateTime<Local>,
    #[serde(skip_serializing_if = "String::is_empty")]
    pub details: String,
    /// Number of consecutive identical (level, message) calls merged here
    pub repeat_count: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub connection: Option<ConnectionInfo>,
}

#[derive(Debug, Clone, Serialize)]
pub struct LastEntrySummary {
    pub level: LogLevel,
    pub message: String,
    pub timestamp: DateTime<Local>,
    pub repeat_count: u32,
}

#[derive(Debug, Clone, Serialize)]
pub struct LogSummary {
    pub total_entries: usize,
    pub level_counts: BTreeMap<String, usize>,
    pub last_entry: Option<LastEntrySummary>,
}

/// Construction-time settings, usually taken from `[logger]` in the config
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct LoggerSettings {
    pub level: LogLevel,
    pub max_entries: usize,
    pub suppress_duplicates: bool,
}

impl Default for LoggerSettings {
    fn default() -> Self {
        Self {
            level: LogLevel::Info,
            max_entries: DEFAULT_MAX_ENTRIES,
            suppress_duplicates: true,
        }
    }
}

struct Inner {
    entries: VecDeque<LogEntry>,
    max_entries: usize,
    level: LogLevel,
    suppress_duplicates: bool,
}

/// Bounded, level-filtered log buffer with duplicate suppression.
///
/// One instance is built at startup and shared through `Arc`. All accessors
/// hand out owned copies; nothing returned aliases the internal ring.
pub struct LogAggregator {
    inner: RwLock<Inner>,
}

impl Default for LogAggregator {
    fn default() -> Self {
        Self::new(LoggerSettings::default())
    }
}

impl LogAggregator {
    pub fn new(settings: LoggerSettings) -> Self {
        let max_entries = settings.max_entries.max(1);
        Self {
            inner: RwLock::new(Inner {
                entries: VecDeque::with_capacity(max_entries),
                max_entries,
                level: settings.level,
                suppress_duplicates: settings.suppress_duplicates,
            }),
        }
    }

    fn read(&self) -> RwLockReadGuard<'_, Inner> {
        self.inner.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write(&self) -> RwLockWriteGuard<'_, Inner> {
        self.inner.write().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn level(&self) -> LogLevel {
        self.read().level
    }

    /// Settings currently in effect
    pub fn settings(&self) -> LoggerSettings {
        let inner = self.read();
        LoggerSettings {
            level: inner.level,
            max_entries: inner.max_entries,
            suppress_duplicates: inner.suppress_duplicates,
        }
    }

    pub fn set_level(&self, level: LogLevel) {
        self.write().level = level;
    }

    /// Change the ring capacity (minimum 1), dropping the oldest entries if
    /// the buffer is now over capacity.
    pub fn set_max_entries(&self, max_entries: usize) {
        let mut guard = self.write();
        let inner = &mut *guard;
        inner.max_entries = max_entries.max(1);
        while inner.entries.len() > inner.max_entries {
            inner.entries.pop_front();
        }
    }

    pub fn set_suppress_duplicates(&self, suppress: bool) {
        self.write().suppress_duplicates = suppress;
    }

    pub fn debug(&self, message: impl Into<String>) {
        self.add_entry(LogLevel::Debug, message, String::new(), None);
    }

    pub fn info(&self, message: impl Into<String>) {
        self.add_entry(LogLevel::Info, message, String::new(), None);
    }

    pub fn warn(&self, message: impl Into<String>) {
        self.add_entry(LogLevel::Warn, message, String::new(), None);
    }

    pub fn error(&self, message: impl Into<String>) {
        self.add_entry(LogLevel::Error, message, String::new(), None);
    }

    pub fn fatal(&self, message: impl Into<String>) {
        self.add_entry(LogLevel::Fatal, message, String::new(), None);
    }

    pub fn log(&self, level: LogLevel, message: impl Into<String>, details: impl Into<String>) {
        self.add_entry(level, message, details, None);
    }

    pub fn log_with_connection(
        &self,
        level: LogLevel,
        message: impl Into<String>,
        details: impl Into<String>,
        connection: ConnectionInfo,
    ) {
        self.add_entry(level, message, details, Some(connection));
    }

    /// Record one log call.
    ///
    /// Calls below the current level are dropped. With suppression on, a call
    /// whose (level, message) equals the newest stored entry bumps that
    /// entry's `repeat_count` and timestamp instead of appending.
    pub fn add_entry(
        &self,
        level: LogLevel,
        message: impl Into<String>,
        details: impl Into<String>,
        connection: Option<ConnectionInfo>,
    ) {
        let message = message.into();
        let details = details.into();

        let repeat_count = {
            let mut guard = self.write();
            let inner = &mut *guard;
            if level < inner.level {
                return;
            }

            let now = Local::now();
            let merged = if inner.suppress_duplicates {
                inner
                    .entries
                    .back_mut()
                    .filter(|last| last.level == level && last.message == message)
                    .map(|last| {
                        last.repeat_count += 1;
                        last.timestamp = now;
                        last.repeat_count
                    })
            } else {
                None
            };

            match merged {
                Some(count) => count,
                None => {
                    while inner.entries.len() >= inner.max_entries {
                        inner.entries.pop_front();
                    }
                    inner.entries.push_back(LogEntry {
                        level,
                        message: message.clone(),
                        timestamp: now,
                        details: details.clone(),
                        repeat_count: 1,
                        connection,
                    });
                    1
                }
            }
        };

        mirror_to_tracing(level, &message, &details, repeat_count);
    }

    /// Copy of every stored entry, oldest first
    pub fn entries(&self) -> Vec<LogEntry> {
        self.read().entries.iter().cloned().collect()
    }

    /// The newest `n` entries in their original order
    pub fn recent_entries(&self, n: usize) -> Vec<LogEntry> {
        let inner = self.read();
        let skip = inner.entries.len().saturating_sub(n);
        inner.entries.iter().skip(skip).cloned().collect()
    }

    /// Entries matching `level` (all when `None`), newest `limit` of them,
    /// oldest first
    pub fn query(&self, level: Option<LogLevel>, limit: usize) -> Vec<LogEntry> {
        let inner = self.read();
        let matching: Vec<&LogEntry> = inner
            .entries
            .iter()
            .filter(|entry| level.map_or(true, |l| entry.level == l))
            .collect();
        let skip = matching.len().saturating_sub(limit);
        matching.into_iter().skip(skip).cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.read().entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.read().entries.is_empty()
    }

    pub fn summary(&self) -> LogSummary {
        let inner = self.read();

        let mut level_counts = BTreeMap::new();
        for entry in &inner.entries {
            *level_counts.entry(entry.level.as_str().to_string()).or_insert(0) += 1;
        }

        LogSummary {
            total_entries: inner.entries.len(),
            level_counts,
            last_entry: inner.entries.back().map(|last| LastEntrySummary {
                level: last.level,
                message: last.message.clone(),
                timestamp: last.timestamp,
                repeat_count: last.repeat_count,
            }),
        }
    }

    /// Empty the buffer; the next call can never merge with a cleared entry
    pub fn clear(&self) {
        self.write().entries.clear();
    }
}

fn mirror_to_tracing(level: LogLevel, message: &str, details: &str, repeat_count: u32) {
    match level {
        LogLevel::Debug => tracing::debug!(details, repeat_count, "{}", message),
        LogLevel::Info => tracing::info!(details, repeat_count, "{}", message),
        LogLevel::Warn => tracing::warn!(details, repeat_count, "{}", message),
        LogLevel::Error => tracing::error!(details, repeat_count, "{}", message),
        LogLevel::Fatal => tracing::error!(details, repeat_count, fatal = true, "{}", message),
    }
}

fn format_duration(d: Duration) -> String {
    if d < Duration::from_secs(1) {
        format!("{}ms", d.as_millis())
    } else {
        format!("{}s", d.as_secs())
    }
}

/// Throttled reporter for one run of the reconnection loop.
///
/// Attempt 1 is reported in full, attempts 2 and 3 briefly, every 10th attempt
/// with elapsed time, next delay and last error. Anything else produces at
/// most one progress line per `progress_interval`.
pub struct ReconnectionLogger {
    logger: Arc<LogAggregator>,
    started_at: Instant,
    last_progress: Instant,
    progress_interval: Duration,
}

impl ReconnectionLogger {
    pub fn new(logger: Arc<LogAggregator>, progress_interval: Duration) -> Self {
        let now = Instant::now();
        Self {
            logger,
            started_at: now,
            last_progress: now,
            progress_interval,
        }
    }

    pub fn start(&mut self) {
        self.started_at = Instant::now();
        self.last_progress = self.started_at;
        self.logger.info("Starting database reconnection");
    }

    pub fn log_retry(&mut self, retry_count: u32, next_delay: Duration, last_error: Option<&str>) {
        self.log_retry_at(Instant::now(), retry_count, next_delay, last_error);
    }

    /// Returns whether a line was emitted
    fn log_retry_at(
        &mut self,
        now: Instant,
        retry_count: u32,
        next_delay: Duration,
        last_error: Option<&str>,
    ) -> bool {
        let elapsed = now.saturating_duration_since(self.started_at);

        match retry_count {
            1 => {
                let mut details = format!("next attempt in {}", format_duration(next_delay));
                if let Some(err) = last_error {
                    details.push_str(&format!(", error: {}", err));
                }
                self.logger
                    .log(LogLevel::Info, "Reconnection attempt 1 failed", details);
            }
            2 | 3 => {
                self.logger
                    .info(format!("Reconnection attempt {} failed", retry_count));
            }
            n if n % 10 == 0 => {
                let mut details = format!(
                    "elapsed: {}, next attempt in {}",
                    format_duration(elapsed),
                    format_duration(next_delay)
                );
                if let Some(err) = last_error {
                    details.push_str(&format!(", last error: {}", err));
                }
                self.logger.log(
                    LogLevel::Warn,
                    format!("Reconnection still in progress after {} attempts", n),
                    details,
                );
            }
            n if now.saturating_duration_since(self.last_progress) >= self.progress_interval => {
                self.last_progress = now;
                self.logger.log(
                    LogLevel::Warn,
                    format!("Reconnection progress: attempt {}", n),
                    format!("elapsed: {}", format_duration(elapsed)),
                );
            }
            _ => return false,
        }

        true
    }

    pub fn log_success(&self, total_retries: u32) {
        self.logger.log(
            LogLevel::Info,
            "Database reconnected",
            format!(
                "failed attempts: {}, elapsed: {}",
                total_retries,
                format_duration(self.started_at.elapsed())
            ),
        );
    }

    pub fn log_stopped(&self, total_retries: u32) {
        self.logger.log(
            LogLevel::Info,
            "Database reconnection stopped",
            format!(
                "failed attempts: {}, elapsed: {}",
                total_retries,
                format_duration(self.started_at.elapsed())
            ),
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn logger_with(max_entries: usize, suppress: bool) -> LogAggregator {
        LogAggregator::new(LoggerSettings {
            level: LogLevel::Debug,
            max_entries,
            suppress_duplicates: suppress,
        })
    }

    #[test]
    fn test_consecutive_duplicates_collapse() {
        let logger = logger_with(100, true);
        for _ in 0..7 {
            logger.warn("connection lost");
        }

        let entries = logger.entries();
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].repeat_count, 7);
    }

    #[test]
    fn test_duplicates_need_same_level() {
        let logger = logger_with(100, true);
        logger.warn("connection lost");
        logger.error("connection lost");
        logger.error("connection lost");

        let entries = logger.entries();
        assert_eq!(entries.len(), 2);
        assert_eq!(entries[0].repeat_count, 1);
        assert_eq!(entries[1].repeat_count, 2);
    }

    #[test]
    fn test_non_consecutive_duplicates_are_separate() {
        let logger = logger_with(100, true);
        logger.info("a");
        logger.info("b");
        logger.info("a");

        assert_eq!(logger.len(), 3);
        assert!(logger.entries().iter().all(|e| e.repeat_count == 1));
    }

    #[test]
    fn test_suppression_disabled_appends() {
        let logger = logger_with(100, false);
        logger.info("same");
        logger.info("same");
        assert_eq!(logger.len(), 2);
    }

    #[test]
    fn test_level_threshold_discards() {
        let logger = LogAggregator::default();
        logger.debug("hidden");
        logger.info("shown");
        assert_eq!(logger.len(), 1);

        logger.set_level(LogLevel::Error);
        logger.warn("hidden too");
        assert_eq!(logger.len(), 1);
    }

    #[test]
    fn test_fifo_eviction_at_capacity() {
        let logger = logger_with(3, true);
        for i in 0..5 {
            logger.info(format!("message {}", i));
        }

        let messages: Vec<_> = logger.entries().into_iter().map(|e| e.message).collect();
        assert_eq!(messages, vec!["message 2", "message 3", "message 4"]);
    }

    #[test]
    fn test_recent_entries_keep_order() {
        let logger = logger_with(100, true);
        for i in 0..5 {
            logger.info(format!("message {}", i));
        }

        let messages: Vec<_> = logger
            .recent_entries(3)
            .into_iter()
            .map(|e| e.message)
            .collect();
        assert_eq!(messages, vec!["message 2", "message 3", "message 4"]);
        assert!(logger.recent_entries(0).is_empty());
        assert_eq!(logger.recent_entries(50).len(), 5);
    }

    #[test]
    fn test_returned_entries_are_copies() {
        let logger = logger_with(100, true);
        logger.info("repeat");
        let snapshot = logger.entries();

        logger.info("repeat");
        logger.info("repeat");

        assert_eq!(snapshot[0].repeat_count, 1);
        assert_eq!(logger.entries()[0].repeat_count, 3);
    }

    #[test]
    fn test_query_filters_then_limits() {
        let logger = logger_with(100, true);
        logger.warn("w1");
        logger.info("i1");
        logger.warn("w2");
        logger.info("i2");
        logger.warn("w3");

        let warns: Vec<_> = logger
            .query(Some(LogLevel::Warn), 2)
            .into_iter()
            .map(|e| e.message)
            .collect();
        assert_eq!(warns, vec!["w2", "w3"]);
        assert_eq!(logger.query(None, 10).len(), 5);
    }

    #[test]
    fn test_clear_resets_suppression() {
        let logger = logger_with(100, true);
        logger.info("same");
        logger.clear();
        assert!(logger.is_empty());

        logger.info("same");
        let entries = logger.entries();
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].repeat_count, 1);
    }

    #[test]
    fn test_summary_counts_levels() {
        let logger = logger_with(100, true);
        logger.info("a");
        logger.warn("b");
        logger.warn("c");
        logger.fatal("d");

        let summary = logger.summary();
        assert_eq!(summary.total_entries, 4);
        assert_eq!(summary.level_counts.get("warn"), Some(&2));
        assert_eq!(summary.level_counts.get("fatal"), Some(&1));
        assert_eq!(summary.level_counts.get("debug"), None);
        assert_eq!(summary.last_entry.unwrap().message, "d");
    }

    #[test]
    fn test_shrinking_capacity_trims_oldest() {
        let logger = logger_with(10, true);
        for i in 0..6 {
            logger.info(format!("message {}", i));
        }
        logger.set_max_entries(2);

        let messages: Vec<_> = logger.entries().into_iter().map(|e| e.message).collect();
        assert_eq!(messages, vec!["message 4", "message 5"]);
    }

    #[test]
    fn test_connection_snapshot_is_stored() {
        let logger = logger_with(10, true);
        let info = ConnectionInfo {
            host: "db.internal".to_string(),
            port: 3306,
            username: "inspector".to_string(),
            database: "app".to_string(),
        };
        logger.log_with_connection(LogLevel::Info, "connected", "", info.clone());
        assert_eq!(logger.entries()[0].connection, Some(info));
    }

    #[test]
    fn test_parse_log_level() {
        assert_eq!("WARN".parse::<LogLevel>().unwrap(), LogLevel::Warn);
        assert_eq!("warning".parse::<LogLevel>().unwrap(), LogLevel::Warn);
        assert!("verbose".parse::<LogLevel>().is_err());
    }

    #[tokio::test]
    async fn test_reconnection_logger_throttles() {
        let logger = Arc::new(logger_with(100, true));
        let mut reporter = ReconnectionLogger::new(logger.clone(), DEFAULT_PROGRESS_INTERVAL);
        reporter.start();
        let start = reporter.started_at;
        let delay = Duration::from_secs(1);

        assert!(reporter.log_retry_at(start, 1, delay, Some("connection refused")));
        assert!(reporter.log_retry_at(start, 2, delay, None));
        assert!(reporter.log_retry_at(start, 3, delay, None));
        for attempt in 4..10 {
            assert!(!reporter.log_retry_at(start, attempt, delay, None));
        }
        assert!(reporter.log_retry_at(start, 10, delay, Some("timeout")));

        // nothing new inside the window, one line once it has elapsed
        let later = start + Duration::from_secs(31);
        assert!(reporter.log_retry_at(later, 11, delay, None));
        assert!(!reporter.log_retry_at(later, 12, delay, None));

        let entries = logger.entries();
        // start + attempts 1, 2, 3, 10, 11
        assert_eq!(entries.len(), 6);
        assert!(entries[1].details.contains("connection refused"));
        assert_eq!(entries[4].level, LogLevel::Warn);
        assert!(entries[4].details.contains("last error: timeout"));
    }
}
