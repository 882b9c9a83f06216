//! Classification and aggregation of database driver errors
//!
//! Driver errors arrive as opaque text. They are matched against an ordered
//! keyword table to get a category, a stable code and an operator-facing
//! cause/suggestion, then counted per (category, code).

use chrono::{DateTime, Local};
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;

use super::logger::{LogAggregator, LogLevel};

/// Distinct example messages kept per summary
pub const MAX_EXAMPLES: usize = 10;

const HOUR_BUCKET_FORMAT: &str = "%Y-%m-%d-%H";
const TIMESTAMP_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ErrorCategory {
    Network,
    Authentication,
    Configuration,
    Timeout,
    Sql,
    Unknown,
}

impl ErrorCategory {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Network => "network",
            Self::Authentication => "authentication",
            Self::Configuration => "configuration",
            Self::Timeout => "timeout",
            Self::Sql => "sql",
            Self::Unknown => "unknown",
        }
    }
}

impl fmt::Display for ErrorCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ErrorCategory {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "network" => Ok(Self::Network),
            "authentication" | "auth" => Ok(Self::Authentication),
            "configuration" | "config" => Ok(Self::Configuration),
            "timeout" => Ok(Self::Timeout),
            "sql" => Ok(Self::Sql),
            "unknown" => Ok(Self::Unknown),
            other => Err(format!("invalid error category: {}", other)),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ErrorPattern {
    /// Lower-case substrings; any one of them selects this pattern
    pub keywords: &'static [&'static str],
    pub category: ErrorCategory,
    pub code: &'static str,
    pub cause: &'static str,
    pub suggestion: &'static str,
    /// 1..=5, 5 is the most severe
    pub severity: u8,
}

/// Known driver failures, most specific first.
///
/// Matching takes the first row with any keyword contained in the message, so
/// the order of this list is the match priority. "lock wait timeout" must stay
/// ahead of the generic "timeout" row.
pub static ERROR_PATTERNS: &[ErrorPattern] = &[
    ErrorPattern {
        keywords: &["connection refused", "连接被拒绝"],
        category: ErrorCategory::Network,
        code: "NET_001",
        cause: "The database server refused the connection",
        suggestion: "Check that the database service is running, the port is correct and no firewall blocks it",
        severity: 4,
    },
    ErrorPattern {
        keywords: &["no route to host", "network is unreachable", "网络不可达"],
        category: ErrorCategory::Network,
        code: "NET_002",
        cause: "The database host is unreachable",
        suggestion: "Check network connectivity, DNS resolution and the server address",
        severity: 4,
    },
    ErrorPattern {
        keywords: &["lock wait timeout", "锁等待超时"],
        category: ErrorCategory::Sql,
        code: "SQL_002",
        cause: "A transaction timed out waiting for a lock",
        suggestion: "Shorten transactions, reduce lock hold time and look for deadlocks",
        severity: 3,
    },
    ErrorPattern {
        keywords: &["timeout", "timed out", "deadline exceeded", "超时"],
        category: ErrorCategory::Timeout,
        code: "TIME_001",
        cause: "The connection or query timed out",
        suggestion: "Check network latency, raise the timeout or optimise slow queries",
        severity: 3,
    },
    ErrorPattern {
        keywords: &["access denied", "authentication failed", "认证失败"],
        category: ErrorCategory::Authentication,
        code: "AUTH_001",
        cause: "The server rejected the credentials",
        suggestion: "Check the user name, password, grants and allowed client hosts",
        severity: 5,
    },
    ErrorPattern {
        keywords: &["unknown database", "database doesn't exist", "数据库不存在"],
        category: ErrorCategory::Configuration,
        code: "CFG_001",
        cause: "The configured database does not exist",
        suggestion: "Verify the database name and that the schema has been created",
        severity: 4,
    },
    ErrorPattern {
        keywords: &["too many connections", "连接数过多"],
        category: ErrorCategory::Network,
        code: "NET_003",
        cause: "The server connection limit has been reached",
        suggestion: "Tune the pool size, raise max_connections or look for leaked connections",
        severity: 3,
    },
    ErrorPattern {
        keywords: &["disk full", "no space left", "磁盘空间不足"],
        category: ErrorCategory::Configuration,
        code: "CFG_003",
        cause: "The database server is out of disk space",
        suggestion: "Free disk space, grow the volume or rotate logs",
        severity: 5,
    },
];

/// Fallback when nothing in [`ERROR_PATTERNS`] matches
pub static UNKNOWN_PATTERN: ErrorPattern = ErrorPattern {
    keywords: &[],
    category: ErrorCategory::Unknown,
    code: "UNK_001",
    cause: "Unrecognised error",
    suggestion: "Contact the administrator with the full error message",
    severity: 2,
};

/// First pattern with a keyword contained (case-insensitively) in `message`
pub fn match_error_pattern(message: &str) -> &'static ErrorPattern {
    let message = message.to_lowercase();
    ERROR_PATTERNS
        .iter()
        .find(|pattern| {
            pattern
                .keywords
                .iter()
                .any(|keyword| message.contains(&keyword.to_lowercase()))
        })
        .unwrap_or(&UNKNOWN_PATTERN)
}

/// Result of analysing one error occurrence
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ErrorDetails {
    pub category: ErrorCategory,
    pub code: String,
    pub message: String,
    pub cause: String,
    pub suggestion: String,
    pub timestamp: String,
    pub retry_count: u32,
}

impl ErrorDetails {
    /// Details reported when no connection handle has been installed yet
    pub fn not_initialized() -> Self {
        Self {
            category: ErrorCategory::Configuration,
            code: "CFG_002".to_string(),
            message: "Database not initialized".to_string(),
            cause: "No database connection has been established".to_string(),
            suggestion: "Check the [database] settings and the startup log of the connection attempt"
                .to_string(),
            timestamp: Local::now().format(TIMESTAMP_FORMAT).to_string(),
            retry_count: 0,
        }
    }
}

/// Running statistics for one (category, code)
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ErrorSummary {
    pub category: ErrorCategory,
    pub code: String,
    pub count: u64,
    pub first_seen: DateTime<Local>,
    pub last_seen: DateTime<Local>,
    /// Occurrences per hour, keyed `YYYY-MM-DD-HH`
    pub frequency: BTreeMap<String, u64>,
    /// Distinct messages, at most [`MAX_EXAMPLES`]
    pub examples: Vec<String>,
    pub resolved: bool,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ErrorTrends {
    pub total_errors: u64,
    pub resolved_count: usize,
    pub error_types: BTreeMap<String, u64>,
    pub hourly_data: BTreeMap<String, u64>,
}

type SummaryKey = (ErrorCategory, String);

/// Classifies errors and keeps per-pattern statistics.
///
/// Summaries live in an unordered concurrent map; nothing here calls into
/// the logger while a map guard is held.
pub struct ErrorAnalyzer {
    summaries: DashMap<SummaryKey, ErrorSummary>,
    logger: Arc<LogAggregator>,
}

impl ErrorAnalyzer {
    pub fn new(logger: Arc<LogAggregator>) -> Self {
        Self {
            summaries: DashMap::new(),
            logger,
        }
    }

    /// Classify `err`, update its summary and log the analysis at a level
    /// derived from the pattern severity.
    pub fn analyze_error(&self, err: impl fmt::Display, retry_count: u32) -> ErrorDetails {
        self.analyze_error_at(&err.to_string(), retry_count, Local::now())
    }

    fn analyze_error_at(&self, message: &str, retry_count: u32, now: DateTime<Local>) -> ErrorDetails {
        let pattern = match_error_pattern(message);

        let details = ErrorDetails {
            category: pattern.category,
            code: pattern.code.to_string(),
            message: message.to_string(),
            cause: pattern.cause.to_string(),
            suggestion: enhance_suggestion(pattern, retry_count),
            timestamp: now.format(TIMESTAMP_FORMAT).to_string(),
            retry_count,
        };

        self.update_summary(&details, now);
        crate::metrics::record_error(details.category.as_str(), &details.code);

        self.logger.log(
            severity_level(pattern.severity),
            format!("Error analysis: [{}] {}", details.code, details.category),
            format!("cause: {} | suggestion: {}", details.cause, details.suggestion),
        );

        details
    }

    fn update_summary(&self, details: &ErrorDetails, now: DateTime<Local>) {
        let mut summary = self
            .summaries
            .entry((details.category, details.code.clone()))
            .or_insert_with(|| ErrorSummary {
                category: details.category,
                code: details.code.clone(),
                count: 0,
                first_seen: now,
                last_seen: now,
                frequency: BTreeMap::new(),
                examples: Vec::new(),
                resolved: false,
            });

        summary.count += 1;
        summary.last_seen = now;
        *summary
            .frequency
            .entry(now.format(HOUR_BUCKET_FORMAT).to_string())
            .or_insert(0) += 1;

        if summary.examples.len() < MAX_EXAMPLES && !summary.examples.contains(&details.message) {
            summary.examples.push(details.message.clone());
        }
    }

    /// Copies of every summary, in no particular order
    pub fn summaries(&self) -> Vec<ErrorSummary> {
        self.summaries.iter().map(|entry| entry.value().clone()).collect()
    }

    pub fn summary(&self, category: ErrorCategory, code: &str) -> Option<ErrorSummary> {
        self.summaries
            .get(&(category, code.to_string()))
            .map(|entry| entry.value().clone())
    }

    /// Summaries by descending count; `limit == 0` returns all. Equal counts
    /// come back in no guaranteed order.
    pub fn top_errors(&self, limit: usize) -> Vec<ErrorSummary> {
        let mut summaries = self.summaries();
        summaries.sort_by(|a, b| b.count.cmp(&a.count));
        if limit > 0 {
            summaries.truncate(limit);
        }
        summaries
    }

    /// Returns whether a summary existed for the key
    pub fn mark_error_resolved(&self, category: ErrorCategory, code: &str) -> bool {
        let found = match self.summaries.get_mut(&(category, code.to_string())) {
            Some(mut summary) => {
                summary.resolved = true;
                true
            }
            None => false,
        };

        if found {
            self.logger
                .info(format!("Error marked as resolved: [{}] {}", code, category));
        }
        found
    }

    /// Drop summaries whose last occurrence is older than `max_age`; returns
    /// how many were removed.
    pub fn clear_old_errors(&self, max_age: Duration) -> usize {
        // an age beyond chrono's range keeps everything
        let Some(cutoff) = chrono::Duration::from_std(max_age)
            .ok()
            .and_then(|age| Local::now().checked_sub_signed(age))
        else {
            return 0;
        };

        let mut cleared = 0;
        self.summaries.retain(|_, summary| {
            let keep = summary.last_seen >= cutoff;
            if !keep {
                cleared += 1;
            }
            keep
        });

        if cleared > 0 {
            self.logger
                .info(format!("Cleared {} old error summaries", cleared));
        }
        cleared
    }

    pub fn error_trends(&self) -> ErrorTrends {
        let mut trends = ErrorTrends::default();

        for entry in self.summaries.iter() {
            let summary = entry.value();
            trends.total_errors += summary.count;
            *trends
                .error_types
                .entry(summary.category.as_str().to_string())
                .or_insert(0) += summary.count;
            if summary.resolved {
                trends.resolved_count += 1;
            }
            for (hour, count) in &summary.frequency {
                *trends.hourly_data.entry(hour.clone()).or_insert(0) += count;
            }
        }

        trends
    }
}

fn enhance_suggestion(pattern: &ErrorPattern, retry_count: u32) -> String {
    let mut suggestion = pattern.suggestion.to_string();

    match pattern.category {
        ErrorCategory::Network if retry_count > 10 => {
            suggestion.push_str(&format!(
                " | Retried {} times, check network stability",
                retry_count
            ));
        }
        ErrorCategory::Timeout if retry_count > 5 => {
            suggestion.push_str(&format!(
                " | {} consecutive timeouts, consider raising the timeout settings",
                retry_count
            ));
        }
        ErrorCategory::Authentication => {
            suggestion.push_str(
                " | Authentication errors rarely resolve by retrying, check the credentials now",
            );
        }
        _ => {}
    }

    suggestion
}

fn severity_level(severity: u8) -> LogLevel {
    match severity {
        5 => LogLevel::Error,
        4 => LogLevel::Warn,
        3 => LogLevel::Info,
        _ => LogLevel::Debug,
    }
}
