//! Log buffer API handlers

use axum::extract::{Query, State};
use axum::Json;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

use crate::database::{LogEntry, LogLevel, LogSummary, LoggerSettings};
use crate::error::AppError;
use crate::server::AppState;

/// Query parameters for logs API
#[derive(Debug, Deserialize)]
pub struct LogQueryParams {
    /// Maximum number of entries, newest kept; non-positive means the default
    pub limit: Option<i64>,

    /// Only entries of exactly this level
    pub level: Option<String>,
}

const DEFAULT_LIMIT: usize = 50;

/// Positive values win, anything else falls back to `default`
pub(crate) fn positive_or(value: Option<i64>, default: usize) -> usize {
    value
        .filter(|v| *v > 0)
        .and_then(|v| usize::try_from(v).ok())
        .unwrap_or(default)
}

#[derive(Debug, Deserialize)]
pub struct SetLevelParams {
    pub level: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct LogSettingsParams {
    pub max_entries: Option<usize>,
    pub suppress_duplicates: Option<bool>,
}

#[derive(Debug, Serialize)]
pub struct LogsResponse {
    pub logs: Vec<LogEntry>,
    pub count: usize,
}

fn parse_level(raw: &str) -> Result<LogLevel, AppError> {
    raw.parse().map_err(AppError::BadRequest)
}

/// GET /api/logs - recent entries, oldest first
///
/// Example: GET /api/logs?level=error&limit=10
pub async fn get_logs(
    State(state): State<AppState>,
    Query(params): Query<LogQueryParams>,
) -> Result<Json<LogsResponse>, AppError> {
    let level = match params.level.as_deref() {
        None | Some("") => None,
        Some(raw) => Some(parse_level(raw)?),
    };

    let limit = positive_or(params.limit, DEFAULT_LIMIT);
    let logs = state.db.logger().query(level, limit);
    let count = logs.len();

    Ok(Json(LogsResponse { logs, count }))
}

/// GET /api/logs/summary
pub async fn get_log_summary(State(state): State<AppState>) -> Json<LogSummary> {
    Json(state.db.logger().summary())
}

/// POST /api/logs/level?level=debug
pub async fn set_log_level(
    State(state): State<AppState>,
    Query(params): Query<SetLevelParams>,
) -> Result<Json<Value>, AppError> {
    let raw = params
        .level
        .filter(|level| !level.is_empty())
        .ok_or_else(|| AppError::BadRequest("level parameter is required".to_string()))?;
    let level = parse_level(&raw)?;

    state.db.logger().set_level(level);
    Ok(Json(json!({ "level": level })))
}

/// POST /api/logs/settings?max_entries=200&suppress_duplicates=false
///
/// Both parameters are optional; the response carries the settings in effect.
pub async fn update_log_settings(
    State(state): State<AppState>,
    Query(params): Query<LogSettingsParams>,
) -> Result<Json<LoggerSettings>, AppError> {
    let logger = state.db.logger();
    if let Some(max_entries) = params.max_entries {
        if max_entries == 0 {
            return Err(AppError::BadRequest(
                "max_entries must be at least 1".to_string(),
            ));
        }
        logger.set_max_entries(max_entries);
    }
    if let Some(suppress) = params.suppress_duplicates {
        logger.set_suppress_duplicates(suppress);
    }

    Ok(Json(logger.settings()))
}

/// POST /api/logs/clear
pub async fn clear_logs(State(state): State<AppState>) -> Json<Value> {
    state.db.logger().clear();
    Json(json!({ "cleared": true }))
}
