//! Error statistics API handlers

use axum::extract::{Query, State};
use axum::Json;
use serde::Deserialize;
use serde_json::{json, Value};
use std::time::Duration;

use crate::database::{ErrorCategory, ErrorSummary, ErrorTrends};
use super::logs::positive_or;
use crate::error::AppError;
use crate::server::AppState;

#[derive(Debug, Deserialize)]
pub struct TopErrorsParams {
    pub limit: Option<i64>,
}

const DEFAULT_TOP_LIMIT: usize = 10;

#[derive(Debug, Deserialize)]
pub struct ResolveParams {
    pub category: Option<String>,
    pub code: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct ClearErrorsParams {
    /// Purge summaries not seen for this many hours; non-positive means the default
    pub hours: Option<i64>,
}

const DEFAULT_MAX_AGE_HOURS: usize = 24;

/// GET /api/errors - every summary, unordered
pub async fn get_errors(State(state): State<AppState>) -> Json<Vec<ErrorSummary>> {
    Json(state.db.analyzer().summaries())
}

/// GET /api/errors/top?limit=10 - most frequent first
pub async fn get_top_errors(
    State(state): State<AppState>,
    Query(params): Query<TopErrorsParams>,
) -> Json<Vec<ErrorSummary>> {
    let limit = positive_or(params.limit, DEFAULT_TOP_LIMIT);
    Json(state.db.analyzer().top_errors(limit))
}

/// GET /api/errors/trends
pub async fn get_error_trends(State(state): State<AppState>) -> Json<ErrorTrends> {
    Json(state.db.analyzer().error_trends())
}

/// POST /api/errors/resolve?category=network&code=NET_001
pub async fn resolve_error(
    State(state): State<AppState>,
    Query(params): Query<ResolveParams>,
) -> Result<Json<Value>, AppError> {
    let (Some(category), Some(code)) = (params.category, params.code) else {
        return Err(AppError::BadRequest(
            "category and code parameters are required".to_string(),
        ));
    };
    let category: ErrorCategory = category.parse().map_err(AppError::BadRequest)?;

    let resolved = state.db.analyzer().mark_error_resolved(category, &code);
    Ok(Json(json!({
        "category": category,
        "code": code,
        "resolved": resolved,
    })))
}

/// POST /api/errors/clear?hours=24
pub async fn clear_old_errors(
    State(state): State<AppState>,
    Query(params): Query<ClearErrorsParams>,
) -> Json<Value> {
    let hours = positive_or(params.hours, DEFAULT_MAX_AGE_HOURS);
    let max_age = Duration::from_secs((hours as u64).saturating_mul(3600));
    let removed = state.db.analyzer().clear_old_errors(max_age);
    Json(json!({ "removed": removed, "hours": hours }))
}
