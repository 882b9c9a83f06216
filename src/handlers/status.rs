use axum::{extract::State, http::StatusCode, Json};

use crate::database::DbStatus;
use crate::server::AppState;

/// GET /healthz - process liveness, independent of the database
pub async fn health_check() -> StatusCode {
    StatusCode::OK
}

/// GET /api/status - probe the database and report its status
///
/// Connectivity problems are part of the body; the response is always 200.
pub async fn get_status(State(state): State<AppState>) -> Json<DbStatus> {
    Json(state.db.check_status().await)
}
