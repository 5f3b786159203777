//! Route handlers for tracked carry-over issues.

use axum::extract::{Path, State};
use axum::http::HeaderMap;
use axum::Json;

use crate::db::DbTrackedIssue;
use crate::error::ApiError;

use super::auth::authenticate;
use super::AppState;

/// GET /issues — the user's tracked issues, unresolved first.
pub async fn list(
    State(state): State<AppState>,
    headers: HeaderMap,
) -> Result<Json<Vec<DbTrackedIssue>>, ApiError> {
    let user = authenticate(&state, &headers)?;
    let store = state.store.lock().unwrap_or_else(|e| e.into_inner());
    Ok(Json(store.list_tracked_issues(&user.id)?))
}

/// POST /issues/{id}/toggle — flip resolution state.
pub async fn toggle(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(id): Path<String>,
) -> Result<Json<serde_json::Value>, ApiError> {
    let user = authenticate(&state, &headers)?;
    let store = state.store.lock().unwrap_or_else(|e| e.into_inner());
    let resolved = store
        .toggle_tracked_issue(&id, &user.id)?
        .ok_or(ApiError::NotFound)?;
    Ok(Json(serde_json::json!({ "ok": true, "resolved": resolved })))
}
