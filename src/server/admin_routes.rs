//! Administrative surface.
//!
//! The admin is a single user matched by configured email equality — not a
//! role system. The only operation here is the documented lifetime-flag
//! override, which runs the store's drop-guard → update → recreate-guard
//! sequence inside one exclusive transaction.

use axum::extract::{Path, State};
use axum::http::HeaderMap;
use axum::Json;

use crate::error::ApiError;

use super::auth::authenticate;
use super::AppState;

/// POST /admin/users/{id}/clear-lifetime
pub async fn clear_lifetime(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(user_id): Path<String>,
) -> Result<Json<serde_json::Value>, ApiError> {
    let caller = authenticate(&state, &headers)?;
    if !state.config.is_admin_email(&caller.email) {
        return Err(ApiError::NotAdmin);
    }

    let store = state.store.lock().unwrap_or_else(|e| e.into_inner());
    if store.find_user_by_id(&user_id)?.is_none() {
        return Err(ApiError::NotFound);
    }
    store.admin_clear_lifetime(&user_id)?;
    Ok(Json(serde_json::json!({ "ok": true })))
}
