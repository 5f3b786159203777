//! Route handler for cloud-recording import.

use axum::extract::State;
use axum::http::{HeaderMap, StatusCode};
use axum::Json;

use crate::error::ApiError;
use crate::ingest::{self, ZoomImportRequest};

use super::auth::authenticate;
use super::AppState;

/// POST /zoom/import
pub async fn import(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(body): Json<ZoomImportRequest>,
) -> Result<(StatusCode, Json<serde_json::Value>), ApiError> {
    let user = authenticate(&state, &headers)?;
    let outcome = ingest::import_zoom_recording(
        &state.store,
        state.transcriber.as_ref(),
        &state.zoom,
        &user,
        body,
    )
    .await?;

    Ok((
        StatusCode::CREATED,
        Json(serde_json::json!({
            "id": outcome.id,
            "title": outcome.title,
            "transcript": outcome.transcript,
        })),
    ))
}
