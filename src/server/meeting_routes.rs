//! Route handlers for the meetings surface: upload, extraction, CRUD,
//! insights, and the what-changed diff.

use axum::extract::{Multipart, Path, State};
use axum::http::{HeaderMap, StatusCode};
use axum::Json;
use serde::Deserialize;

use crate::db::DbMeeting;
use crate::error::ApiError;
use crate::extraction::{decode_tolerant, ExtractionRecord, EXTRACTION_PROMPT};
use crate::ingest;
use crate::intelligence::{compute_insights, compute_what_changed, InsightCard};
use crate::usage_gate;

use super::auth::authenticate;
use super::AppState;

/// How many prior meetings feed insight computation.
const INSIGHT_PRIOR_LIMIT: i64 = 100;

/// Wire form of a meeting: the stored extraction blob is parsed on read.
fn meeting_json(meeting: &DbMeeting) -> serde_json::Value {
    serde_json::json!({
        "id": meeting.id,
        "title": meeting.title,
        "raw_notes": meeting.raw_notes,
        "action_items": ExtractionRecord::from_stored(&meeting.action_items),
        "created_at": meeting.created_at,
        "updated_at": meeting.updated_at,
    })
}

/// POST /meetings/upload — multipart audio file.
pub async fn upload(
    State(state): State<AppState>,
    headers: HeaderMap,
    mut multipart: Multipart,
) -> Result<(StatusCode, Json<serde_json::Value>), ApiError> {
    let user = authenticate(&state, &headers)?;

    let mut filename = String::new();
    let mut audio: Option<Vec<u8>> = None;
    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|e| ApiError::Validation(format!("invalid multipart body: {}", e)))?
    {
        if field.name().unwrap_or("") == "audio" {
            filename = field.file_name().unwrap_or("upload").to_string();
            let bytes = field
                .bytes()
                .await
                .map_err(|e| ApiError::Validation(format!("audio field: {}", e)))?;
            audio = Some(bytes.to_vec());
        }
    }
    let audio = audio.ok_or_else(|| ApiError::Validation("audio field is required".to_string()))?;

    let outcome = ingest::upload_meeting_audio(
        &state.store,
        state.transcriber.as_ref(),
        &user,
        &filename,
        audio,
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

#[derive(Debug, Deserialize)]
pub struct ExtractRequest {
    pub notes: String,
}

/// POST /meetings/extract — run the extraction pipeline over raw notes.
///
/// Gated by the per-user extract quota; the counter increments only after
/// a successful extraction and decode.
pub async fn extract(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(body): Json<ExtractRequest>,
) -> Result<Json<ExtractionRecord>, ApiError> {
    let user = authenticate(&state, &headers)?;
    if body.notes.trim().is_empty() {
        return Err(ApiError::Validation("notes must not be empty".to_string()));
    }

    {
        let store = state.store.lock().unwrap_or_else(|e| e.into_inner());
        let check = usage_gate::check(&store, &user)?;
        if !check.allowed {
            return Err(ApiError::Quota {
                code: "limit_reached",
                message: check
                    .message
                    .unwrap_or_else(|| "Extract limit reached.".to_string()),
            });
        }
    }

    let raw = state
        .extractor
        .extract(EXTRACTION_PROMPT, body.notes.trim())
        .await?;
    let record = decode_tolerant(&raw).map_err(|_| ApiError::Decode)?;

    {
        let store = state.store.lock().unwrap_or_else(|e| e.into_inner());
        usage_gate::consume(&store, &user)?;
    }

    Ok(Json(record))
}

#[derive(Debug, Deserialize)]
pub struct CreateMeetingRequest {
    #[serde(default)]
    pub title: Option<String>,
    pub raw_notes: String,
    #[serde(default)]
    pub action_items: ExtractionRecord,
}

/// POST /meetings — manual save.
pub async fn create(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(body): Json<CreateMeetingRequest>,
) -> Result<(StatusCode, Json<serde_json::Value>), ApiError> {
    let user = authenticate(&state, &headers)?;
    if body.raw_notes.trim().is_empty() {
        return Err(ApiError::Validation("raw_notes must not be empty".to_string()));
    }

    let store = state.store.lock().unwrap_or_else(|e| e.into_inner());
    if let Some(message) = usage_gate::check_meeting_quota(&store, &user)? {
        return Err(ApiError::Quota {
            code: "meeting_limit",
            message,
        });
    }

    let id = store.create_meeting(
        &user.id,
        body.title.as_deref().map(str::trim).filter(|t| !t.is_empty()),
        body.raw_notes.trim(),
        &body.action_items.to_stored(),
    )?;
    Ok((StatusCode::CREATED, Json(serde_json::json!({ "id": id }))))
}

/// GET /meetings
pub async fn list(
    State(state): State<AppState>,
    headers: HeaderMap,
) -> Result<Json<Vec<serde_json::Value>>, ApiError> {
    let user = authenticate(&state, &headers)?;
    let store = state.store.lock().unwrap_or_else(|e| e.into_inner());
    let meetings = store.list_meetings_owned(&user.id)?;
    Ok(Json(meetings.iter().map(meeting_json).collect()))
}

/// GET /meetings/{id}
pub async fn get(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(id): Path<String>,
) -> Result<Json<serde_json::Value>, ApiError> {
    let user = authenticate(&state, &headers)?;
    let store = state.store.lock().unwrap_or_else(|e| e.into_inner());
    let meeting = store
        .get_meeting_owned(&id, &user.id)?
        .ok_or(ApiError::NotFound)?;
    Ok(Json(meeting_json(&meeting)))
}

#[derive(Debug, Deserialize)]
pub struct TranscriptPatch {
    pub transcript: String,
}

/// PATCH /meetings/{id}/transcript
pub async fn patch_transcript(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(id): Path<String>,
    Json(body): Json<TranscriptPatch>,
) -> Result<Json<serde_json::Value>, ApiError> {
    let user = authenticate(&state, &headers)?;
    let store = state.store.lock().unwrap_or_else(|e| e.into_inner());
    if !store.update_meeting_transcript(&id, &user.id, &body.transcript)? {
        return Err(ApiError::NotFound);
    }
    Ok(Json(serde_json::json!({ "ok": true })))
}

/// PATCH /meetings/{id}/extraction — the body is a full extraction record,
/// written as a unit.
pub async fn patch_extraction(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(id): Path<String>,
    Json(body): Json<ExtractionRecord>,
) -> Result<Json<serde_json::Value>, ApiError> {
    let user = authenticate(&state, &headers)?;
    let store = state.store.lock().unwrap_or_else(|e| e.into_inner());
    if !store.update_meeting_extraction(&id, &user.id, &body.to_stored())? {
        return Err(ApiError::NotFound);
    }
    Ok(Json(serde_json::json!({ "ok": true })))
}

/// DELETE /meetings/{id}
pub async fn delete(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(id): Path<String>,
) -> Result<Json<serde_json::Value>, ApiError> {
    let user = authenticate(&state, &headers)?;
    let store = state.store.lock().unwrap_or_else(|e| e.into_inner());
    if !store.delete_meeting_owned(&id, &user.id)? {
        return Err(ApiError::NotFound);
    }
    Ok(Json(serde_json::json!({ "ok": true })))
}

/// GET /meetings/{id}/insights
///
/// Also feeds the unresolved-items card into `tracked_issues`, deduplicated
/// against the user's open issues.
pub async fn insights(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(id): Path<String>,
) -> Result<Json<serde_json::Value>, ApiError> {
    let user = authenticate(&state, &headers)?;
    let store = state.store.lock().unwrap_or_else(|e| e.into_inner());
    let meeting = store
        .get_meeting_owned(&id, &user.id)?
        .ok_or(ApiError::NotFound)?;
    let prior =
        store.list_meetings_before_owned(&user.id, &meeting.created_at, INSIGHT_PRIOR_LIMIT)?;

    let cards = compute_insights(&meeting, &prior);

    for card in &cards {
        if let InsightCard::UnresolvedItems { items, .. } = card {
            for item in items {
                store.upsert_tracked_issue(
                    &user.id,
                    &item.task,
                    None,
                    Some(&item.source_meeting_id),
                    Some(&item.source_meeting_title),
                )?;
            }
        }
    }

    let message = prior
        .is_empty()
        .then(|| "No prior meetings yet — insights appear once there is history.".to_string());
    Ok(Json(serde_json::json!({
        "meeting_id": meeting.id,
        "insights": cards,
        "message": message,
    })))
}

/// GET /meetings/{id}/whatchanged
pub async fn whatchanged(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(id): Path<String>,
) -> Result<Json<crate::intelligence::WhatChanged>, ApiError> {
    let user = authenticate(&state, &headers)?;
    let store = state.store.lock().unwrap_or_else(|e| e.into_inner());
    let meeting = store
        .get_meeting_owned(&id, &user.id)?
        .ok_or(ApiError::NotFound)?;
    let prior = store.list_meetings_before_owned(&user.id, &meeting.created_at, 1)?;
    Ok(Json(compute_what_changed(&meeting, prior.first())))
}
