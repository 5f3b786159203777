//! Route handlers for the live session surface.

use std::convert::Infallible;
use std::time::Duration;

use axum::extract::{Multipart, Path, State};
use axum::http::{HeaderMap, StatusCode};
use axum::response::sse::{Event, KeepAlive, Sse};
use axum::Json;
use futures_util::Stream;
use serde::Deserialize;

use crate::error::ApiError;
use crate::live::{ChunkOutcome, LiveEvent, SegmentEvent};

use super::auth::authenticate;
use super::AppState;

#[derive(Debug, Deserialize)]
pub struct StartRequest {
    #[serde(default)]
    pub title: Option<String>,
    #[serde(default)]
    pub participants: Option<String>,
}

/// POST /live/start
pub async fn start(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(body): Json<StartRequest>,
) -> Result<(StatusCode, Json<serde_json::Value>), ApiError> {
    let user = authenticate(&state, &headers)?;
    let started = state
        .live
        .start(&user, body.title.as_deref(), body.participants.as_deref())?;
    Ok((
        StatusCode::CREATED,
        Json(serde_json::json!({
            "session_id": started.session_id,
            "title": started.title,
        })),
    ))
}

fn segment_event(seg: &SegmentEvent) -> Event {
    Event::default()
        .json_data(seg)
        .unwrap_or_else(|_| Event::default().data("{}"))
}

/// GET /live/{id}/stream — server-push event stream.
///
/// Emits `connected`, replays persisted segments in index order, then
/// streams new segments until `stopped`. A keepalive comment goes out every
/// 15 s while the channel is idle.
pub async fn stream(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(session_id): Path<String>,
) -> Result<Sse<impl Stream<Item = Result<Event, Infallible>>>, ApiError> {
    let user = authenticate(&state, &headers)?;
    let (replay, mut rx) = state.live.subscribe(&user, &session_id)?;

    let stream = async_stream::stream! {
        yield Ok(Event::default().event("connected").data("{}"));
        for seg in &replay {
            yield Ok(segment_event(seg));
        }
        loop {
            tokio::select! {
                received = rx.recv() => match received {
                    Some(LiveEvent::Segment(seg)) => yield Ok(segment_event(&seg)),
                    Some(LiveEvent::Stopped) => {
                        yield Ok(Event::default().event("stopped").data("{}"));
                        break;
                    }
                    None => break,
                },
                _ = tokio::time::sleep(Duration::from_secs(15)) => {
                    yield Ok(Event::default().comment("keepalive"));
                }
            }
        }
    };

    Ok(Sse::new(stream).keep_alive(
        KeepAlive::new()
            .interval(Duration::from_secs(15))
            .text("keepalive"),
    ))
}

/// POST /live/{id}/chunk — multipart audio + timestamp_ms.
pub async fn chunk(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(session_id): Path<String>,
    mut multipart: Multipart,
) -> Result<Json<serde_json::Value>, ApiError> {
    let user = authenticate(&state, &headers)?;

    let mut audio: Option<Vec<u8>> = None;
    let mut format_hint = "webm".to_string();
    let mut timestamp_ms: Option<i64> = None;

    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|e| ApiError::Validation(format!("invalid multipart body: {}", e)))?
    {
        let name = field.name().unwrap_or("").to_string();
        match name.as_str() {
            "audio" => {
                if let Some(file_name) = field.file_name() {
                    if let Some((_, ext)) = file_name.rsplit_once('.') {
                        format_hint = ext.to_lowercase();
                    }
                }
                let bytes = field
                    .bytes()
                    .await
                    .map_err(|e| ApiError::Validation(format!("audio field: {}", e)))?;
                audio = Some(bytes.to_vec());
            }
            "timestamp_ms" => {
                let text = field
                    .text()
                    .await
                    .map_err(|e| ApiError::Validation(format!("timestamp_ms field: {}", e)))?;
                let parsed = text.trim().parse::<i64>().map_err(|_| {
                    ApiError::Validation("timestamp_ms must be a non-negative integer".to_string())
                })?;
                timestamp_ms = Some(parsed);
            }
            _ => {}
        }
    }

    let audio = audio.ok_or_else(|| ApiError::Validation("audio field is required".to_string()))?;
    if audio.is_empty() {
        return Err(ApiError::Validation("audio field is empty".to_string()));
    }

    let outcome = state
        .live
        .ingest_chunk(&user, &session_id, audio, timestamp_ms, &format_hint)
        .await?;

    Ok(Json(match outcome {
        ChunkOutcome::Segment(index) => serde_json::json!({
            "ok": true,
            "segment_index": index,
        }),
        ChunkOutcome::Silent => serde_json::json!({
            "ok": true,
            "segment_index": null,
            "silent": true,
        }),
    }))
}

/// POST /live/{id}/stop
pub async fn stop(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(session_id): Path<String>,
) -> Result<Json<serde_json::Value>, ApiError> {
    let user = authenticate(&state, &headers)?;
    let outcome = state.live.stop(&user, &session_id).await?;
    Ok(Json(serde_json::json!({
        "meeting_id": outcome.meeting_id,
        "title": outcome.title,
        "message": outcome.message,
    })))
}

/// GET /live/{id}/status
pub async fn status(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(session_id): Path<String>,
) -> Result<Json<crate::live::SessionStatus>, ApiError> {
    let user = authenticate(&state, &headers)?;
    Ok(Json(state.live.status(&user, &session_id)?))
}

/// POST /live/{id}/memory-hints — read-only; never changes session state.
pub async fn memory_hints(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(session_id): Path<String>,
) -> Result<Json<serde_json::Value>, ApiError> {
    let user = authenticate(&state, &headers)?;
    let hints = state.live.memory_hints(&user, &session_id)?;
    Ok(Json(serde_json::json!({ "hints": hints })))
}
