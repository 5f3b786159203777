//! Live session manager: the per-user session state machine, chunk
//! ingestion, the push-channel registry, and stop-time finalization.
//!
//! A session is pinned to this process. The store mutex serialises segment
//! index allocation, and events are published while that mutex is still
//! held, so subscribers observe strictly increasing `segment_index` per
//! session. Per-chunk failures are isolated: they surface only to the chunk
//! uploader and never terminate the session.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::sync::mpsc;

use crate::db::{
    DbLiveSession, DbUser, SessionStart, Store, SESSION_ACTIVE, SESSION_COMPLETED, SESSION_FAILED,
};
use crate::error::ApiError;
use crate::extraction::{decode_tolerant, ExtractionRecord, EXTRACTION_PROMPT};
use crate::intelligence::insights::{compute_memory_hints, MemoryHint};
use crate::providers::{Extractor, Transcriber};
use crate::usage_gate;

/// Segments considered when building live memory hints.
const HINT_CONTEXT_SEGMENTS: i64 = 24;
/// Recent meetings scanned for memory hints.
const HINT_CANDIDATE_MEETINGS: i64 = 20;

/// One event on a session's push channel.
#[derive(Debug, Clone)]
pub enum LiveEvent {
    Segment(SegmentEvent),
    Stopped,
}

/// Wire payload for a segment event.
#[derive(Debug, Clone, Serialize)]
pub struct SegmentEvent {
    pub segment_index: i64,
    pub text: String,
    pub timestamp_ms: i64,
    pub speaker: String,
    pub is_final: bool,
}

/// Outcome of one chunk upload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChunkOutcome {
    /// The recognizer returned empty text; no segment was allocated.
    Silent,
    /// A segment was persisted and fanned out at this index.
    Segment(i64),
}

/// Response data for a successful start.
#[derive(Debug, Clone, Serialize)]
pub struct StartedSession {
    pub session_id: String,
    pub title: String,
}

/// Response data for stop.
#[derive(Debug, Clone, Serialize)]
pub struct StopOutcome {
    pub meeting_id: Option<String>,
    pub title: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

/// Session status payload.
#[derive(Debug, Clone, Serialize)]
pub struct SessionStatus {
    pub session_id: String,
    pub status: String,
    pub title: String,
    pub started_at: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ended_at: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub meeting_id: Option<String>,
    pub segment_count: i64,
}

pub struct LiveManager {
    store: Arc<Mutex<Store>>,
    transcriber: Arc<dyn Transcriber>,
    extractor: Arc<dyn Extractor>,
    /// At most one subscriber per active session. A new subscription
    /// replaces the old entry; the replaced channel closes, ending the
    /// earlier stream.
    subscribers: Mutex<HashMap<String, mpsc::UnboundedSender<LiveEvent>>>,
}

impl LiveManager {
    pub fn new(
        store: Arc<Mutex<Store>>,
        transcriber: Arc<dyn Transcriber>,
        extractor: Arc<dyn Extractor>,
    ) -> Self {
        Self {
            store,
            transcriber,
            extractor,
            subscribers: Mutex::new(HashMap::new()),
        }
    }

    fn store(&self) -> std::sync::MutexGuard<'_, Store> {
        self.store.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Send an event to the session's subscriber, dropping the registry
    /// entry when the receiver is gone. Callers publishing segments hold the
    /// store guard across this call to preserve index order.
    fn publish(&self, session_id: &str, event: LiveEvent) {
        let mut subs = self.subscribers.lock().unwrap_or_else(|e| e.into_inner());
        if let Some(tx) = subs.get(session_id) {
            if tx.send(event).is_err() {
                subs.remove(session_id);
            }
        }
    }

    /// Start a live session for `user`.
    ///
    /// Guards, in order: the meeting-storage quota (stop would persist a
    /// meeting), then the single-active-session rule. The second start for
    /// a user returns the existing session id so the client can attach.
    pub fn start(
        &self,
        user: &DbUser,
        title: Option<&str>,
        participants: Option<&str>,
    ) -> Result<StartedSession, ApiError> {
        let title = match title.map(str::trim).filter(|t| !t.is_empty()) {
            Some(t) => t.to_string(),
            None => format!("Meeting {}", Utc::now().format("%Y-%m-%d %H:%M")),
        };

        let store = self.store();

        if let Some(message) = usage_gate::check_meeting_quota(&store, user)? {
            return Err(ApiError::Quota {
                code: "meeting_limit",
                message,
            });
        }

        let started =
            store.create_live_session(&user.id, &title, participants.unwrap_or(""))?;
        match started {
            SessionStart::Created(session_id) => {
                self.transcriber.begin_session();
                log::info!("live session {} started for user {}", session_id, user.id);
                Ok(StartedSession { session_id, title })
            }
            SessionStart::AlreadyActive(existing) => Err(ApiError::SessionActive(existing)),
        }
    }

    /// Ingest one audio chunk for an active session.
    ///
    /// Transcription happens outside the store lock; the segment insert and
    /// the push share one critical section so delivery order matches index
    /// order. A transcription failure leaves the session active.
    pub async fn ingest_chunk(
        &self,
        user: &DbUser,
        session_id: &str,
        audio: Vec<u8>,
        timestamp_ms: Option<i64>,
        format_hint: &str,
    ) -> Result<ChunkOutcome, ApiError> {
        if matches!(timestamp_ms, Some(t) if t < 0) {
            return Err(ApiError::Validation(
                "timestamp_ms must be a non-negative integer".to_string(),
            ));
        }

        let session = self.fetch_owned(user, session_id)?;
        if session.status != SESSION_ACTIVE {
            return Err(ApiError::Validation("Session is not active".to_string()));
        }

        let text = self
            .transcriber
            .transcribe(audio, format_hint)
            .await
            .map_err(ApiError::from)?;
        if text.trim().is_empty() {
            return Ok(ChunkOutcome::Silent);
        }

        let timestamp_ms =
            timestamp_ms.unwrap_or_else(|| elapsed_ms_since(&session.started_at));

        let store = self.store();
        let index = store.append_segment(session_id, text.trim(), timestamp_ms, "Speaker")?;
        self.publish(
            session_id,
            LiveEvent::Segment(SegmentEvent {
                segment_index: index,
                text: text.trim().to_string(),
                timestamp_ms,
                speaker: "Speaker".to_string(),
                is_final: true,
            }),
        );
        drop(store);

        Ok(ChunkOutcome::Segment(index))
    }

    /// Subscribe to a session's push channel.
    ///
    /// Returns the already-persisted segments (replayed in index order) and
    /// the receiver for subsequent events. Registration and the replay read
    /// share the store lock, so nothing is missed or duplicated in between.
    pub fn subscribe(
        &self,
        user: &DbUser,
        session_id: &str,
    ) -> Result<(Vec<SegmentEvent>, mpsc::UnboundedReceiver<LiveEvent>), ApiError> {
        let session = self.fetch_owned(user, session_id)?;
        if session.status != SESSION_ACTIVE {
            return Err(ApiError::Validation("Session is not active".to_string()));
        }

        let store = self.store();
        let (tx, rx) = mpsc::unbounded_channel();
        self.subscribers
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .insert(session_id.to_string(), tx);

        let replay = store
            .list_segments_ordered(session_id)?
            .into_iter()
            .map(|s| SegmentEvent {
                segment_index: s.segment_index,
                text: s.text,
                timestamp_ms: s.timestamp_ms,
                speaker: s.speaker,
                is_final: s.is_final,
            })
            .collect();
        drop(store);

        Ok((replay, rx))
    }

    /// Stop a session: finalize, extract, persist the meeting, close the
    /// push channel.
    ///
    /// With zero segments the session fails and no meeting row is written.
    /// Extraction failures are swallowed into an empty record — the meeting
    /// is still saved with its transcript.
    pub async fn stop(&self, user: &DbUser, session_id: &str) -> Result<StopOutcome, ApiError> {
        let session = self.fetch_owned(user, session_id)?;
        if session.status != SESSION_ACTIVE {
            return Err(ApiError::Validation("Session is not active".to_string()));
        }

        let segments = self.store().list_segments_ordered(session_id)?;

        if segments.is_empty() {
            let finalized = self.finalize_if_active(session_id, SESSION_FAILED, None)?;
            if !finalized {
                return Err(ApiError::Validation("Session is not active".to_string()));
            }
            self.close_channel(session_id);
            log::info!("live session {} failed: no segments captured", session_id);
            return Ok(StopOutcome {
                meeting_id: None,
                title: session.title,
                message: Some("No transcript was captured.".to_string()),
            });
        }

        let transcript = segments
            .iter()
            .map(|s| s.text.as_str())
            .collect::<Vec<_>>()
            .join("\n\n");

        let record = self.run_extraction(user, &transcript).await;

        let meeting_id = {
            let store = self.store();
            store.with_transaction(|s| {
                if !s.session_is_active(session_id)? {
                    return Ok(None);
                }
                let meeting_id = s.create_meeting(
                    &user.id,
                    Some(&session.title),
                    &transcript,
                    &record.to_stored(),
                )?;
                s.finalize_live_session(session_id, SESSION_COMPLETED, Some(&meeting_id))?;
                Ok(Some(meeting_id))
            })?
        };
        let Some(meeting_id) = meeting_id else {
            return Err(ApiError::Validation("Session is not active".to_string()));
        };

        self.close_channel(session_id);
        log::info!(
            "live session {} completed with meeting {}",
            session_id,
            meeting_id
        );

        Ok(StopOutcome {
            meeting_id: Some(meeting_id),
            title: session.title,
            message: None,
        })
    }

    /// Current status plus segment count.
    pub fn status(&self, user: &DbUser, session_id: &str) -> Result<SessionStatus, ApiError> {
        let session = self.fetch_owned(user, session_id)?;
        let segment_count = self.store().segment_count(session_id)?;
        Ok(SessionStatus {
            session_id: session.id,
            status: session.status,
            title: session.title,
            started_at: session.started_at,
            ended_at: session.ended_at,
            meeting_id: session.meeting_id,
            segment_count,
        })
    }

    /// Read-only memory hints for an active session: recent live keywords
    /// matched against the user's most recent meetings. Never changes
    /// session state.
    pub fn memory_hints(
        &self,
        user: &DbUser,
        session_id: &str,
    ) -> Result<Vec<MemoryHint>, ApiError> {
        let session = self.fetch_owned(user, session_id)?;
        if session.status != SESSION_ACTIVE {
            return Err(ApiError::Validation("Session is not active".to_string()));
        }

        let store = self.store();
        let recent = store.last_segments(session_id, HINT_CONTEXT_SEGMENTS)?;
        let context = recent
            .iter()
            .map(|s| s.text.as_str())
            .collect::<Vec<_>>()
            .join(" ");
        let candidates = store.list_meetings_before_owned(
            &user.id,
            &Utc::now().to_rfc3339(),
            HINT_CANDIDATE_MEETINGS,
        )?;
        drop(store);

        Ok(compute_memory_hints(&context, &candidates))
    }

    // ---------------------------------------------------------------------
    // Internals
    // ---------------------------------------------------------------------

    fn fetch_owned(&self, user: &DbUser, session_id: &str) -> Result<DbLiveSession, ApiError> {
        self.store()
            .get_live_session_owned(session_id, &user.id)?
            .ok_or(ApiError::NotFound)
    }

    /// Finalize inside a transaction that re-checks the session is still
    /// active, so a lost stop race cannot double-finalize.
    fn finalize_if_active(
        &self,
        session_id: &str,
        status: &str,
        meeting_id: Option<&str>,
    ) -> Result<bool, ApiError> {
        let store = self.store();
        let finalized = store.with_transaction(|s| {
            if !s.session_is_active(session_id)? {
                return Ok(false);
            }
            s.finalize_live_session(session_id, status, meeting_id)?;
            Ok(true)
        })?;
        Ok(finalized)
    }

    /// Run gated extraction over the final transcript. Any provider, decode,
    /// or quota obstacle yields the empty record — stop never fails on
    /// extraction.
    async fn run_extraction(&self, user: &DbUser, transcript: &str) -> ExtractionRecord {
        let allowed = {
            let store = self.store();
            match usage_gate::check(&store, user) {
                Ok(check) => check.allowed,
                Err(e) => {
                    log::warn!("usage check failed at stop: {}", e);
                    false
                }
            }
        };
        if !allowed {
            log::info!("extract quota exhausted for user {}; saving transcript only", user.id);
            return ExtractionRecord::default();
        }

        let raw = match self.extractor.extract(EXTRACTION_PROMPT, transcript).await {
            Ok(raw) => raw,
            Err(e) => {
                log::warn!("extraction failed at stop: {}", e);
                return ExtractionRecord::default();
            }
        };
        match decode_tolerant(&raw) {
            Ok(record) => {
                let store = self.store();
                if let Err(e) = usage_gate::consume(&store, user) {
                    log::warn!("usage consume failed after extraction: {}", e);
                }
                record
            }
            Err(e) => {
                log::warn!("extraction output rejected at stop: {}", e);
                ExtractionRecord::default()
            }
        }
    }

    fn close_channel(&self, session_id: &str) {
        self.publish(session_id, LiveEvent::Stopped);
        self.subscribers
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .remove(session_id);
    }
}

/// Milliseconds elapsed since an RFC 3339 timestamp; 0 when unparseable.
fn elapsed_ms_since(started_at: &str) -> i64 {
    DateTime::parse_from_rfc3339(started_at)
        .map(|t| (Utc::now() - t.with_timezone(&Utc)).num_milliseconds().max(0))
        .unwrap_or(0)
}
