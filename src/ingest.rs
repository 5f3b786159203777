//! Meeting ingestion flows: direct file upload and cloud-recording import.
//!
//! Both flows share a tail: transcribe the audio, persist a meeting with
//! the transcript and an empty extraction record. The meeting-storage quota
//! is checked before any remote work (download, transcription) so provider
//! cost is never spent on a request that cannot be persisted.

use std::sync::Mutex;

use chrono::Utc;
use serde::{Deserialize, Serialize};

use crate::db::{DbUser, Store};
use crate::error::ApiError;
use crate::extraction::ExtractionRecord;
use crate::providers::Transcriber;
use crate::usage_gate;
use crate::zoom::ZoomClient;

/// Accepted upload containers.
pub const ALLOWED_EXTENSIONS: &[&str] = &["mp3", "wav", "m4a", "webm"];

/// Upload size cap: 100 MB.
pub const MAX_UPLOAD_BYTES: usize = 100 * 1024 * 1024;

/// Result of a completed ingestion.
#[derive(Debug, Clone, Serialize)]
pub struct IngestOutcome {
    pub id: String,
    pub title: String,
    pub transcript: String,
}

/// Body of a cloud-recording import request.
#[derive(Debug, Clone, Deserialize)]
pub struct ZoomImportRequest {
    pub meeting_id: String,
    pub recording_id: String,
    #[serde(default)]
    pub topic: Option<String>,
    #[serde(default)]
    pub start_time: Option<String>,
}

/// Validate an upload's extension and size. Returns the format hint.
pub fn validate_upload(filename: &str, size: usize) -> Result<String, ApiError> {
    let ext = filename
        .rsplit('.')
        .next()
        .filter(|e| *e != filename)
        .map(|e| e.to_lowercase())
        .unwrap_or_default();

    if !ALLOWED_EXTENSIONS.contains(&ext.as_str()) {
        return Err(ApiError::Validation(format!(
            "Unsupported audio format \".{}\". Allowed: mp3, wav, m4a, webm.",
            ext
        )));
    }
    if size == 0 {
        return Err(ApiError::Validation("Uploaded file is empty".to_string()));
    }
    if size > MAX_UPLOAD_BYTES {
        return Err(ApiError::Validation(
            "File too large (max 100 MB)".to_string(),
        ));
    }
    Ok(ext)
}

fn default_title() -> String {
    format!("Meeting {}", Utc::now().format("%Y-%m-%d %H:%M"))
}

/// Title derived from an uploaded filename, falling back to the dated
/// default.
fn title_from_filename(filename: &str) -> String {
    let stem = filename
        .rsplit('/')
        .next()
        .unwrap_or(filename)
        .rsplit_once('.')
        .map(|(stem, _)| stem)
        .unwrap_or(filename)
        .trim();
    if stem.is_empty() {
        default_title()
    } else {
        stem.to_string()
    }
}

/// Shared ingestion tail: transcribe, persist, return.
async fn transcribe_and_persist(
    store: &Mutex<Store>,
    transcriber: &dyn Transcriber,
    user: &DbUser,
    title: String,
    audio: Vec<u8>,
    format_hint: &str,
) -> Result<IngestOutcome, ApiError> {
    let transcript = transcriber
        .transcribe(audio, format_hint)
        .await
        .map_err(ApiError::from)?;

    let record = ExtractionRecord::default();
    let id = store
        .lock()
        .unwrap_or_else(|e| e.into_inner())
        .create_meeting(&user.id, Some(&title), transcript.trim(), &record.to_stored())?;

    log::info!("ingested meeting {} for user {}", id, user.id);
    Ok(IngestOutcome {
        id,
        title,
        transcript: transcript.trim().to_string(),
    })
}

/// File-upload flow. `filename` and `audio` come from the multipart body.
pub async fn upload_meeting_audio(
    store: &Mutex<Store>,
    transcriber: &dyn Transcriber,
    user: &DbUser,
    filename: &str,
    audio: Vec<u8>,
) -> Result<IngestOutcome, ApiError> {
    let format_hint = validate_upload(filename, audio.len())?;

    {
        let guard = store.lock().unwrap_or_else(|e| e.into_inner());
        if let Some(message) = usage_gate::check_meeting_quota(&guard, user)? {
            return Err(ApiError::Quota {
                code: "meeting_limit",
                message,
            });
        }
    }

    let title = title_from_filename(filename);
    transcribe_and_persist(store, transcriber, user, title, audio, &format_hint).await
}

/// Cloud-recording import flow: refresh the user's token if expired, look
/// up the recording metadata, download the selected file to a temp path,
/// then proceed as a file upload. The temp file is released on every exit
/// path by its RAII guard.
pub async fn import_zoom_recording(
    store: &Mutex<Store>,
    transcriber: &dyn Transcriber,
    zoom: &ZoomClient,
    user: &DbUser,
    request: ZoomImportRequest,
) -> Result<IngestOutcome, ApiError> {
    if request.meeting_id.trim().is_empty() || request.recording_id.trim().is_empty() {
        return Err(ApiError::Validation(
            "meeting_id and recording_id are required".to_string(),
        ));
    }

    {
        let guard = store.lock().unwrap_or_else(|e| e.into_inner());
        if let Some(message) = usage_gate::check_meeting_quota(&guard, user)? {
            return Err(ApiError::Quota {
                code: "meeting_limit",
                message,
            });
        }
    }

    let access_token = zoom.valid_access_token(store, user).await?;
    let file = zoom
        .find_recording_file(&access_token, &request.meeting_id, &request.recording_id)
        .await?;
    let format_hint = ZoomClient::format_hint(&file);

    let temp = zoom.download_recording(&access_token, &file).await?;
    let audio = std::fs::read(temp.path())
        .map_err(|e| ApiError::Upstream(format!("reading downloaded recording: {}", e)))?;

    let title = request
        .topic
        .as_deref()
        .map(str::trim)
        .filter(|t| !t.is_empty())
        .map(String::from)
        .unwrap_or_else(default_title);

    transcribe_and_persist(store, transcriber, user, title, audio, &format_hint).await
    // `temp` drops here, releasing the downloaded file on success and on
    // every earlier error return.
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::test_utils::test_store;
    use crate::providers::MockTranscriber;
    use std::sync::Arc;

    fn setup(plan: &str) -> (Mutex<Store>, DbUser, Arc<MockTranscriber>) {
        let store = test_store();
        let uid = store.create_user("ing@example.com", plan).unwrap();
        let user = store.find_user_by_id(&uid).unwrap().unwrap();
        let transcriber = Arc::new(MockTranscriber::with_segments(vec![
            "uploaded meeting text".to_string(),
            "second call".to_string(),
        ]));
        (Mutex::new(store), user, transcriber)
    }

    #[test]
    fn test_validate_upload_extensions() {
        assert_eq!(validate_upload("call.mp3", 10).unwrap(), "mp3");
        assert_eq!(validate_upload("call.WAV", 10).unwrap(), "wav");
        assert_eq!(validate_upload("call.m4a", 10).unwrap(), "m4a");
        assert_eq!(validate_upload("call.webm", 10).unwrap(), "webm");

        assert!(validate_upload("call.flac", 10).is_err());
        assert!(validate_upload("noextension", 10).is_err());
        assert!(validate_upload("call.mp3", 0).is_err());
        assert!(validate_upload("call.mp3", MAX_UPLOAD_BYTES + 1).is_err());
    }

    #[test]
    fn test_title_from_filename() {
        assert_eq!(title_from_filename("standup-recording.mp3"), "standup-recording");
        assert!(title_from_filename(".mp3").starts_with("Meeting "));
    }

    #[tokio::test]
    async fn test_upload_persists_meeting_with_empty_extraction() {
        let (store, user, transcriber) = setup("ltd");

        let outcome =
            upload_meeting_audio(&store, transcriber.as_ref(), &user, "standup.mp3", vec![1; 64])
                .await
                .unwrap();
        assert_eq!(outcome.title, "standup");
        assert_eq!(outcome.transcript, "uploaded meeting text");

        let guard = store.lock().unwrap();
        let meeting = guard.get_meeting_owned(&outcome.id, &user.id).unwrap().unwrap();
        assert_eq!(meeting.raw_notes, "uploaded meeting text");
        let record = ExtractionRecord::from_stored(&meeting.action_items);
        assert_eq!(record, ExtractionRecord::default());
    }

    #[tokio::test]
    async fn test_upload_quota_checked_before_transcription() {
        let (store, user, transcriber) = setup("free");
        for _ in 0..3 {
            store
                .lock()
                .unwrap()
                .create_meeting(&user.id, None, "", "{}")
                .unwrap();
        }

        let result =
            upload_meeting_audio(&store, transcriber.as_ref(), &user, "late.mp3", vec![1; 64])
                .await;
        assert!(matches!(
            result,
            Err(ApiError::Quota { code: "meeting_limit", .. })
        ));
        // The mock cursor never advanced — transcription did not run
        assert_eq!(
            transcriber.transcribe(vec![1], "mp3").await.unwrap(),
            "uploaded meeting text",
            "first mock segment should still be unconsumed"
        );
    }

    #[tokio::test]
    async fn test_zoom_import_validates_ids() {
        let (store, user, transcriber) = setup("ltd");
        let zoom = ZoomClient::from_env().unwrap();

        let result = import_zoom_recording(
            &store,
            transcriber.as_ref(),
            &zoom,
            &user,
            ZoomImportRequest {
                meeting_id: " ".to_string(),
                recording_id: "r1".to_string(),
                topic: None,
                start_time: None,
            },
        )
        .await;
        assert!(matches!(result, Err(ApiError::Validation(_))));
    }

    #[tokio::test]
    async fn test_zoom_import_requires_connection() {
        let (store, user, transcriber) = setup("ltd");
        let zoom = ZoomClient::from_env().unwrap();

        // No tokens on the user row → not connected
        let result = import_zoom_recording(
            &store,
            transcriber.as_ref(),
            &zoom,
            &user,
            ZoomImportRequest {
                meeting_id: "123".to_string(),
                recording_id: "r1".to_string(),
                topic: Some("Weekly".to_string()),
                start_time: None,
            },
        )
        .await;
        assert!(matches!(result, Err(ApiError::Validation(_))));
    }
}
