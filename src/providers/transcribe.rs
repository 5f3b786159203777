//! Speech-to-text providers.
//!
//! The real backend ships audio blobs to an OpenAI-compatible
//! `/audio/transcriptions` endpoint as a multipart upload. The mock backend
//! cycles a fixed list of canned segments through a counter that resets on
//! session start, so live-pipeline tests are deterministic.
//!
//! Silent-result contract: a response whose trimmed text is empty means the
//! chunk was silent; callers record no segment for it.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;

use super::{truncate_body, ProviderError};
use crate::config::Config;

/// Backend for converting an audio blob into text.
#[async_trait]
pub trait Transcriber: Send + Sync {
    /// Transcribe one blob. `format_hint` is an extension-like string
    /// ("webm", "mp3", …) the provider needs to detect the container.
    /// Returns an empty string when nothing was detected.
    async fn transcribe(&self, audio: Vec<u8>, format_hint: &str) -> Result<String, ProviderError>;

    /// Notify the backend that a new live session is starting. The real
    /// backend is stateless; the mock resets its segment cursor.
    fn begin_session(&self) {}
}

/// Map a format hint to the MIME type the upload advertises.
fn mime_for_hint(hint: &str) -> &'static str {
    match hint {
        "mp3" => "audio/mpeg",
        "wav" => "audio/wav",
        "m4a" => "audio/mp4",
        "mp4" => "video/mp4",
        "webm" => "audio/webm",
        _ => "application/octet-stream",
    }
}

// ---------------------------------------------------------------------------
// Real backend
// ---------------------------------------------------------------------------

/// OpenAI-compatible transcription API client.
pub struct HttpTranscriber {
    base_url: String,
    api_key: String,
    model: String,
    client: reqwest::Client,
}

impl HttpTranscriber {
    pub fn new(api_key: String) -> Result<Self, ProviderError> {
        let base_url = std::env::var("TRANSCRIBE_API_URL")
            .unwrap_or_else(|_| "https://api.openai.com/v1".to_string());
        let model =
            std::env::var("TRANSCRIBE_MODEL").unwrap_or_else(|_| "whisper-1".to_string());
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(180))
            .build()?;
        Ok(Self {
            base_url,
            api_key,
            model,
            client,
        })
    }
}

#[async_trait]
impl Transcriber for HttpTranscriber {
    async fn transcribe(&self, audio: Vec<u8>, format_hint: &str) -> Result<String, ProviderError> {
        if audio.is_empty() {
            return Ok(String::new());
        }

        let url = format!(
            "{}/audio/transcriptions",
            self.base_url.trim_end_matches('/')
        );
        let part = reqwest::multipart::Part::bytes(audio)
            .file_name(format!("audio.{}", format_hint))
            .mime_str(mime_for_hint(format_hint))
            .map_err(|e| ProviderError::BadResponse(e.to_string()))?;
        let form = reqwest::multipart::Form::new()
            .part("file", part)
            .text("model", self.model.clone());

        let res = self
            .client
            .post(&url)
            .bearer_auth(&self.api_key)
            .multipart(form)
            .send()
            .await?;

        if !res.status().is_success() {
            let status = res.status().as_u16();
            let body = truncate_body(&res.text().await.unwrap_or_default());
            log::warn!("transcription API error {}: {}", status, body);
            return Err(ProviderError::Api { status, body });
        }

        let json: serde_json::Value = res.json().await?;
        let text = json
            .get("text")
            .and_then(|t| t.as_str())
            .unwrap_or("")
            .trim()
            .to_string();
        Ok(text)
    }
}

// ---------------------------------------------------------------------------
// Mock backend
// ---------------------------------------------------------------------------

/// Canned segments the mock cycles through.
const MOCK_SEGMENTS: &[&str] = &[
    "Okay, let's get started with today's agenda.",
    "The dashboard redesign shipped to staging yesterday.",
    "We still need to fix the authentication bug before Friday.",
    "Sarah will draft the follow-up email to the client.",
    "Let's circle back on the onboarding metrics next week.",
];

/// Deterministic transcription backend: returns canned segments from a fixed
/// cycling list, indexed by a counter that resets on session start.
pub struct MockTranscriber {
    segments: Vec<String>,
    cursor: AtomicUsize,
}

impl MockTranscriber {
    pub fn new() -> Self {
        Self::with_segments(MOCK_SEGMENTS.iter().map(|s| s.to_string()).collect())
    }

    /// Build with explicit segments. Used by tests that assert exact text.
    pub fn with_segments(segments: Vec<String>) -> Self {
        Self {
            segments,
            cursor: AtomicUsize::new(0),
        }
    }
}

impl Default for MockTranscriber {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Transcriber for MockTranscriber {
    async fn transcribe(
        &self,
        _audio: Vec<u8>,
        _format_hint: &str,
    ) -> Result<String, ProviderError> {
        if self.segments.is_empty() {
            return Ok(String::new());
        }
        let i = self.cursor.fetch_add(1, Ordering::SeqCst) % self.segments.len();
        Ok(self.segments[i].clone())
    }

    fn begin_session(&self) {
        self.cursor.store(0, Ordering::SeqCst);
    }
}

// ---------------------------------------------------------------------------
// Unconfigured stub
// ---------------------------------------------------------------------------

struct UnavailableTranscriber;

#[async_trait]
impl Transcriber for UnavailableTranscriber {
    async fn transcribe(
        &self,
        _audio: Vec<u8>,
        _format_hint: &str,
    ) -> Result<String, ProviderError> {
        Err(ProviderError::NotConfigured)
    }
}

/// Select the transcription backend from configuration: mock mode wins,
/// then the real client when a key is present, else the unconfigured stub.
pub fn build_transcriber(config: &Config) -> Result<Arc<dyn Transcriber>, ProviderError> {
    if config.mock_mode {
        log::info!("transcription: mock mode");
        return Ok(Arc::new(MockTranscriber::new()));
    }
    if let Some(key) = &config.transcribe_api_key {
        return Ok(Arc::new(HttpTranscriber::new(key.clone())?));
    }
    log::warn!("transcription: no API key configured; provider unavailable");
    Ok(Arc::new(UnavailableTranscriber))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_mock_cycles_and_resets() {
        let mock = MockTranscriber::with_segments(vec![
            "A".to_string(),
            "B".to_string(),
            "C".to_string(),
        ]);

        assert_eq!(mock.transcribe(vec![1], "webm").await.unwrap(), "A");
        assert_eq!(mock.transcribe(vec![1], "webm").await.unwrap(), "B");
        assert_eq!(mock.transcribe(vec![1], "webm").await.unwrap(), "C");
        // Wraps around
        assert_eq!(mock.transcribe(vec![1], "webm").await.unwrap(), "A");

        mock.begin_session();
        assert_eq!(
            mock.transcribe(vec![1], "webm").await.unwrap(),
            "A",
            "begin_session must reset the cursor"
        );
    }

    #[tokio::test]
    async fn test_unavailable_stub() {
        let stub = UnavailableTranscriber;
        let err = stub.transcribe(vec![1], "webm").await.unwrap_err();
        assert!(matches!(err, ProviderError::NotConfigured));
    }

    #[test]
    fn test_mime_mapping() {
        assert_eq!(mime_for_hint("mp3"), "audio/mpeg");
        assert_eq!(mime_for_hint("wav"), "audio/wav");
        assert_eq!(mime_for_hint("m4a"), "audio/mp4");
        assert_eq!(mime_for_hint("webm"), "audio/webm");
        assert_eq!(mime_for_hint("flac"), "application/octet-stream");
    }
}
