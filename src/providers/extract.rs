//! LLM extraction provider.
//!
//! Sends one chat-completion message with a fixed token budget and returns
//! the raw model text. Callers never assume the model followed the schema —
//! output is always funnelled through the tolerant decoder.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use super::{truncate_body, ProviderError};
use crate::config::Config;

/// Token budget for one extraction call.
const MAX_COMPLETION_TOKENS: u32 = 2048;

/// Backend for deriving structured meeting artifacts from a transcript.
#[async_trait]
pub trait Extractor: Send + Sync {
    /// Send `prompt_prefix` + transcript to the model and return its raw
    /// text output.
    async fn extract(
        &self,
        prompt_prefix: &str,
        transcript: &str,
    ) -> Result<String, ProviderError>;
}

// ---------------------------------------------------------------------------
// Real backend
// ---------------------------------------------------------------------------

#[derive(Serialize)]
struct ChatRequest {
    model: String,
    messages: Vec<ChatMessage>,
    temperature: f32,
    max_tokens: u32,
}

#[derive(Serialize)]
struct ChatMessage {
    role: &'static str,
    content: String,
}

#[derive(Deserialize)]
struct ChatResponse {
    choices: Vec<ChatChoice>,
}

#[derive(Deserialize)]
struct ChatChoice {
    message: ChatMessageResponse,
}

#[derive(Deserialize)]
struct ChatMessageResponse {
    content: String,
}

/// OpenAI-compatible chat-completions client.
pub struct HttpExtractor {
    base_url: String,
    api_key: String,
    model: String,
    client: reqwest::Client,
}

impl HttpExtractor {
    pub fn new(api_key: String) -> Result<Self, ProviderError> {
        let base_url = std::env::var("EXTRACT_API_URL")
            .unwrap_or_else(|_| "https://api.openai.com/v1".to_string());
        let model =
            std::env::var("EXTRACT_MODEL").unwrap_or_else(|_| "gpt-4o-mini".to_string());
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(120))
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
impl Extractor for HttpExtractor {
    async fn extract(
        &self,
        prompt_prefix: &str,
        transcript: &str,
    ) -> Result<String, ProviderError> {
        let url = format!("{}/chat/completions", self.base_url.trim_end_matches('/'));
        let body = ChatRequest {
            model: self.model.clone(),
            messages: vec![ChatMessage {
                role: "user",
                content: format!("{}\n\n{}", prompt_prefix, transcript),
            }],
            temperature: 0.2,
            max_tokens: MAX_COMPLETION_TOKENS,
        };

        let res = self
            .client
            .post(&url)
            .bearer_auth(&self.api_key)
            .json(&body)
            .send()
            .await?;

        if !res.status().is_success() {
            let status = res.status().as_u16();
            let body = truncate_body(&res.text().await.unwrap_or_default());
            log::warn!("extraction API error {}: {}", status, body);
            return Err(ProviderError::Api { status, body });
        }

        let chat: ChatResponse = res.json().await?;
        let content = chat
            .choices
            .first()
            .map(|c| c.message.content.clone())
            .ok_or_else(|| ProviderError::BadResponse("no choices in response".to_string()))?;
        Ok(content)
    }
}

// ---------------------------------------------------------------------------
// Mock backend
// ---------------------------------------------------------------------------

/// Deterministic extraction backend returning a fixed, schema-conforming
/// record regardless of input.
pub struct MockExtractor;

#[async_trait]
impl Extractor for MockExtractor {
    async fn extract(
        &self,
        _prompt_prefix: &str,
        _transcript: &str,
    ) -> Result<String, ProviderError> {
        Ok(r#"{
  "action_items": [
    {"task": "Fix the authentication bug", "owner": "John", "deadline": "Friday"},
    {"task": "Draft the follow-up email", "owner": "Sarah", "deadline": "EOD"}
  ],
  "follow_up_email": "Hi all,\n\nThanks for joining. Action items: John fixes the authentication bug by Friday; Sarah drafts the follow-up email.\n\nBest",
  "summary": "Reviewed the dashboard redesign and outstanding authentication work.",
  "open_questions": ["When does the client want the onboarding metrics?"],
  "proposed_solutions": ["Ship the dashboard redesign once the auth bug is fixed"]
}"#
        .to_string())
    }
}

// ---------------------------------------------------------------------------
// Unconfigured stub
// ---------------------------------------------------------------------------

struct UnavailableExtractor;

#[async_trait]
impl Extractor for UnavailableExtractor {
    async fn extract(
        &self,
        _prompt_prefix: &str,
        _transcript: &str,
    ) -> Result<String, ProviderError> {
        Err(ProviderError::NotConfigured)
    }
}

/// Select the extraction backend from configuration: mock mode wins, then
/// the real client when a key is present, else the unconfigured stub.
pub fn build_extractor(config: &Config) -> Result<Arc<dyn Extractor>, ProviderError> {
    if config.mock_mode {
        log::info!("extraction: mock mode");
        return Ok(Arc::new(MockExtractor));
    }
    if let Some(key) = &config.extract_api_key {
        return Ok(Arc::new(HttpExtractor::new(key.clone())?));
    }
    log::warn!("extraction: no API key configured; provider unavailable");
    Ok(Arc::new(UnavailableExtractor))
}
