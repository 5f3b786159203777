//! Remote provider clients: speech-to-text and LLM extraction.
//!
//! Each provider is a trait with three implementations: a real HTTP client,
//! a deterministic mock (selected by `MOCK_MODE`), and an unconfigured stub
//! that fails with `ProviderError::NotConfigured`. Mock mode is a
//! first-class test harness affordance — full-pipeline tests run against it
//! without network.

use thiserror::Error;

mod extract;
mod transcribe;

pub use extract::{build_extractor, Extractor, HttpExtractor, MockExtractor};
pub use transcribe::{build_transcriber, HttpTranscriber, MockTranscriber, Transcriber};

/// How much of an upstream error body is retained in logs.
const ERROR_BODY_TRUNCATE: usize = 800;

/// Errors from remote provider calls.
#[derive(Debug, Error)]
pub enum ProviderError {
    #[error("Provider not configured")]
    NotConfigured,

    #[error("Provider returned {status}: {body}")]
    Api { status: u16, body: String },

    #[error("Network error: {0}")]
    Network(String),

    #[error("Unexpected provider response: {0}")]
    BadResponse(String),
}

impl From<reqwest::Error> for ProviderError {
    fn from(err: reqwest::Error) -> Self {
        ProviderError::Network(err.to_string())
    }
}

/// Truncate an upstream error body for logging.
pub(crate) fn truncate_body(body: &str) -> String {
    if body.len() <= ERROR_BODY_TRUNCATE {
        return body.to_string();
    }
    let mut end = ERROR_BODY_TRUNCATE;
    while end > 0 && !body.is_char_boundary(end) {
        end -= 1;
    }
    format!("{}…", &body[..end])
}
