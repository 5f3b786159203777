//! Server configuration loaded from environment variables.
//!
//! `SESSION_SECRET` is mandatory — startup fails without it. Provider keys
//! are optional: an absent key marks that provider unavailable, and
//! `MOCK_MODE=true` replaces both providers with deterministic mocks
//! regardless of keys (the first-class test harness affordance).

use std::path::PathBuf;

/// Runtime configuration, read once at startup.
#[derive(Debug, Clone)]
pub struct Config {
    /// Mandatory secret for session-cookie hashing.
    pub session_secret: String,
    /// Speech-to-text provider key; absent → provider unavailable.
    pub transcribe_api_key: Option<String>,
    /// LLM extraction provider key; absent → provider unavailable.
    pub extract_api_key: Option<String>,
    /// Force both providers to deterministic mocks.
    pub mock_mode: bool,
    /// Absolute base URL used for OAuth and email links.
    pub app_url: String,
    /// Filesystem path for the embedded store; default under the home dir.
    pub database_path: Option<PathBuf>,
    /// The single admin user, matched by email.
    pub admin_email: Option<String>,
    /// Listen address, `HOST:PORT`.
    pub bind_addr: String,
}

impl Config {
    /// Load configuration from the environment. Fatal when
    /// `SESSION_SECRET` is absent or empty.
    pub fn from_env() -> Result<Self, String> {
        let session_secret = std::env::var("SESSION_SECRET")
            .ok()
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty())
            .ok_or_else(|| "SESSION_SECRET is required but not set".to_string())?;

        let mock_mode = std::env::var("MOCK_MODE")
            .map(|v| {
                let v = v.trim().to_lowercase();
                v == "true" || v == "1" || v == "yes"
            })
            .unwrap_or(false);

        Ok(Self {
            session_secret,
            transcribe_api_key: non_empty_env("TRANSCRIBE_API_KEY"),
            extract_api_key: non_empty_env("EXTRACT_API_KEY"),
            mock_mode,
            app_url: non_empty_env("APP_URL")
                .unwrap_or_else(|| "http://localhost:8080".to_string()),
            database_path: non_empty_env("DATABASE_PATH").map(PathBuf::from),
            admin_email: non_empty_env("ADMIN_EMAIL"),
            bind_addr: non_empty_env("BIND_ADDR").unwrap_or_else(|| "0.0.0.0:8080".to_string()),
        })
    }

    /// Whether `email` identifies the admin user: case-insensitive equality
    /// against `ADMIN_EMAIL`, both sides trimmed. Not a role system.
    pub fn is_admin_email(&self, email: &str) -> bool {
        match &self.admin_email {
            Some(admin) => admin.trim().eq_ignore_ascii_case(email.trim()),
            None => false,
        }
    }
}

fn non_empty_env(key: &str) -> Option<String> {
    std::env::var(key)
        .ok()
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
}
