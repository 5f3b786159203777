//! Zoom cloud-recording client: lazy token refresh, recording metadata
//! lookup, and file download.
//!
//! All auth state for the third party (access token, refresh token, expiry)
//! lives on the user row and is refreshed lazily when an import needs it.

use std::io::Write;

use chrono::{DateTime, Duration, Utc};
use serde::Deserialize;

use crate::db::{DbUser, Store};
use crate::error::ApiError;
use crate::providers::ProviderError;

const ZOOM_TOKEN_URL: &str = "https://zoom.us/oauth/token";
const ZOOM_API_BASE: &str = "https://api.zoom.us/v2";

/// One recording file from the metadata endpoint.
#[derive(Debug, Clone, Deserialize)]
pub struct RecordingFile {
    pub id: String,
    #[serde(default)]
    pub file_type: String,
    #[serde(default)]
    pub file_extension: String,
    pub download_url: String,
}

#[derive(Debug, Deserialize)]
struct RecordingMeta {
    #[serde(default)]
    recording_files: Vec<RecordingFile>,
}

pub struct ZoomClient {
    client: reqwest::Client,
    client_id: Option<String>,
    client_secret: Option<String>,
}

impl ZoomClient {
    /// Build from environment: `ZOOM_CLIENT_ID` / `ZOOM_CLIENT_SECRET`
    /// enable token refresh; imports without them still work while the
    /// stored access token is valid.
    pub fn from_env() -> Result<Self, ProviderError> {
        let client = reqwest::Client::builder()
            .timeout(std::time::Duration::from_secs(180))
            .build()?;
        Ok(Self {
            client,
            client_id: std::env::var("ZOOM_CLIENT_ID").ok().filter(|s| !s.is_empty()),
            client_secret: std::env::var("ZOOM_CLIENT_SECRET").ok().filter(|s| !s.is_empty()),
        })
    }

    /// A valid access token for `user`, refreshing the cached one when its
    /// expiry has passed. The refreshed token set is written back to the
    /// user row.
    pub async fn valid_access_token(
        &self,
        store: &std::sync::Mutex<Store>,
        user: &DbUser,
    ) -> Result<String, ApiError> {
        let access = user.zoom_access_token.clone();
        let expired = match user.zoom_token_expires_at.as_deref() {
            Some(expiry) => is_expired(expiry),
            None => true, // no expiry recorded — assume expired, try refresh
        };

        if let Some(token) = access {
            if !expired {
                return Ok(token);
            }
        }

        let refresh_token = user
            .zoom_refresh_token
            .clone()
            .ok_or_else(|| ApiError::Validation("Zoom account is not connected".to_string()))?;

        let (client_id, client_secret) = match (&self.client_id, &self.client_secret) {
            (Some(id), Some(secret)) => (id.clone(), secret.clone()),
            _ => return Err(ApiError::ProviderUnavailable),
        };

        log::info!("refreshing Zoom access token for user {}", user.id);
        let resp = self
            .client
            .post(ZOOM_TOKEN_URL)
            .basic_auth(client_id, Some(client_secret))
            .form(&[
                ("grant_type", "refresh_token"),
                ("refresh_token", refresh_token.as_str()),
            ])
            .send()
            .await
            .map_err(|e| ApiError::Upstream(e.to_string()))?;

        if !resp.status().is_success() {
            let status = resp.status().as_u16();
            let body = resp.text().await.unwrap_or_default();
            return Err(ApiError::Upstream(format!(
                "Zoom token refresh failed: HTTP {}: {}",
                status,
                crate::providers::truncate_body(&body)
            )));
        }

        let body: serde_json::Value = resp
            .json()
            .await
            .map_err(|e| ApiError::Upstream(e.to_string()))?;
        let access_token = body["access_token"]
            .as_str()
            .ok_or_else(|| ApiError::Upstream("no access_token in refresh response".to_string()))?
            .to_string();
        let new_refresh = body["refresh_token"]
            .as_str()
            .unwrap_or(&refresh_token)
            .to_string();
        let expires_in = body["expires_in"].as_u64().unwrap_or(3600);
        let expiry = (Utc::now() + Duration::seconds(expires_in as i64)).to_rfc3339();

        store
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .update_zoom_tokens(&user.id, &access_token, &new_refresh, &expiry)?;

        Ok(access_token)
    }

    /// Fetch recording metadata for a meeting and select the file with the
    /// given recording id.
    pub async fn find_recording_file(
        &self,
        access_token: &str,
        meeting_id: &str,
        recording_id: &str,
    ) -> Result<RecordingFile, ApiError> {
        let url = format!("{}/meetings/{}/recordings", ZOOM_API_BASE, meeting_id);
        let resp = self
            .client
            .get(&url)
            .bearer_auth(access_token)
            .send()
            .await
            .map_err(|e| ApiError::Upstream(e.to_string()))?;

        if resp.status().as_u16() == 404 {
            return Err(ApiError::NotFound);
        }
        if !resp.status().is_success() {
            let status = resp.status().as_u16();
            let body = resp.text().await.unwrap_or_default();
            return Err(ApiError::Upstream(format!(
                "Zoom recordings lookup failed: HTTP {}: {}",
                status,
                crate::providers::truncate_body(&body)
            )));
        }

        let meta: RecordingMeta = resp
            .json()
            .await
            .map_err(|e| ApiError::Upstream(e.to_string()))?;
        meta.recording_files
            .into_iter()
            .find(|f| f.id == recording_id)
            .ok_or(ApiError::NotFound)
    }

    /// Download a recording file to a temp path. The temp file's guard
    /// releases the storage on every exit path of the caller.
    pub async fn download_recording(
        &self,
        access_token: &str,
        file: &RecordingFile,
    ) -> Result<tempfile::NamedTempFile, ApiError> {
        let resp = self
            .client
            .get(&file.download_url)
            .bearer_auth(access_token)
            .send()
            .await
            .map_err(|e| ApiError::Upstream(e.to_string()))?;

        if !resp.status().is_success() {
            return Err(ApiError::Upstream(format!(
                "Zoom download failed: HTTP {}",
                resp.status().as_u16()
            )));
        }

        let bytes = resp
            .bytes()
            .await
            .map_err(|e| ApiError::Upstream(e.to_string()))?;

        let mut temp = tempfile::NamedTempFile::new()
            .map_err(|e| ApiError::Upstream(format!("temp file: {}", e)))?;
        temp.write_all(&bytes)
            .map_err(|e| ApiError::Upstream(format!("temp write: {}", e)))?;
        Ok(temp)
    }

    /// Extension hint for a recording file, defaulting to Zoom's usual m4a
    /// audio container.
    pub fn format_hint(file: &RecordingFile) -> String {
        let ext = file.file_extension.trim().to_lowercase();
        if !ext.is_empty() {
            return ext;
        }
        match file.file_type.to_uppercase().as_str() {
            "MP4" => "mp4".to_string(),
            _ => "m4a".to_string(),
        }
    }
}

/// Whether an RFC 3339 expiry (with a 60 s safety margin) has passed.
fn is_expired(expiry: &str) -> bool {
    match DateTime::parse_from_rfc3339(expiry) {
        Ok(t) => t.with_timezone(&Utc) - Duration::seconds(60) <= Utc::now(),
        Err(_) => true,
    }
}
