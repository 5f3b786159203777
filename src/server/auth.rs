//! Session-cookie authentication.
//!
//! Login and cookie issuance belong to the out-of-scope auth component;
//! this side only resolves the `session` cookie against the `sessions`
//! table. Tokens are stored hashed — a leaked database does not yield
//! usable cookies.

use axum::http::header::COOKIE;
use axum::http::HeaderMap;
use sha2::{Digest, Sha256};

use crate::db::DbUser;
use crate::error::ApiError;

use super::AppState;

/// Cookie carrying the session token.
pub const SESSION_COOKIE: &str = "session";

/// Hash a session token with the server secret, hex-encoded. The auth
/// component writes the same hash into `sessions.token_hash`.
pub fn hash_session_token(secret: &str, token: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(secret.as_bytes());
    hasher.update(b":");
    hasher.update(token.as_bytes());
    let digest = hasher.finalize();
    digest.iter().map(|b| format!("{:02x}", b)).collect()
}

/// Extract the session cookie value from request headers.
fn session_token(headers: &HeaderMap) -> Option<String> {
    let cookie_header = headers.get(COOKIE)?.to_str().ok()?;
    for pair in cookie_header.split(';') {
        let pair = pair.trim();
        if let Some(value) = pair.strip_prefix("session=") {
            if !value.is_empty() {
                return Some(value.to_string());
            }
        }
    }
    None
}

/// Resolve the request's session cookie to a user, or 401.
pub fn authenticate(state: &AppState, headers: &HeaderMap) -> Result<DbUser, ApiError> {
    let token = session_token(headers).ok_or(ApiError::Unauthenticated)?;
    let hash = hash_session_token(&state.config.session_secret, &token);
    let store = state.store.lock().unwrap_or_else(|e| e.into_inner());
    store
        .find_user_by_session(&hash)?
        .ok_or(ApiError::Unauthenticated)
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::HeaderValue;

    #[test]
    fn test_hash_is_stable_and_secret_bound() {
        let a = hash_session_token("secret", "token");
        let b = hash_session_token("secret", "token");
        assert_eq!(a, b);
        assert_eq!(a.len(), 64);

        let other_secret = hash_session_token("other", "token");
        assert_ne!(a, other_secret);
        let other_token = hash_session_token("secret", "other");
        assert_ne!(a, other_token);
    }

    #[test]
    fn test_session_token_parsing() {
        let mut headers = HeaderMap::new();
        headers.insert(
            COOKIE,
            HeaderValue::from_static("theme=dark; session=abc123; lang=en"),
        );
        assert_eq!(session_token(&headers).as_deref(), Some("abc123"));

        let mut empty = HeaderMap::new();
        empty.insert(COOKIE, HeaderValue::from_static("theme=dark"));
        assert_eq!(session_token(&empty), None);

        assert_eq!(session_token(&HeaderMap::new()), None);
    }
}
