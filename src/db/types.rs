//! Shared type definitions for the database layer.

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Errors specific to database operations.
#[derive(Debug, Error)]
pub enum DbError {
    #[error("SQLite error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    #[error("Home directory not found")]
    HomeDirNotFound,

    #[error("Failed to create database directory: {0}")]
    CreateDir(std::io::Error),

    #[error("Schema migration failed: {0}")]
    Migration(String),
}

impl DbError {
    /// Whether this error is a uniqueness-constraint violation.
    pub fn is_constraint_violation(&self) -> bool {
        matches!(
            self,
            DbError::Sqlite(rusqlite::Error::SqliteFailure(e, _))
                if e.code == rusqlite::ErrorCode::ConstraintViolation
        )
    }
}

/// A row from the `users` table.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DbUser {
    pub id: String,
    pub email: String,
    pub plan: String,
    pub is_lifetime: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub zoom_customer_id: Option<String>,
    #[serde(skip_serializing)]
    pub zoom_access_token: Option<String>,
    #[serde(skip_serializing)]
    pub zoom_refresh_token: Option<String>,
    #[serde(skip_serializing)]
    pub zoom_token_expires_at: Option<String>,
    pub created_at: String,
}

/// A row from the `meetings` table.
///
/// `action_items` holds the serialized extraction record as written; it is
/// the authoritative form and is parsed on read.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DbMeeting {
    pub id: String,
    pub user_id: String,
    pub title: Option<String>,
    pub raw_notes: String,
    pub action_items: String,
    pub created_at: String,
    pub updated_at: String,
}

/// A row from the `live_sessions` table.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DbLiveSession {
    pub id: String,
    pub user_id: String,
    pub title: String,
    pub participants: String,
    pub status: String,
    pub started_at: String,
    pub ended_at: Option<String>,
    pub meeting_id: Option<String>,
}

/// Live session status values as stored.
pub const SESSION_ACTIVE: &str = "active";
pub const SESSION_COMPLETED: &str = "completed";
pub const SESSION_FAILED: &str = "failed";

/// A row from the `transcript_segments` table.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DbSegment {
    pub session_id: String,
    pub segment_index: i64,
    pub text: String,
    pub timestamp_ms: i64,
    pub speaker: String,
    pub is_final: bool,
}

/// A row from the `usage` table, keyed by (user, YYYY-MM month).
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DbUsage {
    pub user_id: String,
    pub month: String,
    pub extracts: i64,
}

/// A row from the `tracked_issues` table.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DbTrackedIssue {
    pub id: String,
    pub user_id: String,
    pub issue_text: String,
    pub notes: Option<String>,
    pub source_meeting_id: Option<String>,
    pub source_meeting_title: Option<String>,
    pub resolved: bool,
    pub created_at: String,
    pub resolved_at: Option<String>,
}

/// Current month key in the `YYYY-MM` form the usage table is keyed by.
pub fn current_month_key() -> String {
    chrono::Utc::now().format("%Y-%m").to_string()
}
