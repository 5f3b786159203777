use chrono::Utc;
use rusqlite::{params, OptionalExtension};

use super::{DbError, DbTrackedIssue, Store};

impl Store {
    // =========================================================================
    // Tracked issues
    // =========================================================================

    /// Record a carry-over issue surfaced by the unresolved-items insight.
    /// Skips insertion when an open issue with the same normalized text
    /// already exists for the user; returns the id either way.
    pub fn upsert_tracked_issue(
        &self,
        user_id: &str,
        issue_text: &str,
        notes: Option<&str>,
        source_meeting_id: Option<&str>,
        source_meeting_title: Option<&str>,
    ) -> Result<String, DbError> {
        let normalized = issue_text.trim().to_lowercase();
        let existing: Option<String> = self
            .conn
            .query_row(
                "SELECT id FROM tracked_issues
                 WHERE user_id = ?1 AND resolved = 0 AND LOWER(TRIM(issue_text)) = ?2",
                params![user_id, normalized],
                |row| row.get(0),
            )
            .optional()?;
        if let Some(id) = existing {
            return Ok(id);
        }

        let id = uuid::Uuid::new_v4().to_string();
        let now = Utc::now().to_rfc3339();
        self.conn.execute(
            "INSERT INTO tracked_issues
                 (id, user_id, issue_text, notes, source_meeting_id, source_meeting_title, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
            params![
                id,
                user_id,
                issue_text.trim(),
                notes,
                source_meeting_id,
                source_meeting_title,
                now
            ],
        )?;
        Ok(id)
    }

    /// A user's tracked issues, unresolved first, newest first within each
    /// group.
    pub fn list_tracked_issues(&self, user_id: &str) -> Result<Vec<DbTrackedIssue>, DbError> {
        let mut stmt = self.conn.prepare(
            "SELECT id, user_id, issue_text, notes, source_meeting_id, source_meeting_title,
                    resolved, created_at, resolved_at
             FROM tracked_issues WHERE user_id = ?1
             ORDER BY resolved ASC, created_at DESC",
        )?;
        let rows = stmt.query_map(params![user_id], |row| {
            Ok(DbTrackedIssue {
                id: row.get(0)?,
                user_id: row.get(1)?,
                issue_text: row.get(2)?,
                notes: row.get(3)?,
                source_meeting_id: row.get(4)?,
                source_meeting_title: row.get(5)?,
                resolved: row.get::<_, i64>(6)? != 0,
                created_at: row.get(7)?,
                resolved_at: row.get(8)?,
            })
        })?;

        let mut issues = Vec::new();
        for row in rows {
            issues.push(row?);
        }
        Ok(issues)
    }

    /// Flip an issue's resolution state, stamping or clearing `resolved_at`.
    /// Returns the new resolved value, or None when the issue is not owned.
    pub fn toggle_tracked_issue(
        &self,
        id: &str,
        user_id: &str,
    ) -> Result<Option<bool>, DbError> {
        let current: Option<i64> = self
            .conn
            .query_row(
                "SELECT resolved FROM tracked_issues WHERE id = ?1 AND user_id = ?2",
                params![id, user_id],
                |row| row.get(0),
            )
            .optional()?;
        let Some(current) = current else {
            return Ok(None);
        };

        let next = current == 0;
        let resolved_at = if next {
            Some(Utc::now().to_rfc3339())
        } else {
            None
        };
        self.conn.execute(
            "UPDATE tracked_issues SET resolved = ?1, resolved_at = ?2
             WHERE id = ?3 AND user_id = ?4",
            params![next as i64, resolved_at, id, user_id],
        )?;
        Ok(Some(next))
    }
}
