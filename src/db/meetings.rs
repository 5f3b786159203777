use chrono::Utc;
use rusqlite::{params, OptionalExtension};

use super::{DbError, DbMeeting, Store};

impl Store {
    // =========================================================================
    // Meetings
    // =========================================================================

    /// Persist a meeting and return its id. `action_items` is the serialized
    /// extraction record, written as a unit.
    pub fn create_meeting(
        &self,
        user_id: &str,
        title: Option<&str>,
        raw_notes: &str,
        action_items: &str,
    ) -> Result<String, DbError> {
        let id = uuid::Uuid::new_v4().to_string();
        let now = Utc::now().to_rfc3339();
        self.conn.execute(
            "INSERT INTO meetings (id, user_id, title, raw_notes, action_items, created_at, updated_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?6)",
            params![id, user_id, title, raw_notes, action_items, now],
        )?;
        Ok(id)
    }

    /// Fetch a meeting scoped to its owner. A non-owned id reads as absent.
    pub fn get_meeting_owned(
        &self,
        id: &str,
        user_id: &str,
    ) -> Result<Option<DbMeeting>, DbError> {
        let mut stmt = self.conn.prepare(
            "SELECT id, user_id, title, raw_notes, action_items, created_at, updated_at
             FROM meetings WHERE id = ?1 AND user_id = ?2",
        )?;
        let meeting = stmt
            .query_row(params![id, user_id], Self::map_meeting)
            .optional()?;
        Ok(meeting)
    }

    /// All of a user's meetings, newest first.
    pub fn list_meetings_owned(&self, user_id: &str) -> Result<Vec<DbMeeting>, DbError> {
        let mut stmt = self.conn.prepare(
            "SELECT id, user_id, title, raw_notes, action_items, created_at, updated_at
             FROM meetings WHERE user_id = ?1
             ORDER BY created_at DESC, id DESC",
        )?;
        let rows = stmt.query_map(params![user_id], Self::map_meeting)?;

        let mut meetings = Vec::new();
        for row in rows {
            meetings.push(row?);
        }
        Ok(meetings)
    }

    /// A user's meetings created strictly before `created_at`, newest first.
    /// Used to select the prior corpus for insight computation.
    pub fn list_meetings_before_owned(
        &self,
        user_id: &str,
        created_at: &str,
        limit: i64,
    ) -> Result<Vec<DbMeeting>, DbError> {
        let mut stmt = self.conn.prepare(
            "SELECT id, user_id, title, raw_notes, action_items, created_at, updated_at
             FROM meetings WHERE user_id = ?1 AND created_at < ?2
             ORDER BY created_at DESC, id DESC
             LIMIT ?3",
        )?;
        let rows = stmt.query_map(params![user_id, created_at, limit], Self::map_meeting)?;

        let mut meetings = Vec::new();
        for row in rows {
            meetings.push(row?);
        }
        Ok(meetings)
    }

    /// Number of meetings the user has persisted. Checked against the plan's
    /// storage cap before any work that would create a meeting.
    pub fn count_meetings_owned(&self, user_id: &str) -> Result<i64, DbError> {
        let count = self.conn.query_row(
            "SELECT COUNT(*) FROM meetings WHERE user_id = ?1",
            params![user_id],
            |row| row.get(0),
        )?;
        Ok(count)
    }

    /// Replace a meeting's transcript text. Returns false when the meeting
    /// does not exist for this owner.
    pub fn update_meeting_transcript(
        &self,
        id: &str,
        user_id: &str,
        raw_notes: &str,
    ) -> Result<bool, DbError> {
        let now = Utc::now().to_rfc3339();
        let changed = self.conn.execute(
            "UPDATE meetings SET raw_notes = ?1, updated_at = ?2
             WHERE id = ?3 AND user_id = ?4",
            params![raw_notes, now, id, user_id],
        )?;
        Ok(changed > 0)
    }

    /// Replace a meeting's extraction record (written as a unit).
    pub fn update_meeting_extraction(
        &self,
        id: &str,
        user_id: &str,
        action_items: &str,
    ) -> Result<bool, DbError> {
        let now = Utc::now().to_rfc3339();
        let changed = self.conn.execute(
            "UPDATE meetings SET action_items = ?1, updated_at = ?2
             WHERE id = ?3 AND user_id = ?4",
            params![action_items, now, id, user_id],
        )?;
        Ok(changed > 0)
    }

    /// Rename a meeting.
    pub fn update_meeting_title(
        &self,
        id: &str,
        user_id: &str,
        title: &str,
    ) -> Result<bool, DbError> {
        let now = Utc::now().to_rfc3339();
        let changed = self.conn.execute(
            "UPDATE meetings SET title = ?1, updated_at = ?2
             WHERE id = ?3 AND user_id = ?4",
            params![title, now, id, user_id],
        )?;
        Ok(changed > 0)
    }

    /// Delete a meeting scoped to its owner. Returns false when nothing
    /// matched.
    pub fn delete_meeting_owned(&self, id: &str, user_id: &str) -> Result<bool, DbError> {
        let changed = self.conn.execute(
            "DELETE FROM meetings WHERE id = ?1 AND user_id = ?2",
            params![id, user_id],
        )?;
        Ok(changed > 0)
    }

    fn map_meeting(row: &rusqlite::Row<'_>) -> rusqlite::Result<DbMeeting> {
        Ok(DbMeeting {
            id: row.get(0)?,
            user_id: row.get(1)?,
            title: row.get(2)?,
            raw_notes: row.get(3)?,
            action_items: row.get(4)?,
            created_at: row.get(5)?,
            updated_at: row.get(6)?,
        })
    }
}
