use chrono::Utc;
use rusqlite::{params, OptionalExtension};

use super::{DbError, DbLiveSession, DbSegment, Store, SESSION_ACTIVE};

/// Outcome of a guarded session-start attempt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionStart {
    /// A new session row was created.
    Created(String),
    /// The user already has an active session; carries its id so the client
    /// can attach instead of forking.
    AlreadyActive(String),
}

impl Store {
    // =========================================================================
    // Live sessions
    // =========================================================================

    /// Start a live session under the single-active-session guard.
    ///
    /// The guard query and the insert run inside one transaction so the
    /// invariant holds under concurrent starts; the partial unique index on
    /// `(user_id) WHERE status = 'active'` backstops it at the storage layer.
    pub fn create_live_session(
        &self,
        user_id: &str,
        title: &str,
        participants: &str,
    ) -> Result<SessionStart, DbError> {
        self.with_transaction(|s| {
            if let Some(existing) = s.find_active_session(user_id)? {
                return Ok(SessionStart::AlreadyActive(existing.id));
            }

            let id = uuid::Uuid::new_v4().to_string();
            let now = Utc::now().to_rfc3339();
            s.conn.execute(
                "INSERT INTO live_sessions (id, user_id, title, participants, status, started_at)
                 VALUES (?1, ?2, ?3, ?4, 'active', ?5)",
                params![id, user_id, title, participants, now],
            )?;
            Ok(SessionStart::Created(id))
        })
    }

    /// The user's currently-active session, if any.
    pub fn find_active_session(&self, user_id: &str) -> Result<Option<DbLiveSession>, DbError> {
        let mut stmt = self.conn.prepare(
            "SELECT id, user_id, title, participants, status, started_at, ended_at, meeting_id
             FROM live_sessions WHERE user_id = ?1 AND status = 'active'",
        )?;
        let session = stmt
            .query_row(params![user_id], Self::map_session)
            .optional()?;
        Ok(session)
    }

    /// Fetch a session scoped to its owner. A non-owned id reads as absent.
    pub fn get_live_session_owned(
        &self,
        id: &str,
        user_id: &str,
    ) -> Result<Option<DbLiveSession>, DbError> {
        let mut stmt = self.conn.prepare(
            "SELECT id, user_id, title, participants, status, started_at, ended_at, meeting_id
             FROM live_sessions WHERE id = ?1 AND user_id = ?2",
        )?;
        let session = stmt
            .query_row(params![id, user_id], Self::map_session)
            .optional()?;
        Ok(session)
    }

    /// Transition a session to a terminal status, stamping `ended_at` and
    /// linking the produced meeting when one exists.
    pub fn finalize_live_session(
        &self,
        id: &str,
        status: &str,
        meeting_id: Option<&str>,
    ) -> Result<(), DbError> {
        let now = Utc::now().to_rfc3339();
        self.conn.execute(
            "UPDATE live_sessions SET status = ?1, ended_at = ?2, meeting_id = ?3
             WHERE id = ?4",
            params![status, now, meeting_id, id],
        )?;
        Ok(())
    }

    /// Whether a session is currently active.
    pub fn session_is_active(&self, id: &str) -> Result<bool, DbError> {
        let status: Option<String> = self
            .conn
            .query_row(
                "SELECT status FROM live_sessions WHERE id = ?1",
                params![id],
                |row| row.get(0),
            )
            .optional()?;
        Ok(status.as_deref() == Some(SESSION_ACTIVE))
    }

    // =========================================================================
    // Transcript segments
    // =========================================================================

    /// Allocate the next segment index and insert the segment as one atomic
    /// operation. Indexes are dense and start at 0 per session.
    pub fn append_segment(
        &self,
        session_id: &str,
        text: &str,
        timestamp_ms: i64,
        speaker: &str,
    ) -> Result<i64, DbError> {
        self.with_transaction(|s| {
            let next: i64 = s.conn.query_row(
                "SELECT COALESCE(MAX(segment_index) + 1, 0)
                 FROM transcript_segments WHERE session_id = ?1",
                params![session_id],
                |row| row.get(0),
            )?;
            s.conn.execute(
                "INSERT INTO transcript_segments
                     (session_id, segment_index, text, timestamp_ms, speaker, is_final)
                 VALUES (?1, ?2, ?3, ?4, ?5, 1)",
                params![session_id, next, text, timestamp_ms, speaker],
            )?;
            Ok(next)
        })
    }

    /// All segments of a session in index order.
    pub fn list_segments_ordered(&self, session_id: &str) -> Result<Vec<DbSegment>, DbError> {
        let mut stmt = self.conn.prepare(
            "SELECT session_id, segment_index, text, timestamp_ms, speaker, is_final
             FROM transcript_segments WHERE session_id = ?1
             ORDER BY segment_index ASC",
        )?;
        let rows = stmt.query_map(params![session_id], Self::map_segment)?;

        let mut segments = Vec::new();
        for row in rows {
            segments.push(row?);
        }
        Ok(segments)
    }

    /// The last `n` segments of a session, returned in ascending index order.
    pub fn last_segments(&self, session_id: &str, n: i64) -> Result<Vec<DbSegment>, DbError> {
        let mut stmt = self.conn.prepare(
            "SELECT session_id, segment_index, text, timestamp_ms, speaker, is_final
             FROM (SELECT * FROM transcript_segments
                   WHERE session_id = ?1
                   ORDER BY segment_index DESC LIMIT ?2)
             ORDER BY segment_index ASC",
        )?;
        let rows = stmt.query_map(params![session_id, n], Self::map_segment)?;

        let mut segments = Vec::new();
        for row in rows {
            segments.push(row?);
        }
        Ok(segments)
    }

    /// Number of segments captured for a session.
    pub fn segment_count(&self, session_id: &str) -> Result<i64, DbError> {
        let count = self.conn.query_row(
            "SELECT COUNT(*) FROM transcript_segments WHERE session_id = ?1",
            params![session_id],
            |row| row.get(0),
        )?;
        Ok(count)
    }

    fn map_session(row: &rusqlite::Row<'_>) -> rusqlite::Result<DbLiveSession> {
        Ok(DbLiveSession {
            id: row.get(0)?,
            user_id: row.get(1)?,
            title: row.get(2)?,
            participants: row.get(3)?,
            status: row.get(4)?,
            started_at: row.get(5)?,
            ended_at: row.get(6)?,
            meeting_id: row.get(7)?,
        })
    }

    fn map_segment(row: &rusqlite::Row<'_>) -> rusqlite::Result<DbSegment> {
        Ok(DbSegment {
            session_id: row.get(0)?,
            segment_index: row.get(1)?,
            text: row.get(2)?,
            timestamp_ms: row.get(3)?,
            speaker: row.get(4)?,
            is_final: row.get::<_, i64>(5)? != 0,
        })
    }
}
