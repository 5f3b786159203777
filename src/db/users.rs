use chrono::Utc;
use rusqlite::{params, OptionalExtension};

use super::{DbError, DbUser, Store};

impl Store {
    // =========================================================================
    // Users
    // =========================================================================

    /// Create a user with a normalized (trimmed, lowercased) email.
    /// Returns the new user id.
    pub fn create_user(&self, email: &str, plan: &str) -> Result<String, DbError> {
        let id = uuid::Uuid::new_v4().to_string();
        let now = Utc::now().to_rfc3339();
        self.conn.execute(
            "INSERT INTO users (id, email, plan, created_at) VALUES (?1, ?2, ?3, ?4)",
            params![id, email.trim().to_lowercase(), plan, now],
        )?;
        Ok(id)
    }

    /// Look up a user by id.
    pub fn find_user_by_id(&self, id: &str) -> Result<Option<DbUser>, DbError> {
        let mut stmt = self.conn.prepare(
            "SELECT id, email, plan, is_lifetime, zoom_customer_id, zoom_access_token,
                    zoom_refresh_token, zoom_token_expires_at, created_at
             FROM users WHERE id = ?1",
        )?;
        let user = stmt
            .query_row(params![id], Self::map_user)
            .optional()?;
        Ok(user)
    }

    /// Look up a user by normalized email.
    pub fn find_user_by_email(&self, email: &str) -> Result<Option<DbUser>, DbError> {
        let mut stmt = self.conn.prepare(
            "SELECT id, email, plan, is_lifetime, zoom_customer_id, zoom_access_token,
                    zoom_refresh_token, zoom_token_expires_at, created_at
             FROM users WHERE email = ?1",
        )?;
        let user = stmt
            .query_row(params![email.trim().to_lowercase()], Self::map_user)
            .optional()?;
        Ok(user)
    }

    /// Persist refreshed third-party recording API tokens on the user row.
    pub fn update_zoom_tokens(
        &self,
        user_id: &str,
        access_token: &str,
        refresh_token: &str,
        expires_at: &str,
    ) -> Result<(), DbError> {
        self.conn.execute(
            "UPDATE users
             SET zoom_access_token = ?1, zoom_refresh_token = ?2, zoom_token_expires_at = ?3
             WHERE id = ?4",
            params![access_token, refresh_token, expires_at, user_id],
        )?;
        Ok(())
    }

    fn map_user(row: &rusqlite::Row<'_>) -> rusqlite::Result<DbUser> {
        Ok(DbUser {
            id: row.get(0)?,
            email: row.get(1)?,
            plan: row.get(2)?,
            is_lifetime: row.get::<_, i64>(3)? != 0,
            zoom_customer_id: row.get(4)?,
            zoom_access_token: row.get(5)?,
            zoom_refresh_token: row.get(6)?,
            zoom_token_expires_at: row.get(7)?,
            created_at: row.get(8)?,
        })
    }

    // =========================================================================
    // Sessions (boundary: rows are written by the auth component; the facade
    // only resolves them)
    // =========================================================================

    /// Resolve a session token hash to its user, if the session is current.
    pub fn find_user_by_session(&self, token_hash: &str) -> Result<Option<DbUser>, DbError> {
        let now = Utc::now().to_rfc3339();
        let mut stmt = self.conn.prepare(
            "SELECT u.id, u.email, u.plan, u.is_lifetime, u.zoom_customer_id,
                    u.zoom_access_token, u.zoom_refresh_token, u.zoom_token_expires_at,
                    u.created_at
             FROM sessions s
             INNER JOIN users u ON u.id = s.user_id
             WHERE s.token_hash = ?1 AND s.expires_at > ?2",
        )?;
        let user = stmt
            .query_row(params![token_hash, now], Self::map_user)
            .optional()?;
        Ok(user)
    }

    /// Insert a session row. Used by tests and by the out-of-scope auth
    /// component, which shares this store.
    pub fn insert_session(
        &self,
        token_hash: &str,
        user_id: &str,
        expires_at: &str,
    ) -> Result<(), DbError> {
        let now = Utc::now().to_rfc3339();
        self.conn.execute(
            "INSERT INTO sessions (token_hash, user_id, created_at, expires_at)
             VALUES (?1, ?2, ?3, ?4)",
            params![token_hash, user_id, now, expires_at],
        )?;
        Ok(())
    }
}
