use rusqlite::{params, OptionalExtension};

use super::{DbError, DbUsage, Store};

impl Store {
    // =========================================================================
    // Usage counters
    // =========================================================================

    /// Read the extract counter for a (user, month) pair, if the row exists.
    pub fn get_usage(&self, user_id: &str, month: &str) -> Result<Option<DbUsage>, DbError> {
        let mut stmt = self.conn.prepare(
            "SELECT user_id, month, extracts FROM usage WHERE user_id = ?1 AND month = ?2",
        )?;
        let usage = stmt
            .query_row(params![user_id, month], |row| {
                Ok(DbUsage {
                    user_id: row.get(0)?,
                    month: row.get(1)?,
                    extracts: row.get(2)?,
                })
            })
            .optional()?;
        Ok(usage)
    }

    /// Lazily create the (user, month) row with a zero counter.
    pub fn ensure_usage_row(&self, user_id: &str, month: &str) -> Result<(), DbError> {
        self.conn.execute(
            "INSERT OR IGNORE INTO usage (user_id, month, extracts) VALUES (?1, ?2, 0)",
            params![user_id, month],
        )?;
        Ok(())
    }

    /// Atomically upsert-and-increment the extract counter. Parallel calls
    /// on the same (user, month) cannot under-count.
    pub fn increment_usage(&self, user_id: &str, month: &str) -> Result<(), DbError> {
        self.conn.execute(
            "INSERT INTO usage (user_id, month, extracts) VALUES (?1, ?2, 1)
             ON CONFLICT(user_id, month) DO UPDATE SET extracts = extracts + 1",
            params![user_id, month],
        )?;
        Ok(())
    }

    /// Sum of a user's extract counters across all months. Used for the
    /// free plan's lifetime cap.
    pub fn sum_usage_all_time(&self, user_id: &str) -> Result<i64, DbError> {
        let total = self.conn.query_row(
            "SELECT COALESCE(SUM(extracts), 0) FROM usage WHERE user_id = ?1",
            params![user_id],
            |row| row.get(0),
        )?;
        Ok(total)
    }
}
