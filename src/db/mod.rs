//! SQLite-backed store for users, meetings, live sessions, segments, usage
//! counters, and tracked issues.
//!
//! The database is the only shared mutable state in the process and is held
//! behind a `std::sync::Mutex` in `AppState` (single-writer semantics). All
//! operations are prepared statements; no ad-hoc query building.

use std::path::PathBuf;

use rusqlite::Connection;

pub mod types;
pub use types::*;

mod issues;
mod live;
mod meetings;
mod usage;
mod users;

pub use live::SessionStart;

pub struct Store {
    conn: Connection,
}

impl Store {
    /// Borrow the underlying connection for ad-hoc queries (tests only).
    #[cfg(test)]
    pub(crate) fn conn_ref(&self) -> &Connection {
        &self.conn
    }

    /// Execute a closure within a SQLite transaction.
    /// Commits on Ok, rolls back on Err.
    pub fn with_transaction<F, T>(&self, f: F) -> Result<T, DbError>
    where
        F: FnOnce(&Self) -> Result<T, DbError>,
    {
        self.conn.execute_batch("BEGIN IMMEDIATE")?;
        match f(self) {
            Ok(val) => {
                self.conn.execute_batch("COMMIT")?;
                Ok(val)
            }
            Err(e) => {
                let _ = self.conn.execute_batch("ROLLBACK");
                Err(e)
            }
        }
    }

    /// Open (or create) the database at `path` and apply schema migrations.
    pub fn open_at(path: PathBuf) -> Result<Self, DbError> {
        if let Some(parent) = path.parent() {
            if !parent.exists() {
                std::fs::create_dir_all(parent).map_err(DbError::CreateDir)?;
            }
        }

        let conn = Connection::open(&path)?;
        Self::init(conn)
    }

    /// Open an in-memory database. Useful for testing.
    pub fn open_in_memory() -> Result<Self, DbError> {
        Self::init(Connection::open_in_memory()?)
    }

    /// Resolve the default database path: `~/.recap/recap.db`.
    pub fn default_path() -> Result<PathBuf, DbError> {
        let home = dirs::home_dir().ok_or(DbError::HomeDirNotFound)?;
        Ok(home.join(".recap").join("recap.db"))
    }

    fn init(conn: Connection) -> Result<Self, DbError> {
        // WAL mode for better concurrent read performance
        conn.execute_batch("PRAGMA journal_mode=WAL;")?;

        crate::migrations::run_migrations(&conn).map_err(DbError::Migration)?;

        conn.execute_batch("PRAGMA foreign_keys = ON;")?;

        Self::install_lifetime_guard(&conn)?;

        Ok(Self { conn })
    }

    /// Install the storage-layer guard that aborts any UPDATE clearing a
    /// user's `is_lifetime` flag. Enforced here rather than in application
    /// code so direct writes cannot violate it either.
    fn install_lifetime_guard(conn: &Connection) -> Result<(), DbError> {
        conn.execute_batch(
            "CREATE TRIGGER IF NOT EXISTS users_lifetime_guard
             BEFORE UPDATE OF is_lifetime ON users
             FOR EACH ROW
             WHEN OLD.is_lifetime = 1 AND NEW.is_lifetime = 0
             BEGIN
                 SELECT RAISE(ABORT, 'is_lifetime cannot be cleared');
             END;",
        )?;
        Ok(())
    }

    /// Administrative override for the lifetime guard: drop guard, clear the
    /// flag, recreate guard — all inside one exclusive transaction. This is
    /// the only sanctioned way to transition `is_lifetime` 1 → 0.
    pub fn admin_clear_lifetime(&self, user_id: &str) -> Result<(), DbError> {
        self.conn.execute_batch("BEGIN EXCLUSIVE")?;
        let result = (|| -> Result<(), DbError> {
            self.conn
                .execute_batch("DROP TRIGGER IF EXISTS users_lifetime_guard")?;
            self.conn.execute(
                "UPDATE users SET is_lifetime = 0 WHERE id = ?1",
                [user_id],
            )?;
            Self::install_lifetime_guard(&self.conn)?;
            Ok(())
        })();
        match result {
            Ok(()) => {
                self.conn.execute_batch("COMMIT")?;
                log::warn!("Administrative override: cleared is_lifetime for user {}", user_id);
                Ok(())
            }
            Err(e) => {
                let _ = self.conn.execute_batch("ROLLBACK");
                // The guard must survive a failed override
                let _ = Self::install_lifetime_guard(&self.conn);
                Err(e)
            }
        }
    }
}
