//! Schema migration framework.
//!
//! Numbered SQL migrations are embedded at compile time via `include_str!`.
//! Each migration runs exactly once, tracked by the `schema_version` table.
//!
//! For databases that predate the framework, the bootstrap function detects
//! the presence of known tables and marks migration 001 as applied so the
//! baseline SQL never runs against an already-populated database.

use rusqlite::Connection;

struct Migration {
    version: i32,
    sql: &'static str,
}

const MIGRATIONS: &[Migration] = &[Migration {
    version: 1,
    sql: include_str!("migrations/001_baseline.sql"),
}];

/// Create the `schema_version` table if it doesn't exist.
fn ensure_schema_version_table(conn: &Connection) -> Result<(), String> {
    conn.execute_batch(
        "CREATE TABLE IF NOT EXISTS schema_version (
            version INTEGER PRIMARY KEY,
            applied_at TEXT NOT NULL DEFAULT (datetime('now'))
        );",
    )
    .map_err(|e| format!("Failed to create schema_version table: {}", e))
}

/// Return the highest applied migration version, or 0 if none.
fn current_version(conn: &Connection) -> Result<i32, String> {
    conn.query_row(
        "SELECT COALESCE(MAX(version), 0) FROM schema_version",
        [],
        |row| row.get(0),
    )
    .map_err(|e| format!("Failed to read schema version: {}", e))
}

/// Detect a pre-framework database and mark the baseline as applied.
///
/// If the `users` table exists but `schema_version` records nothing, this is
/// a database created before the migration framework was introduced. Mark
/// migration 001 (the baseline) as applied so its CREATE TABLE statements
/// never run against an already-populated database.
fn bootstrap_existing_db(conn: &Connection) -> Result<bool, String> {
    let version = current_version(conn)?;
    if version > 0 {
        return Ok(false);
    }

    let has_users: bool = conn
        .prepare("SELECT 1 FROM users LIMIT 1")
        .and_then(|mut stmt| stmt.exists([]))
        .unwrap_or(false);

    if has_users {
        conn.execute(
            "INSERT OR IGNORE INTO schema_version (version) VALUES (?1)",
            [1],
        )
        .map_err(|e| format!("Failed to bootstrap schema version: {}", e))?;
        log::info!("Migration bootstrap: marked v1 (baseline) as applied for existing database");
        return Ok(true);
    }

    Ok(false)
}

/// Back up the database before applying migrations.
///
/// Uses SQLite's online backup API to create a hot copy at
/// `<db_path>.pre-migration.bak`. Only called when there are pending
/// migrations.
fn backup_before_migration(conn: &Connection) -> Result<(), String> {
    let db_path: String = conn
        .query_row("PRAGMA database_list", [], |row| row.get(2))
        .map_err(|e| format!("Failed to get database path: {}", e))?;

    if db_path.is_empty() || db_path == ":memory:" {
        // In-memory or temp database — skip backup
        return Ok(());
    }

    let backup_path = format!("{}.pre-migration.bak", db_path);
    let mut backup_conn = rusqlite::Connection::open(&backup_path)
        .map_err(|e| format!("Failed to open backup file: {}", e))?;

    let backup = rusqlite::backup::Backup::new(conn, &mut backup_conn)
        .map_err(|e| format!("Failed to initialize pre-migration backup: {}", e))?;

    backup
        .step(-1)
        .map_err(|e| format!("Pre-migration backup failed: {}", e))?;

    log::info!("Pre-migration backup created at {}", backup_path);
    Ok(())
}

/// Run all pending migrations.
///
/// Returns the number of migrations applied (0 if already up-to-date).
///
/// Forward-compat guard: if the database has a higher version than the
/// highest known migration, returns an error telling the operator to update
/// the server.
pub fn run_migrations(conn: &Connection) -> Result<usize, String> {
    ensure_schema_version_table(conn)?;
    bootstrap_existing_db(conn)?;

    let current = current_version(conn)?;
    let max_known = MIGRATIONS.last().map(|m| m.version).unwrap_or(0);

    if current > max_known {
        return Err(format!(
            "Database schema version ({}) is newer than this build supports ({}). \
             Update recap-server to the latest version.",
            current, max_known
        ));
    }

    let pending: Vec<&Migration> = MIGRATIONS.iter().filter(|m| m.version > current).collect();

    if pending.is_empty() {
        return Ok(0);
    }

    backup_before_migration(conn)?;

    for migration in &pending {
        conn.execute_batch(migration.sql)
            .map_err(|e| format!("Migration v{} failed: {}", migration.version, e))?;

        conn.execute(
            "INSERT INTO schema_version (version) VALUES (?1)",
            [migration.version],
        )
        .map_err(|e| format!("Failed to record migration v{}: {}", migration.version, e))?;

        log::info!("Applied migration v{}", migration.version);
    }

    Ok(pending.len())
}

#[cfg(test)]
mod tests {
    use super::*;
    use rusqlite::Connection;

    fn mem_db() -> Connection {
        Connection::open_in_memory().expect("in-memory db")
    }

    #[test]
    fn test_fresh_db_applies_baseline() {
        let conn = mem_db();
        let applied = run_migrations(&conn).expect("migrations should succeed");
        assert_eq!(applied, 1, "should apply exactly 1 migration (baseline)");

        let version = current_version(&conn).expect("version query");
        assert_eq!(version, 1);

        // Key tables exist and accept rows
        conn.execute(
            "INSERT INTO users (id, email, created_at) VALUES ('u1', 'a@b.c', '2026-01-01')",
            [],
        )
        .expect("users table should exist");

        conn.execute(
            "INSERT INTO meetings (id, user_id, raw_notes, action_items, created_at, updated_at)
             VALUES ('m1', 'u1', 'notes', '{}', '2026-01-01', '2026-01-01')",
            [],
        )
        .expect("meetings table should exist");

        conn.execute(
            "INSERT INTO live_sessions (id, user_id, status, started_at)
             VALUES ('s1', 'u1', 'active', '2026-01-01')",
            [],
        )
        .expect("live_sessions table should exist");

        conn.execute(
            "INSERT INTO transcript_segments (session_id, segment_index, text)
             VALUES ('s1', 0, 'hello')",
            [],
        )
        .expect("transcript_segments table should exist");
    }

    #[test]
    fn test_segment_index_unique_per_session() {
        let conn = mem_db();
        run_migrations(&conn).expect("migrations");
        conn.execute(
            "INSERT INTO users (id, email, created_at) VALUES ('u1', 'a@b.c', '2026-01-01')",
            [],
        )
        .unwrap();
        conn.execute(
            "INSERT INTO live_sessions (id, user_id, status, started_at)
             VALUES ('s1', 'u1', 'active', '2026-01-01')",
            [],
        )
        .unwrap();
        conn.execute(
            "INSERT INTO transcript_segments (session_id, segment_index, text)
             VALUES ('s1', 0, 'a')",
            [],
        )
        .unwrap();

        let dup = conn.execute(
            "INSERT INTO transcript_segments (session_id, segment_index, text)
             VALUES ('s1', 0, 'b')",
            [],
        );
        assert!(dup.is_err(), "duplicate segment_index must be rejected");
    }

    #[test]
    fn test_one_active_session_index() {
        let conn = mem_db();
        run_migrations(&conn).expect("migrations");
        conn.execute(
            "INSERT INTO users (id, email, created_at) VALUES ('u1', 'a@b.c', '2026-01-01')",
            [],
        )
        .unwrap();
        conn.execute(
            "INSERT INTO live_sessions (id, user_id, status, started_at)
             VALUES ('s1', 'u1', 'active', '2026-01-01')",
            [],
        )
        .unwrap();

        // Second active session for the same user violates the partial index
        let second = conn.execute(
            "INSERT INTO live_sessions (id, user_id, status, started_at)
             VALUES ('s2', 'u1', 'active', '2026-01-01')",
            [],
        );
        assert!(second.is_err());

        // A completed session is fine
        conn.execute(
            "INSERT INTO live_sessions (id, user_id, status, started_at)
             VALUES ('s3', 'u1', 'completed', '2026-01-01')",
            [],
        )
        .expect("non-active sessions are not constrained");
    }

    #[test]
    fn test_bootstrap_existing_db() {
        let conn = mem_db();

        // Simulate a pre-framework database: create users table manually
        conn.execute_batch(
            "CREATE TABLE users (
                id TEXT PRIMARY KEY,
                email TEXT NOT NULL UNIQUE,
                created_at TEXT NOT NULL
            );
            INSERT INTO users (id, email, created_at)
            VALUES ('existing', 'old@example.com', '2025-01-01');",
        )
        .expect("seed existing db");

        let applied = run_migrations(&conn).expect("migrations should succeed");
        assert_eq!(applied, 0, "bootstrap should mark v1 as applied, not run SQL");

        let version = current_version(&conn).expect("version query");
        assert_eq!(version, 1);

        let email: String = conn
            .query_row(
                "SELECT email FROM users WHERE id = 'existing'",
                [],
                |row| row.get(0),
            )
            .expect("existing data should be preserved");
        assert_eq!(email, "old@example.com");
    }

    #[test]
    fn test_forward_compat_guard() {
        let conn = mem_db();

        ensure_schema_version_table(&conn).unwrap();
        conn.execute("INSERT INTO schema_version (version) VALUES (999)", [])
            .unwrap();

        let result = run_migrations(&conn);
        assert!(result.is_err());
        let err = result.unwrap_err();
        assert!(
            err.contains("newer than this build"),
            "error should mention version mismatch: {}",
            err
        );
    }

    #[test]
    fn test_idempotency() {
        let conn = mem_db();

        let first = run_migrations(&conn).expect("first run");
        assert_eq!(first, 1);

        let second = run_migrations(&conn).expect("second run");
        assert_eq!(second, 0, "second run should apply no migrations");

        let version = current_version(&conn).expect("version query");
        assert_eq!(version, 1);
    }
}
