//! Database migration system.
//!
//! Tracks applied migrations in a `_migrations` table and applies
//! pending ones in order. ALTER TABLE ADD COLUMN migrations are
//! handled conditionally to support idempotent execution.

use rusqlite::Connection;

use super::error::DatabaseError;

/// A single migration definition.
struct Migration {
    version: u32,
    description: &'static str,
    sql: &'static str,
    kind: MigrationKind,
}

enum MigrationKind {
    /// Execute the SQL directly.
    Standard,
    /// ALTER TABLE ADD COLUMN; skip if column already exists.
    AddColumn {
        table: &'static str,
        column: &'static str,
    },
}

/// All migrations in order. Each is applied at most once.
const MIGRATIONS: &[Migration] = &[
    Migration {
        version: 1,
        description: "create_tracked_emails_table",
        sql: include_str!("sql/001_create_tracked_emails.sql"),
        kind: MigrationKind::Standard,
    },
    Migration {
        version: 2,
        description: "create_webhook_subscriptions_table",
        sql: include_str!("sql/002_create_webhook_subscriptions.sql"),
        kind: MigrationKind::Standard,
    },
    Migration {
        version: 3,
        description: "create_webhook_events_table",
        sql: include_str!("sql/003_create_webhook_events.sql"),
        kind: MigrationKind::Standard,
    },
    Migration {
        version: 4,
        description: "create_oauth_tokens_table",
        sql: include_str!("sql/004_create_oauth_tokens.sql"),
        kind: MigrationKind::Standard,
    },
    Migration {
        version: 5,
        description: "add_last_sync_check_to_tracked_emails",
        sql: include_str!("sql/005_add_last_sync_check.sql"),
        kind: MigrationKind::AddColumn {
            table: "tracked_emails",
            column: "last_sync_check",
        },
    },
];

/// Runs all pending migrations on the given connection.
pub fn run_all(conn: &Connection) -> Result<(), DatabaseError> {
    conn.execute_batch(
        "CREATE TABLE IF NOT EXISTS _migrations (
            version INTEGER PRIMARY KEY,
            description TEXT NOT NULL,
            applied_at TEXT NOT NULL DEFAULT (datetime('now'))
        );",
    )?;

    let current_version: u32 = conn.query_row(
        "SELECT COALESCE(MAX(version), 0) FROM _migrations",
        [],
        |r| r.get(0),
    )?;

    for migration in MIGRATIONS {
        if migration.version <= current_version {
            continue;
        }

        log::info!(
            "Running migration v{}: {}",
            migration.version,
            migration.description
        );

        let should_run = match &migration.kind {
            MigrationKind::Standard => true,
            MigrationKind::AddColumn { table, column } => !column_exists(conn, table, column)?,
        };

        if should_run {
            conn.execute_batch(migration.sql)
                .map_err(|e| DatabaseError::Migration {
                    version: migration.version,
                    reason: e.to_string(),
                })?;
        } else {
            log::info!(
                "Skipping migration v{} (condition not met)",
                migration.version
            );
        }

        conn.execute(
            "INSERT INTO _migrations (version, description) VALUES (?1, ?2)",
            rusqlite::params![migration.version, migration.description],
        )?;
    }

    Ok(())
}

/// Checks whether a column exists on a table using `PRAGMA table_info`.
fn column_exists(conn: &Connection, table: &str, column: &str) -> Result<bool, DatabaseError> {
    // Only alphanumeric and underscores allowed.
    if !table.chars().all(|c| c.is_ascii_alphanumeric() || c == '_') {
        return Err(DatabaseError::Migration {
            version: 0,
            reason: format!("Invalid table name: {}", table),
        });
    }
    let mut stmt = conn.prepare(&format!("PRAGMA table_info({})", table))?;
    let exists = stmt
        .query_map([], |row| row.get::<_, String>(1))?
        .any(|r| r.map(|name| name == column).unwrap_or(false));
    Ok(exists)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn migrated() -> Connection {
        let conn = Connection::open_in_memory().unwrap();
        conn.execute_batch("PRAGMA foreign_keys=ON;").unwrap();
        run_all(&conn).unwrap();
        conn
    }

    #[test]
    fn test_migrations_run_on_fresh_db() {
        let conn = migrated();
        let count: u32 = conn
            .query_row("SELECT COUNT(*) FROM _migrations", [], |r| r.get(0))
            .unwrap();
        assert_eq!(count, MIGRATIONS.len() as u32);
    }

    #[test]
    fn test_migrations_are_idempotent() {
        let conn = migrated();
        run_all(&conn).unwrap();

        let count: u32 = conn
            .query_row("SELECT COUNT(*) FROM _migrations", [], |r| r.get(0))
            .unwrap();
        assert_eq!(count, MIGRATIONS.len() as u32);
    }

    #[test]
    fn test_column_exists_check() {
        let conn = Connection::open_in_memory().unwrap();
        conn.execute_batch("CREATE TABLE test_tbl (id TEXT, name TEXT);")
            .unwrap();

        assert!(column_exists(&conn, "test_tbl", "id").unwrap());
        assert!(!column_exists(&conn, "test_tbl", "missing").unwrap());
        assert!(column_exists(&conn, "bad;name", "id").is_err());
    }

    #[test]
    fn test_tracked_emails_has_last_sync_check() {
        let conn = migrated();
        assert!(column_exists(&conn, "tracked_emails", "last_sync_check").unwrap());
    }

    #[test]
    fn test_replied_requires_reply_timestamp() {
        let conn = migrated();
        let result = conn.execute(
            "INSERT INTO tracked_emails (id, user_id, recipient, subject, status, sent_at, created_at, updated_at)
             VALUES ('t1', 'u1', 'a@example.com', 'Hi', 'replied', '2026-01-01T00:00:00.000Z', '2026-01-01T00:00:00.000Z', '2026-01-01T00:00:00.000Z')",
            [],
        );
        assert!(result.is_err());

        let result = conn.execute(
            "INSERT INTO tracked_emails (id, user_id, recipient, subject, status, sent_at, reply_received_at, created_at, updated_at)
             VALUES ('t2', 'u1', 'a@example.com', 'Hi', 'pending', '2026-01-01T00:00:00.000Z', '2026-01-02T00:00:00.000Z', '2026-01-01T00:00:00.000Z', '2026-01-01T00:00:00.000Z')",
            [],
        );
        assert!(result.is_err());
    }

    #[test]
    fn test_one_active_subscription_per_user() {
        let conn = migrated();
        let insert = "INSERT INTO webhook_subscriptions (id, user_id, resource, change_types, notification_url, client_state, expires_at, status, created_at, updated_at)
                      VALUES (?1, 'u1', 'me/messages', 'created', 'https://x', 's', '2026-01-01T00:00:00.000Z', ?2, '2026-01-01T00:00:00.000Z', '2026-01-01T00:00:00.000Z')";
        conn.execute(insert, rusqlite::params!["s1", "active"]).unwrap();
        conn.execute(insert, rusqlite::params!["s2", "failed"]).unwrap();
        assert!(conn.execute(insert, rusqlite::params!["s3", "active"]).is_err());
    }
}
