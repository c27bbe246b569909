//! Webhook event repository: the append-only processing ledger in `webhook_events`.

use chrono::{DateTime, Utc};
use rusqlite::params;

use super::{format_timestamp, Database, DatabaseError};

/// A raw webhook event row from the database.
#[derive(Debug, Clone)]
pub struct WebhookEventRow {
    pub id: String,
    pub subscription_id: Option<String>,
    pub change_type: Option<String>,
    pub resource_id: Option<String>,
    pub raw_payload: String,
    pub processed: bool,
    pub processed_at: Option<String>,
    pub error_message: Option<String>,
    pub retry_count: u32,
    pub received_at: String,
}

/// Inserts a new, unprocessed event.
pub fn insert(db: &Database, row: &WebhookEventRow) -> Result<(), DatabaseError> {
    db.with_conn(|conn| {
        conn.execute(
            "INSERT INTO webhook_events (id, subscription_id, change_type, resource_id,
               raw_payload, processed, processed_at, error_message, retry_count, received_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)",
            params![
                row.id,
                row.subscription_id,
                row.change_type,
                row.resource_id,
                row.raw_payload,
                row.processed,
                row.processed_at,
                row.error_message,
                row.retry_count,
                row.received_at,
            ],
        )?;
        Ok(())
    })
}

/// Marks an event as processed, optionally noting why it was rejected.
pub fn mark_processed(
    db: &Database,
    id: &str,
    at: DateTime<Utc>,
    note: Option<&str>,
) -> Result<(), DatabaseError> {
    db.with_conn(|conn| {
        conn.execute(
            "UPDATE webhook_events SET processed = 1, processed_at = ?1, error_message = ?2
             WHERE id = ?3",
            params![format_timestamp(at), note, id],
        )?;
        Ok(())
    })
}

/// Records a failed processing attempt.
pub fn mark_failed(db: &Database, id: &str, error: &str) -> Result<(), DatabaseError> {
    db.with_conn(|conn| {
        conn.execute(
            "UPDATE webhook_events SET error_message = ?1, retry_count = retry_count + 1
             WHERE id = ?2",
            params![error, id],
        )?;
        Ok(())
    })
}

/// Finds an event by id.
pub fn find(db: &Database, id: &str) -> Result<Option<WebhookEventRow>, DatabaseError> {
    db.with_conn(|conn| {
        let mut stmt = conn.prepare(
            "SELECT id, subscription_id, change_type, resource_id, raw_payload, processed,
                    processed_at, error_message, retry_count, received_at
             FROM webhook_events WHERE id = ?1",
        )?;
        let mut rows = stmt.query_map(params![id], |row| {
            Ok(WebhookEventRow {
                id: row.get(0)?,
                subscription_id: row.get(1)?,
                change_type: row.get(2)?,
                resource_id: row.get(3)?,
                raw_payload: row.get(4)?,
                processed: row.get(5)?,
                processed_at: row.get(6)?,
                error_message: row.get(7)?,
                retry_count: row.get(8)?,
                received_at: row.get(9)?,
            })
        })?;
        match rows.next() {
            Some(Ok(row)) => Ok(Some(row)),
            Some(Err(e)) => Err(DatabaseError::Sqlite(e)),
            None => Ok(None),
        }
    })
}

/// Counts all events.
pub fn count(db: &Database) -> Result<u64, DatabaseError> {
    db.with_conn(|conn| {
        let count: u64 = conn.query_row("SELECT COUNT(*) FROM webhook_events", [], |r| r.get(0))?;
        Ok(count)
    })
}

/// Counts events that carry an error message.
pub fn count_with_errors(db: &Database) -> Result<u64, DatabaseError> {
    db.with_conn(|conn| {
        let count: u64 = conn.query_row(
            "SELECT COUNT(*) FROM webhook_events WHERE error_message IS NOT NULL",
            [],
            |r| r.get(0),
        )?;
        Ok(count)
    })
}

/// Deletes events received before `cutoff`. Returns the number of rows deleted.
pub fn delete_received_before(
    db: &Database,
    cutoff: DateTime<Utc>,
) -> Result<u64, DatabaseError> {
    db.with_conn(|conn| {
        let count = conn.execute(
            "DELETE FROM webhook_events WHERE received_at < ?1",
            params![format_timestamp(cutoff)],
        )?;
        Ok(count as u64)
    })
}
