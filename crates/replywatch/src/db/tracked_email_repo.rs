//! Tracked email repository: CRUD and guarded transitions for `tracked_emails`.

use chrono::{DateTime, Utc};
use rusqlite::{params, Row};

use super::{format_timestamp, parse_optional_timestamp, parse_timestamp, Database, DatabaseError};
use crate::tracking::{DetectionMethod, StatusTransition, TrackedEmail, TrackingStatus};

const COLUMNS: &str = "id, user_id, recipient, subject, provider_message_id, internet_message_id,
     conversation_id, status, sent_at, reply_received_at, detection_method, expires_at, last_sync_check";

/// A raw tracked email row from the database.
struct TrackedEmailRow {
    id: String,
    user_id: String,
    recipient: String,
    subject: String,
    provider_message_id: Option<String>,
    internet_message_id: Option<String>,
    conversation_id: Option<String>,
    status: String,
    sent_at: String,
    reply_received_at: Option<String>,
    detection_method: Option<String>,
    expires_at: Option<String>,
    last_sync_check: Option<String>,
}

impl TrackedEmailRow {
    fn from_row(row: &Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            id: row.get(0)?,
            user_id: row.get(1)?,
            recipient: row.get(2)?,
            subject: row.get(3)?,
            provider_message_id: row.get(4)?,
            internet_message_id: row.get(5)?,
            conversation_id: row.get(6)?,
            status: row.get(7)?,
            sent_at: row.get(8)?,
            reply_received_at: row.get(9)?,
            detection_method: row.get(10)?,
            expires_at: row.get(11)?,
            last_sync_check: row.get(12)?,
        })
    }

    fn into_model(self) -> Result<TrackedEmail, DatabaseError> {
        let status = self
            .status
            .parse::<TrackingStatus>()
            .map_err(|_| DatabaseError::InvalidValue {
                column: "status",
                value: self.status.clone(),
            })?;
        let detection_method = match self.detection_method {
            Some(ref m) => Some(m.parse::<DetectionMethod>().map_err(|_| {
                DatabaseError::InvalidValue {
                    column: "detection_method",
                    value: m.clone(),
                }
            })?),
            None => None,
        };

        Ok(TrackedEmail {
            id: self.id,
            user_id: self.user_id,
            recipient: self.recipient,
            subject: self.subject,
            provider_message_id: self.provider_message_id,
            internet_message_id: self.internet_message_id,
            conversation_id: self.conversation_id,
            status,
            sent_at: parse_timestamp("sent_at", &self.sent_at)?,
            reply_received_at: parse_optional_timestamp(
                "reply_received_at",
                self.reply_received_at,
            )?,
            detection_method,
            expires_at: parse_optional_timestamp("expires_at", self.expires_at)?,
            last_sync_check: parse_optional_timestamp("last_sync_check", self.last_sync_check)?,
        })
    }
}

fn query_many(
    db: &Database,
    sql: &str,
    args: &[&dyn rusqlite::types::ToSql],
) -> Result<Vec<TrackedEmail>, DatabaseError> {
    db.with_conn(|conn| {
        let mut stmt = conn.prepare(sql)?;
        let rows = stmt
            .query_map(args, TrackedEmailRow::from_row)?
            .collect::<Result<Vec<_>, _>>()?;
        rows.into_iter().map(TrackedEmailRow::into_model).collect()
    })
}

/// Inserts a tracked email.
pub fn insert(db: &Database, email: &TrackedEmail) -> Result<(), DatabaseError> {
    let now = format_timestamp(Utc::now());
    db.with_conn(|conn| {
        conn.execute(
            "INSERT INTO tracked_emails (id, user_id, recipient, subject, provider_message_id,
               internet_message_id, conversation_id, status, sent_at, reply_received_at,
               detection_method, expires_at, last_sync_check, created_at, updated_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?14)",
            params![
                email.id,
                email.user_id,
                email.recipient,
                email.subject,
                email.provider_message_id,
                email.internet_message_id,
                email.conversation_id,
                email.status.as_str(),
                format_timestamp(email.sent_at),
                email.reply_received_at.map(format_timestamp),
                email.detection_method.map(|m| m.as_str()),
                email.expires_at.map(format_timestamp),
                email.last_sync_check.map(format_timestamp),
                now,
            ],
        )?;
        Ok(())
    })
}

/// Finds a tracked email by id.
pub fn find(db: &Database, id: &str) -> Result<Option<TrackedEmail>, DatabaseError> {
    let sql = format!("SELECT {} FROM tracked_emails WHERE id = ?1", COLUMNS);
    Ok(query_many(db, &sql, &[&id])?.into_iter().next())
}

/// Returns PENDING rows in a conversation, oldest send first.
pub fn find_pending_by_conversation(
    db: &Database,
    conversation_id: &str,
) -> Result<Vec<TrackedEmail>, DatabaseError> {
    let sql = format!(
        "SELECT {} FROM tracked_emails
         WHERE conversation_id = ?1 AND status = 'pending'
         ORDER BY sent_at ASC",
        COLUMNS
    );
    query_many(db, &sql, &[&conversation_id])
}

/// Returns a user's PENDING rows sent at or after `since`, oldest first.
pub fn find_pending_for_user(
    db: &Database,
    user_id: &str,
    since: DateTime<Utc>,
) -> Result<Vec<TrackedEmail>, DatabaseError> {
    let sql = format!(
        "SELECT {} FROM tracked_emails
         WHERE user_id = ?1 AND status = 'pending' AND sent_at >= ?2
         ORDER BY sent_at ASC",
        COLUMNS
    );
    query_many(db, &sql, &[&user_id, &format_timestamp(since)])
}

/// Returns every PENDING row sent at or after `since`, oldest first.
pub fn find_pending_sent_since(
    db: &Database,
    since: DateTime<Utc>,
) -> Result<Vec<TrackedEmail>, DatabaseError> {
    let sql = format!(
        "SELECT {} FROM tracked_emails
         WHERE status = 'pending' AND sent_at >= ?1
         ORDER BY sent_at ASC",
        COLUMNS
    );
    query_many(db, &sql, &[&format_timestamp(since)])
}

/// Applies `transition` only while the row still has status `expected`.
///
/// Returns `true` when this call performed the transition. Concurrent
/// writers racing on the same row see `false` on every call but one.
pub fn update_if_status(
    db: &Database,
    id: &str,
    expected: TrackingStatus,
    transition: StatusTransition,
) -> Result<bool, DatabaseError> {
    let now = format_timestamp(Utc::now());
    let (reply_at, method) = match transition {
        StatusTransition::Replied { at, method } => {
            (Some(format_timestamp(at)), Some(method.as_str()))
        }
        _ => (None, None),
    };

    db.with_conn(|conn| {
        let changed = conn.execute(
            "UPDATE tracked_emails
             SET status = ?1,
                 reply_received_at = ?2,
                 detection_method = COALESCE(?3, detection_method),
                 updated_at = ?4
             WHERE id = ?5 AND status = ?6",
            params![
                transition.target().as_str(),
                reply_at,
                method,
                now,
                id,
                expected.as_str(),
            ],
        )?;
        Ok(changed == 1)
    })
}

/// Records that a sweep examined the row. `method` is only written while
/// the row is still PENDING, so a terminal row keeps the method that
/// resolved it.
pub fn touch_sync_check(
    db: &Database,
    id: &str,
    at: DateTime<Utc>,
    method: Option<DetectionMethod>,
) -> Result<bool, DatabaseError> {
    let at = format_timestamp(at);
    db.with_conn(|conn| {
        let changed = conn.execute(
            "UPDATE tracked_emails
             SET last_sync_check = ?1,
                 detection_method = CASE
                     WHEN ?2 IS NOT NULL AND status = 'pending' THEN ?2
                     ELSE detection_method
                 END,
                 updated_at = ?1
             WHERE id = ?3",
            params![at, method.map(|m| m.as_str()), id],
        )?;
        Ok(changed == 1)
    })
}

/// Moves PENDING rows whose expiry has passed to EXPIRED.
/// Returns the number of rows expired.
pub fn expire_pending_before(db: &Database, now: DateTime<Utc>) -> Result<u64, DatabaseError> {
    let now = format_timestamp(now);
    db.with_conn(|conn| {
        let count = conn.execute(
            "UPDATE tracked_emails SET status = 'expired', updated_at = ?1
             WHERE status = 'pending' AND expires_at IS NOT NULL AND expires_at <= ?1",
            params![now],
        )?;
        Ok(count as u64)
    })
}
