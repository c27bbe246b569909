//! Mailbox credentials in `oauth_tokens`: one row per connected user.
//!
//! Token columns hold ciphertext when a token key is configured; this module
//! never sees plaintext in that case.

use chrono::{DateTime, Duration, Utc};
use rusqlite::{params, OptionalExtension, Row};

use super::{format_timestamp, parse_optional_timestamp, parse_timestamp, Database, DatabaseError};

const COLUMNS: &str = "user_id, provider, access_token, refresh_token, expires_at,
     connected_at, refreshed_at, refresh_failures, last_refresh_error";

#[derive(Debug, Clone, PartialEq)]
pub struct MailboxToken {
    pub user_id: String,
    pub provider: String,
    pub access_token: String,
    pub refresh_token: Option<String>,
    pub expires_at: DateTime<Utc>,
    pub connected_at: DateTime<Utc>,
    pub refreshed_at: Option<DateTime<Utc>>,
    /// Consecutive failed refreshes since the last success or reconnect.
    pub refresh_failures: u32,
    pub last_refresh_error: Option<String>,
}

impl MailboxToken {
    /// True when the access token is past, or within `buffer` of, expiry.
    pub fn needs_refresh(&self, now: DateTime<Utc>, buffer: Duration) -> bool {
        self.expires_at <= now + buffer
    }
}

struct TokenRow {
    user_id: String,
    provider: String,
    access_token: String,
    refresh_token: Option<String>,
    expires_at: String,
    connected_at: String,
    refreshed_at: Option<String>,
    refresh_failures: u32,
    last_refresh_error: Option<String>,
}

impl TokenRow {
    fn from_row(row: &Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            user_id: row.get(0)?,
            provider: row.get(1)?,
            access_token: row.get(2)?,
            refresh_token: row.get(3)?,
            expires_at: row.get(4)?,
            connected_at: row.get(5)?,
            refreshed_at: row.get(6)?,
            refresh_failures: row.get(7)?,
            last_refresh_error: row.get(8)?,
        })
    }

    fn into_model(self) -> Result<MailboxToken, DatabaseError> {
        Ok(MailboxToken {
            user_id: self.user_id,
            provider: self.provider,
            access_token: self.access_token,
            refresh_token: self.refresh_token,
            expires_at: parse_timestamp("expires_at", &self.expires_at)?,
            connected_at: parse_timestamp("connected_at", &self.connected_at)?,
            refreshed_at: parse_optional_timestamp("refreshed_at", self.refreshed_at)?,
            refresh_failures: self.refresh_failures,
            last_refresh_error: self.last_refresh_error,
        })
    }
}

/// Stores the credentials from a (re)connect, replacing the user's row and
/// clearing its refresh history.
pub fn connect(db: &Database, token: &MailboxToken) -> Result<(), DatabaseError> {
    db.with_conn(|conn| {
        conn.execute(
            "INSERT OR REPLACE INTO oauth_tokens
               (user_id, provider, access_token, refresh_token, expires_at,
                connected_at, refreshed_at, refresh_failures, last_refresh_error)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, NULL, 0, NULL)",
            params![
                token.user_id,
                token.provider,
                token.access_token,
                token.refresh_token,
                format_timestamp(token.expires_at),
                format_timestamp(token.connected_at),
            ],
        )?;
        Ok(())
    })
}

/// Swaps in a refreshed access token. Providers may omit the refresh token
/// on refresh, in which case the stored one is kept. Returns false when the
/// user disconnected in the meantime.
pub fn record_refresh(
    db: &Database,
    user_id: &str,
    access_token: &str,
    refresh_token: Option<&str>,
    expires_at: DateTime<Utc>,
    now: DateTime<Utc>,
) -> Result<bool, DatabaseError> {
    db.with_conn(|conn| {
        let changed = conn.execute(
            "UPDATE oauth_tokens SET
               access_token = ?2,
               refresh_token = COALESCE(?3, refresh_token),
               expires_at = ?4,
               refreshed_at = ?5,
               refresh_failures = 0,
               last_refresh_error = NULL
             WHERE user_id = ?1",
            params![
                user_id,
                access_token,
                refresh_token,
                format_timestamp(expires_at),
                format_timestamp(now),
            ],
        )?;
        Ok(changed > 0)
    })
}

/// Notes a failed refresh attempt and returns the new failure streak.
pub fn record_refresh_failure(
    db: &Database,
    user_id: &str,
    error: &str,
) -> Result<u32, DatabaseError> {
    db.with_conn(|conn| {
        let failures: Option<u32> = conn
            .query_row(
                "UPDATE oauth_tokens
                 SET refresh_failures = refresh_failures + 1, last_refresh_error = ?2
                 WHERE user_id = ?1
                 RETURNING refresh_failures",
                params![user_id, error],
                |r| r.get(0),
            )
            .optional()?;
        Ok(failures.unwrap_or(0))
    })
}

pub fn find(db: &Database, user_id: &str) -> Result<Option<MailboxToken>, DatabaseError> {
    db.with_conn(|conn| {
        let row = conn
            .query_row(
                &format!("SELECT {} FROM oauth_tokens WHERE user_id = ?1", COLUMNS),
                params![user_id],
                TokenRow::from_row,
            )
            .optional()?;
        row.map(TokenRow::into_model).transpose()
    })
}

/// Users with stored credentials, in id order.
pub fn list_user_ids(db: &Database) -> Result<Vec<String>, DatabaseError> {
    db.with_conn(|conn| {
        let mut stmt = conn.prepare("SELECT user_id FROM oauth_tokens ORDER BY user_id")?;
        let ids = stmt
            .query_map([], |row| row.get::<_, String>(0))?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(ids)
    })
}

pub fn delete(db: &Database, user_id: &str) -> Result<(), DatabaseError> {
    db.with_conn(|conn| {
        conn.execute("DELETE FROM oauth_tokens WHERE user_id = ?1", params![user_id])?;
        Ok(())
    })
}
