//! Webhook subscription repository: CRUD operations for `webhook_subscriptions`.

use chrono::{DateTime, Utc};
use rusqlite::{params, Row};

use super::{format_timestamp, parse_optional_timestamp, parse_timestamp, Database, DatabaseError};
use crate::subscription::{ChangeType, SubscriptionStatus, WebhookSubscription};

const COLUMNS: &str = "id, user_id, resource, change_types, notification_url, client_state,
     expires_at, last_renewed_at, renewal_count, renewal_failures, status";

/// A raw subscription row from the database.
struct SubscriptionRow {
    id: String,
    user_id: String,
    resource: String,
    change_types: String,
    notification_url: String,
    client_state: String,
    expires_at: String,
    last_renewed_at: Option<String>,
    renewal_count: u32,
    renewal_failures: u32,
    status: String,
}

impl SubscriptionRow {
    fn from_row(row: &Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            id: row.get(0)?,
            user_id: row.get(1)?,
            resource: row.get(2)?,
            change_types: row.get(3)?,
            notification_url: row.get(4)?,
            client_state: row.get(5)?,
            expires_at: row.get(6)?,
            last_renewed_at: row.get(7)?,
            renewal_count: row.get(8)?,
            renewal_failures: row.get(9)?,
            status: row.get(10)?,
        })
    }

    fn into_model(self) -> Result<WebhookSubscription, DatabaseError> {
        let change_types = ChangeType::parse_list(&self.change_types).map_err(|_| {
            DatabaseError::InvalidValue {
                column: "change_types",
                value: self.change_types.clone(),
            }
        })?;
        let status = self
            .status
            .parse::<SubscriptionStatus>()
            .map_err(|_| DatabaseError::InvalidValue {
                column: "status",
                value: self.status.clone(),
            })?;

        Ok(WebhookSubscription {
            id: self.id,
            user_id: self.user_id,
            resource: self.resource,
            change_types,
            notification_url: self.notification_url,
            client_state: self.client_state,
            expires_at: parse_timestamp("expires_at", &self.expires_at)?,
            last_renewed_at: parse_optional_timestamp("last_renewed_at", self.last_renewed_at)?,
            renewal_count: self.renewal_count,
            renewal_failures: self.renewal_failures,
            status,
        })
    }
}

fn query_many(
    db: &Database,
    sql: &str,
    args: &[&dyn rusqlite::types::ToSql],
) -> Result<Vec<WebhookSubscription>, DatabaseError> {
    db.with_conn(|conn| {
        let mut stmt = conn.prepare(sql)?;
        let rows = stmt
            .query_map(args, SubscriptionRow::from_row)?
            .collect::<Result<Vec<_>, _>>()?;
        rows.into_iter().map(SubscriptionRow::into_model).collect()
    })
}

/// Inserts a subscription record.
pub fn insert(db: &Database, sub: &WebhookSubscription) -> Result<(), DatabaseError> {
    let now = format_timestamp(Utc::now());
    db.with_conn(|conn| {
        conn.execute(
            "INSERT INTO webhook_subscriptions (id, user_id, resource, change_types,
               notification_url, client_state, expires_at, last_renewed_at, renewal_count,
               renewal_failures, status, created_at, updated_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?12)",
            params![
                sub.id,
                sub.user_id,
                sub.resource,
                ChangeType::join(&sub.change_types),
                sub.notification_url,
                sub.client_state,
                format_timestamp(sub.expires_at),
                sub.last_renewed_at.map(format_timestamp),
                sub.renewal_count,
                sub.renewal_failures,
                sub.status.as_str(),
                now,
            ],
        )?;
        Ok(())
    })
}

/// Finds a subscription by provider id.
pub fn find(db: &Database, id: &str) -> Result<Option<WebhookSubscription>, DatabaseError> {
    let sql = format!("SELECT {} FROM webhook_subscriptions WHERE id = ?1", COLUMNS);
    Ok(query_many(db, &sql, &[&id])?.into_iter().next())
}

/// Finds the active subscription for a user.
pub fn find_active_for_user(
    db: &Database,
    user_id: &str,
) -> Result<Option<WebhookSubscription>, DatabaseError> {
    let sql = format!(
        "SELECT {} FROM webhook_subscriptions WHERE user_id = ?1 AND status = 'active'",
        COLUMNS
    );
    Ok(query_many(db, &sql, &[&user_id])?.into_iter().next())
}

/// Returns active subscriptions expiring at or before `cutoff`, soonest first.
pub fn find_active_expiring_before(
    db: &Database,
    cutoff: DateTime<Utc>,
) -> Result<Vec<WebhookSubscription>, DatabaseError> {
    let sql = format!(
        "SELECT {} FROM webhook_subscriptions
         WHERE status = 'active' AND expires_at <= ?1
         ORDER BY expires_at ASC",
        COLUMNS
    );
    query_many(db, &sql, &[&format_timestamp(cutoff)])
}

/// Records a successful renewal and clears the failure counter.
pub fn record_renewal(
    db: &Database,
    id: &str,
    expires_at: DateTime<Utc>,
    renewed_at: DateTime<Utc>,
) -> Result<bool, DatabaseError> {
    let renewed_at = format_timestamp(renewed_at);
    db.with_conn(|conn| {
        let changed = conn.execute(
            "UPDATE webhook_subscriptions
             SET expires_at = ?1, last_renewed_at = ?2, renewal_count = renewal_count + 1,
                 renewal_failures = 0, updated_at = ?2
             WHERE id = ?3",
            params![format_timestamp(expires_at), renewed_at, id],
        )?;
        Ok(changed == 1)
    })
}

/// Increments the renewal failure counter. Returns the new count.
pub fn record_renewal_failure(db: &Database, id: &str) -> Result<u32, DatabaseError> {
    let now = format_timestamp(Utc::now());
    db.with_conn(|conn| {
        conn.execute(
            "UPDATE webhook_subscriptions
             SET renewal_failures = renewal_failures + 1, updated_at = ?1
             WHERE id = ?2",
            params![now, id],
        )?;
        let count: u32 = conn.query_row(
            "SELECT renewal_failures FROM webhook_subscriptions WHERE id = ?1",
            params![id],
            |r| r.get(0),
        )?;
        Ok(count)
    })
}

/// Sets the subscription status.
pub fn set_status(
    db: &Database,
    id: &str,
    status: SubscriptionStatus,
) -> Result<(), DatabaseError> {
    let now = format_timestamp(Utc::now());
    db.with_conn(|conn| {
        conn.execute(
            "UPDATE webhook_subscriptions SET status = ?1, updated_at = ?2 WHERE id = ?3",
            params![status.as_str(), now, id],
        )?;
        Ok(())
    })
}

/// Deletes a subscription by provider id.
pub fn delete(db: &Database, id: &str) -> Result<(), DatabaseError> {
    db.with_conn(|conn| {
        conn.execute(
            "DELETE FROM webhook_subscriptions WHERE id = ?1",
            params![id],
        )?;
        Ok(())
    })
}
