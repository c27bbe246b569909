//! SQLite-backed implementation of the store traits.

use chrono::{DateTime, Utc};

use super::webhook_event_repo::WebhookEventRow;
use super::{
    subscription_repo, tracked_email_repo, webhook_event_repo, Database, DatabaseError,
};
use crate::subscription::{SubscriptionStatus, SubscriptionStore, WebhookSubscription};
use crate::tracking::{
    DetectionMethod, NewTrackedEmail, StatusTransition, TrackedEmail, TrackingStatus,
    TrackingStore,
};

/// Store over a shared [`Database`] handle.
#[derive(Clone)]
pub struct SqliteStore {
    db: Database,
}

impl SqliteStore {
    pub fn new(db: Database) -> Self {
        Self { db }
    }

    pub fn database(&self) -> &Database {
        &self.db
    }
}

impl TrackingStore for SqliteStore {
    fn insert_tracked_email(&self, new: NewTrackedEmail) -> Result<TrackedEmail, DatabaseError> {
        let email = TrackedEmail {
            id: uuid::Uuid::new_v4().to_string(),
            user_id: new.user_id,
            recipient: new.recipient,
            subject: new.subject,
            provider_message_id: new.provider_message_id,
            internet_message_id: new.internet_message_id,
            conversation_id: new.conversation_id,
            status: TrackingStatus::Pending,
            sent_at: new.sent_at,
            reply_received_at: None,
            detection_method: None,
            expires_at: new.expires_at,
            last_sync_check: None,
        };
        tracked_email_repo::insert(&self.db, &email)?;
        Ok(email)
    }

    fn tracked_email(&self, id: &str) -> Result<Option<TrackedEmail>, DatabaseError> {
        tracked_email_repo::find(&self.db, id)
    }

    fn pending_by_conversation(
        &self,
        conversation_id: &str,
    ) -> Result<Vec<TrackedEmail>, DatabaseError> {
        tracked_email_repo::find_pending_by_conversation(&self.db, conversation_id)
    }

    fn pending_for_user(
        &self,
        user_id: &str,
        since: DateTime<Utc>,
    ) -> Result<Vec<TrackedEmail>, DatabaseError> {
        tracked_email_repo::find_pending_for_user(&self.db, user_id, since)
    }

    fn pending_sent_since(&self, since: DateTime<Utc>) -> Result<Vec<TrackedEmail>, DatabaseError> {
        tracked_email_repo::find_pending_sent_since(&self.db, since)
    }

    fn update_if_status(
        &self,
        id: &str,
        expected: TrackingStatus,
        transition: StatusTransition,
    ) -> Result<bool, DatabaseError> {
        tracked_email_repo::update_if_status(&self.db, id, expected, transition)
    }

    fn record_sync_check(
        &self,
        id: &str,
        at: DateTime<Utc>,
        method: Option<DetectionMethod>,
    ) -> Result<bool, DatabaseError> {
        tracked_email_repo::touch_sync_check(&self.db, id, at, method)
    }

    fn expire_overdue(&self, now: DateTime<Utc>) -> Result<u64, DatabaseError> {
        tracked_email_repo::expire_pending_before(&self.db, now)
    }

    fn append_event(&self, event: &WebhookEventRow) -> Result<(), DatabaseError> {
        webhook_event_repo::insert(&self.db, event)
    }

    fn complete_event(
        &self,
        id: &str,
        at: DateTime<Utc>,
        note: Option<&str>,
    ) -> Result<(), DatabaseError> {
        webhook_event_repo::mark_processed(&self.db, id, at, note)
    }

    fn fail_event(&self, id: &str, error: &str) -> Result<(), DatabaseError> {
        webhook_event_repo::mark_failed(&self.db, id, error)
    }

    fn purge_events_before(&self, cutoff: DateTime<Utc>) -> Result<u64, DatabaseError> {
        webhook_event_repo::delete_received_before(&self.db, cutoff)
    }
}

impl SubscriptionStore for SqliteStore {
    fn health_check(&self) -> Result<(), DatabaseError> {
        self.db.ping()
    }

    fn active_subscription(
        &self,
        user_id: &str,
    ) -> Result<Option<WebhookSubscription>, DatabaseError> {
        subscription_repo::find_active_for_user(&self.db, user_id)
    }

    fn subscription(&self, id: &str) -> Result<Option<WebhookSubscription>, DatabaseError> {
        subscription_repo::find(&self.db, id)
    }

    fn insert_subscription(&self, sub: &WebhookSubscription) -> Result<(), DatabaseError> {
        subscription_repo::insert(&self.db, sub)
    }

    fn record_renewal(
        &self,
        id: &str,
        expires_at: DateTime<Utc>,
        renewed_at: DateTime<Utc>,
    ) -> Result<bool, DatabaseError> {
        subscription_repo::record_renewal(&self.db, id, expires_at, renewed_at)
    }

    fn record_renewal_failure(&self, id: &str) -> Result<u32, DatabaseError> {
        subscription_repo::record_renewal_failure(&self.db, id)
    }

    fn mark_failed(&self, id: &str) -> Result<(), DatabaseError> {
        subscription_repo::set_status(&self.db, id, SubscriptionStatus::Failed)
    }

    fn delete_subscription(&self, id: &str) -> Result<(), DatabaseError> {
        subscription_repo::delete(&self.db, id)
    }

    fn expiring_before(
        &self,
        cutoff: DateTime<Utc>,
    ) -> Result<Vec<WebhookSubscription>, DatabaseError> {
        subscription_repo::find_active_expiring_before(&self.db, cutoff)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_insert_tracked_email_assigns_pending() {
        let store = SqliteStore::new(Database::open_in_memory().unwrap());
        let email = store
            .insert_tracked_email(NewTrackedEmail {
                user_id: "u1".to_string(),
                recipient: "client@example.com".to_string(),
                subject: "Proposal".to_string(),
                provider_message_id: Some("m1".to_string()),
                internet_message_id: Some("<m1@example.com>".to_string()),
                conversation_id: None,
                sent_at: Utc::now(),
                expires_at: None,
            })
            .unwrap();

        assert_eq!(email.status, TrackingStatus::Pending);
        assert!(email.reply_received_at.is_none());
        let stored = store.tracked_email(&email.id).unwrap().unwrap();
        assert_eq!(stored.subject, "Proposal");
    }

    #[test]
    fn test_health_check() {
        let store = SqliteStore::new(Database::open_in_memory().unwrap());
        store.health_check().unwrap();
    }
}
