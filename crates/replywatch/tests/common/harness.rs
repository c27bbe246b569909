//! Test harness wiring the core components over an in-memory database.

#![allow(dead_code)]

use std::sync::Arc;
use std::time::Duration as StdDuration;

use chrono::{DateTime, Duration, Utc};

use replywatch::db::{webhook_event_repo, Database, DatabaseError, SqliteStore};
use replywatch::detection::ReplyDetector;
use replywatch::reconcile::ReconciliationSweep;
use replywatch::subscription::{
    InMemoryCooldown, SubscriptionManager, SubscriptionSettings, SubscriptionStatus,
    SubscriptionStore, WebhookSubscription,
};
use replywatch::tracking::{NewTrackedEmail, TrackedEmail, TrackingStore};
use replywatch::webhook::NotificationProcessor;

use super::builders::{settings, CALLBACK_URL, CLIENT_STATE, USER};
use super::fake_provider::FakeProvider;

pub struct TestHarness {
    pub store: Arc<SqliteStore>,
    pub provider: Arc<FakeProvider>,
    pub cooldown: Arc<InMemoryCooldown>,
}

impl TestHarness {
    pub fn new() -> Self {
        Self::with_cooldown_window(StdDuration::from_secs(300))
    }

    pub fn with_cooldown_window(window: StdDuration) -> Self {
        let db = Database::open_in_memory().expect("Failed to open in-memory database");
        Self {
            store: Arc::new(SqliteStore::new(db)),
            provider: Arc::new(FakeProvider::new()),
            cooldown: Arc::new(InMemoryCooldown::new(window)),
        }
    }

    pub fn detector(&self) -> Arc<ReplyDetector> {
        Arc::new(ReplyDetector::new(self.provider.clone(), self.store.clone()))
    }

    pub fn sweep(&self) -> ReconciliationSweep {
        ReconciliationSweep::new(self.detector(), self.store.clone())
    }

    pub fn manager(&self) -> Arc<SubscriptionManager> {
        self.manager_with(settings())
    }

    pub fn manager_with(&self, settings: SubscriptionSettings) -> Arc<SubscriptionManager> {
        Arc::new(SubscriptionManager::new(
            self.provider.clone(),
            self.store.clone(),
            self.cooldown.clone(),
            settings,
        ))
    }

    pub fn processor(&self) -> NotificationProcessor {
        NotificationProcessor::new(
            self.detector(),
            self.store.clone(),
            self.store.clone(),
            self.provider.clone(),
        )
    }

    pub fn track(&self, new: NewTrackedEmail) -> TrackedEmail {
        self.store
            .insert_tracked_email(new)
            .expect("Failed to insert tracked email")
    }

    pub fn reload(&self, email: &TrackedEmail) -> TrackedEmail {
        self.store
            .tracked_email(&email.id)
            .expect("Failed to load tracked email")
            .expect("Tracked email disappeared")
    }

    /// Stores an active subscription for `USER` expiring at `expires_at`,
    /// and mirrors it at the provider.
    pub fn seed_subscription(&self, id: &str, expires_at: DateTime<Utc>) -> WebhookSubscription {
        let sub = WebhookSubscription {
            id: id.to_string(),
            user_id: USER.to_string(),
            resource: "me/mailFolders('Inbox')/messages".to_string(),
            change_types: vec![replywatch::subscription::ChangeType::Created],
            notification_url: CALLBACK_URL.to_string(),
            client_state: CLIENT_STATE.to_string(),
            expires_at,
            last_renewed_at: None,
            renewal_count: 0,
            renewal_failures: 0,
            status: SubscriptionStatus::Active,
        };
        self.store
            .insert_subscription(&sub)
            .expect("Failed to seed subscription");
        self.provider.add_remote_subscription(id, expires_at);
        sub
    }

    pub fn seed_healthy_subscription(&self, id: &str) -> WebhookSubscription {
        self.seed_subscription(id, Utc::now() + Duration::hours(48))
    }

    pub fn event_count(&self) -> u64 {
        webhook_event_repo::count(self.store.database()).expect("Failed to count events")
    }

    pub fn events_with_errors(&self) -> u64 {
        webhook_event_repo::count_with_errors(self.store.database())
            .expect("Failed to count events")
    }
}

/// Subscription store whose inserts always fail.
pub struct FailingInsertStore {
    pub inner: SqliteStore,
}

impl SubscriptionStore for FailingInsertStore {
    fn health_check(&self) -> Result<(), DatabaseError> {
        self.inner.health_check()
    }

    fn active_subscription(
        &self,
        user_id: &str,
    ) -> Result<Option<WebhookSubscription>, DatabaseError> {
        self.inner.active_subscription(user_id)
    }

    fn subscription(&self, id: &str) -> Result<Option<WebhookSubscription>, DatabaseError> {
        self.inner.subscription(id)
    }

    fn insert_subscription(&self, _sub: &WebhookSubscription) -> Result<(), DatabaseError> {
        Err(DatabaseError::LockPoisoned)
    }

    fn record_renewal(
        &self,
        id: &str,
        expires_at: DateTime<Utc>,
        renewed_at: DateTime<Utc>,
    ) -> Result<bool, DatabaseError> {
        self.inner.record_renewal(id, expires_at, renewed_at)
    }

    fn record_renewal_failure(&self, id: &str) -> Result<u32, DatabaseError> {
        self.inner.record_renewal_failure(id)
    }

    fn mark_failed(&self, id: &str) -> Result<(), DatabaseError> {
        self.inner.mark_failed(id)
    }

    fn delete_subscription(&self, id: &str) -> Result<(), DatabaseError> {
        self.inner.delete_subscription(id)
    }

    fn expiring_before(
        &self,
        cutoff: DateTime<Utc>,
    ) -> Result<Vec<WebhookSubscription>, DatabaseError> {
        self.inner.expiring_before(cutoff)
    }
}
