//! Persistence seam for push subscriptions.

use chrono::{DateTime, Utc};

use super::model::WebhookSubscription;
use crate::db::DatabaseError;

pub trait SubscriptionStore: Send + Sync {
    /// Cheap reachability probe used before any mutating call.
    fn health_check(&self) -> Result<(), DatabaseError>;

    fn active_subscription(&self, user_id: &str)
        -> Result<Option<WebhookSubscription>, DatabaseError>;

    fn subscription(&self, id: &str) -> Result<Option<WebhookSubscription>, DatabaseError>;

    fn insert_subscription(&self, sub: &WebhookSubscription) -> Result<(), DatabaseError>;

    fn record_renewal(
        &self,
        id: &str,
        expires_at: DateTime<Utc>,
        renewed_at: DateTime<Utc>,
    ) -> Result<bool, DatabaseError>;

    /// Returns the consecutive failure count after this failure.
    fn record_renewal_failure(&self, id: &str) -> Result<u32, DatabaseError>;

    fn mark_failed(&self, id: &str) -> Result<(), DatabaseError>;

    fn delete_subscription(&self, id: &str) -> Result<(), DatabaseError>;

    fn expiring_before(
        &self,
        cutoff: DateTime<Utc>,
    ) -> Result<Vec<WebhookSubscription>, DatabaseError>;
}
