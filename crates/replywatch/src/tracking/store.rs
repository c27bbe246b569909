//! Persistence seam for tracked emails and the webhook processing ledger.

use chrono::{DateTime, Utc};

use super::model::{DetectionMethod, NewTrackedEmail, StatusTransition, TrackedEmail, TrackingStatus};
use crate::db::webhook_event_repo::WebhookEventRow;
use crate::db::DatabaseError;

/// Durable record of tracked emails and processed notifications.
///
/// The store is the only arbiter of the PENDING → REPLIED transition:
/// `update_if_status` must be a single conditional write.
pub trait TrackingStore: Send + Sync {
    /// Records a freshly sent email as PENDING and returns the stored row.
    fn insert_tracked_email(&self, new: NewTrackedEmail) -> Result<TrackedEmail, DatabaseError>;

    fn tracked_email(&self, id: &str) -> Result<Option<TrackedEmail>, DatabaseError>;

    fn pending_by_conversation(
        &self,
        conversation_id: &str,
    ) -> Result<Vec<TrackedEmail>, DatabaseError>;

    fn pending_for_user(
        &self,
        user_id: &str,
        since: DateTime<Utc>,
    ) -> Result<Vec<TrackedEmail>, DatabaseError>;

    fn pending_sent_since(&self, since: DateTime<Utc>) -> Result<Vec<TrackedEmail>, DatabaseError>;

    /// Applies `transition` only if the row still has status `expected`.
    fn update_if_status(
        &self,
        id: &str,
        expected: TrackingStatus,
        transition: StatusTransition,
    ) -> Result<bool, DatabaseError>;

    fn record_sync_check(
        &self,
        id: &str,
        at: DateTime<Utc>,
        method: Option<DetectionMethod>,
    ) -> Result<bool, DatabaseError>;

    fn expire_overdue(&self, now: DateTime<Utc>) -> Result<u64, DatabaseError>;

    fn append_event(&self, event: &WebhookEventRow) -> Result<(), DatabaseError>;

    fn complete_event(
        &self,
        id: &str,
        at: DateTime<Utc>,
        note: Option<&str>,
    ) -> Result<(), DatabaseError>;

    fn fail_event(&self, id: &str, error: &str) -> Result<(), DatabaseError>;

    fn purge_events_before(&self, cutoff: DateTime<Utc>) -> Result<u64, DatabaseError>;
}
