//! The service's periodic jobs.

use std::sync::Arc;

use async_trait::async_trait;
use chrono::{Duration, Utc};
use serde::Serialize;
use tracing::Instrument;

use super::scheduler::PeriodicJob;
use crate::reconcile::ReconciliationSweep;
use crate::subscription::SubscriptionManager;
use crate::tracking::TrackingStore;

/// Renews subscriptions nearing expiry.
pub struct RenewalJob {
    manager: Arc<SubscriptionManager>,
}

impl RenewalJob {
    pub fn new(manager: Arc<SubscriptionManager>) -> Self {
        Self { manager }
    }
}

#[async_trait]
impl PeriodicJob for RenewalJob {
    fn name(&self) -> &'static str {
        "subscription-renewal"
    }

    async fn run(&self) {
        let report = self.manager.renew_expiring().await;
        if let Some(error) = &report.error {
            tracing::error!(error = %error, "Renewal sweep aborted");
        }
    }
}

/// Re-derives reply state for recent PENDING rows.
pub struct ReconcileJob {
    sweep: Arc<ReconciliationSweep>,
    max_age_days: u32,
}

impl ReconcileJob {
    pub fn new(sweep: Arc<ReconciliationSweep>, max_age_days: u32) -> Self {
        Self {
            sweep,
            max_age_days,
        }
    }
}

#[async_trait]
impl PeriodicJob for ReconcileJob {
    fn name(&self) -> &'static str {
        "reply-reconciliation"
    }

    async fn run(&self) {
        self.sweep.sync_all_pending_replies(self.max_age_days).await;
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MaintenanceReport {
    pub expired: u64,
    pub events_purged: u64,
}

/// Expires overdue tracked emails and prunes the webhook event ledger.
pub struct MaintenanceJob {
    store: Arc<dyn TrackingStore>,
    event_retention_days: u32,
}

impl MaintenanceJob {
    pub fn new(store: Arc<dyn TrackingStore>, event_retention_days: u32) -> Self {
        Self {
            store,
            event_retention_days,
        }
    }

    pub async fn run_once(&self) -> MaintenanceReport {
        let span = tracing::info_span!("maintenance", retention_days = self.event_retention_days);
        async move {
            let now = Utc::now();
            let mut report = MaintenanceReport::default();

            match self.store.expire_overdue(now) {
                Ok(n) => report.expired = n,
                Err(e) => tracing::error!(error = %e, "Could not expire overdue tracked emails"),
            }

            let cutoff = now - Duration::days(i64::from(self.event_retention_days));
            match self.store.purge_events_before(cutoff) {
                Ok(n) => report.events_purged = n,
                Err(e) => tracing::error!(error = %e, "Could not purge webhook events"),
            }

            tracing::info!(
                expired = report.expired,
                events_purged = report.events_purged,
                "Maintenance finished"
            );
            report
        }
        .instrument(span)
        .await
    }
}

#[async_trait]
impl PeriodicJob for MaintenanceJob {
    fn name(&self) -> &'static str {
        "maintenance"
    }

    async fn run(&self) {
        self.run_once().await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::webhook_event_repo::WebhookEventRow;
    use crate::db::{format_timestamp, Database, SqliteStore};
    use crate::tracking::{NewTrackedEmail, TrackingStatus};

    fn event(id: &str, received_at: chrono::DateTime<Utc>) -> WebhookEventRow {
        WebhookEventRow {
            id: id.to_string(),
            subscription_id: Some("sub-1".to_string()),
            change_type: Some("created".to_string()),
            resource_id: None,
            raw_payload: "{}".to_string(),
            processed: false,
            processed_at: None,
            error_message: None,
            retry_count: 0,
            received_at: format_timestamp(received_at),
        }
    }

    #[tokio::test]
    async fn test_maintenance_expires_and_purges() {
        let store = Arc::new(SqliteStore::new(Database::open_in_memory().unwrap()));
        let now = Utc::now();

        let overdue = store
            .insert_tracked_email(NewTrackedEmail {
                user_id: "user-1".to_string(),
                recipient: "a@example.com".to_string(),
                subject: "Proposal".to_string(),
                provider_message_id: None,
                internet_message_id: None,
                conversation_id: None,
                sent_at: now - Duration::days(10),
                expires_at: Some(now - Duration::days(1)),
            })
            .unwrap();
        let current = store
            .insert_tracked_email(NewTrackedEmail {
                user_id: "user-1".to_string(),
                recipient: "b@example.com".to_string(),
                subject: "Budget".to_string(),
                provider_message_id: None,
                internet_message_id: None,
                conversation_id: None,
                sent_at: now,
                expires_at: Some(now + Duration::days(7)),
            })
            .unwrap();

        store.append_event(&event("old", now - Duration::days(45))).unwrap();
        store.append_event(&event("new", now)).unwrap();

        let job = MaintenanceJob::new(store.clone(), 30);
        let report = job.run_once().await;

        assert_eq!(
            report,
            MaintenanceReport {
                expired: 1,
                events_purged: 1
            }
        );
        assert_eq!(
            store.tracked_email(&overdue.id).unwrap().unwrap().status,
            TrackingStatus::Expired
        );
        assert_eq!(
            store.tracked_email(&current.id).unwrap().unwrap().status,
            TrackingStatus::Pending
        );
    }
}
