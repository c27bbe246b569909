//! Reconciliation sweep over PENDING tracked emails.
//!
//! Push notifications are not delivery-guaranteed, so this sweep re-derives
//! reply state from the provider for every PENDING row in the age window.

use std::collections::HashSet;
use std::sync::Arc;

use chrono::{Duration, Utc};
use serde::Serialize;
use tracing::Instrument;

use crate::detection::{DetectionError, DetectionResult, ReplyDetector};
use crate::tracking::{DetectionMethod, TrackedEmail, TrackingStore};

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct SweepReport {
    pub processed: u32,
    pub updated: u32,
    pub errors: u32,
}

/// Result of examining one row.
enum RowOutcome {
    Checked,
    Failed,
    Unreachable,
}

pub struct ReconciliationSweep {
    detector: Arc<ReplyDetector>,
    store: Arc<dyn TrackingStore>,
}

impl ReconciliationSweep {
    pub fn new(detector: Arc<ReplyDetector>, store: Arc<dyn TrackingStore>) -> Self {
        Self { detector, store }
    }

    /// Re-checks PENDING rows sent within the last `max_age_days`.
    ///
    /// Safe to run alongside webhook processing: every write is conditional
    /// on the row still being PENDING.
    pub async fn sync_all_pending_replies(&self, max_age_days: u32) -> SweepReport {
        let span = tracing::info_span!("reconciliation_sweep", max_age_days);
        async move {
            let mut report = SweepReport::default();
            let since = Utc::now() - Duration::days(i64::from(max_age_days));

            let rows = match self.store.pending_sent_since(since) {
                Ok(rows) => rows,
                Err(e) => {
                    tracing::error!(error = %e, "Could not load pending tracked emails");
                    report.errors += 1;
                    return report;
                }
            };

            let mut updated_ids: HashSet<String> = HashSet::new();
            let mut unreachable_users: HashSet<String> = HashSet::new();

            for row in &rows {
                report.processed += 1;

                let outcome = if updated_ids.contains(&row.id) {
                    RowOutcome::Checked
                } else if unreachable_users.contains(&row.user_id) {
                    RowOutcome::Unreachable
                } else {
                    self.check_row(row, &mut updated_ids).await
                };

                let stamp_method = match outcome {
                    RowOutcome::Checked => None,
                    RowOutcome::Failed => {
                        report.errors += 1;
                        None
                    }
                    RowOutcome::Unreachable => {
                        report.errors += 1;
                        unreachable_users.insert(row.user_id.clone());
                        Some(DetectionMethod::NeedsManualSync)
                    }
                };

                if let Err(e) = self.store.record_sync_check(&row.id, Utc::now(), stamp_method) {
                    tracing::warn!(tracked_email_id = %row.id, error = %e, "Could not stamp sync check");
                    report.errors += 1;
                }
            }

            report.updated = updated_ids.len() as u32;
            tracing::info!(
                processed = report.processed,
                updated = report.updated,
                errors = report.errors,
                "Reconciliation sweep finished"
            );
            report
        }
        .instrument(span)
        .await
    }

    /// Conversation pass first, subject search if that finds nothing.
    async fn check_row(&self, row: &TrackedEmail, updated_ids: &mut HashSet<String>) -> RowOutcome {
        if let Some(conversation_id) = &row.conversation_id {
            let pass = self
                .detector
                .try_detect_by_conversation(conversation_id, None, DetectionMethod::SyncCheck)
                .await;
            match absorb(pass, row, updated_ids) {
                Ok(true) => return RowOutcome::Checked,
                Ok(false) => {}
                Err(outcome) => return outcome,
            }
        }

        let pass = self
            .detector
            .try_detect_by_subject(&row.user_id, &row.subject, row.sent_at, DetectionMethod::OutlookSync)
            .await;
        match absorb(pass, row, updated_ids) {
            Ok(_) => RowOutcome::Checked,
            Err(outcome) => outcome,
        }
    }
}

/// Folds one detection pass into the sweep state. `Ok(true)` means `row`
/// now has a reply.
fn absorb(
    pass: Result<Vec<DetectionResult>, DetectionError>,
    row: &TrackedEmail,
    updated_ids: &mut HashSet<String>,
) -> Result<bool, RowOutcome> {
    match pass {
        Ok(results) => {
            let mut replied = false;
            for result in results {
                if result.tracked_email_id == row.id && result.was_reply {
                    replied = true;
                }
                if result.updated {
                    updated_ids.insert(result.tracked_email_id);
                }
            }
            Ok(replied)
        }
        Err(DetectionError::Provider(e)) if e.is_auth() => {
            tracing::warn!(user_id = %row.user_id, error = %e, "Provider unreachable for user, flagging for manual sync");
            Err(RowOutcome::Unreachable)
        }
        Err(DetectionError::Provider(e)) if e.is_transient() => {
            tracing::info!(tracked_email_id = %row.id, error = %e, "Transient provider error, retrying next tick");
            Err(RowOutcome::Failed)
        }
        Err(e) => {
            tracing::warn!(tracked_email_id = %row.id, error = %e, "Detection failed during sweep");
            Err(RowOutcome::Failed)
        }
    }
}
