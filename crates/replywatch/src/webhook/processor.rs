//! Post-response processing of notification batches.

use std::sync::Arc;

use chrono::{Duration, Utc};
use futures_util::stream::{self, StreamExt};
use serde::Serialize;
use serde_json::Value;
use tokio::sync::broadcast;
use tracing::Instrument;

use super::payload::{
    ChangeNotification, LifecycleKind, LifecycleNotification, Notification, NotificationBatch,
    RawNotification,
};
use crate::db::format_timestamp;
use crate::db::webhook_event_repo::WebhookEventRow;
use crate::detection::{DetectionError, DetectionResult, ReplyDetector};
use crate::provider::MailProvider;
use crate::subscription::{ChangeType, SubscriptionManager, SubscriptionStore, WebhookSubscription};
use crate::tracking::{DetectionMethod, TrackingStore};

/// How far back subject fallback looks for PENDING rows.
pub const DEFAULT_SUBJECT_WINDOW_DAYS: i64 = 30;

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct BatchReport {
    pub received: u32,
    pub processed: u32,
    pub errors: u32,
    pub replies_detected: u32,
}

enum ItemOutcome {
    Processed { replies: u32, note: Option<String> },
    /// Not trusted or not understood; recorded but never retried.
    Rejected(String),
    Failed(String),
}

pub struct NotificationProcessor {
    detector: Arc<ReplyDetector>,
    tracking: Arc<dyn TrackingStore>,
    subscriptions: Arc<dyn SubscriptionStore>,
    provider: Arc<dyn MailProvider>,
    manager: Option<Arc<SubscriptionManager>>,
    reconcile_trigger: Option<broadcast::Sender<()>>,
    max_concurrent: usize,
    subject_window: Duration,
}

impl NotificationProcessor {
    pub fn new(
        detector: Arc<ReplyDetector>,
        tracking: Arc<dyn TrackingStore>,
        subscriptions: Arc<dyn SubscriptionStore>,
        provider: Arc<dyn MailProvider>,
    ) -> Self {
        Self {
            detector,
            tracking,
            subscriptions,
            provider,
            manager: None,
            reconcile_trigger: None,
            max_concurrent: 8,
            subject_window: Duration::days(DEFAULT_SUBJECT_WINDOW_DAYS),
        }
    }

    /// Lifecycle notifications are forwarded to `manager`.
    pub fn with_subscription_manager(mut self, manager: Arc<SubscriptionManager>) -> Self {
        self.manager = Some(manager);
        self
    }

    /// `missed` lifecycle notifications fire this trigger.
    pub fn with_reconcile_trigger(mut self, trigger: broadcast::Sender<()>) -> Self {
        self.reconcile_trigger = Some(trigger);
        self
    }

    pub fn with_max_concurrent(mut self, max_concurrent: usize) -> Self {
        self.max_concurrent = max_concurrent.max(1);
        self
    }

    /// Processes every item of `batch`. A failing item never stops its
    /// siblings; every item leaves exactly one ledger row.
    pub async fn process_batch(&self, batch: NotificationBatch) -> BatchReport {
        let span = tracing::info_span!("process_batch", items = batch.value.len());
        async move {
            let mut report = BatchReport {
                received: batch.value.len() as u32,
                ..BatchReport::default()
            };

            let outcomes: Vec<ItemOutcome> = stream::iter(batch.value)
                .map(|item| self.process_item(item))
                .buffer_unordered(self.max_concurrent)
                .collect()
                .await;

            for outcome in outcomes {
                match outcome {
                    ItemOutcome::Processed { replies, .. } => {
                        report.processed += 1;
                        report.replies_detected += replies;
                    }
                    ItemOutcome::Rejected(_) | ItemOutcome::Failed(_) => report.errors += 1,
                }
            }

            tracing::info!(
                received = report.received,
                processed = report.processed,
                errors = report.errors,
                replies = report.replies_detected,
                "Notification batch processed"
            );
            report
        }
        .instrument(span)
        .await
    }

    async fn process_item(&self, item: Value) -> ItemOutcome {
        let raw_payload = item.to_string();
        let decoded = RawNotification::from_value(item);
        let raw = decoded.as_ref().ok();
        let event = WebhookEventRow {
            id: uuid::Uuid::new_v4().to_string(),
            subscription_id: raw.and_then(|r| r.subscription_id.clone()),
            change_type: raw.and_then(RawNotification::kind_label),
            resource_id: raw.and_then(RawNotification::resource_id),
            raw_payload,
            processed: false,
            processed_at: None,
            error_message: None,
            retry_count: 0,
            received_at: format_timestamp(Utc::now()),
        };

        if let Err(e) = self.tracking.append_event(&event) {
            // Without a ledger row the item is left for the reconciliation sweep.
            tracing::error!(error = %e, "Could not record webhook event");
            return ItemOutcome::Failed(e.to_string());
        }

        let outcome = match &decoded {
            Ok(raw) => self.handle(raw).await,
            Err(e) => ItemOutcome::Rejected(format!("malformed notification: {}", e)),
        };

        let ledger = match &outcome {
            ItemOutcome::Processed { note, .. } => {
                self.tracking
                    .complete_event(&event.id, Utc::now(), note.as_deref())
            }
            ItemOutcome::Rejected(reason) => {
                tracing::warn!(event_id = %event.id, reason = %reason, "Rejected notification");
                self.tracking
                    .complete_event(&event.id, Utc::now(), Some(reason.as_str()))
            }
            ItemOutcome::Failed(error) => {
                tracing::warn!(event_id = %event.id, error = %error, "Notification processing failed");
                self.tracking.fail_event(&event.id, error)
            }
        };
        if let Err(e) = ledger {
            tracing::error!(event_id = %event.id, error = %e, "Could not update webhook event");
        }

        outcome
    }

    async fn handle(&self, item: &RawNotification) -> ItemOutcome {
        let notification = match item.validate() {
            Ok(n) => n,
            Err(e) => return ItemOutcome::Rejected(format!("malformed notification: {}", e)),
        };

        let subscription = match self.subscriptions.subscription(notification.subscription_id()) {
            Ok(Some(sub)) => sub,
            Ok(None) => return ItemOutcome::Rejected("unknown subscription".to_string()),
            Err(e) => return ItemOutcome::Failed(e.to_string()),
        };

        if !client_state_matches(notification.client_state(), &subscription.client_state) {
            return ItemOutcome::Rejected("client state mismatch".to_string());
        }

        match notification {
            Notification::Lifecycle(lifecycle) => self.handle_lifecycle(lifecycle).await,
            Notification::Change(change) => self.handle_change(change, &subscription).await,
        }
    }

    async fn handle_lifecycle(&self, lifecycle: LifecycleNotification) -> ItemOutcome {
        match lifecycle.kind {
            LifecycleKind::Missed => {
                let fired = self
                    .reconcile_trigger
                    .as_ref()
                    .is_some_and(|tx| tx.send(()).is_ok());
                let note = if fired {
                    "reconciliation triggered"
                } else {
                    "missed notifications, no reconciliation trigger"
                };
                ItemOutcome::Processed {
                    replies: 0,
                    note: Some(note.to_string()),
                }
            }
            LifecycleKind::Subscription(event) => {
                let Some(manager) = &self.manager else {
                    return ItemOutcome::Processed {
                        replies: 0,
                        note: Some("lifecycle event ignored".to_string()),
                    };
                };
                let outcome = manager
                    .handle_lifecycle(&lifecycle.subscription_id, event)
                    .await;
                if outcome.is_success() {
                    ItemOutcome::Processed {
                        replies: 0,
                        note: None,
                    }
                } else {
                    ItemOutcome::Failed(
                        outcome
                            .reason
                            .unwrap_or_else(|| "subscription lifecycle handling failed".to_string()),
                    )
                }
            }
        }
    }

    async fn handle_change(
        &self,
        mut change: ChangeNotification,
        subscription: &WebhookSubscription,
    ) -> ItemOutcome {
        match change.change_type {
            ChangeType::Created => {}
            ChangeType::Updated if change.is_read.is_some() => {
                tracing::info!(
                    message_id = change.message_id.as_deref().unwrap_or("-"),
                    is_read = change.is_read,
                    "Read state changed"
                );
                return ItemOutcome::Processed {
                    replies: 0,
                    note: Some("read state change".to_string()),
                };
            }
            other => {
                return ItemOutcome::Processed {
                    replies: 0,
                    note: Some(format!("{} ignored", other.as_str())),
                };
            }
        }

        if change.is_thin() {
            if let Err(outcome) = self.hydrate(&mut change, &subscription.user_id).await {
                return outcome;
            }
        }

        let pass = if let Some(conversation_id) = &change.conversation_id {
            self.detector
                .try_detect_by_conversation(conversation_id, None, DetectionMethod::ConversationId)
                .await
        } else if let Some(subject) = &change.subject {
            let sent_after = Utc::now() - self.subject_window;
            self.detector
                .try_detect_by_subject(
                    &subscription.user_id,
                    subject,
                    sent_after,
                    DetectionMethod::SubjectMatching,
                )
                .await
        } else {
            return ItemOutcome::Rejected("no conversation id or subject".to_string());
        };

        match pass {
            Ok(results) => ItemOutcome::Processed {
                replies: count_updates(&results),
                note: None,
            },
            Err(DetectionError::Provider(e)) if e.is_transient() => {
                ItemOutcome::Failed(format!("provider temporarily unavailable: {}", e))
            }
            Err(DetectionError::Provider(e)) => ItemOutcome::Failed(format!("provider: {}", e)),
            Err(e) => ItemOutcome::Failed(e.to_string()),
        }
    }

    /// Fills conversation id and subject from the provider's copy of the message.
    async fn hydrate(
        &self,
        change: &mut ChangeNotification,
        user_id: &str,
    ) -> Result<(), ItemOutcome> {
        let Some(message_id) = change.message_id.clone() else {
            return Err(ItemOutcome::Rejected("no message id to hydrate".to_string()));
        };
        match self.provider.get_message(user_id, &message_id).await {
            Ok(Some(message)) => {
                change.conversation_id = message.conversation_id;
                change.internet_message_id = message.internet_message_id;
                change.subject = message.subject;
                Ok(())
            }
            Ok(None) => Err(ItemOutcome::Processed {
                replies: 0,
                note: Some("message no longer exists".to_string()),
            }),
            Err(e) => Err(ItemOutcome::Failed(format!("hydrate: {}", e))),
        }
    }
}

fn count_updates(results: &[DetectionResult]) -> u32 {
    results.iter().filter(|r| r.updated).count() as u32
}

fn client_state_matches(received: Option<&str>, expected: &str) -> bool {
    received.is_some_and(|value| constant_time_eq(value, expected))
}

fn constant_time_eq(left: &str, right: &str) -> bool {
    let left_bytes = left.as_bytes();
    let right_bytes = right.as_bytes();
    if left_bytes.len() != right_bytes.len() {
        return false;
    }

    let mut diff = 0_u8;
    for (a, b) in left_bytes.iter().zip(right_bytes.iter()) {
        diff |= *a ^ *b;
    }
    diff == 0
}
