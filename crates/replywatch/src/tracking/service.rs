//! Send path and user/expiry transitions for tracked emails.

use std::sync::Arc;

use chrono::{Duration, Utc};

use super::model::{NewTrackedEmail, StatusTransition, TrackedEmail, TrackingStatus};
use super::store::TrackingStore;
use crate::db::DatabaseError;
use crate::error::Result;
use crate::provider::{MailProvider, SendMailParams};
use crate::subscription::SubscriptionManager;

pub struct TrackingService {
    provider: Arc<dyn MailProvider>,
    store: Arc<dyn TrackingStore>,
    subscriptions: Option<Arc<SubscriptionManager>>,
}

impl TrackingService {
    pub fn new(provider: Arc<dyn MailProvider>, store: Arc<dyn TrackingStore>) -> Self {
        Self {
            provider,
            store,
            subscriptions: None,
        }
    }

    /// Ensures a push subscription after every tracked send.
    pub fn with_subscriptions(mut self, manager: Arc<SubscriptionManager>) -> Self {
        self.subscriptions = Some(manager);
        self
    }

    /// Sends `params` for `user_id` and records the send as PENDING.
    pub async fn send_tracked(
        &self,
        user_id: &str,
        params: &SendMailParams,
        expires_in: Option<Duration>,
    ) -> Result<TrackedEmail> {
        let sent = self.provider.send_mail(user_id, params).await?;
        let sent_at = Utc::now();

        let email = self.store.insert_tracked_email(NewTrackedEmail {
            user_id: user_id.to_string(),
            recipient: params.to.join(", "),
            subject: params.subject.clone(),
            provider_message_id: Some(sent.message_id),
            internet_message_id: sent.internet_message_id,
            conversation_id: sent.conversation_id,
            sent_at,
            expires_at: expires_in.map(|d| sent_at + d),
        })?;

        if email.conversation_id.is_none() {
            log::warn!(
                "Tracked email {} has no conversation id, replies will rely on subject matching",
                email.id
            );
        }

        if let Some(manager) = &self.subscriptions {
            let outcome = manager.ensure_subscription(user_id).await;
            if !outcome.is_success() {
                log::warn!(
                    "Subscription not ensured after send for user {}: {:?}",
                    user_id,
                    outcome.reason
                );
            }
        }

        Ok(email)
    }

    /// Stops tracking a PENDING email. Returns false if it was not PENDING.
    pub fn stop_tracking(&self, id: &str) -> std::result::Result<bool, DatabaseError> {
        self.store
            .update_if_status(id, TrackingStatus::Pending, StatusTransition::Stopped)
    }

    /// Moves PENDING emails past their expiry to EXPIRED.
    pub fn expire_overdue(&self) -> std::result::Result<u64, DatabaseError> {
        let expired = self.store.expire_overdue(Utc::now())?;
        if expired > 0 {
            log::info!("Expired {} overdue tracked emails", expired);
        }
        Ok(expired)
    }

    pub fn get(&self, id: &str) -> std::result::Result<Option<TrackedEmail>, DatabaseError> {
        self.store.tracked_email(id)
    }
}
