//! Keeps one live push subscription per user.

use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use secrecy::{ExposeSecret, SecretString};
use serde::Serialize;
use tracing::Instrument;

use super::cooldown::CooldownCache;
use super::model::{ChangeType, SubscriptionStatus, WebhookSubscription};
use super::store::SubscriptionStore;
use crate::config::Config;
use crate::db::DatabaseError;
use crate::provider::{MailProvider, SubscriptionRequest};
use crate::secrets::SecretError;

/// Skip reason returned while a user is cooling down.
pub const COOLDOWN_REASON: &str = "cooldown";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum EnsureAction {
    Created,
    Renewed,
    Exists,
    Skipped,
    Failed,
}

/// Result of [`SubscriptionManager::ensure_subscription`].
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct EnsureOutcome {
    pub action: EnsureAction,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub subscription_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub expires_at: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
}

impl EnsureOutcome {
    fn with_subscription(action: EnsureAction, id: &str, expires_at: DateTime<Utc>) -> Self {
        Self {
            action,
            subscription_id: Some(id.to_string()),
            expires_at: Some(expires_at),
            reason: None,
        }
    }

    fn skipped(reason: impl Into<String>) -> Self {
        Self {
            action: EnsureAction::Skipped,
            subscription_id: None,
            expires_at: None,
            reason: Some(reason.into()),
        }
    }

    fn failed(reason: impl Into<String>) -> Self {
        Self {
            action: EnsureAction::Failed,
            subscription_id: None,
            expires_at: None,
            reason: Some(reason.into()),
        }
    }

    /// True when the user has a usable subscription afterwards.
    pub fn is_success(&self) -> bool {
        matches!(
            self.action,
            EnsureAction::Created | EnsureAction::Renewed | EnsureAction::Exists
        )
    }
}

/// Counts from one renewal sweep.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RenewalReport {
    pub checked: u32,
    pub renewed: u32,
    pub failed: u32,
    /// Subscriptions that exhausted their retries and were recreated.
    pub replaced: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// Resolved subscription settings.
pub struct SubscriptionSettings {
    pub enabled: bool,
    pub callback_url: Option<String>,
    pub client_state: Option<SecretString>,
    pub resource: String,
    pub change_types: Vec<ChangeType>,
    pub renewal_threshold_hours: f64,
    pub ttl: Duration,
    pub failure_threshold: u32,
    pub max_renewal_attempts: u32,
}

impl SubscriptionSettings {
    /// Builds settings from config, resolving the client-state secret.
    ///
    /// An unconfigured secret is left as `None` and reported at ensure time.
    pub fn from_config(config: &Config) -> Result<Self, SecretError> {
        let webhook = &config.webhook;
        let client_state = if webhook.client_state.is_configured() {
            Some(webhook.client_state.resolve()?)
        } else {
            None
        };
        Ok(Self {
            enabled: webhook.enabled,
            callback_url: webhook.callback_url.clone(),
            client_state,
            resource: webhook.resource.clone(),
            change_types: webhook.change_types.clone(),
            renewal_threshold_hours: webhook.renewal_threshold_hours,
            ttl: webhook.subscription_ttl(),
            failure_threshold: config.cooldown.failure_threshold,
            max_renewal_attempts: config.renewal.max_attempts,
        })
    }
}

/// Lifecycle notifications the provider sends about a subscription.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LifecycleEvent {
    ReauthorizationRequired,
    SubscriptionRemoved,
}

pub struct SubscriptionManager {
    provider: Arc<dyn MailProvider>,
    store: Arc<dyn SubscriptionStore>,
    cooldown: Arc<dyn CooldownCache>,
    settings: SubscriptionSettings,
}

impl SubscriptionManager {
    pub fn new(
        provider: Arc<dyn MailProvider>,
        store: Arc<dyn SubscriptionStore>,
        cooldown: Arc<dyn CooldownCache>,
        settings: SubscriptionSettings,
    ) -> Self {
        Self {
            provider,
            store,
            cooldown,
            settings,
        }
    }

    pub fn settings(&self) -> &SubscriptionSettings {
        &self.settings
    }

    /// Converges on exactly one active subscription for `user_id`.
    pub async fn ensure_subscription(&self, user_id: &str) -> EnsureOutcome {
        let span = tracing::info_span!("ensure_subscription", user_id);
        async move {
            let outcome = self.ensure_inner(user_id).await;
            match outcome.action {
                EnsureAction::Created | EnsureAction::Renewed => {
                    tracing::info!(action = ?outcome.action, subscription_id = ?outcome.subscription_id, "Subscription ready");
                }
                EnsureAction::Exists => {
                    tracing::debug!(subscription_id = ?outcome.subscription_id, "Subscription healthy");
                }
                EnsureAction::Skipped | EnsureAction::Failed => {
                    tracing::warn!(action = ?outcome.action, reason = ?outcome.reason, "Subscription not ensured");
                }
            }
            outcome
        }
        .instrument(span)
        .await
    }

    async fn ensure_inner(&self, user_id: &str) -> EnsureOutcome {
        if self.in_cooldown(user_id) {
            return EnsureOutcome::skipped(COOLDOWN_REASON);
        }
        if !self.settings.enabled {
            return EnsureOutcome::skipped("webhooks disabled");
        }

        let outcome = self.ensure_checked(user_id).await;
        if outcome.is_success() {
            self.cooldown.clear(user_id);
        } else {
            let record = self.cooldown.record_failure(user_id);
            tracing::debug!(failures = record.count, "Recorded subscription failure");
        }
        outcome
    }

    async fn ensure_checked(&self, user_id: &str) -> EnsureOutcome {
        if let Err(reason) = self.check_config() {
            return EnsureOutcome::skipped(reason);
        }
        if let Err(e) = self.store.health_check() {
            return EnsureOutcome::skipped(format!("persistence unreachable: {}", e));
        }

        let existing = match self.store.active_subscription(user_id) {
            Ok(existing) => existing,
            Err(e) => return EnsureOutcome::skipped(format!("persistence unreachable: {}", e)),
        };

        let now = Utc::now();
        if let Some(sub) = &existing {
            if sub.hours_until_expiry(now) > self.settings.renewal_threshold_hours {
                return EnsureOutcome::with_subscription(
                    EnsureAction::Exists,
                    &sub.id,
                    sub.expires_at,
                );
            }
        }

        // Everything past here mutates provider state.
        if let Err(e) = self.provider.verify_access(user_id).await {
            return EnsureOutcome::skipped(format!("provider unreachable: {}", e));
        }

        match existing {
            Some(sub) => self.renew_or_replace(&sub).await,
            None => self.create(user_id).await,
        }
    }

    fn check_config(&self) -> Result<(), String> {
        if !self.settings.callback_url.as_deref().is_some_and(|u| !u.is_empty()) {
            return Err("webhook callback URL not configured".to_string());
        }
        if self.settings.client_state.is_none() {
            return Err("webhook client state secret not configured".to_string());
        }
        Ok(())
    }

    fn in_cooldown(&self, user_id: &str) -> bool {
        self.cooldown
            .get(user_id)
            .is_some_and(|r| r.count >= self.settings.failure_threshold)
    }

    /// Renews `sub`; if the provider refuses, retires it and creates a new one.
    async fn renew_or_replace(&self, sub: &WebhookSubscription) -> EnsureOutcome {
        match self
            .provider
            .renew_subscription(&sub.user_id, &sub.id, self.settings.ttl)
            .await
        {
            Ok(expires_at) => match self.store.record_renewal(&sub.id, expires_at, Utc::now()) {
                Ok(_) => EnsureOutcome::with_subscription(EnsureAction::Renewed, &sub.id, expires_at),
                Err(e) => EnsureOutcome::failed(format!("renewed at provider but not recorded: {}", e)),
            },
            Err(e) => {
                tracing::warn!(subscription_id = %sub.id, error = %e, "Renewal failed, replacing subscription");
                if let Err(e) = self.retire(sub).await {
                    return EnsureOutcome::failed(format!("could not retire subscription: {}", e));
                }
                self.create(&sub.user_id).await
            }
        }
    }

    /// Marks a subscription failed locally and deletes it at the provider.
    async fn retire(&self, sub: &WebhookSubscription) -> Result<(), DatabaseError> {
        self.store.mark_failed(&sub.id)?;
        if let Err(e) = self.provider.delete_subscription(&sub.user_id, &sub.id).await {
            tracing::warn!(subscription_id = %sub.id, error = %e, "Provider delete of retired subscription failed");
        }
        Ok(())
    }

    async fn create(&self, user_id: &str) -> EnsureOutcome {
        let (Some(callback_url), Some(client_state)) =
            (&self.settings.callback_url, &self.settings.client_state)
        else {
            return EnsureOutcome::skipped("webhook settings incomplete");
        };

        let request = SubscriptionRequest {
            resource: self.settings.resource.clone(),
            change_types: self.settings.change_types.clone(),
            notification_url: callback_url.clone(),
            client_state: client_state.expose_secret().to_string(),
            ttl: self.settings.ttl,
        };

        let created = match self.provider.create_subscription(user_id, &request).await {
            Ok(created) => created,
            Err(e) => return EnsureOutcome::failed(format!("provider create failed: {}", e)),
        };

        let record = WebhookSubscription {
            id: created.id.clone(),
            user_id: user_id.to_string(),
            resource: request.resource,
            change_types: request.change_types,
            notification_url: request.notification_url,
            client_state: request.client_state,
            expires_at: created.expires_at,
            last_renewed_at: None,
            renewal_count: 0,
            renewal_failures: 0,
            status: SubscriptionStatus::Active,
        };

        if let Err(store_err) = self.store.insert_subscription(&record) {
            tracing::error!(subscription_id = %created.id, error = %store_err, "Persisting subscription failed, rolling back");
            return match self.provider.delete_subscription(user_id, &created.id).await {
                Ok(()) => EnsureOutcome::failed(format!(
                    "persistence write failed, provider subscription rolled back: {}",
                    store_err
                )),
                Err(delete_err) => {
                    tracing::error!(subscription_id = %created.id, error = %delete_err, "Rollback failed, provider subscription orphaned");
                    EnsureOutcome::failed(format!(
                        "persistence write failed and rollback failed: {}; {}",
                        store_err, delete_err
                    ))
                }
            };
        }

        EnsureOutcome::with_subscription(EnsureAction::Created, &created.id, created.expires_at)
    }

    /// Renews every active subscription inside the renewal threshold.
    pub async fn renew_expiring(&self) -> RenewalReport {
        let span = tracing::info_span!("renewal_sweep");
        async move {
            let mut report = RenewalReport::default();
            let cutoff = Utc::now()
                + Duration::seconds((self.settings.renewal_threshold_hours * 3600.0) as i64);

            let due = match self.store.expiring_before(cutoff) {
                Ok(due) => due,
                Err(e) => {
                    tracing::error!(error = %e, "Could not list expiring subscriptions");
                    report.error = Some(e.to_string());
                    return report;
                }
            };

            for sub in due {
                report.checked += 1;
                match self
                    .provider
                    .renew_subscription(&sub.user_id, &sub.id, self.settings.ttl)
                    .await
                {
                    Ok(expires_at) => match self.store.record_renewal(&sub.id, expires_at, Utc::now()) {
                        Ok(_) => report.renewed += 1,
                        Err(e) => {
                            tracing::error!(subscription_id = %sub.id, error = %e, "Renewal not recorded");
                            report.failed += 1;
                        }
                    },
                    Err(e) => {
                        report.failed += 1;
                        if self.handle_renewal_failure(&sub, &e.to_string()).await {
                            report.replaced += 1;
                        }
                    }
                }
            }

            tracing::info!(
                checked = report.checked,
                renewed = report.renewed,
                failed = report.failed,
                replaced = report.replaced,
                "Renewal sweep finished"
            );
            report
        }
        .instrument(span)
        .await
    }

    /// Returns true when the subscription was replaced by a new one.
    async fn handle_renewal_failure(&self, sub: &WebhookSubscription, error: &str) -> bool {
        let failures = match self.store.record_renewal_failure(&sub.id) {
            Ok(n) => n,
            Err(e) => {
                tracing::error!(subscription_id = %sub.id, error = %e, "Could not record renewal failure");
                return false;
            }
        };
        tracing::warn!(subscription_id = %sub.id, failures, error, "Subscription renewal failed");

        if failures < self.settings.max_renewal_attempts {
            return false;
        }
        if let Err(e) = self.retire(sub).await {
            tracing::error!(subscription_id = %sub.id, error = %e, "Could not retire subscription");
            return false;
        }
        self.ensure_subscription(&sub.user_id).await.action == EnsureAction::Created
    }

    /// Reacts to a provider lifecycle notification for `subscription_id`.
    pub async fn handle_lifecycle(
        &self,
        subscription_id: &str,
        event: LifecycleEvent,
    ) -> EnsureOutcome {
        let sub = match self.store.subscription(subscription_id) {
            Ok(Some(sub)) => sub,
            Ok(None) => return EnsureOutcome::skipped("unknown subscription"),
            Err(e) => return EnsureOutcome::skipped(format!("persistence unreachable: {}", e)),
        };

        match event {
            LifecycleEvent::ReauthorizationRequired if sub.status == SubscriptionStatus::Active => {
                self.renew_or_replace(&sub).await
            }
            LifecycleEvent::ReauthorizationRequired => self.ensure_subscription(&sub.user_id).await,
            LifecycleEvent::SubscriptionRemoved => {
                if let Err(e) = self.store.mark_failed(&sub.id) {
                    return EnsureOutcome::failed(format!("could not retire subscription: {}", e));
                }
                self.ensure_subscription(&sub.user_id).await
            }
        }
    }

    /// Deletes the user's subscription at the provider and locally.
    pub async fn remove_subscriptions(&self, user_id: &str) -> Result<usize, DatabaseError> {
        let Some(sub) = self.store.active_subscription(user_id)? else {
            return Ok(0);
        };
        if let Err(e) = self.provider.delete_subscription(user_id, &sub.id).await {
            tracing::warn!(subscription_id = %sub.id, error = %e, "Provider delete failed during removal");
        }
        self.store.delete_subscription(&sub.id)?;
        self.cooldown.clear(user_id);
        Ok(1)
    }

    pub fn status(&self, user_id: &str) -> Result<Option<WebhookSubscription>, DatabaseError> {
        self.store.active_subscription(user_id)
    }
}
