//! Builder patterns for creating test data programmatically.

#![allow(dead_code)]

use chrono::{DateTime, Duration, Utc};
use secrecy::SecretString;

use replywatch::provider::Message;
use replywatch::subscription::{ChangeType, SubscriptionSettings};
use replywatch::tracking::NewTrackedEmail;

pub const USER: &str = "user-1";
pub const CLIENT_STATE: &str = "s3cret-client-state";
pub const CALLBACK_URL: &str = "https://hooks.example.com/webhooks/outlook";

/// Builder for `NewTrackedEmail` rows.
pub struct TrackedEmailBuilder {
    inner: NewTrackedEmail,
}

impl TrackedEmailBuilder {
    /// A PENDING email to `a@example.com` from `USER`, sent an hour ago.
    pub fn new(subject: &str) -> Self {
        Self {
            inner: NewTrackedEmail {
                user_id: USER.to_string(),
                recipient: "a@example.com".to_string(),
                subject: subject.to_string(),
                provider_message_id: None,
                internet_message_id: None,
                conversation_id: None,
                sent_at: Utc::now() - Duration::hours(1),
                expires_at: None,
            },
        }
    }

    pub fn user(mut self, user_id: &str) -> Self {
        self.inner.user_id = user_id.to_string();
        self
    }

    pub fn conversation(mut self, conversation_id: &str) -> Self {
        self.inner.conversation_id = Some(conversation_id.to_string());
        self
    }

    pub fn provider_message_id(mut self, id: &str) -> Self {
        self.inner.provider_message_id = Some(id.to_string());
        self
    }

    pub fn internet_message_id(mut self, id: &str) -> Self {
        self.inner.internet_message_id = Some(id.to_string());
        self
    }

    pub fn sent_at(mut self, at: DateTime<Utc>) -> Self {
        self.inner.sent_at = at;
        self
    }

    pub fn build(self) -> NewTrackedEmail {
        self.inner
    }
}

/// Builder for provider `Message`s.
pub struct MessageBuilder {
    inner: Message,
}

impl MessageBuilder {
    pub fn new(id: &str, received_at: DateTime<Utc>) -> Self {
        Self {
            inner: Message {
                id: id.to_string(),
                conversation_id: None,
                internet_message_id: None,
                subject: None,
                from: None,
                received_at,
                is_read: None,
            },
        }
    }

    pub fn conversation(mut self, conversation_id: &str) -> Self {
        self.inner.conversation_id = Some(conversation_id.to_string());
        self
    }

    pub fn internet_message_id(mut self, id: &str) -> Self {
        self.inner.internet_message_id = Some(id.to_string());
        self
    }

    pub fn subject(mut self, subject: &str) -> Self {
        self.inner.subject = Some(subject.to_string());
        self
    }

    pub fn sender(mut self, address: &str) -> Self {
        self.inner.from = Some(address.to_string());
        self
    }

    pub fn build(self) -> Message {
        self.inner
    }
}

/// Enabled, fully configured subscription settings.
pub fn settings() -> SubscriptionSettings {
    SubscriptionSettings {
        enabled: true,
        callback_url: Some(CALLBACK_URL.to_string()),
        client_state: Some(SecretString::from(CLIENT_STATE.to_string())),
        resource: "me/mailFolders('Inbox')/messages".to_string(),
        change_types: vec![ChangeType::Created],
        renewal_threshold_hours: 6.0,
        ttl: Duration::minutes(4230),
        failure_threshold: 3,
        max_renewal_attempts: 3,
    }
}

/// A Graph-shaped `created` notification body.
pub fn created_notification(
    subscription_id: &str,
    client_state: &str,
    message_id: &str,
    conversation_id: Option<&str>,
) -> serde_json::Value {
    let mut resource_data = serde_json::json!({
        "@odata.type": "#Microsoft.Graph.Message",
        "id": message_id,
    });
    if let Some(conversation_id) = conversation_id {
        resource_data["conversationId"] = serde_json::json!(conversation_id);
    }
    serde_json::json!({
        "subscriptionId": subscription_id,
        "clientState": client_state,
        "changeType": "created",
        "resource": format!("Users/{}/Messages/{}", USER, message_id),
        "resourceData": resource_data,
    })
}
