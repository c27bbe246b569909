//! Provider-neutral message and subscription shapes.

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

use crate::subscription::ChangeType;

/// A mailbox message as seen by reply detection.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Message {
    pub id: String,
    pub conversation_id: Option<String>,
    pub internet_message_id: Option<String>,
    pub subject: Option<String>,
    pub from: Option<String>,
    /// Time the message entered the mailbox; used for thread ordering.
    pub received_at: DateTime<Utc>,
    pub is_read: Option<bool>,
}

impl Message {
    /// Whether this message is the given tracked original.
    pub fn is_same_message(&self, message_id: Option<&str>, internet_message_id: Option<&str>) -> bool {
        message_id.is_some_and(|id| id == self.id)
            || match (internet_message_id, self.internet_message_id.as_deref()) {
                (Some(wanted), Some(ours)) => wanted.eq_ignore_ascii_case(ours),
                _ => false,
            }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SendMailParams {
    pub to: Vec<String>,
    pub subject: String,
    /// HTML body.
    pub body: String,
}

/// Identifiers of a message that was just sent.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SentMessage {
    pub message_id: String,
    pub conversation_id: Option<String>,
    pub internet_message_id: Option<String>,
}

#[derive(Debug, Clone)]
pub struct SubscriptionRequest {
    pub resource: String,
    pub change_types: Vec<ChangeType>,
    pub notification_url: String,
    pub client_state: String,
    pub ttl: Duration,
}

#[derive(Debug, Clone, PartialEq)]
pub struct CreatedSubscription {
    pub id: String,
    pub expires_at: DateTime<Utc>,
}
