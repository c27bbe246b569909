//! Inbound notification payloads.
//!
//! Items arrive loosely typed. Each one is decoded on its own with
//! [`RawNotification::from_value`], then [`RawNotification::validate`] turns
//! it into a [`Notification`] or rejects it before it reaches detection.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;

use crate::subscription::{ChangeType, LifecycleEvent};

/// Body of a `POST /webhooks/{provider}` call. Items stay untyped so one
/// malformed entry cannot fail the whole body.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct NotificationBatch {
    #[serde(default)]
    pub value: Vec<Value>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RawNotification {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub subscription_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub client_state: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub change_type: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub lifecycle_event: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub resource: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub resource_data: Option<ResourceData>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tenant_id: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ResourceData {
    #[serde(rename = "@odata.type", default, skip_serializing_if = "Option::is_none")]
    pub odata_type: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub conversation_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub internet_message_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub subject: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub is_read: Option<bool>,
}

#[derive(Error, Debug, Clone, PartialEq)]
pub enum PayloadError {
    #[error("undecodable item: {0}")]
    Undecodable(String),

    #[error("missing subscriptionId")]
    MissingSubscriptionId,

    #[error("missing changeType")]
    MissingChangeType,

    #[error("unknown changeType '{0}'")]
    UnknownChangeType(String),

    #[error("unknown lifecycleEvent '{0}'")]
    UnknownLifecycleEvent(String),
}

/// A change to a message in a watched mailbox.
#[derive(Debug, Clone, PartialEq)]
pub struct ChangeNotification {
    pub subscription_id: String,
    pub client_state: Option<String>,
    pub change_type: ChangeType,
    pub message_id: Option<String>,
    pub conversation_id: Option<String>,
    pub internet_message_id: Option<String>,
    pub subject: Option<String>,
    pub is_read: Option<bool>,
}

impl ChangeNotification {
    /// True when the item carries nothing detection can key on.
    pub fn is_thin(&self) -> bool {
        self.conversation_id.is_none() && self.subject.is_none()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LifecycleKind {
    Subscription(LifecycleEvent),
    /// The provider dropped notifications; state must be re-derived.
    Missed,
}

#[derive(Debug, Clone, PartialEq)]
pub struct LifecycleNotification {
    pub subscription_id: String,
    pub client_state: Option<String>,
    pub kind: LifecycleKind,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Notification {
    Change(ChangeNotification),
    Lifecycle(LifecycleNotification),
}

impl Notification {
    pub fn subscription_id(&self) -> &str {
        match self {
            Notification::Change(c) => &c.subscription_id,
            Notification::Lifecycle(l) => &l.subscription_id,
        }
    }

    pub fn client_state(&self) -> Option<&str> {
        match self {
            Notification::Change(c) => c.client_state.as_deref(),
            Notification::Lifecycle(l) => l.client_state.as_deref(),
        }
    }
}

fn non_empty(value: &Option<String>) -> Option<String> {
    value
        .as_deref()
        .map(str::trim)
        .filter(|v| !v.is_empty())
        .map(ToOwned::to_owned)
}

/// Accepts both `Users/u1/Messages/AAMk` and the OData key form
/// `Users('u1')/Messages('AAMk')`.
fn id_from_resource(resource: &str) -> Option<String> {
    let segment = resource.trim_end_matches('/').rsplit('/').next()?;
    let id = match (segment.find("('"), segment.rfind("')")) {
        (Some(open), Some(close)) if close >= open + 2 => &segment[open + 2..close],
        _ => segment,
    };
    let id = id.trim();
    (!id.is_empty()).then(|| id.to_string())
}

impl RawNotification {
    pub fn from_value(value: Value) -> Result<Self, PayloadError> {
        serde_json::from_value(value).map_err(|e| PayloadError::Undecodable(e.to_string()))
    }

    /// Message id from `resourceData.id`, else parsed out of `resource`.
    pub fn resource_id(&self) -> Option<String> {
        self.resource_data
            .as_ref()
            .and_then(|d| non_empty(&d.id))
            .or_else(|| self.resource.as_deref().and_then(id_from_resource))
    }

    /// Short label for the processing ledger.
    pub fn kind_label(&self) -> Option<String> {
        self.lifecycle_event
            .as_ref()
            .map(|e| format!("lifecycle:{}", e))
            .or_else(|| self.change_type.clone())
    }

    pub fn validate(&self) -> Result<Notification, PayloadError> {
        let subscription_id =
            non_empty(&self.subscription_id).ok_or(PayloadError::MissingSubscriptionId)?;
        let client_state = self.client_state.clone();

        if let Some(event) = non_empty(&self.lifecycle_event) {
            let kind = match event.as_str() {
                "reauthorizationRequired" => {
                    LifecycleKind::Subscription(LifecycleEvent::ReauthorizationRequired)
                }
                "subscriptionRemoved" => {
                    LifecycleKind::Subscription(LifecycleEvent::SubscriptionRemoved)
                }
                "missed" => LifecycleKind::Missed,
                _ => return Err(PayloadError::UnknownLifecycleEvent(event)),
            };
            return Ok(Notification::Lifecycle(LifecycleNotification {
                subscription_id,
                client_state,
                kind,
            }));
        }

        let raw_change = non_empty(&self.change_type).ok_or(PayloadError::MissingChangeType)?;
        let change_type = raw_change
            .parse::<ChangeType>()
            .map_err(|_| PayloadError::UnknownChangeType(raw_change.clone()))?;

        let data = self.resource_data.clone().unwrap_or_default();
        Ok(Notification::Change(ChangeNotification {
            subscription_id,
            client_state,
            change_type,
            message_id: self.resource_id(),
            conversation_id: non_empty(&data.conversation_id),
            internet_message_id: non_empty(&data.internet_message_id),
            subject: non_empty(&data.subject),
            is_read: data.is_read,
        }))
    }
}
