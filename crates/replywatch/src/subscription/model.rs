//! Push subscription records.

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SubscriptionStatus {
    Active,
    Failed,
}

impl SubscriptionStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            SubscriptionStatus::Active => "active",
            SubscriptionStatus::Failed => "failed",
        }
    }
}

impl fmt::Display for SubscriptionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for SubscriptionStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "active" => Ok(SubscriptionStatus::Active),
            "failed" => Ok(SubscriptionStatus::Failed),
            other => Err(format!("unknown subscription status '{}'", other)),
        }
    }
}

/// Kinds of mailbox changes a subscription can ask to be notified about.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChangeType {
    Created,
    Updated,
    Deleted,
}

impl ChangeType {
    pub fn as_str(&self) -> &'static str {
        match self {
            ChangeType::Created => "created",
            ChangeType::Updated => "updated",
            ChangeType::Deleted => "deleted",
        }
    }

    /// Joins change types into the comma-separated form used on the wire
    /// and in storage.
    pub fn join(types: &[ChangeType]) -> String {
        types
            .iter()
            .map(|t| t.as_str())
            .collect::<Vec<_>>()
            .join(",")
    }

    /// Parses a comma-separated list, ignoring blanks.
    pub fn parse_list(value: &str) -> Result<Vec<ChangeType>, String> {
        value
            .split(',')
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .map(str::parse)
            .collect()
    }
}

impl FromStr for ChangeType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "created" => Ok(ChangeType::Created),
            "updated" => Ok(ChangeType::Updated),
            "deleted" => Ok(ChangeType::Deleted),
            other => Err(format!("unknown change type '{}'", other)),
        }
    }
}

/// A push subscription registered with the mail provider.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct WebhookSubscription {
    /// Provider-assigned subscription id.
    pub id: String,
    pub user_id: String,
    pub resource: String,
    pub change_types: Vec<ChangeType>,
    pub notification_url: String,
    /// Shared secret echoed on every notification.
    #[serde(skip_serializing)]
    pub client_state: String,
    pub expires_at: DateTime<Utc>,
    pub last_renewed_at: Option<DateTime<Utc>>,
    pub renewal_count: u32,
    pub renewal_failures: u32,
    pub status: SubscriptionStatus,
}

impl WebhookSubscription {
    /// Fractional hours until expiry; negative once expired.
    pub fn hours_until_expiry(&self, now: DateTime<Utc>) -> f64 {
        (self.expires_at - now).num_seconds() as f64 / 3600.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    #[test]
    fn test_change_type_list_round_trip() {
        let types = vec![ChangeType::Created, ChangeType::Updated];
        let joined = ChangeType::join(&types);
        assert_eq!(joined, "created,updated");
        assert_eq!(ChangeType::parse_list(&joined).unwrap(), types);
        assert_eq!(
            ChangeType::parse_list(" Created , ").unwrap(),
            vec![ChangeType::Created]
        );
        assert!(ChangeType::parse_list("created,moved").is_err());
    }

    #[test]
    fn test_hours_until_expiry() {
        let now = Utc::now();
        let sub = WebhookSubscription {
            id: "sub-1".to_string(),
            user_id: "u1".to_string(),
            resource: "me/messages".to_string(),
            change_types: vec![ChangeType::Created],
            notification_url: "https://example.com/webhooks/outlook".to_string(),
            client_state: "secret".to_string(),
            expires_at: now + Duration::hours(5),
            last_renewed_at: None,
            renewal_count: 0,
            renewal_failures: 0,
            status: SubscriptionStatus::Active,
        };
        let hours = sub.hours_until_expiry(now);
        assert!((hours - 5.0).abs() < 0.01);
        assert!(sub.hours_until_expiry(now + Duration::hours(6)) < 0.0);
    }

    #[test]
    fn test_client_state_not_serialized() {
        let sub = WebhookSubscription {
            id: "sub-1".to_string(),
            user_id: "u1".to_string(),
            resource: "me/messages".to_string(),
            change_types: vec![],
            notification_url: "https://example.com".to_string(),
            client_state: "top-secret".to_string(),
            expires_at: Utc::now(),
            last_renewed_at: None,
            renewal_count: 0,
            renewal_failures: 0,
            status: SubscriptionStatus::Active,
        };
        let json = serde_json::to_string(&sub).unwrap();
        assert!(!json.contains("top-secret"));
    }
}
