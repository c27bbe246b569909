//! Tracked email records and their status transitions.

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Lifecycle status of a tracked outbound email.
///
/// `Pending` is the only non-terminal state. Detection paths only ever
/// read `Pending` rows, so terminal rows are never revisited.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TrackingStatus {
    Pending,
    Replied,
    Stopped,
    Expired,
    Failed,
}

impl TrackingStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            TrackingStatus::Pending => "pending",
            TrackingStatus::Replied => "replied",
            TrackingStatus::Stopped => "stopped",
            TrackingStatus::Expired => "expired",
            TrackingStatus::Failed => "failed",
        }
    }

    pub fn is_terminal(&self) -> bool {
        !matches!(self, TrackingStatus::Pending)
    }
}

impl fmt::Display for TrackingStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for TrackingStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(TrackingStatus::Pending),
            "replied" => Ok(TrackingStatus::Replied),
            "stopped" => Ok(TrackingStatus::Stopped),
            "expired" => Ok(TrackingStatus::Expired),
            "failed" => Ok(TrackingStatus::Failed),
            other => Err(format!("unknown tracking status '{}'", other)),
        }
    }
}

/// How a reply was (or could not be) established.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DetectionMethod {
    /// Conversation lookup triggered by a webhook or a direct call.
    ConversationId,
    /// Subject fallback triggered by a webhook or a direct call.
    SubjectMatching,
    /// Conversation lookup performed by the reconciliation sweep.
    SyncCheck,
    /// Subject search performed by the reconciliation sweep.
    OutlookSync,
    /// The sweep could not reach the provider for this row's user.
    NeedsManualSync,
}

impl DetectionMethod {
    pub fn as_str(&self) -> &'static str {
        match self {
            DetectionMethod::ConversationId => "conversation_id",
            DetectionMethod::SubjectMatching => "subject_matching",
            DetectionMethod::SyncCheck => "sync_check",
            DetectionMethod::OutlookSync => "outlook_sync",
            DetectionMethod::NeedsManualSync => "needs_manual_sync",
        }
    }
}

impl fmt::Display for DetectionMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for DetectionMethod {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "conversation_id" => Ok(DetectionMethod::ConversationId),
            "subject_matching" => Ok(DetectionMethod::SubjectMatching),
            "sync_check" => Ok(DetectionMethod::SyncCheck),
            "outlook_sync" => Ok(DetectionMethod::OutlookSync),
            "needs_manual_sync" => Ok(DetectionMethod::NeedsManualSync),
            other => Err(format!("unknown detection method '{}'", other)),
        }
    }
}

/// A tracked outbound email as stored.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TrackedEmail {
    pub id: String,
    pub user_id: String,
    pub recipient: String,
    pub subject: String,
    pub provider_message_id: Option<String>,
    pub internet_message_id: Option<String>,
    pub conversation_id: Option<String>,
    pub status: TrackingStatus,
    pub sent_at: DateTime<Utc>,
    pub reply_received_at: Option<DateTime<Utc>>,
    pub detection_method: Option<DetectionMethod>,
    pub expires_at: Option<DateTime<Utc>>,
    pub last_sync_check: Option<DateTime<Utc>>,
}

/// Fields supplied by the send path when a tracked email is recorded.
#[derive(Debug, Clone)]
pub struct NewTrackedEmail {
    pub user_id: String,
    pub recipient: String,
    pub subject: String,
    pub provider_message_id: Option<String>,
    pub internet_message_id: Option<String>,
    pub conversation_id: Option<String>,
    pub sent_at: DateTime<Utc>,
    pub expires_at: Option<DateTime<Utc>>,
}

/// A one-way move out of `Pending`.
///
/// Only `Replied` carries a reply timestamp, which keeps
/// `reply_received_at` set exactly when the status is `Replied`.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum StatusTransition {
    Replied {
        at: DateTime<Utc>,
        method: DetectionMethod,
    },
    Stopped,
    Expired,
    Failed,
}

impl StatusTransition {
    pub fn target(&self) -> TrackingStatus {
        match self {
            StatusTransition::Replied { .. } => TrackingStatus::Replied,
            StatusTransition::Stopped => TrackingStatus::Stopped,
            StatusTransition::Expired => TrackingStatus::Expired,
            StatusTransition::Failed => TrackingStatus::Failed,
        }
    }
}
