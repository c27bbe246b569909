//! Reply detection.
//!
//! Conversation-id matching is authoritative; subject matching is a
//! lower-confidence fallback for sends whose thread id is unknown.

pub mod engine;
pub mod subject;

use chrono::{DateTime, Utc};
use serde::Serialize;
use thiserror::Error;

use crate::db::DatabaseError;
use crate::provider::ProviderError;
use crate::tracking::DetectionMethod;

pub use engine::ReplyDetector;
pub use subject::{has_reply_prefix, normalize_subject};

#[derive(Error, Debug)]
pub enum DetectionError {
    #[error("Provider lookup failed: {0}")]
    Provider(#[from] ProviderError),

    #[error("Tracking store error: {0}")]
    Store(#[from] DatabaseError),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Confidence {
    High,
    Medium,
    Low,
}

/// Outcome of checking one tracked email.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DetectionResult {
    pub tracked_email_id: String,
    pub was_reply: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reply_time: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reply_message_id: Option<String>,
    pub confidence: Confidence,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub method: Option<DetectionMethod>,
    /// Whether this pass performed the PENDING → REPLIED write.
    pub updated: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub note: Option<String>,
}

impl DetectionResult {
    pub(crate) fn no_reply(tracked_email_id: &str, confidence: Confidence) -> Self {
        Self {
            tracked_email_id: tracked_email_id.to_string(),
            was_reply: false,
            reply_time: None,
            reply_message_id: None,
            confidence,
            method: None,
            updated: false,
            note: None,
        }
    }

    pub(crate) fn with_note(mut self, note: impl Into<String>) -> Self {
        self.note = Some(note.into());
        self
    }
}
