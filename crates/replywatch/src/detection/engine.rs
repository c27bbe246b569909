use std::collections::BTreeMap;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use tracing::Instrument;

use super::subject::{has_reply_prefix, normalize_subject, subject_contains};
use super::{Confidence, DetectionError, DetectionResult};
use crate::provider::{MailProvider, Message};
use crate::tracking::{DetectionMethod, StatusTransition, TrackedEmail, TrackingStatus, TrackingStore};

/// Correlates provider messages with PENDING tracked emails.
///
/// Only PENDING rows are ever read, and the REPLIED write is conditional on
/// the row still being PENDING, so concurrent passes resolve a row at most
/// once.
pub struct ReplyDetector {
    provider: Arc<dyn MailProvider>,
    store: Arc<dyn TrackingStore>,
}

impl ReplyDetector {
    pub fn new(provider: Arc<dyn MailProvider>, store: Arc<dyn TrackingStore>) -> Self {
        Self { provider, store }
    }

    /// Conversation-based detection. Lookup failures yield no results.
    pub async fn detect_by_conversation(
        &self,
        conversation_id: &str,
        original_message_id: Option<&str>,
    ) -> Vec<DetectionResult> {
        match self
            .try_detect_by_conversation(
                conversation_id,
                original_message_id,
                DetectionMethod::ConversationId,
            )
            .await
        {
            Ok(results) => results,
            Err(e) => {
                tracing::warn!(conversation_id, error = %e, "Conversation detection failed, will retry on a later pass");
                Vec::new()
            }
        }
    }

    /// Subject-based fallback. Lookup failures yield no results.
    pub async fn detect_by_subject(
        &self,
        user_id: &str,
        subject: &str,
        sent_after: DateTime<Utc>,
    ) -> Vec<DetectionResult> {
        match self
            .try_detect_by_subject(user_id, subject, sent_after, DetectionMethod::SubjectMatching)
            .await
        {
            Ok(results) => results,
            Err(e) => {
                tracing::warn!(user_id, error = %e, "Subject detection failed, will retry on a later pass");
                Vec::new()
            }
        }
    }

    /// Like [`Self::detect_by_conversation`] but surfaces errors and records
    /// `method` on matches.
    pub async fn try_detect_by_conversation(
        &self,
        conversation_id: &str,
        original_message_id: Option<&str>,
        method: DetectionMethod,
    ) -> Result<Vec<DetectionResult>, DetectionError> {
        let span = tracing::info_span!("detect_by_conversation", conversation_id, method = %method);
        async move {
            let pending = self.store.pending_by_conversation(conversation_id)?;
            if pending.is_empty() {
                tracing::debug!("No pending tracked emails in conversation");
                return Ok(Vec::new());
            }

            let mut by_user: BTreeMap<&str, Vec<&TrackedEmail>> = BTreeMap::new();
            for row in &pending {
                by_user.entry(row.user_id.as_str()).or_default().push(row);
            }

            let mut results = Vec::with_capacity(pending.len());
            for (user_id, rows) in by_user {
                let messages = self
                    .provider
                    .list_messages_in_conversation(user_id, conversation_id)
                    .await?;
                for row in rows {
                    results.push(self.resolve_in_thread(row, &messages, original_message_id, method)?);
                }
            }
            Ok(results)
        }
        .instrument(span)
        .await
    }

    fn resolve_in_thread(
        &self,
        row: &TrackedEmail,
        messages: &[Message],
        original_message_id: Option<&str>,
        method: DetectionMethod,
    ) -> Result<DetectionResult, DetectionError> {
        let original_id = original_message_id.or(row.provider_message_id.as_deref());
        let is_original = |m: &Message| m.is_same_message(original_id, row.internet_message_id.as_deref());

        let Some(original) = messages.iter().find(|m| is_original(*m)) else {
            tracing::debug!(tracked_email_id = %row.id, "Original message not found in conversation");
            return Ok(DetectionResult::no_reply(&row.id, Confidence::Low)
                .with_note("original message not found in conversation"));
        };

        let reply = messages
            .iter()
            .filter(|m| m.received_at > original.received_at && !is_original(*m))
            .min_by_key(|m| m.received_at);

        match reply {
            Some(reply) => self.mark_replied(row, reply, Confidence::High, method),
            None => Ok(DetectionResult::no_reply(&row.id, Confidence::High)),
        }
    }

    /// Like [`Self::detect_by_subject`] but surfaces errors and records
    /// `method` on matches.
    pub async fn try_detect_by_subject(
        &self,
        user_id: &str,
        subject: &str,
        sent_after: DateTime<Utc>,
        method: DetectionMethod,
    ) -> Result<Vec<DetectionResult>, DetectionError> {
        let normalized = normalize_subject(subject);
        if normalized.is_empty() {
            return Ok(Vec::new());
        }

        let span = tracing::info_span!("detect_by_subject", user_id, method = %method);
        async move {
            let wanted = normalized.to_lowercase();
            let pending: Vec<TrackedEmail> = self
                .store
                .pending_for_user(user_id, sent_after)?
                .into_iter()
                .filter(|row| normalize_subject(&row.subject).to_lowercase() == wanted)
                .collect();
            if pending.is_empty() {
                return Ok(Vec::new());
            }

            let candidates: Vec<Message> = self
                .provider
                .search_messages_by_subject(user_id, &normalized)
                .await?
                .into_iter()
                .filter(|m| m.received_at > sent_after)
                .filter(|m| {
                    m.subject
                        .as_deref()
                        .is_some_and(|s| has_reply_prefix(s) && subject_contains(s, &normalized))
                })
                .collect();

            let mut results = Vec::with_capacity(pending.len());
            for row in &pending {
                let reply = candidates
                    .iter()
                    .filter(|m| m.received_at > row.sent_at)
                    .filter(|m| {
                        !m.is_same_message(
                            row.provider_message_id.as_deref(),
                            row.internet_message_id.as_deref(),
                        )
                    })
                    .min_by_key(|m| m.received_at);

                results.push(match reply {
                    Some(reply) => self.mark_replied(row, reply, Confidence::Medium, method)?,
                    None => DetectionResult::no_reply(&row.id, Confidence::Low),
                });
            }
            Ok(results)
        }
        .instrument(span)
        .await
    }

    fn mark_replied(
        &self,
        row: &TrackedEmail,
        reply: &Message,
        confidence: Confidence,
        method: DetectionMethod,
    ) -> Result<DetectionResult, DetectionError> {
        let updated = self.store.update_if_status(
            &row.id,
            TrackingStatus::Pending,
            StatusTransition::Replied {
                at: reply.received_at,
                method,
            },
        )?;

        if updated {
            tracing::info!(
                tracked_email_id = %row.id,
                reply_message_id = %reply.id,
                reply_time = %reply.received_at,
                method = %method,
                "Reply detected"
            );
        } else {
            tracing::debug!(tracked_email_id = %row.id, "Row already left PENDING, skipping");
        }

        let result = DetectionResult {
            tracked_email_id: row.id.clone(),
            was_reply: true,
            reply_time: Some(reply.received_at),
            reply_message_id: Some(reply.id.clone()),
            confidence,
            method: Some(method),
            updated,
            note: None,
        };
        Ok(if updated {
            result
        } else {
            result.with_note("already resolved by another pass")
        })
    }
}
