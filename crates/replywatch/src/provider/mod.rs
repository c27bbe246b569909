//! Mail provider client.
//!
//! Every call is scoped to a user; implementations obtain that user's
//! access token themselves, so callers only deal in ids and messages.

pub mod error;
pub mod graph;
pub mod types;

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};

pub use error::{sanitize_error_body, ProviderError};
pub use graph::GraphClient;
pub use types::{CreatedSubscription, Message, SendMailParams, SentMessage, SubscriptionRequest};

#[async_trait]
pub trait MailProvider: Send + Sync {
    /// All messages in a conversation, newest first.
    async fn list_messages_in_conversation(
        &self,
        user_id: &str,
        conversation_id: &str,
    ) -> Result<Vec<Message>, ProviderError>;

    /// Messages whose subject matches `query`, newest first.
    async fn search_messages_by_subject(
        &self,
        user_id: &str,
        query: &str,
    ) -> Result<Vec<Message>, ProviderError>;

    /// A single message, or `None` if it no longer exists.
    async fn get_message(
        &self,
        user_id: &str,
        message_id: &str,
    ) -> Result<Option<Message>, ProviderError>;

    async fn send_mail(
        &self,
        user_id: &str,
        params: &SendMailParams,
    ) -> Result<SentMessage, ProviderError>;

    async fn create_subscription(
        &self,
        user_id: &str,
        request: &SubscriptionRequest,
    ) -> Result<CreatedSubscription, ProviderError>;

    /// Extends a subscription and returns its new expiry.
    async fn renew_subscription(
        &self,
        user_id: &str,
        subscription_id: &str,
        ttl: Duration,
    ) -> Result<DateTime<Utc>, ProviderError>;

    async fn delete_subscription(
        &self,
        user_id: &str,
        subscription_id: &str,
    ) -> Result<(), ProviderError>;

    /// Confirms the provider is reachable with the user's credentials.
    async fn verify_access(&self, user_id: &str) -> Result<(), ProviderError>;
}
