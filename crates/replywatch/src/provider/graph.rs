//! Microsoft Graph implementation of [`MailProvider`].

use std::sync::Arc;
use std::time::Duration as StdDuration;

use async_trait::async_trait;
use chrono::{DateTime, Duration, SecondsFormat, Utc};
use reqwest::header::RETRY_AFTER;
use reqwest::{Client, Response, StatusCode};
use secrecy::ExposeSecret;
use serde::Deserialize;
use serde_json::json;

use super::error::{sanitize_error_body, ProviderError};
use super::types::{CreatedSubscription, Message, SendMailParams, SentMessage, SubscriptionRequest};
use super::MailProvider;
use crate::auth::TokenProvider;
use crate::config::ProviderConfig;
use crate::subscription::ChangeType;

const MESSAGE_SELECT_FIELDS: &str =
    "id,subject,from,receivedDateTime,isRead,conversationId,internetMessageId";

const CONVERSATION_PAGE_SIZE: u32 = 50;

const SEARCH_PAGE_SIZE: u32 = 25;

/// Upper bound on `@odata.nextLink` hops for one listing.
const MAX_PAGES: usize = 20;

#[derive(Debug, Deserialize)]
struct GraphMessagePage {
    value: Vec<GraphMessage>,
    #[serde(rename = "@odata.nextLink")]
    next_link: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct GraphMessage {
    id: Option<String>,
    subject: Option<String>,
    from: Option<GraphRecipient>,
    received_date_time: Option<String>,
    is_read: Option<bool>,
    conversation_id: Option<String>,
    internet_message_id: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct GraphRecipient {
    email_address: Option<GraphEmailAddress>,
}

#[derive(Debug, Deserialize)]
struct GraphEmailAddress {
    address: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct GraphSubscription {
    id: String,
    expiration_date_time: String,
}

impl GraphMessage {
    /// Drops messages missing an id or a parseable timestamp.
    fn into_message(self) -> Option<Message> {
        let id = self.id?;
        let received_at = DateTime::parse_from_rfc3339(self.received_date_time.as_deref()?)
            .ok()?
            .with_timezone(&Utc);
        Some(Message {
            id,
            conversation_id: self.conversation_id,
            internet_message_id: self.internet_message_id,
            subject: self.subject,
            from: self
                .from
                .and_then(|r| r.email_address)
                .and_then(|e| e.address),
            received_at,
            is_read: self.is_read,
        })
    }
}

/// Graph client authenticated per call through a [`TokenProvider`].
pub struct GraphClient {
    http: Client,
    api_base: String,
    tokens: Arc<dyn TokenProvider>,
}

impl GraphClient {
    pub fn new(config: &ProviderConfig, tokens: Arc<dyn TokenProvider>) -> Result<Self, ProviderError> {
        let http = Client::builder()
            .connect_timeout(StdDuration::from_secs(config.connect_timeout_secs))
            .timeout(StdDuration::from_secs(config.request_timeout_secs))
            .build()?;
        Ok(Self {
            http,
            api_base: config.api_base.trim_end_matches('/').to_string(),
            tokens,
        })
    }

    fn url(&self, path: &str) -> String {
        format!("{}/{}", self.api_base, path.trim_start_matches('/'))
    }

    async fn bearer(&self, user_id: &str) -> Result<String, ProviderError> {
        let token = self.tokens.get_valid_access_token(user_id).await?;
        Ok(token.expose_secret().to_string())
    }

    async fn fetch_messages(
        &self,
        user_id: &str,
        query: &[(&str, String)],
    ) -> Result<Vec<Message>, ProviderError> {
        let token = self.bearer(user_id).await?;
        let mut request = self.http.get(self.url("me/messages")).query(query);
        let mut raw = Vec::new();
        let mut pages = 0;

        loop {
            let response = request.bearer_auth(&token).send().await?;
            let page: GraphMessagePage = check(response).await?.json().await.map_err(decode)?;
            raw.extend(page.value);
            pages += 1;

            match page.next_link {
                Some(next) if pages < MAX_PAGES => request = self.http.get(next),
                Some(_) => {
                    tracing::warn!(user_id, pages, "Stopped following Graph nextLink at page cap");
                    break;
                }
                None => break,
            }
        }

        let total = raw.len();
        let mut messages: Vec<Message> = raw
            .into_iter()
            .filter_map(GraphMessage::into_message)
            .collect();
        if messages.len() < total {
            tracing::warn!(
                user_id,
                skipped = total - messages.len(),
                "Skipping malformed messages in Graph response"
            );
        }
        messages.sort_by(|a, b| b.received_at.cmp(&a.received_at));
        Ok(messages)
    }
}

/// Maps non-success statuses onto [`ProviderError`].
async fn check(response: Response) -> Result<Response, ProviderError> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }

    if status == StatusCode::TOO_MANY_REQUESTS {
        let retry_after_secs = response
            .headers()
            .get(RETRY_AFTER)
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.trim().parse::<u64>().ok());
        return Err(ProviderError::RateLimited { retry_after_secs });
    }

    let url = response.url().path().to_string();
    let body = sanitize_error_body(&response.text().await.unwrap_or_default());
    let code = status.as_u16();
    Err(match status {
        StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => {
            ProviderError::Unauthorized { status: code, body }
        }
        StatusCode::NOT_FOUND => ProviderError::NotFound(url),
        s if s.is_server_error() => ProviderError::Unavailable { status: code, body },
        _ => ProviderError::Request { status: code, body },
    })
}

fn decode(e: reqwest::Error) -> ProviderError {
    ProviderError::Decode(e.to_string())
}

fn graph_timestamp(ts: DateTime<Utc>) -> String {
    ts.to_rfc3339_opts(SecondsFormat::Millis, true)
}

fn parse_graph_timestamp(value: &str) -> Result<DateTime<Utc>, ProviderError> {
    DateTime::parse_from_rfc3339(value)
        .map(|t| t.with_timezone(&Utc))
        .map_err(|e| ProviderError::Decode(format!("bad expirationDateTime '{}': {}", value, e)))
}

/// OData string literals escape `'` by doubling it.
fn odata_literal(value: &str) -> String {
    value.replace('\'', "''")
}

#[async_trait]
impl MailProvider for GraphClient {
    async fn list_messages_in_conversation(
        &self,
        user_id: &str,
        conversation_id: &str,
    ) -> Result<Vec<Message>, ProviderError> {
        // Graph rejects an $orderby property that is missing from $filter.
        let query = [
            (
                "$filter",
                format!(
                    "receivedDateTime ge 1900-01-01T00:00:00Z and conversationId eq '{}'",
                    odata_literal(conversation_id)
                ),
            ),
            ("$orderby", "receivedDateTime desc".to_string()),
            ("$select", MESSAGE_SELECT_FIELDS.to_string()),
            ("$top", CONVERSATION_PAGE_SIZE.to_string()),
        ];
        self.fetch_messages(user_id, &query).await
    }

    async fn search_messages_by_subject(
        &self,
        user_id: &str,
        query: &str,
    ) -> Result<Vec<Message>, ProviderError> {
        let term = query.replace('"', " ");
        let query = [
            ("$search", format!("\"subject:{}\"", term.trim())),
            ("$select", MESSAGE_SELECT_FIELDS.to_string()),
            ("$top", SEARCH_PAGE_SIZE.to_string()),
        ];
        self.fetch_messages(user_id, &query).await
    }

    async fn get_message(
        &self,
        user_id: &str,
        message_id: &str,
    ) -> Result<Option<Message>, ProviderError> {
        let token = self.bearer(user_id).await?;
        let response = self
            .http
            .get(self.url(&format!("me/messages/{}", message_id)))
            .bearer_auth(token)
            .query(&[("$select", MESSAGE_SELECT_FIELDS)])
            .send()
            .await?;
        let response = match check(response).await {
            Ok(r) => r,
            Err(ProviderError::NotFound(_)) => return Ok(None),
            Err(e) => return Err(e),
        };
        let message: GraphMessage = response.json().await.map_err(decode)?;
        Ok(message.into_message())
    }

    async fn send_mail(
        &self,
        user_id: &str,
        params: &SendMailParams,
    ) -> Result<SentMessage, ProviderError> {
        let token = self.bearer(user_id).await?;
        let recipients: Vec<_> = params
            .to
            .iter()
            .map(|address| json!({ "emailAddress": { "address": address } }))
            .collect();

        // Drafting first yields the ids that a plain sendMail call never returns.
        let draft = self
            .http
            .post(self.url("me/messages"))
            .bearer_auth(&token)
            .json(&json!({
                "subject": params.subject,
                "body": { "contentType": "HTML", "content": params.body },
                "toRecipients": recipients,
            }))
            .send()
            .await?;
        let draft: GraphMessage = check(draft).await?.json().await.map_err(decode)?;
        let message_id = draft
            .id
            .ok_or_else(|| ProviderError::Decode("draft response without id".to_string()))?;

        let sent = self
            .http
            .post(self.url(&format!("me/messages/{}/send", message_id)))
            .bearer_auth(&token)
            .header(reqwest::header::CONTENT_LENGTH, 0)
            .send()
            .await?;
        check(sent).await?;

        tracing::info!(user_id, message_id = %message_id, "Sent tracked message");
        Ok(SentMessage {
            message_id,
            conversation_id: draft.conversation_id,
            internet_message_id: draft.internet_message_id,
        })
    }

    async fn create_subscription(
        &self,
        user_id: &str,
        request: &SubscriptionRequest,
    ) -> Result<CreatedSubscription, ProviderError> {
        let token = self.bearer(user_id).await?;
        let expires_at = Utc::now() + request.ttl;
        let response = self
            .http
            .post(self.url("subscriptions"))
            .bearer_auth(token)
            .json(&json!({
                "changeType": ChangeType::join(&request.change_types),
                "notificationUrl": request.notification_url,
                "lifecycleNotificationUrl": request.notification_url,
                "resource": request.resource,
                "expirationDateTime": graph_timestamp(expires_at),
                "clientState": request.client_state,
            }))
            .send()
            .await?;
        let created: GraphSubscription = check(response).await?.json().await.map_err(decode)?;
        Ok(CreatedSubscription {
            expires_at: parse_graph_timestamp(&created.expiration_date_time)?,
            id: created.id,
        })
    }

    async fn renew_subscription(
        &self,
        user_id: &str,
        subscription_id: &str,
        ttl: Duration,
    ) -> Result<DateTime<Utc>, ProviderError> {
        let token = self.bearer(user_id).await?;
        let response = self
            .http
            .patch(self.url(&format!("subscriptions/{}", subscription_id)))
            .bearer_auth(token)
            .json(&json!({ "expirationDateTime": graph_timestamp(Utc::now() + ttl) }))
            .send()
            .await?;
        let renewed: GraphSubscription = check(response).await?.json().await.map_err(decode)?;
        parse_graph_timestamp(&renewed.expiration_date_time)
    }

    async fn delete_subscription(
        &self,
        user_id: &str,
        subscription_id: &str,
    ) -> Result<(), ProviderError> {
        let token = self.bearer(user_id).await?;
        let response = self
            .http
            .delete(self.url(&format!("subscriptions/{}", subscription_id)))
            .bearer_auth(token)
            .send()
            .await?;
        match check(response).await {
            Ok(_) | Err(ProviderError::NotFound(_)) => Ok(()),
            Err(e) => Err(e),
        }
    }

    async fn verify_access(&self, user_id: &str) -> Result<(), ProviderError> {
        let token = self.bearer(user_id).await?;
        let response = self
            .http
            .get(self.url("me"))
            .bearer_auth(token)
            .query(&[("$select", "id")])
            .send()
            .await?;
        check(response).await?;
        Ok(())
    }
}
