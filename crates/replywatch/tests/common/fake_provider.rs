//! Scripted in-process mail provider.

#![allow(dead_code)]

use std::collections::{HashMap, HashSet};
use std::sync::Mutex;

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};

use replywatch::provider::{
    CreatedSubscription, MailProvider, Message, ProviderError, SendMailParams, SentMessage,
    SubscriptionRequest,
};

/// Number of calls made to each provider operation.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Calls {
    pub list_conversation: u32,
    pub search: u32,
    pub get_message: u32,
    pub send: u32,
    pub create: u32,
    pub renew: u32,
    pub delete: u32,
    pub verify: u32,
}

impl Calls {
    pub fn total(&self) -> u32 {
        self.list_conversation
            + self.search
            + self.get_message
            + self.send
            + self.create
            + self.renew
            + self.delete
            + self.verify
    }
}

#[derive(Default)]
struct FakeState {
    conversations: HashMap<String, Vec<Message>>,
    messages: HashMap<String, Message>,
    search_results: Vec<Message>,
    subscriptions: HashMap<String, DateTime<Utc>>,
    sent: Vec<SendMailParams>,
    last_request: Option<SubscriptionRequest>,
    next_id: u32,
    fail_conversation: bool,
    fail_verify: bool,
    fail_create: bool,
    fail_renew: bool,
    unauthorized_users: HashSet<String>,
    calls: Calls,
}

#[derive(Default)]
pub struct FakeProvider {
    state: Mutex<FakeState>,
}

impl FakeProvider {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_conversation(&self, conversation_id: &str, messages: Vec<Message>) {
        let mut state = self.state.lock().unwrap();
        for m in &messages {
            state.messages.insert(m.id.clone(), m.clone());
        }
        state
            .conversations
            .insert(conversation_id.to_string(), messages);
    }

    pub fn add_message(&self, message: Message) {
        self.state
            .lock()
            .unwrap()
            .messages
            .insert(message.id.clone(), message);
    }

    pub fn set_search_results(&self, messages: Vec<Message>) {
        self.state.lock().unwrap().search_results = messages;
    }

    /// Seeds a subscription that already exists at the provider.
    pub fn add_remote_subscription(&self, id: &str, expires_at: DateTime<Utc>) {
        self.state
            .lock()
            .unwrap()
            .subscriptions
            .insert(id.to_string(), expires_at);
    }

    pub fn fail_conversation_lookups(&self, fail: bool) {
        self.state.lock().unwrap().fail_conversation = fail;
    }

    pub fn fail_verify(&self, fail: bool) {
        self.state.lock().unwrap().fail_verify = fail;
    }

    pub fn fail_create(&self, fail: bool) {
        self.state.lock().unwrap().fail_create = fail;
    }

    pub fn fail_renew(&self, fail: bool) {
        self.state.lock().unwrap().fail_renew = fail;
    }

    /// Every call for `user_id` fails as if its token were revoked.
    pub fn revoke_user(&self, user_id: &str) {
        self.state
            .lock()
            .unwrap()
            .unauthorized_users
            .insert(user_id.to_string());
    }

    pub fn calls(&self) -> Calls {
        self.state.lock().unwrap().calls.clone()
    }

    pub fn remote_subscription_ids(&self) -> Vec<String> {
        let mut ids: Vec<String> = self
            .state
            .lock()
            .unwrap()
            .subscriptions
            .keys()
            .cloned()
            .collect();
        ids.sort();
        ids
    }

    pub fn last_subscription_request(&self) -> Option<SubscriptionRequest> {
        self.state.lock().unwrap().last_request.clone()
    }

    pub fn sent(&self) -> Vec<SendMailParams> {
        self.state.lock().unwrap().sent.clone()
    }

    fn check_user(state: &FakeState, user_id: &str) -> Result<(), ProviderError> {
        if state.unauthorized_users.contains(user_id) {
            return Err(ProviderError::Unauthorized {
                status: 401,
                body: "InvalidAuthenticationToken".to_string(),
            });
        }
        Ok(())
    }
}

fn unavailable() -> ProviderError {
    ProviderError::Unavailable {
        status: 503,
        body: "Service Unavailable".to_string(),
    }
}

fn newest_first(mut messages: Vec<Message>) -> Vec<Message> {
    messages.sort_by(|a, b| b.received_at.cmp(&a.received_at));
    messages
}

#[async_trait]
impl MailProvider for FakeProvider {
    async fn list_messages_in_conversation(
        &self,
        user_id: &str,
        conversation_id: &str,
    ) -> Result<Vec<Message>, ProviderError> {
        let mut state = self.state.lock().unwrap();
        state.calls.list_conversation += 1;
        Self::check_user(&state, user_id)?;
        if state.fail_conversation {
            return Err(unavailable());
        }
        let messages = state
            .conversations
            .get(conversation_id)
            .cloned()
            .unwrap_or_default();
        Ok(newest_first(messages))
    }

    async fn search_messages_by_subject(
        &self,
        user_id: &str,
        query: &str,
    ) -> Result<Vec<Message>, ProviderError> {
        let mut state = self.state.lock().unwrap();
        state.calls.search += 1;
        Self::check_user(&state, user_id)?;
        let needle = query.to_lowercase();
        let hits = state
            .search_results
            .iter()
            .filter(|m| {
                m.subject
                    .as_deref()
                    .is_some_and(|s| s.to_lowercase().contains(&needle))
            })
            .cloned()
            .collect();
        Ok(newest_first(hits))
    }

    async fn get_message(
        &self,
        user_id: &str,
        message_id: &str,
    ) -> Result<Option<Message>, ProviderError> {
        let mut state = self.state.lock().unwrap();
        state.calls.get_message += 1;
        Self::check_user(&state, user_id)?;
        Ok(state.messages.get(message_id).cloned())
    }

    async fn send_mail(
        &self,
        user_id: &str,
        params: &SendMailParams,
    ) -> Result<SentMessage, ProviderError> {
        let mut state = self.state.lock().unwrap();
        state.calls.send += 1;
        Self::check_user(&state, user_id)?;
        state.next_id += 1;
        let n = state.next_id;
        state.sent.push(params.clone());
        Ok(SentMessage {
            message_id: format!("sent-{}", n),
            conversation_id: Some(format!("conv-sent-{}", n)),
            internet_message_id: Some(format!("<sent-{}@example.com>", n)),
        })
    }

    async fn create_subscription(
        &self,
        user_id: &str,
        request: &SubscriptionRequest,
    ) -> Result<CreatedSubscription, ProviderError> {
        let mut state = self.state.lock().unwrap();
        state.calls.create += 1;
        Self::check_user(&state, user_id)?;
        state.last_request = Some(request.clone());
        if state.fail_create {
            return Err(unavailable());
        }
        state.next_id += 1;
        let id = format!("graph-sub-{}", state.next_id);
        let expires_at = Utc::now() + request.ttl;
        state.subscriptions.insert(id.clone(), expires_at);
        Ok(CreatedSubscription { id, expires_at })
    }

    async fn renew_subscription(
        &self,
        user_id: &str,
        subscription_id: &str,
        ttl: Duration,
    ) -> Result<DateTime<Utc>, ProviderError> {
        let mut state = self.state.lock().unwrap();
        state.calls.renew += 1;
        Self::check_user(&state, user_id)?;
        if state.fail_renew {
            return Err(unavailable());
        }
        let expires_at = Utc::now() + ttl;
        match state.subscriptions.get_mut(subscription_id) {
            Some(current) => {
                *current = expires_at;
                Ok(expires_at)
            }
            None => Err(ProviderError::NotFound(subscription_id.to_string())),
        }
    }

    async fn delete_subscription(
        &self,
        user_id: &str,
        subscription_id: &str,
    ) -> Result<(), ProviderError> {
        let mut state = self.state.lock().unwrap();
        state.calls.delete += 1;
        Self::check_user(&state, user_id)?;
        state.subscriptions.remove(subscription_id);
        Ok(())
    }

    async fn verify_access(&self, user_id: &str) -> Result<(), ProviderError> {
        let mut state = self.state.lock().unwrap();
        state.calls.verify += 1;
        Self::check_user(&state, user_id)?;
        if state.fail_verify {
            return Err(unavailable());
        }
        Ok(())
    }
}
