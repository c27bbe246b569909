//! Token storage and refresh over the `oauth_tokens` table.

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use secrecy::{ExposeSecret, SecretString};
use tokio::sync::Mutex;

use super::refresher::OAuthRefresher;
use super::{TokenError, TokenProvider};
use crate::db::oauth_repo::{self, MailboxToken};
use crate::db::Database;
use crate::secrets::TokenEncryptor;

/// Tokens expiring within this many seconds are refreshed before use.
pub const EXPIRY_BUFFER_SECS: i64 = 300;

/// Token material handed over by the mailbox connect flow.
#[derive(Debug)]
pub struct StoredToken {
    pub access_token: SecretString,
    pub refresh_token: Option<SecretString>,
    pub expires_at: DateTime<Utc>,
}

pub struct TokenManager {
    db: Database,
    provider: String,
    refresher: Option<OAuthRefresher>,
    encryptor: Option<TokenEncryptor>,
    refresh_lock: Mutex<()>,
}

impl TokenManager {
    pub fn new(db: Database, provider: impl Into<String>) -> Self {
        Self {
            db,
            provider: provider.into(),
            refresher: None,
            encryptor: None,
            refresh_lock: Mutex::new(()),
        }
    }

    pub fn with_refresher(mut self, refresher: OAuthRefresher) -> Self {
        self.refresher = Some(refresher);
        self
    }

    pub fn with_encryptor(mut self, encryptor: TokenEncryptor) -> Self {
        self.encryptor = Some(encryptor);
        self
    }

    /// Persists the credentials of a freshly connected mailbox, replacing
    /// any previous ones for `user_id`.
    pub fn store_token(&self, user_id: &str, token: &StoredToken) -> Result<(), TokenError> {
        let row = MailboxToken {
            user_id: user_id.to_string(),
            provider: self.provider.clone(),
            access_token: self.seal(token.access_token.expose_secret())?,
            refresh_token: token
                .refresh_token
                .as_ref()
                .map(|t| self.seal(t.expose_secret()))
                .transpose()?,
            expires_at: token.expires_at,
            connected_at: Utc::now(),
            refreshed_at: None,
            refresh_failures: 0,
            last_refresh_error: None,
        };
        oauth_repo::connect(&self.db, &row)?;
        log::info!("Stored OAuth token for user {}", user_id);
        Ok(())
    }

    pub fn connected_users(&self) -> Result<Vec<String>, TokenError> {
        Ok(oauth_repo::list_user_ids(&self.db)?)
    }

    pub fn disconnect(&self, user_id: &str) -> Result<(), TokenError> {
        oauth_repo::delete(&self.db, user_id)?;
        Ok(())
    }

    fn seal(&self, plaintext: &str) -> Result<String, TokenError> {
        match &self.encryptor {
            Some(enc) => enc
                .encrypt(plaintext)
                .map_err(|e| TokenError::Decrypt(e.to_string())),
            None => Ok(plaintext.to_string()),
        }
    }

    fn open(&self, stored: &str) -> Result<SecretString, TokenError> {
        match &self.encryptor {
            Some(enc) => enc
                .decrypt(stored)
                .map(SecretString::from)
                .map_err(|e| TokenError::Decrypt(e.to_string())),
            None => Ok(SecretString::from(stored.to_string())),
        }
    }

    async fn refresh(&self, row: &MailboxToken) -> Result<SecretString, TokenError> {
        let refresher = self.refresher.as_ref().ok_or_else(|| {
            TokenError::RefreshFailed("token expired and no refresher configured".to_string())
        })?;
        let refresh_token = row
            .refresh_token
            .as_deref()
            .ok_or_else(|| {
                TokenError::RefreshFailed("token expired and no refresh token stored".to_string())
            })
            .and_then(|t| self.open(t))?;

        let response = match refresher.refresh(&refresh_token).await {
            Ok(response) => response,
            Err(e) => {
                let failures =
                    oauth_repo::record_refresh_failure(&self.db, &row.user_id, &e.to_string())?;
                log::warn!(
                    "Token refresh failed for user {} ({} in a row): {}",
                    row.user_id,
                    failures,
                    e
                );
                return Err(e);
            }
        };

        let now = Utc::now();
        let sealed_refresh = response
            .refresh_token
            .as_deref()
            .map(|t| self.seal(t))
            .transpose()?;
        let still_connected = oauth_repo::record_refresh(
            &self.db,
            &row.user_id,
            &self.seal(&response.access_token)?,
            sealed_refresh.as_deref(),
            now + Duration::seconds(response.expires_in as i64),
            now,
        )?;
        if !still_connected {
            return Err(TokenError::NoToken {
                user_id: row.user_id.clone(),
            });
        }
        log::info!("Refreshed access token for user {}", row.user_id);
        Ok(SecretString::from(response.access_token))
    }

    fn needs_refresh(row: &MailboxToken) -> bool {
        row.needs_refresh(Utc::now(), Duration::seconds(EXPIRY_BUFFER_SECS))
    }
}

#[async_trait]
impl TokenProvider for TokenManager {
    async fn get_valid_access_token(&self, user_id: &str) -> Result<SecretString, TokenError> {
        let row = oauth_repo::find(&self.db, user_id)?.ok_or_else(|| TokenError::NoToken {
            user_id: user_id.to_string(),
        })?;
        if !Self::needs_refresh(&row) {
            return self.open(&row.access_token);
        }

        // One refresh at a time; a concurrent caller may already have refreshed.
        let _guard = self.refresh_lock.lock().await;
        let row = oauth_repo::find(&self.db, user_id)?.ok_or_else(|| TokenError::NoToken {
            user_id: user_id.to_string(),
        })?;
        if !Self::needs_refresh(&row) {
            return self.open(&row.access_token);
        }
        self.refresh(&row).await
    }
}
