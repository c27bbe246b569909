//! Access tokens for the mail provider.

pub mod manager;
pub mod refresher;

use async_trait::async_trait;
use secrecy::SecretString;
use thiserror::Error;

pub use manager::{StoredToken, TokenManager};
pub use refresher::{OAuthRefresher, TokenResponse};

use crate::db::DatabaseError;

#[derive(Error, Debug)]
pub enum TokenError {
    #[error("No token stored for user '{user_id}'")]
    NoToken { user_id: String },

    #[error("Token refresh failed: {0}")]
    RefreshFailed(String),

    #[error("Token storage error: {0}")]
    Storage(#[from] DatabaseError),

    #[error("Stored token could not be decrypted: {0}")]
    Decrypt(String),
}

/// Supplies a currently valid access token for a user.
#[async_trait]
pub trait TokenProvider: Send + Sync {
    async fn get_valid_access_token(&self, user_id: &str) -> Result<SecretString, TokenError>;
}
