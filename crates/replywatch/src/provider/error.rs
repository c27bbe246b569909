use thiserror::Error;

use crate::auth::TokenError;

/// Maximum length of a provider error body kept in errors and logs.
pub const MAX_ERROR_BODY_LENGTH: usize = 200;

#[derive(Error, Debug)]
pub enum ProviderError {
    /// No usable access token for the user.
    #[error("No valid access token: {0}")]
    Token(#[from] TokenError),

    /// The provider rejected the token (401/403).
    #[error("Provider rejected credentials ({status}): {body}")]
    Unauthorized { status: u16, body: String },

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Rate limited by provider (retry after {retry_after_secs:?}s)")]
    RateLimited { retry_after_secs: Option<u64> },

    /// 5xx from the provider.
    #[error("Provider unavailable ({status}): {body}")]
    Unavailable { status: u16, body: String },

    /// Any other non-success status.
    #[error("Provider request failed ({status}): {body}")]
    Request { status: u16, body: String },

    #[error("HTTP transport error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Unexpected provider response: {0}")]
    Decode(String),
}

impl ProviderError {
    /// Errors a later sweep tick may succeed on.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            ProviderError::RateLimited { .. }
                | ProviderError::Unavailable { .. }
                | ProviderError::Http(_)
        )
    }

    /// Errors that need the user to reconnect their mailbox.
    pub fn is_auth(&self) -> bool {
        matches!(
            self,
            ProviderError::Token(_) | ProviderError::Unauthorized { .. }
        )
    }
}

/// Truncates a response body so tokens or large payloads don't reach the logs.
pub fn sanitize_error_body(body: &str) -> String {
    match body.char_indices().nth(MAX_ERROR_BODY_LENGTH) {
        Some((cut, _)) => format!("{}... (truncated)", &body[..cut]),
        None => body.to_string(),
    }
}
