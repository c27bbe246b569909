use std::path::PathBuf;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ReplyWatchError {
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Database error: {0}")]
    Database(#[from] crate::db::DatabaseError),

    #[error("Provider error: {0}")]
    Provider(#[from] crate::provider::ProviderError),

    #[error("Token error: {0}")]
    Token(#[from] crate::auth::TokenError),

    #[error("Secret error: {0}")]
    Secret(#[from] crate::secrets::SecretError),

    #[error("Dispatch error: {0}")]
    Dispatch(#[from] crate::webhook::DispatchError),

    #[error("Detection error: {0}")]
    Detection(#[from] crate::detection::DetectionError),

    #[error("Logging setup failed: {0}")]
    Logging(#[from] crate::logging::LoggingError),

    #[error("Server error: {0}")]
    Server(#[source] std::io::Error),
}

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Failed to read config file '{path}': {source}")]
    ReadFile {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to parse config JSON: {0}")]
    ParseJson(#[from] serde_json::Error),

    #[error("Config validation failed: {message}")]
    Validation { message: String },

    #[error("Invalid value for environment variable '{name}': {reason}")]
    InvalidEnv { name: String, reason: String },
}

pub type Result<T> = std::result::Result<T, ReplyWatchError>;
