pub mod auth;
pub mod config;
pub mod db;
pub mod detection;
pub mod error;
pub mod jobs;
pub mod logging;
pub mod provider;
pub mod reconcile;
pub mod secrets;
pub mod subscription;
pub mod tracking;
pub mod webhook;

pub use auth::{TokenError, TokenManager, TokenProvider};
pub use config::{load_config, Config};
pub use db::{Database, DatabaseError, SqliteStore};
pub use detection::{Confidence, DetectionResult, ReplyDetector};
pub use error::{ConfigError, ReplyWatchError, Result};
pub use jobs::{JobScheduler, MaintenanceJob, PeriodicJob, ReconcileJob, RenewalJob};
pub use provider::{GraphClient, MailProvider, ProviderError};
pub use reconcile::{ReconciliationSweep, SweepReport};
pub use secrets::{resolve_secret, SecretError, TokenEncryptor};
pub use subscription::{
    EnsureAction, EnsureOutcome, InMemoryCooldown, SubscriptionManager, SubscriptionSettings,
};
pub use tracking::{TrackedEmail, TrackingService, TrackingStatus, TrackingStore};
pub use webhook::{build_router, AppState, NotificationProcessor, QueueDispatcher};
