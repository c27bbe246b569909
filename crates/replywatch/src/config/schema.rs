use chrono::Duration;
use serde::{Deserialize, Serialize};

use crate::secrets::SecretSource;
use crate::subscription::ChangeType;

/// Longest lifetime Graph grants a message subscription, in minutes.
pub const PROVIDER_MAX_SUBSCRIPTION_MINUTES: i64 = 4230;

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Config {
    #[serde(default)]
    pub server: ServerConfig,
    /// Defaults to `~/.replywatch/data/replywatch.db`.
    #[serde(default)]
    pub database_path: Option<String>,
    #[serde(default)]
    pub logging: LoggingConfig,
    #[serde(default)]
    pub webhook: WebhookConfig,
    #[serde(default)]
    pub cooldown: CooldownConfig,
    #[serde(default)]
    pub reconciliation: ReconciliationConfig,
    #[serde(default)]
    pub renewal: RenewalConfig,
    #[serde(default)]
    pub maintenance: MaintenanceConfig,
    #[serde(default)]
    pub provider: ProviderConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ServerConfig {
    #[serde(default = "default_host")]
    pub host: String,
    #[serde(default = "default_port")]
    pub port: u16,
}

fn default_host() -> String {
    "0.0.0.0".to_string()
}

fn default_port() -> u16 {
    8080
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LoggingConfig {
    /// Filter directive used when `RUST_LOG` is unset.
    #[serde(default = "default_log_level")]
    pub level: String,
    #[serde(default)]
    pub json: bool,
}

fn default_log_level() -> String {
    "info".to_string()
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            json: false,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WebhookConfig {
    #[serde(default)]
    pub enabled: bool,
    /// Path segment of `/webhooks/{provider}` the endpoint answers on.
    #[serde(default = "default_provider")]
    pub provider: String,
    /// Public URL the provider posts notifications to.
    #[serde(default)]
    pub callback_url: Option<String>,
    #[serde(default)]
    pub client_state: SecretSource,
    #[serde(default = "default_resource")]
    pub resource: String,
    #[serde(default = "default_change_types")]
    pub change_types: Vec<ChangeType>,
    #[serde(default = "default_renewal_threshold_hours")]
    pub renewal_threshold_hours: f64,
    #[serde(default = "default_subscription_ttl_hours")]
    pub subscription_ttl_hours: u32,
    #[serde(default = "default_max_concurrent_items")]
    pub max_concurrent_items: usize,
    #[serde(default = "default_queue_capacity")]
    pub queue_capacity: usize,
    #[serde(default = "default_event_retention_days")]
    pub event_retention_days: u32,
}

fn default_provider() -> String {
    "outlook".to_string()
}

fn default_resource() -> String {
    "me/mailFolders('Inbox')/messages".to_string()
}

fn default_change_types() -> Vec<ChangeType> {
    vec![ChangeType::Created]
}

fn default_renewal_threshold_hours() -> f64 {
    6.0
}

fn default_subscription_ttl_hours() -> u32 {
    70
}

fn default_max_concurrent_items() -> usize {
    8
}

fn default_queue_capacity() -> usize {
    64
}

fn default_event_retention_days() -> u32 {
    30
}

impl WebhookConfig {
    /// Requested subscription lifetime, clamped to the provider maximum.
    pub fn subscription_ttl(&self) -> Duration {
        let minutes = (i64::from(self.subscription_ttl_hours) * 60)
            .min(PROVIDER_MAX_SUBSCRIPTION_MINUTES);
        Duration::minutes(minutes)
    }
}

impl Default for WebhookConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            provider: default_provider(),
            callback_url: None,
            client_state: SecretSource::default(),
            resource: default_resource(),
            change_types: default_change_types(),
            renewal_threshold_hours: default_renewal_threshold_hours(),
            subscription_ttl_hours: default_subscription_ttl_hours(),
            max_concurrent_items: default_max_concurrent_items(),
            queue_capacity: default_queue_capacity(),
            event_retention_days: default_event_retention_days(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CooldownConfig {
    #[serde(default = "default_failure_threshold")]
    pub failure_threshold: u32,
    #[serde(default = "default_window_secs")]
    pub window_secs: u64,
}

fn default_failure_threshold() -> u32 {
    3
}

fn default_window_secs() -> u64 {
    300
}

impl Default for CooldownConfig {
    fn default() -> Self {
        Self {
            failure_threshold: default_failure_threshold(),
            window_secs: default_window_secs(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReconciliationConfig {
    #[serde(default = "default_max_age_days")]
    pub max_age_days: u32,
    #[serde(default = "default_reconcile_interval")]
    pub interval_minutes: u64,
}

fn default_max_age_days() -> u32 {
    30
}

fn default_reconcile_interval() -> u64 {
    60
}

impl Default for ReconciliationConfig {
    fn default() -> Self {
        Self {
            max_age_days: default_max_age_days(),
            interval_minutes: default_reconcile_interval(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RenewalConfig {
    #[serde(default = "default_renewal_interval")]
    pub interval_minutes: u64,
    /// Consecutive renewal failures before a subscription is replaced.
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,
}

fn default_renewal_interval() -> u64 {
    30
}

fn default_max_attempts() -> u32 {
    3
}

impl Default for RenewalConfig {
    fn default() -> Self {
        Self {
            interval_minutes: default_renewal_interval(),
            max_attempts: default_max_attempts(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MaintenanceConfig {
    #[serde(default = "default_maintenance_interval")]
    pub interval_minutes: u64,
}

fn default_maintenance_interval() -> u64 {
    360
}

impl Default for MaintenanceConfig {
    fn default() -> Self {
        Self {
            interval_minutes: default_maintenance_interval(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProviderConfig {
    #[serde(default = "default_api_base")]
    pub api_base: String,
    #[serde(default = "default_token_url")]
    pub token_url: String,
    #[serde(default)]
    pub client_id: SecretSource,
    #[serde(default)]
    pub client_secret: SecretSource,
    #[serde(default = "default_request_timeout")]
    pub request_timeout_secs: u64,
    #[serde(default = "default_connect_timeout")]
    pub connect_timeout_secs: u64,
}

fn default_api_base() -> String {
    "https://graph.microsoft.com/v1.0".to_string()
}

fn default_token_url() -> String {
    "https://login.microsoftonline.com/common/oauth2/v2.0/token".to_string()
}

fn default_request_timeout() -> u64 {
    10
}

fn default_connect_timeout() -> u64 {
    5
}

impl Default for ProviderConfig {
    fn default() -> Self {
        Self {
            api_base: default_api_base(),
            token_url: default_token_url(),
            client_id: SecretSource::default(),
            client_secret: SecretSource::default(),
            request_timeout_secs: default_request_timeout(),
            connect_timeout_secs: default_connect_timeout(),
        }
    }
}
