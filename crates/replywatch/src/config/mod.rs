pub mod loader;
pub mod schema;

pub use loader::{apply_env_overrides, load_config, load_config_from_str, validate_config};
pub use schema::{
    Config, CooldownConfig, LoggingConfig, MaintenanceConfig, ProviderConfig,
    ReconciliationConfig, RenewalConfig, ServerConfig, WebhookConfig,
    PROVIDER_MAX_SUBSCRIPTION_MINUTES,
};
