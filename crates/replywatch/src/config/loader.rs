use std::path::Path;
use std::str::FromStr;

use crate::config::schema::Config;
use crate::error::ConfigError;

/// Prefix shared by every environment override.
pub const ENV_PREFIX: &str = "REPLYWATCH_";

pub fn load_config<P: AsRef<Path>>(path: P) -> Result<Config, ConfigError> {
    let path = path.as_ref();
    let content = std::fs::read_to_string(path).map_err(|e| ConfigError::ReadFile {
        path: path.to_path_buf(),
        source: e,
    })?;

    load_config_from_str(&content)
}

/// Parses JSON, overlays `REPLYWATCH_*` env vars, then validates.
pub fn load_config_from_str(content: &str) -> Result<Config, ConfigError> {
    let mut config: Config = serde_json::from_str(content)?;
    apply_env_overrides(&mut config)?;
    validate_config(&config)?;
    Ok(config)
}

/// Overlays environment variables onto a parsed config.
pub fn apply_env_overrides(config: &mut Config) -> Result<(), ConfigError> {
    if let Some(v) = env_parse::<bool>("WEBHOOK_ENABLED")? {
        config.webhook.enabled = v;
    }
    if let Some(v) = env_string("CALLBACK_URL") {
        config.webhook.callback_url = Some(v);
    }
    if let Some(v) = env_string("CLIENT_STATE") {
        config.webhook.client_state.value = Some(v);
    }
    if let Some(v) = env_parse::<f64>("RENEWAL_THRESHOLD_HOURS")? {
        config.webhook.renewal_threshold_hours = v;
    }
    if let Some(v) = env_parse::<u32>("SUBSCRIPTION_TTL_HOURS")? {
        config.webhook.subscription_ttl_hours = v;
    }
    if let Some(v) = env_parse::<u32>("MAX_AGE_DAYS")? {
        config.reconciliation.max_age_days = v;
    }
    if let Some(v) = env_string("DATABASE_PATH") {
        config.database_path = Some(v);
    }
    if let Some(v) = env_string("HOST") {
        config.server.host = v;
    }
    if let Some(v) = env_parse::<u16>("PORT")? {
        config.server.port = v;
    }
    if let Some(v) = env_string("LOG_LEVEL") {
        config.logging.level = v;
    }
    if let Some(v) = env_string("CLIENT_ID") {
        config.provider.client_id.value = Some(v);
    }
    Ok(())
}

fn env_string(suffix: &str) -> Option<String> {
    std::env::var(format!("{}{}", ENV_PREFIX, suffix))
        .ok()
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

fn env_parse<T>(suffix: &str) -> Result<Option<T>, ConfigError>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    let Some(raw) = env_string(suffix) else {
        return Ok(None);
    };
    raw.parse::<T>()
        .map(Some)
        .map_err(|e| ConfigError::InvalidEnv {
            name: format!("{}{}", ENV_PREFIX, suffix),
            reason: e.to_string(),
        })
}

pub fn validate_config(config: &Config) -> Result<(), ConfigError> {
    let webhook = &config.webhook;

    if webhook.provider.is_empty()
        || !webhook
            .provider
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_')
    {
        return Err(ConfigError::Validation {
            message: format!("webhook.provider '{}' is not a valid path segment", webhook.provider),
        });
    }

    if let Some(url) = &webhook.callback_url {
        if !url.starts_with("https://") && !url.starts_with("http://") {
            return Err(ConfigError::Validation {
                message: format!("webhook.callbackUrl must be an http(s) URL, got '{}'", url),
            });
        }
    }

    if !webhook.renewal_threshold_hours.is_finite() || webhook.renewal_threshold_hours <= 0.0 {
        return Err(ConfigError::Validation {
            message: "webhook.renewalThresholdHours must be positive".to_string(),
        });
    }

    if webhook.subscription_ttl_hours == 0 {
        return Err(ConfigError::Validation {
            message: "webhook.subscriptionTtlHours must be at least 1".to_string(),
        });
    }

    if webhook.renewal_threshold_hours >= webhook.subscription_ttl().num_minutes() as f64 / 60.0 {
        return Err(ConfigError::Validation {
            message: "webhook.renewalThresholdHours must be shorter than the subscription TTL"
                .to_string(),
        });
    }

    if webhook.change_types.is_empty() {
        return Err(ConfigError::Validation {
            message: "webhook.changeTypes must not be empty".to_string(),
        });
    }

    for (name, value) in [
        ("webhook.maxConcurrentItems", webhook.max_concurrent_items),
        ("webhook.queueCapacity", webhook.queue_capacity),
    ] {
        if value == 0 {
            return Err(ConfigError::Validation {
                message: format!("{} must be at least 1", name),
            });
        }
    }

    if config.cooldown.failure_threshold == 0 {
        return Err(ConfigError::Validation {
            message: "cooldown.failureThreshold must be at least 1".to_string(),
        });
    }

    if config.renewal.max_attempts == 0 {
        return Err(ConfigError::Validation {
            message: "renewal.maxAttempts must be at least 1".to_string(),
        });
    }

    for (name, minutes) in [
        ("reconciliation.intervalMinutes", config.reconciliation.interval_minutes),
        ("renewal.intervalMinutes", config.renewal.interval_minutes),
        ("maintenance.intervalMinutes", config.maintenance.interval_minutes),
    ] {
        if minutes == 0 {
            return Err(ConfigError::Validation {
                message: format!("{} must be at least 1", name),
            });
        }
    }

    if config.provider.request_timeout_secs == 0 || config.provider.connect_timeout_secs == 0 {
        return Err(ConfigError::Validation {
            message: "provider timeouts must be at least 1 second".to_string(),
        });
    }

    Ok(())
}
