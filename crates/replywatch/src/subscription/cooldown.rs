//! Per-user failure cooldown for subscription attempts.

use std::time::Duration;

use chrono::{DateTime, Utc};
use moka::sync::Cache;

/// Consecutive failures recorded for one user.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct FailureRecord {
    pub count: u32,
    pub last_failure_at: DateTime<Utc>,
}

/// Failure bookkeeping keyed by user id.
///
/// Entries expire on their own once the cooldown window has passed since the
/// last recorded failure. State is advisory and may be process-local.
pub trait CooldownCache: Send + Sync {
    /// Records a failure and returns the updated record.
    fn record_failure(&self, user_id: &str) -> FailureRecord;

    fn get(&self, user_id: &str) -> Option<FailureRecord>;

    fn clear(&self, user_id: &str);
}

/// Single-instance cooldown cache backed by a moka TTL cache.
pub struct InMemoryCooldown {
    cache: Cache<String, FailureRecord>,
}

impl InMemoryCooldown {
    pub fn new(window: Duration) -> Self {
        Self {
            cache: Cache::builder()
                .max_capacity(10_000)
                .time_to_live(window)
                .build(),
        }
    }
}

impl CooldownCache for InMemoryCooldown {
    fn record_failure(&self, user_id: &str) -> FailureRecord {
        self.cache
            .entry(user_id.to_string())
            .and_upsert_with(|existing| FailureRecord {
                count: existing.map(|e| e.value().count).unwrap_or(0) + 1,
                last_failure_at: Utc::now(),
            })
            .into_value()
    }

    fn get(&self, user_id: &str) -> Option<FailureRecord> {
        self.cache.get(user_id)
    }

    fn clear(&self, user_id: &str) {
        self.cache.invalidate(user_id);
    }
}
