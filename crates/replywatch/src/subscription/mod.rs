pub mod cooldown;
pub mod manager;
pub mod model;
pub mod store;

pub use cooldown::{CooldownCache, FailureRecord, InMemoryCooldown};
pub use manager::{
    EnsureAction, EnsureOutcome, LifecycleEvent, RenewalReport, SubscriptionManager,
    SubscriptionSettings, COOLDOWN_REASON,
};
pub use model::{ChangeType, SubscriptionStatus, WebhookSubscription};
pub use store::SubscriptionStore;
