//! Builds the component graph from a loaded config.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::broadcast;
use tokio::task::JoinHandle;

use replywatch::auth::{OAuthRefresher, TokenManager};
use replywatch::db::{default_database_path, Database, SqliteStore};
use replywatch::jobs::{JobScheduler, MaintenanceJob, ReconcileJob, RenewalJob};
use replywatch::provider::{GraphClient, MailProvider};
use replywatch::reconcile::ReconciliationSweep;
use replywatch::secrets::{expand_home, TokenEncryptor};
use replywatch::subscription::{InMemoryCooldown, SubscriptionManager, SubscriptionSettings};
use replywatch::webhook::{AppState, NotificationProcessor, QueueDispatcher};
use replywatch::{Config, ConfigError, ReplyDetector, Result};

/// Every long-lived component of a running server.
pub struct App {
    pub tokens: Arc<TokenManager>,
    pub subscriptions: Arc<SubscriptionManager>,
    pub state: AppState,
    worker: JoinHandle<()>,
    schedulers: Vec<(JobScheduler, JoinHandle<()>)>,
    /// Kept so the reconcile trigger channel stays open.
    _reconcile_trigger: broadcast::Sender<()>,
}

impl App {
    pub fn build(config: &Config) -> Result<Self> {
        let db_path = database_path(config)?;
        let db = Database::open(&db_path)?;
        let store = Arc::new(SqliteStore::new(db.clone()));

        let provider_name = config.webhook.provider.as_str();
        let mut tokens = TokenManager::new(db, provider_name);
        if config.provider.client_id.is_configured() {
            let client_id = config.provider.client_id.resolve()?;
            let client_secret = if config.provider.client_secret.is_configured() {
                Some(config.provider.client_secret.resolve()?)
            } else {
                None
            };
            tokens = tokens.with_refresher(OAuthRefresher::new(
                &config.provider,
                client_id,
                client_secret,
            )?);
        } else {
            log::warn!("No OAuth client id configured, expired tokens cannot be refreshed");
        }
        match TokenEncryptor::from_env()? {
            Some(encryptor) => tokens = tokens.with_encryptor(encryptor),
            None => log::warn!("Token encryption key not set, tokens are stored in plain text"),
        }
        let tokens = Arc::new(tokens);

        let provider: Arc<dyn MailProvider> =
            Arc::new(GraphClient::new(&config.provider, tokens.clone())?);

        let cooldown = Arc::new(InMemoryCooldown::new(Duration::from_secs(
            config.cooldown.window_secs,
        )));
        let subscriptions = Arc::new(SubscriptionManager::new(
            provider.clone(),
            store.clone(),
            cooldown,
            SubscriptionSettings::from_config(config)?,
        ));

        let detector = Arc::new(ReplyDetector::new(provider.clone(), store.clone()));
        let sweep = Arc::new(ReconciliationSweep::new(detector.clone(), store.clone()));

        let (reconcile_trigger, _) = broadcast::channel::<()>(4);
        let processor = NotificationProcessor::new(
            detector,
            store.clone(),
            store.clone(),
            provider,
        )
        .with_subscription_manager(subscriptions.clone())
        .with_reconcile_trigger(reconcile_trigger.clone())
        .with_max_concurrent(config.webhook.max_concurrent_items);
        let (dispatcher, worker) =
            QueueDispatcher::start(Arc::new(processor), config.webhook.queue_capacity);

        let minutes = |m: u64| Duration::from_secs(m * 60);
        let mut schedulers = Vec::new();

        let renewal = JobScheduler::new(
            Arc::new(RenewalJob::new(subscriptions.clone())),
            minutes(config.renewal.interval_minutes),
        );
        let (_, renewal_rx) = broadcast::channel::<()>(1);
        let handle = renewal.start(renewal_rx);
        schedulers.push((renewal, handle));

        let reconcile = JobScheduler::new(
            Arc::new(ReconcileJob::new(sweep, config.reconciliation.max_age_days)),
            minutes(config.reconciliation.interval_minutes),
        );
        let handle = reconcile.start(reconcile_trigger.subscribe());
        schedulers.push((reconcile, handle));

        let maintenance = JobScheduler::new(
            Arc::new(MaintenanceJob::new(store, config.webhook.event_retention_days)),
            minutes(config.maintenance.interval_minutes),
        );
        let (_, maintenance_rx) = broadcast::channel::<()>(1);
        let handle = maintenance.start(maintenance_rx);
        schedulers.push((maintenance, handle));

        Ok(Self {
            tokens,
            subscriptions,
            state: AppState::new(Arc::new(dispatcher), provider_name),
            worker,
            schedulers,
            _reconcile_trigger: reconcile_trigger,
        })
    }

    /// Ensures a subscription for every user with a stored token.
    pub fn ensure_all_subscriptions(&self) {
        let users = match self.tokens.connected_users() {
            Ok(users) => users,
            Err(e) => {
                log::error!("Could not list connected users: {}", e);
                return;
            }
        };
        let manager = self.subscriptions.clone();
        tokio::spawn(async move {
            for user_id in users {
                let outcome = manager.ensure_subscription(&user_id).await;
                log::info!("Startup subscription check for {}: {:?}", user_id, outcome.action);
            }
        });
    }

    /// Stops every scheduler, then lets the notification worker drain the
    /// queue. The router must already be dropped.
    pub async fn shutdown(self) {
        let App {
            state,
            worker,
            schedulers,
            ..
        } = self;

        for (scheduler, _) in &schedulers {
            scheduler.stop();
        }
        for (_, handle) in schedulers {
            if let Err(e) = handle.await {
                log::error!("Scheduler task panicked: {}", e);
            }
        }

        drop(state);
        if let Err(e) = worker.await {
            log::error!("Notification worker panicked: {}", e);
        }
    }
}

fn database_path(config: &Config) -> Result<PathBuf> {
    match &config.database_path {
        Some(path) => Ok(PathBuf::from(expand_home(path))),
        None => default_database_path().ok_or_else(|| {
            ConfigError::Validation {
                message: "databasePath is not set and no home directory was found".to_string(),
            }
            .into()
        }),
    }
}
