//! Interval-driven runner for background jobs.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::{broadcast, Notify};
use tokio::task::JoinHandle;

/// A unit of background work run on a fixed interval.
#[async_trait]
pub trait PeriodicJob: Send + Sync + 'static {
    fn name(&self) -> &'static str;

    /// Runs one pass. Failures are logged by the job itself.
    async fn run(&self);
}

/// Runs a [`PeriodicJob`] every `interval`, or immediately when triggered.
pub struct JobScheduler {
    job: Arc<dyn PeriodicJob>,
    interval: Duration,
    shutdown: Arc<AtomicBool>,
    wake: Arc<Notify>,
}

impl JobScheduler {
    pub fn new(job: Arc<dyn PeriodicJob>, interval: Duration) -> Self {
        Self {
            job,
            interval,
            shutdown: Arc::new(AtomicBool::new(false)),
            wake: Arc::new(Notify::new()),
        }
    }

    /// Starts the loop on the current runtime. The first pass happens after
    /// one full interval or on the first trigger, whichever comes first.
    pub fn start(&self, mut trigger_rx: broadcast::Receiver<()>) -> JoinHandle<()> {
        let job = Arc::clone(&self.job);
        let shutdown = Arc::clone(&self.shutdown);
        let wake = Arc::clone(&self.wake);
        let interval = self.interval;

        tokio::spawn(async move {
            let mut interval_timer = tokio::time::interval(interval);
            interval_timer.tick().await; // skip immediate first tick

            loop {
                if shutdown.load(Ordering::Acquire) {
                    break;
                }

                tokio::select! {
                    _ = interval_timer.tick() => {},
                    Ok(()) = trigger_rx.recv() => {
                        log::info!("Manual {} run triggered", job.name());
                    },
                    _ = wake.notified() => {},
                }

                if shutdown.load(Ordering::Acquire) {
                    break;
                }

                job.run().await;
            }
            log::info!("{} scheduler stopped", job.name());
        })
    }

    /// Signals the scheduler to stop after any in-flight pass.
    pub fn stop(&self) {
        self.shutdown.store(true, Ordering::Release);
        self.wake.notify_one();
    }
}
