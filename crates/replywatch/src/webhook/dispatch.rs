//! Hand-off between the HTTP response path and batch processing.

use std::sync::Arc;

use thiserror::Error;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use super::payload::NotificationBatch;
use super::processor::NotificationProcessor;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum DispatchError {
    #[error("Notification queue is full")]
    QueueFull,

    #[error("Notification worker has stopped")]
    Closed,
}

/// Accepts a batch for processing after the HTTP response is sent.
///
/// `dispatch` must not wait on processing.
pub trait NotificationDispatcher: Send + Sync {
    fn dispatch(&self, batch: NotificationBatch) -> Result<(), DispatchError>;
}

/// Bounded queue drained by a single worker task.
#[derive(Clone)]
pub struct QueueDispatcher {
    tx: mpsc::Sender<NotificationBatch>,
}

impl QueueDispatcher {
    /// Spawns the worker. It exits once every dispatcher clone is dropped
    /// and the queue is drained.
    pub fn start(processor: Arc<NotificationProcessor>, capacity: usize) -> (Self, JoinHandle<()>) {
        let (tx, mut rx) = mpsc::channel::<NotificationBatch>(capacity.max(1));
        let handle = tokio::spawn(async move {
            tracing::info!("Notification worker started");
            while let Some(batch) = rx.recv().await {
                processor.process_batch(batch).await;
            }
            tracing::info!("Notification worker stopped");
        });
        (Self { tx }, handle)
    }
}

impl NotificationDispatcher for QueueDispatcher {
    fn dispatch(&self, batch: NotificationBatch) -> Result<(), DispatchError> {
        self.tx.try_send(batch).map_err(|e| match e {
            mpsc::error::TrySendError::Full(_) => DispatchError::QueueFull,
            mpsc::error::TrySendError::Closed(_) => DispatchError::Closed,
        })
    }
}
