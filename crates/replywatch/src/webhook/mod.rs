//! Webhook ingestion: HTTP endpoint, typed payloads, and async processing.

pub mod dispatch;
pub mod payload;
pub mod processor;
pub mod routes;

pub use dispatch::{DispatchError, NotificationDispatcher, QueueDispatcher};
pub use payload::{
    ChangeNotification, LifecycleKind, LifecycleNotification, Notification, NotificationBatch,
    PayloadError, RawNotification, ResourceData,
};
pub use processor::{BatchReport, NotificationProcessor};
pub use routes::{build_router, AppState};
