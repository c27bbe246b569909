pub mod model;
pub mod service;
pub mod store;

pub use model::{
    DetectionMethod, NewTrackedEmail, StatusTransition, TrackedEmail, TrackingStatus,
};
pub use service::TrackingService;
pub use store::TrackingStore;
