//! Background jobs: subscription renewal, reply reconciliation, maintenance.

pub mod scheduler;
pub mod tasks;

pub use scheduler::{JobScheduler, PeriodicJob};
pub use tasks::{MaintenanceJob, MaintenanceReport, ReconcileJob, RenewalJob};
