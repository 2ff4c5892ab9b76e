//! Scheduled maintenance jobs.
//!
//! Jobs are persisted definitions; an external scheduler decides when to
//! fire them and calls [`JobRunner::execute_job`].

mod runner;
mod store;
mod types;

pub use runner::{
    IndexRebuildHandler, JobContext, JobHandler, JobOutput, JobRun, JobRunner, StatisticsHandler,
};
pub use store::JobStore;
pub use types::{JobStatus, JobType, MaintenanceJob, NewJob, ResourceLimits, Schedule};
