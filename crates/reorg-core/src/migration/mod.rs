//! Strategy migrations.
//!
//! A migration moves a table from its current physical structure to a new
//! one: the [`PlanBuilder`] validates the request and produces ordered
//! [`Step`]s, and the [`MigrationDriver`] runs them with audit logging,
//! handing row copies to the [`BulkLoader`].

mod driver;
mod error;
mod loader;
mod lock;
mod plan;
mod state;

pub use driver::{ExecutionReport, ExecutionStatus, MigrationDriver, StatementRun, StepReport};
pub use error::ReorgError;
pub use loader::{BulkLoader, LoadFailure, LoadOutcome, LoadReport, LoadSpec, LoaderConfig};
pub use lock::{ObjectLockGuard, ObjectLocks};
pub use plan::{
    default_hash_partitions, MigrationPlan, MigrationRequest, PlanBuilder, PlanOptions, Step,
    StepAction, SubpartitionRequest, DEFAULT_BACKUP_SUFFIX_FORMAT,
};
pub use state::DriverState;
