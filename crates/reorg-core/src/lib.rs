//! Reorg Core - strategy migrations for large relational tables.
//!
//! This crate plans and executes physical-structure reorganizations
//! (partitioning changes, column removal, relocation) against an external
//! relational engine, with size-driven tuning, a durable operation log,
//! versioned strategy configuration and scheduled maintenance jobs.

#[cfg(feature = "mimalloc")]
#[global_allocator]
static GLOBAL: mimalloc::MiMalloc = mimalloc::MiMalloc;

pub mod audit;
pub mod catalog;
pub mod config;
pub mod engine;
pub mod error;
pub mod heuristics;
pub mod jobs;
pub mod migration;
pub mod statement;
pub mod storage;
pub mod strategy;

pub use audit::{
    AuditConfig, AuditLog, AuditStore, MemoryAuditStore, NewOperation, OperationFilter,
    OperationLogEntry, OperationStatus, ResourceCounters, SessionInfo, SledAuditStore,
};
pub use catalog::{Catalog, Inspection, ObjectDescription, ObjectInspector};
pub use config::ReorgConfig;
pub use engine::{EngineError, ExecOutcome, MemoryEngine, MemoryTable, StatementExecutor};
pub use error::{Error, ValidationError};
pub use heuristics::{HeuristicsConfig, ResourceHeuristics, SizeTier, TuningParams};
pub use jobs::{JobRunner, JobStatus, JobStore, JobType, MaintenanceJob, NewJob, Schedule};
pub use migration::{
    BulkLoader, DriverState, ExecutionReport, ExecutionStatus, LoaderConfig, MigrationDriver,
    MigrationPlan, MigrationRequest, PlanBuilder, PlanOptions, ReorgError, Step, StepAction,
};
pub use statement::{Dialect, Identifier, StandardDialect, Statement};
pub use storage::StorageConfig;
pub use strategy::{StrategyConfig, StrategyConfigStore, StrategyDraft, StrategyType, StrategyUpdate};
