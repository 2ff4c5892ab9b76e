//! Operation audit log.
//!
//! Every migration, step and maintenance primitive leaves an
//! [`OperationLogEntry`]. The log is kept in its own store and never shares
//! the target engine's transaction.

mod entry;
mod log;
mod store;

pub use entry::{OperationLogEntry, OperationStatus, ResourceCounters, SessionInfo};
pub use log::{AuditConfig, AuditLog, ErrorSummary, NewOperation, OperationFilter, OperationStats};
pub use store::{AuditStore, EntryIter, MemoryAuditStore, SledAuditStore};
