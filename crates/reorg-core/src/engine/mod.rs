//! Statement execution against the target relational engine.
//!
//! The reorganization engine never touches user data directly. It issues
//! [`Statement`]s through a [`StatementExecutor`] and reads metadata through a
//! [`Catalog`](crate::catalog::Catalog).

pub mod memory;

pub use memory::{MemoryEngine, MemoryTable};

use crate::statement::{Statement, Value};
use thiserror::Error;

/// Result of executing one statement.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ExecOutcome {
    /// Rows inserted, copied or otherwise affected.
    pub rows_affected: u64,
    /// Highest key value written by a watermark batch.
    pub last_key: Option<Value>,
}

impl ExecOutcome {
    /// Outcome of a statement that affected `rows` rows.
    pub fn rows(rows: u64) -> Self {
        Self {
            rows_affected: rows,
            last_key: None,
        }
    }

    /// Attach the highest key written.
    pub fn with_last_key(mut self, key: Option<Value>) -> Self {
        self.last_key = key;
        self
    }
}

/// Errors reported by the target engine.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum EngineError {
    /// A row violated a declared constraint.
    #[error("constraint {constraint} violated: {message}")]
    ConstraintViolation {
        /// Violated constraint name.
        constraint: String,
        /// Engine message.
        message: String,
    },

    /// A referenced object does not exist.
    #[error("object {object} does not exist")]
    ObjectNotFound {
        /// Object name.
        object: String,
    },

    /// An object being created already exists.
    #[error("object {object} already exists")]
    ObjectExists {
        /// Object name.
        object: String,
    },

    /// Any other execution failure.
    #[error("execution failed: {0}")]
    Execution(String),
}

impl EngineError {
    /// Whether this is a constraint violation.
    pub fn is_constraint_violation(&self) -> bool {
        matches!(self, EngineError::ConstraintViolation { .. })
    }
}

/// Executes statements in the engine's current transaction.
///
/// DDL statements are implicitly committed by the engine. Data statements
/// stay pending until [`commit`](StatementExecutor::commit).
pub trait StatementExecutor: Send + Sync {
    /// Execute one statement.
    fn execute(&self, statement: &Statement) -> Result<ExecOutcome, EngineError>;

    /// Commit pending data changes.
    fn commit(&self) -> Result<(), EngineError>;

    /// Discard pending data changes.
    fn rollback(&self) -> Result<(), EngineError>;
}
