//! Core error types.

use crate::statement::IdentifierError;
use thiserror::Error;

/// Errors raised by the administrative stores (strategy configs, jobs).
#[derive(Debug, Error)]
pub enum Error {
    /// Storage layer error.
    #[error("storage error: {0}")]
    Storage(#[from] sled::Error),

    /// Serialization error.
    #[error("serialization error: {0}")]
    Serialization(String),

    /// Deserialization error.
    #[error("deserialization error: {0}")]
    Deserialization(String),

    /// No active strategy configuration exists for the object.
    #[error("no active strategy configuration for {object}")]
    ConfigNotFound {
        /// Target object name.
        object: String,
    },

    /// Maintenance job not found.
    #[error("maintenance job {job_id} not found")]
    JobNotFound {
        /// The missing job ID.
        job_id: u64,
    },

    /// Invalid configuration document.
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),
}

/// Bad input detected before any mutation is attempted.
///
/// A validation error always means zero statements were issued.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ValidationError {
    /// The target object does not exist.
    #[error("object {object} not found")]
    NotFound {
        /// Object name as supplied by the caller.
        object: String,
    },

    /// The strategy name is not one of the supported strategy types.
    #[error("unknown strategy type '{name}'")]
    UnknownStrategy {
        /// The rejected strategy name.
        name: String,
    },

    /// A referenced column does not exist on the object.
    #[error("column {column} does not exist on {object}")]
    UnknownColumn {
        /// Target object.
        object: String,
        /// The missing column.
        column: String,
    },

    /// The strategy needs a partition column but none was given.
    #[error("strategy {strategy} requires a partition column")]
    MissingPartitionColumn {
        /// Strategy type name.
        strategy: String,
    },

    /// Reference partitioning needs a foreign key on the object.
    #[error("reference partitioning of {object} requires foreign key constraint {constraint}")]
    MissingReferenceConstraint {
        /// Target object.
        object: String,
        /// Constraint that was requested (or "<none>").
        constraint: String,
    },

    /// An identifier failed validation.
    #[error(transparent)]
    InvalidIdentifier(#[from] IdentifierError),

    /// Incompatible or out-of-range option.
    #[error("invalid option: {0}")]
    InvalidOption(String),

    /// The object changed after the plan was built.
    #[error("plan for {object} is stale: {reason}")]
    StalePlan {
        /// Planned object.
        object: String,
        /// What changed.
        reason: String,
    },
}
