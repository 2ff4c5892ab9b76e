//! Top-level reorganization errors.

use crate::engine::EngineError;
use crate::error::{Error, ValidationError};
use thiserror::Error;

/// Errors returned by the driver and the job runner.
#[derive(Debug, Error)]
pub enum ReorgError {
    /// Input rejected before anything ran.
    #[error("validation failed: {0}")]
    Validation(#[from] ValidationError),

    /// A plan step failed. Earlier steps are not undone.
    #[error("operation {operation_id} failed at step {step_number} ({step_name}): {message}")]
    StepExecution {
        /// Audit ID of the failed operation.
        operation_id: u64,
        /// 1-based step number.
        step_number: u32,
        /// Step name.
        step_name: String,
        /// Rendered statement that failed, if any.
        statement: Option<String>,
        /// Engine message.
        message: String,
    },

    /// Another migration holds the object.
    #[error("object {object} is busy with another reorganization")]
    ObjectBusy {
        /// Locked object.
        object: String,
    },

    /// No active strategy configuration.
    #[error("no active strategy configuration for {object}")]
    ConfigNotFound {
        /// Target object.
        object: String,
    },

    /// Maintenance job not found.
    #[error("maintenance job {job_id} not found")]
    JobNotFound {
        /// The missing job ID.
        job_id: u64,
    },

    /// A direct engine call outside a plan failed.
    #[error("engine error: {0}")]
    Engine(#[from] EngineError),

    /// Administrative storage failed.
    #[error("storage error: {0}")]
    Storage(#[from] sled::Error),

    /// Encoding of an administrative record failed.
    #[error("serialization error: {0}")]
    Serialization(String),

    /// Invalid configuration.
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),
}

impl From<Error> for ReorgError {
    fn from(err: Error) -> Self {
        match err {
            Error::Storage(e) => ReorgError::Storage(e),
            Error::Serialization(msg) | Error::Deserialization(msg) => {
                ReorgError::Serialization(msg)
            }
            Error::ConfigNotFound { object } => ReorgError::ConfigNotFound { object },
            Error::JobNotFound { job_id } => ReorgError::JobNotFound { job_id },
            Error::InvalidConfig(msg) => ReorgError::InvalidConfig(msg),
        }
    }
}

impl ReorgError {
    /// Whether the error was raised before any statement ran.
    pub fn is_validation(&self) -> bool {
        matches!(self, ReorgError::Validation(_))
    }
}
