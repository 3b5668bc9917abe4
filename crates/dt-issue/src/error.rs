// error.rs — Error types for issue tracking.

use thiserror::Error;
use uuid::Uuid;

/// Errors that can occur while reporting or resolving issues.
#[derive(Debug, Error)]
pub enum IssueError {
    /// The requested issue was not found.
    #[error("issue not found: {0}")]
    NotFound(Uuid),

    /// `resolve` was called on an issue that already carries a resolution.
    #[error("issue {0} is already resolved")]
    AlreadyResolved(Uuid),

    /// A referenced delivery does not belong to the issue's execution.
    #[error("delivery {delivery_id} does not belong to execution {execution_id}")]
    ForeignDelivery {
        delivery_id: Uuid,
        execution_id: Uuid,
    },

    /// Malformed input, rejected before any mutation.
    #[error("validation failed for {field}: {message}")]
    Validation { field: String, message: String },

    /// An execution-side lookup or update failed.
    #[error(transparent)]
    Execution(#[from] dt_execution::ExecutionError),

    /// A file I/O operation failed.
    #[error("I/O error at {path}: {source}")]
    Io {
        path: String,
        source: std::io::Error,
    },

    /// Failed to serialize/deserialize a persisted record.
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl IssueError {
    /// Shorthand for a validation error.
    pub fn validation(field: impl Into<String>, message: impl Into<String>) -> Self {
        IssueError::Validation {
            field: field.into(),
            message: message.into(),
        }
    }
}
