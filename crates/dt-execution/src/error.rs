// error.rs — Error types for the execution/delivery engine.
//
// Every domain failure is a typed variant so callers (CLI, HTTP layer)
// can branch on kind: validation problems map to 400-style responses,
// not-found to 404, state conflicts to 409. A rejected mutation never
// leaves a partially applied record behind — validation happens before
// any write.

use chrono::{DateTime, Utc};
use thiserror::Error;
use uuid::Uuid;

/// Errors that can occur during execution and delivery operations.
#[derive(Debug, Error)]
pub enum ExecutionError {
    /// The referenced schedule does not exist.
    #[error("schedule not found: {0}")]
    ScheduleNotFound(Uuid),

    /// The schedule already has an active execution.
    #[error("schedule {0} is already being executed")]
    ScheduleAlreadyActive(Uuid),

    /// The requested execution was not found.
    #[error("execution not found: {0}")]
    ExecutionNotFound(Uuid),

    /// The requested delivery was not found.
    #[error("delivery not found: {0}")]
    DeliveryNotFound(Uuid),

    /// The requested execution status change is not a legal transition.
    #[error("invalid transition from {from} to {to} for execution {execution_id}")]
    InvalidStateTransition {
        execution_id: Uuid,
        from: String,
        to: String,
    },

    /// The execution is terminal (completed or cancelled) and no longer
    /// accepts mutations — to itself or to its deliveries.
    #[error("execution {execution_id} is {status} and no longer accepts mutations")]
    ExecutionClosed { execution_id: Uuid, status: String },

    /// The requested delivery status change is not a legal transition.
    #[error("invalid transition from {from} to {to} for delivery {delivery_id}")]
    InvalidDeliveryState {
        delivery_id: Uuid,
        from: String,
        to: String,
    },

    /// A side-channel operation (photo, signature, tracking append) is not
    /// allowed in the delivery's current state.
    #[error("delivery {delivery_id} is {status}: {operation} not allowed")]
    DeliveryStateConflict {
        delivery_id: Uuid,
        status: String,
        operation: &'static str,
    },

    /// `complete` was called while deliveries are still in flight.
    #[error("execution {execution_id} has {open} delivery(ies) not yet delivered or failed")]
    IncompleteDeliveries { execution_id: Uuid, open: usize },

    /// A concurrent writer got there first; re-fetch and retry deliberately.
    #[error("{entity} {id} was modified concurrently (expected version {expected}, found {found})")]
    ConcurrentModification {
        entity: &'static str,
        id: Uuid,
        expected: u64,
        found: u64,
    },

    /// A tracking point arrived out of order for its delivery.
    #[error("stale tracking point for delivery {delivery_id}: {got} is before {last}")]
    StaleLocation {
        delivery_id: Uuid,
        last: DateTime<Utc>,
        got: DateTime<Utc>,
    },

    /// Malformed input, rejected before any mutation.
    #[error("validation failed for {field}: {message}")]
    Validation { field: String, message: String },

    /// A file I/O operation failed.
    #[error("I/O error at {path}: {source}")]
    Io {
        path: String,
        source: std::io::Error,
    },

    /// Failed to serialize/deserialize a persisted record.
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// The audit trail could not be opened (startup only — appends during
    /// operation are best-effort and logged, never propagated).
    #[error("audit trail error: {0}")]
    Audit(#[from] dt_audit::AuditError),

    /// Failed to parse the dt.toml site configuration.
    #[error("config error at {path}: {message}")]
    Config { path: String, message: String },
}

impl ExecutionError {
    /// Shorthand for a validation error.
    pub fn validation(field: impl Into<String>, message: impl Into<String>) -> Self {
        ExecutionError::Validation {
            field: field.into(),
            message: message.into(),
        }
    }
}
