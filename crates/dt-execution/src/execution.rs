// execution.rs — Execution: one concrete run of a distribution schedule.
//
// An Execution ties together everything for one distribution run:
// - The source schedule and its planned figures (copied, then immutable)
// - Derived aggregate metrics over the owned deliveries
// - The top-level lifecycle state machine
//
// The state machine enforces a valid lifecycle:
//   Scheduled → Preparing → InTransit → Distributing → Completed
//   (or Cancelled from any non-terminal state after start)
//
// Preparing→InTransit and InTransit→Distributing are derived transitions:
// they are applied when the first owned delivery departs / is delivered,
// never set directly by a caller.

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::ExecutionError;

/// The lifecycle state of an Execution.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum ExecutionStatus {
    /// Derived from an activated schedule, deliveries not yet provisioned.
    /// Transient: `start` moves straight on to Preparing.
    Scheduled,

    /// Deliveries provisioned, vehicles being loaded.
    Preparing,

    /// At least one delivery has departed.
    InTransit,

    /// At least one delivery has handed food over.
    Distributing,

    /// Run finalized — aggregates frozen. Terminal.
    Completed,

    /// Run cancelled with a mandatory reason. Terminal.
    Cancelled,
}

impl fmt::Display for ExecutionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ExecutionStatus::Scheduled => write!(f, "scheduled"),
            ExecutionStatus::Preparing => write!(f, "preparing"),
            ExecutionStatus::InTransit => write!(f, "in_transit"),
            ExecutionStatus::Distributing => write!(f, "distributing"),
            ExecutionStatus::Completed => write!(f, "completed"),
            ExecutionStatus::Cancelled => write!(f, "cancelled"),
        }
    }
}

impl ExecutionStatus {
    /// Parse a status name as it appears in JSON ("in_transit").
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "scheduled" => Some(ExecutionStatus::Scheduled),
            "preparing" => Some(ExecutionStatus::Preparing),
            "in_transit" => Some(ExecutionStatus::InTransit),
            "distributing" => Some(ExecutionStatus::Distributing),
            "completed" => Some(ExecutionStatus::Completed),
            "cancelled" => Some(ExecutionStatus::Cancelled),
            _ => None,
        }
    }

    /// Terminal states accept no further mutation, to the execution or to
    /// any of its deliveries.
    pub fn is_terminal(&self) -> bool {
        matches!(self, ExecutionStatus::Completed | ExecutionStatus::Cancelled)
    }

    /// Check whether transitioning from this state to `next` is valid.
    ///
    /// Completion is legal from any active state as long as every owned
    /// delivery is terminal — an execution whose deliveries all failed never
    /// reaches Distributing but can still be finalized.
    pub fn can_transition_to(&self, next: ExecutionStatus) -> bool {
        // Cancellation is allowed from any non-terminal state.
        if next == ExecutionStatus::Cancelled {
            return !self.is_terminal();
        }

        matches!(
            (self, next),
            (ExecutionStatus::Scheduled, ExecutionStatus::Preparing)
                | (ExecutionStatus::Preparing, ExecutionStatus::InTransit)
                | (ExecutionStatus::InTransit, ExecutionStatus::Distributing)
                | (ExecutionStatus::Preparing, ExecutionStatus::Completed)
                | (ExecutionStatus::InTransit, ExecutionStatus::Completed)
                | (ExecutionStatus::Distributing, ExecutionStatus::Completed)
        )
    }
}

/// Execution-level aggregate metrics.
///
/// Derived from the owned deliveries by [`crate::aggregate`] — never
/// authored independently. `issues_count` is recounted by the issue
/// tracker through the same recompute-and-write path.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct ExecutionMetrics {
    /// Σ portions over deliveries in the Delivered state.
    pub total_portions_delivered: u32,
    /// Σ beneficiaries over deliveries in the Delivered state.
    pub total_beneficiaries_reached: u32,
    /// Count of all owned deliveries.
    pub delivery_count: u32,
    /// Count of deliveries in a terminal state (Delivered or Failed).
    pub completed_delivery_count: u32,
    /// Count of issues reported against this execution.
    pub issues_count: u32,
    /// total_portions_delivered / planned_portions (0 when nothing planned).
    pub progress_ratio: f64,
}

/// Ambient weather attached to an execution for informational display.
/// No engine behavior depends on it.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Weather {
    pub condition: String,
    pub temperature_c: f64,
    pub humidity_pct: f64,
    pub recorded_at: DateTime<Utc>,
}

/// An Execution — one distribution run derived from a schedule.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Execution {
    /// Unique identifier for this execution.
    pub execution_id: Uuid,

    /// Human-readable distribution code (copied from the schedule).
    pub distribution_code: String,

    /// The source schedule this run was derived from.
    pub schedule_id: Uuid,

    /// Current lifecycle state.
    pub status: ExecutionStatus,

    /// Planned portions, copied from the schedule at creation. Immutable.
    pub planned_portions: u32,

    /// Planned beneficiaries, copied from the schedule at creation. Immutable.
    pub planned_beneficiaries: u32,

    /// Derived aggregate metrics, mutable until the run is terminal.
    pub metrics: ExecutionMetrics,

    /// Operator notes supplied at start.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub notes: Option<String>,

    /// Mandatory reason recorded when the run is cancelled.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cancel_reason: Option<String>,

    /// Informational ambient weather reading.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub weather: Option<Weather>,

    /// When field activity actually started.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub actual_start_time: Option<DateTime<Utc>>,

    /// When the run was finalized.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub actual_end_time: Option<DateTime<Utc>>,

    /// When this record was created.
    pub created_at: DateTime<Utc>,

    /// When this record was last updated.
    pub updated_at: DateTime<Utc>,

    /// Optimistic concurrency token, bumped by the store on every write.
    #[serde(default)]
    pub version: u64,
}

impl Execution {
    /// Create a new Execution in the Scheduled state with planned figures
    /// copied from the schedule.
    pub fn new(
        schedule_id: Uuid,
        distribution_code: impl Into<String>,
        planned_portions: u32,
        planned_beneficiaries: u32,
    ) -> Self {
        let now = Utc::now();
        Self {
            execution_id: Uuid::new_v4(),
            distribution_code: distribution_code.into(),
            schedule_id,
            status: ExecutionStatus::Scheduled,
            planned_portions,
            planned_beneficiaries,
            metrics: ExecutionMetrics::default(),
            notes: None,
            cancel_reason: None,
            weather: None,
            actual_start_time: None,
            actual_end_time: None,
            created_at: now,
            updated_at: now,
            version: 0,
        }
    }

    /// Transition to a new state. Returns an error if the transition is
    /// illegal from the current state.
    pub fn transition(&mut self, next: ExecutionStatus) -> Result<(), ExecutionError> {
        if !self.status.can_transition_to(next) {
            return Err(ExecutionError::InvalidStateTransition {
                execution_id: self.execution_id,
                from: self.status.to_string(),
                to: next.to_string(),
            });
        }
        self.status = next;
        self.updated_at = Utc::now();
        Ok(())
    }

    /// Error if this execution no longer accepts mutations.
    pub fn ensure_active(&self) -> Result<(), ExecutionError> {
        if self.status.is_terminal() {
            return Err(ExecutionError::ExecutionClosed {
                execution_id: self.execution_id,
                status: self.status.to_string(),
            });
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_execution() -> Execution {
        Execution::new(Uuid::new_v4(), "DST-2026-0142", 300, 280)
    }

    #[test]
    fn new_execution_starts_scheduled_with_planned_figures() {
        let ex = test_execution();
        assert_eq!(ex.status, ExecutionStatus::Scheduled);
        assert_eq!(ex.planned_portions, 300);
        assert_eq!(ex.planned_beneficiaries, 280);
        assert_eq!(ex.metrics, ExecutionMetrics::default());
        assert!(ex.actual_start_time.is_none());
        assert!(ex.actual_end_time.is_none());
    }

    #[test]
    fn valid_forward_transitions() {
        let mut ex = test_execution();
        ex.transition(ExecutionStatus::Preparing).unwrap();
        ex.transition(ExecutionStatus::InTransit).unwrap();
        ex.transition(ExecutionStatus::Distributing).unwrap();
        ex.transition(ExecutionStatus::Completed).unwrap();
    }

    #[test]
    fn completion_allowed_before_distributing() {
        // All-failed runs never reach Distributing but can still finalize.
        let mut ex = test_execution();
        ex.transition(ExecutionStatus::Preparing).unwrap();
        ex.transition(ExecutionStatus::Completed).unwrap();
    }

    #[test]
    fn cancel_allowed_from_any_active_state() {
        for advance in 0..3 {
            let mut ex = test_execution();
            ex.transition(ExecutionStatus::Preparing).unwrap();
            if advance > 0 {
                ex.transition(ExecutionStatus::InTransit).unwrap();
            }
            if advance > 1 {
                ex.transition(ExecutionStatus::Distributing).unwrap();
            }
            ex.transition(ExecutionStatus::Cancelled).unwrap();
            assert_eq!(ex.status, ExecutionStatus::Cancelled);
        }
    }

    #[test]
    fn no_transition_out_of_terminal_states() {
        let mut completed = test_execution();
        completed.transition(ExecutionStatus::Preparing).unwrap();
        completed.transition(ExecutionStatus::Completed).unwrap();
        assert!(completed.transition(ExecutionStatus::InTransit).is_err());
        assert!(completed.transition(ExecutionStatus::Cancelled).is_err());

        let mut cancelled = test_execution();
        cancelled.transition(ExecutionStatus::Preparing).unwrap();
        cancelled.transition(ExecutionStatus::Cancelled).unwrap();
        assert!(cancelled.transition(ExecutionStatus::Completed).is_err());
    }

    #[test]
    fn skipping_states_forward_is_rejected() {
        let mut ex = test_execution();
        ex.transition(ExecutionStatus::Preparing).unwrap();
        let result = ex.transition(ExecutionStatus::Distributing);
        assert!(matches!(
            result,
            Err(ExecutionError::InvalidStateTransition { .. })
        ));
        assert_eq!(ex.status, ExecutionStatus::Preparing);
    }

    #[test]
    fn ensure_active_rejects_terminal() {
        let mut ex = test_execution();
        ex.transition(ExecutionStatus::Preparing).unwrap();
        assert!(ex.ensure_active().is_ok());
        ex.transition(ExecutionStatus::Cancelled).unwrap();
        assert!(matches!(
            ex.ensure_active(),
            Err(ExecutionError::ExecutionClosed { .. })
        ));
    }

    #[test]
    fn status_display_and_parse_round_trip() {
        for status in [
            ExecutionStatus::Scheduled,
            ExecutionStatus::Preparing,
            ExecutionStatus::InTransit,
            ExecutionStatus::Distributing,
            ExecutionStatus::Completed,
            ExecutionStatus::Cancelled,
        ] {
            assert_eq!(ExecutionStatus::parse(&status.to_string()), Some(status));
        }
        assert_eq!(ExecutionStatus::parse("paused"), None);
    }

    #[test]
    fn serialization_round_trip() {
        let mut ex = test_execution();
        ex.notes = Some("two trucks".to_string());
        let json = serde_json::to_string_pretty(&ex).unwrap();
        let restored: Execution = serde_json::from_str(&json).unwrap();
        assert_eq!(restored.execution_id, ex.execution_id);
        assert_eq!(restored.status, ex.status);
        assert_eq!(restored.notes, ex.notes);
    }

    #[test]
    fn optional_fields_omitted_from_json() {
        let ex = test_execution();
        let json = serde_json::to_string(&ex).unwrap();
        assert!(!json.contains("cancel_reason"));
        assert!(!json.contains("weather"));
        assert!(!json.contains("actual_end_time"));
    }
}
