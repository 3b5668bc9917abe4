// entry.rs — Audit entry data model.
//
// Every state mutation in the engine is recorded as an AuditEntry. Entries
// form a chain: each one includes a `previous_hash` linking it to the prior
// entry, enabling tamper detection. The before/after snapshots are diffed
// at the call site of the mutating operation — AuditTrail never introspects
// domain entities.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

/// What kind of record a mutation touched.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum EntityType {
    /// A distribution run derived from a schedule.
    Execution,
    /// One target-site leg of an execution.
    Delivery,
    /// An operational problem record.
    Issue,
}

/// What kind of mutation this entry records.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum AuditAction {
    /// A record was created.
    Create,
    /// Fields on a record changed without a lifecycle transition
    /// (progress correction, photo attached, weather recorded).
    Update,
    /// A record was deleted (administrative only).
    Delete,
    /// A lifecycle state machine advanced (delivery departed, arrived, ...).
    StatusChange,
    /// An execution was finalized.
    Complete,
    /// An execution was cancelled.
    Cancel,
    /// An issue was resolved.
    Resolve,
}

impl AuditAction {
    /// Parse an action name as it appears in the JSON log ("status_change").
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "create" => Some(AuditAction::Create),
            "update" => Some(AuditAction::Update),
            "delete" => Some(AuditAction::Delete),
            "status_change" => Some(AuditAction::StatusChange),
            "complete" => Some(AuditAction::Complete),
            "cancel" => Some(AuditAction::Cancel),
            "resolve" => Some(AuditAction::Resolve),
            _ => None,
        }
    }
}

/// A single audit entry — one line in the JSONL audit log.
///
/// Once written, an entry is never updated or deleted. Ordering is
/// creation-time total order per execution.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuditEntry {
    /// Unique identifier for this entry.
    pub entry_id: Uuid,

    /// When the mutation occurred (UTC).
    pub recorded_at: DateTime<Utc>,

    /// What kind of record was mutated.
    pub entity_type: EntityType,

    /// The mutated record's id.
    pub entity_id: Uuid,

    /// The execution this mutation belongs to, when the entity itself is
    /// not an execution (deliveries and issues reference their parent).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub execution_id: Option<Uuid>,

    /// What kind of mutation was performed.
    pub action: AuditAction,

    /// Who performed the mutation (resolved by the caller's identity layer).
    pub actor: String,

    /// Snapshot of the record before the mutation. None for Create.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub before: Option<Value>,

    /// Snapshot of the record after the mutation, reduced to the fields
    /// that actually changed. None for Delete.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub after: Option<Value>,

    /// Optional free-text description ("cancelled: vehicle breakdown").
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,

    /// Hash of the previous entry in the log (for tamper detection).
    /// The first entry in the log has this set to None.
    pub previous_hash: Option<String>,
}

impl AuditEntry {
    /// Create a new entry with the current timestamp and a random UUID.
    ///
    /// Snapshots start empty — set them with the builder methods before
    /// recording.
    pub fn new(
        entity_type: EntityType,
        entity_id: Uuid,
        action: AuditAction,
        actor: impl Into<String>,
    ) -> Self {
        Self {
            entry_id: Uuid::new_v4(),
            recorded_at: Utc::now(),
            entity_type,
            entity_id,
            execution_id: None,
            action,
            actor: actor.into(),
            before: None,
            after: None,
            description: None,
            previous_hash: None,
        }
    }

    /// Scope this entry to a parent execution and return self.
    pub fn with_execution(mut self, execution_id: Uuid) -> Self {
        self.execution_id = Some(execution_id);
        self
    }

    /// Set the before snapshot and return self.
    pub fn with_before(mut self, before: Value) -> Self {
        self.before = Some(before);
        self
    }

    /// Set the after snapshot and return self.
    pub fn with_after(mut self, after: Value) -> Self {
        self.after = Some(after);
        self
    }

    /// Set the free-text description and return self.
    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }
}

/// Reduce an after-state snapshot to the fields that differ from the
/// before-state.
///
/// Both snapshots are expected to be JSON objects serialized from the same
/// entity type. The result keeps only top-level keys whose value changed
/// (or appeared). Non-object inputs are returned unchanged — the caller
/// keeps whatever it captured.
pub fn changed_fields(before: &Value, after: &Value) -> Value {
    let (Some(before_map), Some(after_map)) = (before.as_object(), after.as_object()) else {
        return after.clone();
    };

    let mut changed = serde_json::Map::new();
    for (key, after_value) in after_map {
        if before_map.get(key) != Some(after_value) {
            changed.insert(key.clone(), after_value.clone());
        }
    }
    Value::Object(changed)
}
