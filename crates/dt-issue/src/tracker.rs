// tracker.rs — Issue persistence and the execution issue counter.
//
// The tracker owns the issues directory and shares the execution and
// delivery stores plus the audit handle with the distribution service.
// The execution's `issues_count` metric is owned by the tracker: it is
// recounted from the stored issues after every report, never incremented
// in place, so a lost increment cannot drift the counter.

use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use chrono::Utc;
use serde_json::Value;
use uuid::Uuid;

use dt_audit::{AuditAction, AuditEntry, AuditTrail, EntityType};
use dt_execution::{
    DeliveryStore, DistributionService, ExecutionError, ExecutionLocks, ExecutionStore,
};

use crate::error::IssueError;
use crate::issue::{Issue, IssueSeverity, IssueType};

/// Attempts against the optimistic version check before giving up.
const RECOUNT_RETRIES: usize = 5;

/// Filters for [`IssueTracker::list`].
#[derive(Debug, Clone, Default)]
pub struct IssueFilter {
    pub execution_id: Option<Uuid>,
    pub severity: Option<IssueSeverity>,
    pub issue_type: Option<IssueType>,
    /// true = resolved only, false = open only.
    pub resolved: Option<bool>,
}

/// Aggregated view over a set of issues.
#[derive(Debug, Clone, serde::Serialize)]
pub struct IssueSummary {
    pub total: usize,
    pub open: usize,
    pub resolved: usize,
    pub by_severity: BTreeMap<String, usize>,
    pub by_type: BTreeMap<String, usize>,
}

/// Reporting and resolution of issues against distribution executions.
pub struct IssueTracker {
    dir: PathBuf,
    executions: ExecutionStore,
    deliveries: DeliveryStore,
    audit: Arc<Mutex<AuditTrail>>,
    locks: ExecutionLocks,
}

impl IssueTracker {
    /// Create a tracker over an issues directory and shared engine
    /// handles. The lock registry must be the engine's own so reports
    /// serialize with execution finalization.
    pub fn new(
        dir: impl AsRef<Path>,
        executions: ExecutionStore,
        deliveries: DeliveryStore,
        audit: Arc<Mutex<AuditTrail>>,
        locks: ExecutionLocks,
    ) -> Result<Self, IssueError> {
        let dir = dir.as_ref().to_path_buf();
        fs::create_dir_all(&dir).map_err(|source| IssueError::Io {
            path: dir.display().to_string(),
            source,
        })?;
        Ok(Self {
            dir,
            executions,
            deliveries,
            audit,
            locks,
        })
    }

    /// Create a tracker sharing a service's stores, audit chain, lock
    /// registry, and configured issues directory.
    pub fn attach(service: &DistributionService) -> Result<Self, IssueError> {
        Self::new(
            &service.config().issues_dir,
            service.execution_store(),
            service.delivery_store(),
            service.audit_handle(),
            service.execution_locks(),
        )
    }

    /// Report an issue. Validates the referenced execution and deliveries,
    /// persists the record, and recounts the execution's issue metric.
    pub fn report(&self, issue: Issue) -> Result<Issue, IssueError> {
        if issue.description.trim().is_empty() {
            return Err(IssueError::validation(
                "description",
                "a description is required",
            ));
        }
        if let Some(location) = &issue.location {
            if !(-90.0..=90.0).contains(&location.latitude) {
                return Err(IssueError::validation(
                    "latitude",
                    format!("{} is outside [-90, 90]", location.latitude),
                ));
            }
            if !(-180.0..=180.0).contains(&location.longitude) {
                return Err(IssueError::validation(
                    "longitude",
                    format!("{} is outside [-180, 180]", location.longitude),
                ));
            }
        }

        // The terminal-status check, the issue write, and the recount all
        // happen under the execution's lock, so a finalizer cannot slip in
        // between the check and the write.
        let lock = self.locks.handle(issue.execution_id);
        let _guard = lock.lock().unwrap_or_else(|e| e.into_inner());

        let execution = self
            .executions
            .get(issue.execution_id)?
            .ok_or(ExecutionError::ExecutionNotFound(issue.execution_id))?;
        execution.ensure_active()?;

        for delivery_id in &issue.delivery_ids {
            let delivery = self
                .deliveries
                .get(*delivery_id)?
                .ok_or(ExecutionError::DeliveryNotFound(*delivery_id))?;
            if delivery.execution_id != issue.execution_id {
                return Err(IssueError::ForeignDelivery {
                    delivery_id: *delivery_id,
                    execution_id: issue.execution_id,
                });
            }
        }

        self.write_issue(&issue)?;
        self.recount(issue.execution_id)?;

        self.record_audit(
            AuditEntry::new(
                EntityType::Issue,
                issue.issue_id,
                AuditAction::Create,
                &issue.reported_by,
            )
            .with_execution(issue.execution_id)
            .with_after(snapshot(&issue))
            .with_description(format!("{} ({})", issue.issue_type, issue.severity)),
        );

        tracing::info!(
            issue_id = %issue.issue_id,
            execution_id = %issue.execution_id,
            severity = %issue.severity,
            "issue reported"
        );
        Ok(issue)
    }

    /// Attach a resolution to an open issue.
    pub fn resolve(
        &self,
        issue_id: Uuid,
        notes: &str,
        resolved_by: &str,
    ) -> Result<Issue, IssueError> {
        if notes.trim().is_empty() {
            return Err(IssueError::validation(
                "notes",
                "resolution notes are required",
            ));
        }

        let mut issue = self.get(issue_id)?;
        let before = snapshot(&issue);
        issue.resolve(notes, resolved_by)?;
        self.write_issue(&issue)?;

        self.record_audit(
            AuditEntry::new(EntityType::Issue, issue_id, AuditAction::Resolve, resolved_by)
                .with_execution(issue.execution_id)
                .with_before(before)
                .with_after(snapshot(&issue)),
        );
        Ok(issue)
    }

    /// Get an issue by id.
    pub fn get(&self, issue_id: Uuid) -> Result<Issue, IssueError> {
        let path = self.issue_file(issue_id);
        if !path.exists() {
            return Err(IssueError::NotFound(issue_id));
        }
        let json = fs::read_to_string(&path).map_err(|source| IssueError::Io {
            path: path.display().to_string(),
            source,
        })?;
        Ok(serde_json::from_str(&json)?)
    }

    /// List issues, newest first, with optional filters.
    pub fn list(&self, filter: &IssueFilter) -> Result<Vec<Issue>, IssueError> {
        let entries = fs::read_dir(&self.dir).map_err(|source| IssueError::Io {
            path: self.dir.display().to_string(),
            source,
        })?;

        let mut issues = Vec::new();
        for entry in entries {
            let entry = entry.map_err(|source| IssueError::Io {
                path: self.dir.display().to_string(),
                source,
            })?;
            let path = entry.path();
            if !path.extension().is_some_and(|ext| ext == "json") {
                continue;
            }
            let json = fs::read_to_string(&path).map_err(|source| IssueError::Io {
                path: path.display().to_string(),
                source,
            })?;
            match serde_json::from_str::<Issue>(&json) {
                Ok(issue) => issues.push(issue),
                Err(e) => tracing::warn!(
                    path = %path.display(),
                    "skipping unreadable issue record: {e}"
                ),
            }
        }

        issues.retain(|i| {
            filter.execution_id.is_none_or(|id| i.execution_id == id)
                && filter.severity.is_none_or(|s| i.severity == s)
                && filter.issue_type.is_none_or(|t| i.issue_type == t)
                && filter.resolved.is_none_or(|want| i.is_resolved() == want)
        });
        issues.sort_by(|a, b| b.reported_at.cmp(&a.reported_at));
        Ok(issues)
    }

    /// Summarize issues, optionally restricted to one execution.
    pub fn summary(&self, execution_id: Option<Uuid>) -> Result<IssueSummary, IssueError> {
        let issues = self.list(&IssueFilter {
            execution_id,
            ..Default::default()
        })?;

        let mut summary = IssueSummary {
            total: issues.len(),
            open: 0,
            resolved: 0,
            by_severity: BTreeMap::new(),
            by_type: BTreeMap::new(),
        };
        for issue in &issues {
            if issue.is_resolved() {
                summary.resolved += 1;
            } else {
                summary.open += 1;
            }
            *summary
                .by_severity
                .entry(issue.severity.to_string())
                .or_default() += 1;
            *summary
                .by_type
                .entry(issue.issue_type.to_string())
                .or_default() += 1;
        }
        Ok(summary)
    }

    /// Recount the execution's issue metric from stored issues, retrying
    /// against concurrent execution writers.
    fn recount(&self, execution_id: Uuid) -> Result<(), IssueError> {
        let count = self
            .list(&IssueFilter {
                execution_id: Some(execution_id),
                ..Default::default()
            })?
            .len() as u32;

        let mut last = None;
        for _ in 0..RECOUNT_RETRIES {
            let mut execution = self
                .executions
                .get(execution_id)?
                .ok_or(ExecutionError::ExecutionNotFound(execution_id))?;
            if execution.metrics.issues_count == count {
                return Ok(());
            }
            execution.metrics.issues_count = count;
            execution.updated_at = Utc::now();
            match self.executions.update(&execution) {
                Ok(_) => return Ok(()),
                Err(e @ ExecutionError::ConcurrentModification { .. }) => last = Some(e),
                Err(e) => return Err(e.into()),
            }
        }
        Err(last
            .map(IssueError::Execution)
            .unwrap_or_else(|| IssueError::validation("issues_count", "recount did not converge")))
    }

    fn write_issue(&self, issue: &Issue) -> Result<(), IssueError> {
        let path = self.issue_file(issue.issue_id);
        let json = serde_json::to_string_pretty(issue)?;
        fs::write(&path, json).map_err(|source| IssueError::Io {
            path: path.display().to_string(),
            source,
        })
    }

    fn issue_file(&self, issue_id: Uuid) -> PathBuf {
        self.dir.join(format!("{}.json", issue_id))
    }

    /// Best-effort audit append, mirroring the engine's policy.
    fn record_audit(&self, mut entry: AuditEntry) {
        let mut audit = self.audit.lock().unwrap_or_else(|e| e.into_inner());
        if let Err(e) = audit.record(&mut entry) {
            tracing::warn!(
                entity_id = %entry.entity_id,
                "audit append failed after successful mutation: {e}"
            );
        }
    }
}

fn snapshot<T: serde::Serialize>(value: &T) -> Value {
    serde_json::to_value(value).unwrap_or(Value::Null)
}
