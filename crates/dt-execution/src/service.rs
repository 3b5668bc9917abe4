// service.rs — DistributionService: orchestration for the whole engine.
//
// The service owns the stores, the schedule provider boundary, the audit
// handle, and a per-execution lock registry. Every mutation follows the
// same shape:
//   1. acquire the owning execution's lock
//   2. re-read execution + delivery inside the lock, check preconditions
//   3. validate inputs (no partial application — nothing written yet)
//   4. mutate clones, persist through the version-checked store
//   5. recompute the execution aggregate when quantities changed
//   6. append an audit entry (best-effort; the mutation already stands)
//
// Mutations on different executions proceed in parallel; mutations on the
// same execution — including execution-level complete/cancel racing a
// delivery transition — serialize on the registry lock, which is what
// makes the terminal-status precondition race-free.

use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, Mutex, MutexGuard};

use chrono::{DateTime, Utc};
use serde::Serialize;
use serde_json::Value;
use uuid::Uuid;

use dt_audit::{changed_fields, AuditAction, AuditEntry, AuditTrail, EntityType};

use crate::aggregate;
use crate::config::DistConfig;
use crate::delivery::{Delivery, DeliveryStatus, Photo, PhotoType, QualityCheck, Signature, TrackingPoint};
use crate::error::ExecutionError;
use crate::execution::{Execution, ExecutionStatus, Weather};
use crate::schedule::{FileScheduleProvider, ScheduleProvider, ScheduleStatus};
use crate::store::{DeliveryStore, ExecutionStore};

/// Filters for [`DistributionService::list_executions`].
#[derive(Debug, Clone, Default)]
pub struct ExecutionFilter {
    pub status: Option<ExecutionStatus>,
    pub schedule_id: Option<Uuid>,
    /// Keep runs created at or after this instant.
    pub from: Option<DateTime<Utc>>,
    /// Keep runs created at or before this instant.
    pub to: Option<DateTime<Utc>>,
    /// true = only runs with issues, false = only runs without.
    pub has_issues: Option<bool>,
    /// Case-insensitive match over distribution code and notes.
    pub search: Option<String>,
}

/// Manual progress correction for [`DistributionService::update_progress`].
///
/// Corrections are merged into the execution metrics but the derived
/// recompute always wins on the next delivery transition.
#[derive(Debug, Clone, Default)]
pub struct ProgressUpdate {
    pub total_portions_delivered: Option<u32>,
    pub total_beneficiaries_reached: Option<u32>,
    pub notes: Option<String>,
}

/// Input for [`DistributionService::complete_delivery`].
#[derive(Debug, Clone)]
pub struct CompleteDeliveryRequest {
    pub delivery_id: Uuid,
    pub portions_delivered: u32,
    pub beneficiaries_reached: u32,
    pub quality_check: Option<QualityCheck>,
    pub signature: Option<Signature>,
}

/// Cross-execution statistics for a date range.
#[derive(Debug, Clone, Serialize)]
pub struct ExecutionStatistics {
    pub total_executions: usize,
    pub by_status: BTreeMap<String, usize>,
    pub total_planned_portions: u64,
    pub total_portions_delivered: u64,
    pub total_beneficiaries_reached: u64,
    pub average_progress_ratio: f64,
}

/// Per-execution lock registry: one lock per run, created on first use.
///
/// Serializes mutations on the same execution while leaving unrelated
/// runs fully parallel. Cloned handles share the registry, so sibling
/// components that write execution state (issue recounts) serialize
/// against the engine's own mutations.
#[derive(Clone, Default)]
pub struct ExecutionLocks {
    inner: Arc<Mutex<HashMap<Uuid, Arc<Mutex<()>>>>>,
}

impl ExecutionLocks {
    /// The lock guarding one execution's mutations.
    pub fn handle(&self, execution_id: Uuid) -> Arc<Mutex<()>> {
        let mut locks = self.inner.lock().unwrap_or_else(|e| e.into_inner());
        locks.entry(execution_id).or_default().clone()
    }
}

/// The orchestrating service for executions and deliveries.
pub struct DistributionService {
    config: DistConfig,
    executions: ExecutionStore,
    deliveries: DeliveryStore,
    schedules: Box<dyn ScheduleProvider>,
    audit: Arc<Mutex<AuditTrail>>,
    locks: ExecutionLocks,
}

impl DistributionService {
    /// Open a service over the standard file-backed stores and the bundled
    /// file schedule provider.
    pub fn open(config: DistConfig) -> Result<Self, ExecutionError> {
        let provider = FileScheduleProvider::new(&config.schedules_dir)?;
        Self::open_with_provider(config, Box::new(provider))
    }

    /// Open a service with a custom schedule provider (remote scheduling
    /// systems, test doubles).
    pub fn open_with_provider(
        config: DistConfig,
        schedules: Box<dyn ScheduleProvider>,
    ) -> Result<Self, ExecutionError> {
        let executions = ExecutionStore::new(&config.executions_dir)?;
        let deliveries = DeliveryStore::new(&config.deliveries_dir)?;
        let audit = Arc::new(Mutex::new(AuditTrail::open(&config.audit_log)?));
        Ok(Self {
            config,
            executions,
            deliveries,
            schedules,
            audit,
            locks: ExecutionLocks::default(),
        })
    }

    /// The service configuration.
    pub fn config(&self) -> &DistConfig {
        &self.config
    }

    /// A handle on the execution store (shares the data directory).
    pub fn execution_store(&self) -> ExecutionStore {
        self.executions.clone()
    }

    /// A handle on the delivery store (shares the data directory).
    pub fn delivery_store(&self) -> DeliveryStore {
        self.deliveries.clone()
    }

    /// The shared audit trail handle, for sibling components that record
    /// into the same chain.
    pub fn audit_handle(&self) -> Arc<Mutex<AuditTrail>> {
        self.audit.clone()
    }

    /// The per-execution lock registry, for sibling components whose
    /// writes must serialize with the engine's (issue recounts).
    pub fn execution_locks(&self) -> ExecutionLocks {
        self.locks.clone()
    }

    // ------------------------------------------------------------------
    // Execution operations
    // ------------------------------------------------------------------

    /// Activate a schedule: create the execution (straight into Preparing)
    /// and one Pending delivery per target, and notify the scheduler.
    pub fn start_execution(
        &self,
        schedule_id: Uuid,
        actor: &str,
        notes: Option<String>,
    ) -> Result<Execution, ExecutionError> {
        let schedule = self.schedules.fetch(schedule_id)?;
        if schedule.status == ScheduleStatus::InProgress {
            return Err(ExecutionError::ScheduleAlreadyActive(schedule_id));
        }
        if self
            .executions
            .find_active_for_schedule(schedule_id)?
            .is_some()
        {
            return Err(ExecutionError::ScheduleAlreadyActive(schedule_id));
        }

        let mut execution = Execution::new(
            schedule_id,
            schedule.distribution_code.clone(),
            schedule.planned_portions,
            schedule.planned_beneficiaries,
        );
        execution.notes = notes;
        // Starting implies immediate activity: Scheduled is transient.
        execution.transition(ExecutionStatus::Preparing)?;
        execution.actual_start_time = Some(Utc::now());

        let deliveries: Vec<Delivery> = schedule
            .targets
            .iter()
            .map(|t| {
                Delivery::new(
                    execution.execution_id,
                    t.name.clone(),
                    t.address.clone(),
                    t.planned_portions,
                )
            })
            .collect();
        aggregate::apply(&mut execution, &deliveries);

        let stored = self.executions.insert(&execution)?;
        for delivery in &deliveries {
            self.deliveries.insert(delivery)?;
        }

        // Activation notification — a scheduler outage must not poison the
        // run that already exists.
        if let Err(e) = self.schedules.mark_in_progress(schedule_id) {
            tracing::warn!(
                schedule_id = %schedule_id,
                "schedule activation notification failed: {e}"
            );
        }

        self.record_audit(
            AuditEntry::new(
                EntityType::Execution,
                stored.execution_id,
                AuditAction::Create,
                actor,
            )
            .with_after(snapshot(&stored))
            .with_description(format!(
                "started from schedule {} with {} target(s)",
                schedule_id,
                deliveries.len()
            )),
        );

        tracing::info!(
            execution_id = %stored.execution_id,
            code = %stored.distribution_code,
            targets = deliveries.len(),
            "execution started"
        );
        Ok(stored)
    }

    /// Get an execution by id.
    pub fn get_execution(&self, execution_id: Uuid) -> Result<Execution, ExecutionError> {
        self.executions
            .get(execution_id)?
            .ok_or(ExecutionError::ExecutionNotFound(execution_id))
    }

    /// List executions, newest first, with optional filters.
    pub fn list_executions(
        &self,
        filter: &ExecutionFilter,
    ) -> Result<Vec<Execution>, ExecutionError> {
        let needle = filter.search.as_ref().map(|s| s.to_lowercase());
        Ok(self
            .executions
            .list()?
            .into_iter()
            .filter(|e| filter.status.is_none_or(|s| e.status == s))
            .filter(|e| filter.schedule_id.is_none_or(|id| e.schedule_id == id))
            .filter(|e| filter.from.is_none_or(|from| e.created_at >= from))
            .filter(|e| filter.to.is_none_or(|to| e.created_at <= to))
            .filter(|e| {
                filter
                    .has_issues
                    .is_none_or(|want| (e.metrics.issues_count > 0) == want)
            })
            .filter(|e| {
                needle.as_ref().is_none_or(|q| {
                    e.distribution_code.to_lowercase().contains(q)
                        || e.notes
                            .as_ref()
                            .is_some_and(|n| n.to_lowercase().contains(q))
                })
            })
            .collect())
    }

    /// Merge a manual progress correction into an active execution.
    ///
    /// The next aggregate recompute overwrites the corrected figures; this
    /// exists for field observations arriving ahead of delivery records.
    pub fn update_progress(
        &self,
        execution_id: Uuid,
        actor: &str,
        update: &ProgressUpdate,
    ) -> Result<Execution, ExecutionError> {
        let lock = self.execution_lock(execution_id);
        let _guard = hold(&lock);

        let mut execution = self.get_execution(execution_id)?;
        execution.ensure_active()?;

        let before = snapshot(&execution);
        if let Some(portions) = update.total_portions_delivered {
            execution.metrics.total_portions_delivered = portions;
        }
        if let Some(beneficiaries) = update.total_beneficiaries_reached {
            execution.metrics.total_beneficiaries_reached = beneficiaries;
        }
        if let Some(notes) = &update.notes {
            execution.notes = Some(notes.clone());
        }
        execution.updated_at = Utc::now();

        let stored = self.executions.update(&execution)?;
        self.audit_mutation(
            EntityType::Execution,
            stored.execution_id,
            AuditAction::Update,
            actor,
            before,
            &stored,
            None,
        );
        Ok(stored)
    }

    /// Finalize a run: every owned delivery must already be Delivered or
    /// Failed. Freezes the aggregates and notifies the scheduler.
    pub fn complete_execution(
        &self,
        execution_id: Uuid,
        actor: &str,
        notes: Option<String>,
    ) -> Result<Execution, ExecutionError> {
        let lock = self.execution_lock(execution_id);
        let _guard = hold(&lock);

        let mut execution = self.get_execution(execution_id)?;
        if execution.status.is_terminal() {
            return Err(ExecutionError::InvalidStateTransition {
                execution_id,
                from: execution.status.to_string(),
                to: ExecutionStatus::Completed.to_string(),
            });
        }

        let deliveries = self.deliveries.list_by_execution(execution_id)?;
        let open = deliveries
            .iter()
            .filter(|d| !d.status.is_terminal())
            .count();
        if open > 0 {
            return Err(ExecutionError::IncompleteDeliveries { execution_id, open });
        }

        let before = snapshot(&execution);
        aggregate::apply(&mut execution, &deliveries);
        execution.actual_end_time = Some(Utc::now());
        if let Some(notes) = notes {
            execution.notes = Some(notes);
        }
        execution.transition(ExecutionStatus::Completed)?;

        let stored = self.executions.update(&execution)?;

        if let Err(e) = self.schedules.mark_done(stored.schedule_id) {
            tracing::warn!(
                schedule_id = %stored.schedule_id,
                "schedule completion notification failed: {e}"
            );
        }

        self.audit_mutation(
            EntityType::Execution,
            stored.execution_id,
            AuditAction::Complete,
            actor,
            before,
            &stored,
            None,
        );
        tracing::info!(execution_id = %execution_id, "execution completed");
        Ok(stored)
    }

    /// Cancel a run. In-flight deliveries keep their last observed status
    /// for the historical record; only new transitions are blocked.
    pub fn cancel_execution(
        &self,
        execution_id: Uuid,
        actor: &str,
        reason: &str,
    ) -> Result<Execution, ExecutionError> {
        if reason.trim().is_empty() {
            return Err(ExecutionError::validation("reason", "a reason is required"));
        }

        let lock = self.execution_lock(execution_id);
        let _guard = hold(&lock);

        let mut execution = self.get_execution(execution_id)?;
        let before = snapshot(&execution);
        execution.transition(ExecutionStatus::Cancelled)?;
        execution.cancel_reason = Some(reason.to_string());

        let stored = self.executions.update(&execution)?;
        self.audit_mutation(
            EntityType::Execution,
            stored.execution_id,
            AuditAction::Cancel,
            actor,
            before,
            &stored,
            Some(format!("cancelled: {reason}")),
        );
        tracing::info!(execution_id = %execution_id, reason, "execution cancelled");
        Ok(stored)
    }

    /// Administrative delete: removes a terminal execution and cascades to
    /// its deliveries. Issue records are kept — they are audit material.
    pub fn delete_execution(&self, execution_id: Uuid, actor: &str) -> Result<(), ExecutionError> {
        let lock = self.execution_lock(execution_id);
        let _guard = hold(&lock);

        let execution = self.get_execution(execution_id)?;
        if !execution.status.is_terminal() {
            return Err(ExecutionError::validation(
                "status",
                "only completed or cancelled executions can be deleted",
            ));
        }

        let before = snapshot(&execution);
        self.deliveries.delete_by_execution(execution_id)?;
        self.executions.delete(execution_id)?;

        self.record_audit(
            AuditEntry::new(
                EntityType::Execution,
                execution_id,
                AuditAction::Delete,
                actor,
            )
            .with_before(before),
        );
        Ok(())
    }

    /// Attach an informational weather reading to an active execution.
    pub fn set_weather(
        &self,
        execution_id: Uuid,
        actor: &str,
        weather: Weather,
    ) -> Result<Execution, ExecutionError> {
        let lock = self.execution_lock(execution_id);
        let _guard = hold(&lock);

        let mut execution = self.get_execution(execution_id)?;
        execution.ensure_active()?;

        let before = snapshot(&execution);
        execution.weather = Some(weather);
        execution.updated_at = Utc::now();

        let stored = self.executions.update(&execution)?;
        self.audit_mutation(
            EntityType::Execution,
            stored.execution_id,
            AuditAction::Update,
            actor,
            before,
            &stored,
            None,
        );
        Ok(stored)
    }

    /// Aggregate statistics over executions created in a date range.
    pub fn statistics(
        &self,
        from: Option<DateTime<Utc>>,
        to: Option<DateTime<Utc>>,
    ) -> Result<ExecutionStatistics, ExecutionError> {
        let executions: Vec<Execution> = self
            .executions
            .list()?
            .into_iter()
            .filter(|e| from.is_none_or(|f| e.created_at >= f))
            .filter(|e| to.is_none_or(|t| e.created_at <= t))
            .collect();

        let mut by_status: BTreeMap<String, usize> = BTreeMap::new();
        let mut stats = ExecutionStatistics {
            total_executions: executions.len(),
            by_status: BTreeMap::new(),
            total_planned_portions: 0,
            total_portions_delivered: 0,
            total_beneficiaries_reached: 0,
            average_progress_ratio: 0.0,
        };

        for execution in &executions {
            *by_status.entry(execution.status.to_string()).or_default() += 1;
            stats.total_planned_portions += u64::from(execution.planned_portions);
            stats.total_portions_delivered +=
                u64::from(execution.metrics.total_portions_delivered);
            stats.total_beneficiaries_reached +=
                u64::from(execution.metrics.total_beneficiaries_reached);
            stats.average_progress_ratio += execution.metrics.progress_ratio;
        }
        if !executions.is_empty() {
            stats.average_progress_ratio /= executions.len() as f64;
        }
        stats.by_status = by_status;
        Ok(stats)
    }

    // ------------------------------------------------------------------
    // Delivery operations
    // ------------------------------------------------------------------

    /// Get a delivery by id.
    pub fn get_delivery(&self, delivery_id: Uuid) -> Result<Delivery, ExecutionError> {
        self.deliveries
            .get(delivery_id)?
            .ok_or(ExecutionError::DeliveryNotFound(delivery_id))
    }

    /// List the deliveries owned by an execution, in creation order.
    pub fn list_deliveries(&self, execution_id: Uuid) -> Result<Vec<Delivery>, ExecutionError> {
        self.get_execution(execution_id)?;
        self.deliveries.list_by_execution(execution_id)
    }

    /// The GPS trail of one delivery, oldest first.
    pub fn tracking_history(
        &self,
        delivery_id: Uuid,
    ) -> Result<Vec<TrackingPoint>, ExecutionError> {
        Ok(self.get_delivery(delivery_id)?.tracking_points)
    }

    /// Courier departs: Pending → InTransit, first tracking point recorded.
    /// Promotes the execution to InTransit when this is its first departure.
    pub fn start_delivery(
        &self,
        delivery_id: Uuid,
        actor: &str,
        point: TrackingPoint,
    ) -> Result<Delivery, ExecutionError> {
        let execution_id = self.get_delivery(delivery_id)?.execution_id;
        let lock = self.execution_lock(execution_id);
        let _guard = hold(&lock);

        let mut delivery = self.get_delivery(delivery_id)?;
        let mut execution = self.get_execution(delivery.execution_id)?;
        execution.ensure_active()?;

        let before = snapshot(&delivery);
        delivery.transition(DeliveryStatus::InTransit)?;
        delivery.record_point(point)?;
        delivery.departed_at = Some(Utc::now());
        let stored = self.deliveries.update(&delivery)?;

        // First departure moves the run out of Preparing.
        if execution.status == ExecutionStatus::Preparing {
            let ex_before = snapshot(&execution);
            execution.transition(ExecutionStatus::InTransit)?;
            let ex_stored = self.executions.update(&execution)?;
            self.audit_mutation(
                EntityType::Execution,
                ex_stored.execution_id,
                AuditAction::StatusChange,
                actor,
                ex_before,
                &ex_stored,
                None,
            );
        }

        self.audit_delivery(actor, before, &stored, None);
        Ok(stored)
    }

    /// Append a tracking point to an in-transit delivery. Not a lifecycle
    /// transition, so no audit entry is written for it.
    pub fn record_location(
        &self,
        delivery_id: Uuid,
        point: TrackingPoint,
    ) -> Result<Delivery, ExecutionError> {
        let execution_id = self.get_delivery(delivery_id)?.execution_id;
        let lock = self.execution_lock(execution_id);
        let _guard = hold(&lock);

        let mut delivery = self.get_delivery(delivery_id)?;
        let execution = self.get_execution(delivery.execution_id)?;
        execution.ensure_active()?;

        if delivery.status != DeliveryStatus::InTransit {
            return Err(ExecutionError::DeliveryStateConflict {
                delivery_id,
                status: delivery.status.to_string(),
                operation: "tracking point",
            });
        }

        delivery.record_point(point)?;
        self.deliveries.update(&delivery)
    }

    /// Courier reaches the target: InTransit → Arrived.
    pub fn arrive_delivery(
        &self,
        delivery_id: Uuid,
        actor: &str,
        point: TrackingPoint,
    ) -> Result<Delivery, ExecutionError> {
        let execution_id = self.get_delivery(delivery_id)?.execution_id;
        let lock = self.execution_lock(execution_id);
        let _guard = hold(&lock);

        let mut delivery = self.get_delivery(delivery_id)?;
        let execution = self.get_execution(delivery.execution_id)?;
        execution.ensure_active()?;

        let before = snapshot(&delivery);
        delivery.transition(DeliveryStatus::Arrived)?;
        delivery.record_point(point)?;
        delivery.arrived_at = Some(Utc::now());

        let stored = self.deliveries.update(&delivery)?;
        self.audit_delivery(actor, before, &stored, None);
        Ok(stored)
    }

    /// Food handed over: Arrived → Delivered, quantities finalized, parent
    /// aggregate recomputed. Promotes the execution to Distributing on its
    /// first completed leg.
    pub fn complete_delivery(
        &self,
        request: &CompleteDeliveryRequest,
        actor: &str,
    ) -> Result<Delivery, ExecutionError> {
        let execution_id = self.get_delivery(request.delivery_id)?.execution_id;
        let lock = self.execution_lock(execution_id);
        let _guard = hold(&lock);

        let mut delivery = self.get_delivery(request.delivery_id)?;
        let mut execution = self.get_execution(delivery.execution_id)?;
        execution.ensure_active()?;

        // Validate everything before touching the record.
        if request.portions_delivered > delivery.planned_portions {
            return Err(ExecutionError::validation(
                "portions_delivered",
                format!(
                    "{} exceeds the {} portions planned for {}",
                    request.portions_delivered, delivery.planned_portions, delivery.target_name
                ),
            ));
        }
        if let Some(signature) = &request.signature {
            validate_signature(signature)?;
        }

        let before = snapshot(&delivery);
        delivery.transition(DeliveryStatus::Delivered)?;
        delivery.portions_delivered = request.portions_delivered;
        delivery.beneficiaries_reached = request.beneficiaries_reached;
        delivery.quality_check = request.quality_check.clone();
        if request.signature.is_some() {
            delivery.signature = request.signature.clone();
        }
        delivery.completed_at = Some(Utc::now());

        let stored = self.deliveries.update(&delivery)?;
        self.recompute_after(&mut execution, actor, true)?;
        self.audit_delivery(actor, before, &stored, None);
        Ok(stored)
    }

    /// Leg abandoned: any non-terminal status → Failed, quantities forced
    /// to zero, parent aggregate recomputed.
    pub fn fail_delivery(
        &self,
        delivery_id: Uuid,
        actor: &str,
        reason: &str,
    ) -> Result<Delivery, ExecutionError> {
        if reason.trim().is_empty() {
            return Err(ExecutionError::validation("reason", "a reason is required"));
        }

        let execution_id = self.get_delivery(delivery_id)?.execution_id;
        let lock = self.execution_lock(execution_id);
        let _guard = hold(&lock);

        let mut delivery = self.get_delivery(delivery_id)?;
        let mut execution = self.get_execution(delivery.execution_id)?;
        execution.ensure_active()?;

        let before = snapshot(&delivery);
        delivery.transition(DeliveryStatus::Failed)?;
        delivery.portions_delivered = 0;
        delivery.beneficiaries_reached = 0;
        delivery.failure_reason = Some(reason.to_string());
        delivery.completed_at = Some(Utc::now());

        let stored = self.deliveries.update(&delivery)?;
        self.recompute_after(&mut execution, actor, false)?;
        self.audit_delivery(actor, before, &stored, Some(format!("failed: {reason}")));
        Ok(stored)
    }

    /// Attach a photo to a non-terminal delivery. Side channel — the photo
    /// bytes already live in the blob store, only the URL is kept.
    pub fn attach_photo(
        &self,
        delivery_id: Uuid,
        actor: &str,
        photo_type: PhotoType,
        url: &str,
        caption: Option<String>,
    ) -> Result<Delivery, ExecutionError> {
        if url.trim().is_empty() {
            return Err(ExecutionError::validation("url", "a photo URL is required"));
        }

        let execution_id = self.get_delivery(delivery_id)?.execution_id;
        let lock = self.execution_lock(execution_id);
        let _guard = hold(&lock);

        let mut delivery = self.get_delivery(delivery_id)?;
        let execution = self.get_execution(delivery.execution_id)?;
        execution.ensure_active()?;

        if delivery.status.is_terminal() {
            return Err(ExecutionError::DeliveryStateConflict {
                delivery_id,
                status: delivery.status.to_string(),
                operation: "photo attachment",
            });
        }

        let before = snapshot(&delivery);
        delivery.photos.push(Photo {
            photo_type,
            url: url.to_string(),
            caption,
            uploaded_at: Utc::now(),
        });
        delivery.updated_at = Utc::now();

        let stored = self.deliveries.update(&delivery)?;
        self.audit_delivery_update(actor, before, &stored);
        Ok(stored)
    }

    /// Attach the recipient signature. Allowed once the courier has
    /// arrived; independent of completion — attaching a signature never
    /// transitions the delivery.
    pub fn attach_signature(
        &self,
        delivery_id: Uuid,
        actor: &str,
        signature: Signature,
    ) -> Result<Delivery, ExecutionError> {
        validate_signature(&signature)?;

        let execution_id = self.get_delivery(delivery_id)?.execution_id;
        let lock = self.execution_lock(execution_id);
        let _guard = hold(&lock);

        let mut delivery = self.get_delivery(delivery_id)?;
        let execution = self.get_execution(delivery.execution_id)?;
        execution.ensure_active()?;

        if !matches!(
            delivery.status,
            DeliveryStatus::Arrived | DeliveryStatus::Delivered
        ) {
            return Err(ExecutionError::DeliveryStateConflict {
                delivery_id,
                status: delivery.status.to_string(),
                operation: "signature",
            });
        }

        let before = snapshot(&delivery);
        delivery.signature = Some(signature);
        delivery.updated_at = Utc::now();

        let stored = self.deliveries.update(&delivery)?;
        self.audit_delivery_update(actor, before, &stored);
        Ok(stored)
    }

    /// Remove a previously attached signature (wrong recipient, retake).
    pub fn remove_signature(
        &self,
        delivery_id: Uuid,
        actor: &str,
    ) -> Result<Delivery, ExecutionError> {
        let execution_id = self.get_delivery(delivery_id)?.execution_id;
        let lock = self.execution_lock(execution_id);
        let _guard = hold(&lock);

        let mut delivery = self.get_delivery(delivery_id)?;
        let execution = self.get_execution(delivery.execution_id)?;
        execution.ensure_active()?;

        if delivery.signature.is_none() {
            return Err(ExecutionError::validation(
                "signature",
                "no signature attached",
            ));
        }

        let before = snapshot(&delivery);
        delivery.signature = None;
        delivery.updated_at = Utc::now();

        let stored = self.deliveries.update(&delivery)?;
        self.audit_delivery_update(actor, before, &stored);
        Ok(stored)
    }

    // ------------------------------------------------------------------
    // Internals
    // ------------------------------------------------------------------

    /// Recompute the execution aggregate from current delivery rows and
    /// persist it. Called inside the execution lock right after the
    /// triggering delivery write. `delivered` marks a completion, which may
    /// promote the run to Distributing.
    fn recompute_after(
        &self,
        execution: &mut Execution,
        actor: &str,
        delivered: bool,
    ) -> Result<(), ExecutionError> {
        let rows = self.deliveries.list_by_execution(execution.execution_id)?;
        let before = snapshot(&*execution);
        aggregate::apply(execution, &rows);

        let promoted = delivered && execution.status == ExecutionStatus::InTransit;
        if promoted {
            execution.transition(ExecutionStatus::Distributing)?;
        }

        let stored = self.executions.update(execution)?;
        *execution = stored.clone();

        if promoted {
            self.audit_mutation(
                EntityType::Execution,
                stored.execution_id,
                AuditAction::StatusChange,
                actor,
                before,
                &stored,
                None,
            );
        }
        Ok(())
    }

    fn execution_lock(&self, execution_id: Uuid) -> Arc<Mutex<()>> {
        self.locks.handle(execution_id)
    }

    fn audit_delivery(
        &self,
        actor: &str,
        before: Value,
        stored: &Delivery,
        description: Option<String>,
    ) {
        let mut entry = AuditEntry::new(
            EntityType::Delivery,
            stored.delivery_id,
            AuditAction::StatusChange,
            actor,
        )
        .with_execution(stored.execution_id)
        .with_after(changed_fields(&before, &snapshot(stored)))
        .with_before(before);
        if let Some(description) = description {
            entry = entry.with_description(description);
        }
        self.record_audit(entry);
    }

    fn audit_delivery_update(&self, actor: &str, before: Value, stored: &Delivery) {
        let entry = AuditEntry::new(
            EntityType::Delivery,
            stored.delivery_id,
            AuditAction::Update,
            actor,
        )
        .with_execution(stored.execution_id)
        .with_after(changed_fields(&before, &snapshot(stored)))
        .with_before(before);
        self.record_audit(entry);
    }

    #[allow(clippy::too_many_arguments)]
    fn audit_mutation<T: Serialize>(
        &self,
        entity_type: EntityType,
        entity_id: Uuid,
        action: AuditAction,
        actor: &str,
        before: Value,
        stored: &T,
        description: Option<String>,
    ) {
        let mut entry = AuditEntry::new(entity_type, entity_id, action, actor)
            .with_after(changed_fields(&before, &snapshot(stored)))
            .with_before(before);
        if let Some(description) = description {
            entry = entry.with_description(description);
        }
        self.record_audit(entry);
    }

    /// Append to the audit trail. Best-effort by policy: the primary
    /// mutation already stands, a failed append is logged and tracked as an
    /// operational concern rather than failing the caller.
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

/// Serialize an entity for an audit snapshot.
fn snapshot<T: Serialize>(value: &T) -> Value {
    serde_json::to_value(value).unwrap_or(Value::Null)
}

/// Lock helper that survives a poisoned mutex — the protected state lives
/// in the stores, not inside the mutex, so poisoning carries no meaning.
fn hold(lock: &Arc<Mutex<()>>) -> MutexGuard<'_, ()> {
    lock.lock().unwrap_or_else(|e| e.into_inner())
}

fn validate_signature(signature: &Signature) -> Result<(), ExecutionError> {
    if signature.recipient_name.trim().is_empty() {
        return Err(ExecutionError::validation(
            "recipient_name",
            "a recipient name is required",
        ));
    }
    if signature.image_url.trim().is_empty() {
        return Err(ExecutionError::validation(
            "image_url",
            "a signature image URL is required",
        ));
    }
    Ok(())
}
