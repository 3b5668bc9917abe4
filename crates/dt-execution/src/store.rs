// store.rs — JSON-file persistence for executions and deliveries.
//
// Each record is stored as its own JSON file: `<dir>/<id>.json`. This keeps
// records isolated and easy to inspect manually.
//
// Writes go through an optimistic version check: `update` only succeeds
// when the on-disk version matches the version the caller loaded, and the
// stored copy gets version + 1. A stale writer fails with
// ConcurrentModification instead of silently overwriting — in-process
// atomicity of the check-then-write is provided by the service's
// per-execution locks, the version check catches stale writers across
// service instances sharing a data directory.

use std::fs;
use std::path::{Path, PathBuf};

use serde::de::DeserializeOwned;
use serde::Serialize;
use uuid::Uuid;

use crate::delivery::Delivery;
use crate::error::ExecutionError;
use crate::execution::Execution;

fn read_record<T: DeserializeOwned>(path: &Path) -> Result<T, ExecutionError> {
    let json = fs::read_to_string(path).map_err(|source| ExecutionError::Io {
        path: path.display().to_string(),
        source,
    })?;
    Ok(serde_json::from_str(&json)?)
}

fn write_record<T: Serialize>(path: &Path, record: &T) -> Result<(), ExecutionError> {
    let json = serde_json::to_string_pretty(record)?;
    fs::write(path, json).map_err(|source| ExecutionError::Io {
        path: path.display().to_string(),
        source,
    })
}

fn ensure_dir(dir: &Path) -> Result<(), ExecutionError> {
    fs::create_dir_all(dir).map_err(|source| ExecutionError::Io {
        path: dir.display().to_string(),
        source,
    })
}

fn json_files(dir: &Path) -> Result<Vec<PathBuf>, ExecutionError> {
    let entries = fs::read_dir(dir).map_err(|source| ExecutionError::Io {
        path: dir.display().to_string(),
        source,
    })?;
    let mut paths = Vec::new();
    for entry in entries {
        let entry = entry.map_err(|source| ExecutionError::Io {
            path: dir.display().to_string(),
            source,
        })?;
        let path = entry.path();
        if path.extension().is_some_and(|ext| ext == "json") {
            paths.push(path);
        }
    }
    Ok(paths)
}

/// Persistent store for Execution records.
#[derive(Clone)]
pub struct ExecutionStore {
    dir: PathBuf,
}

impl ExecutionStore {
    /// Create a store backed by the given directory, creating it if needed.
    pub fn new(dir: impl AsRef<Path>) -> Result<Self, ExecutionError> {
        let dir = dir.as_ref().to_path_buf();
        ensure_dir(&dir)?;
        Ok(Self { dir })
    }

    /// Persist a new execution. The stored copy starts at version 1.
    pub fn insert(&self, execution: &Execution) -> Result<Execution, ExecutionError> {
        let mut stored = execution.clone();
        stored.version = 1;
        write_record(&self.record_file(stored.execution_id), &stored)?;
        Ok(stored)
    }

    /// Get an execution by id.
    pub fn get(&self, execution_id: Uuid) -> Result<Option<Execution>, ExecutionError> {
        let path = self.record_file(execution_id);
        if !path.exists() {
            return Ok(None);
        }
        Ok(Some(read_record(&path)?))
    }

    /// Write back a modified execution, enforcing the optimistic version
    /// check. Returns the stored copy (version bumped).
    pub fn update(&self, execution: &Execution) -> Result<Execution, ExecutionError> {
        let current = self
            .get(execution.execution_id)?
            .ok_or(ExecutionError::ExecutionNotFound(execution.execution_id))?;
        if current.version != execution.version {
            return Err(ExecutionError::ConcurrentModification {
                entity: "execution",
                id: execution.execution_id,
                expected: execution.version,
                found: current.version,
            });
        }
        let mut stored = execution.clone();
        stored.version += 1;
        write_record(&self.record_file(stored.execution_id), &stored)?;
        Ok(stored)
    }

    /// List all executions, newest first. Unreadable record files are
    /// skipped and logged so corruption surfaces in the operator's logs
    /// instead of failing every listing.
    pub fn list(&self) -> Result<Vec<Execution>, ExecutionError> {
        let mut executions = Vec::new();
        for path in json_files(&self.dir)? {
            match read_record::<Execution>(&path) {
                Ok(execution) => executions.push(execution),
                Err(e) => tracing::warn!(
                    path = %path.display(),
                    "skipping unreadable execution record: {e}"
                ),
            }
        }
        executions.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        Ok(executions)
    }

    /// Find a non-terminal execution referencing the given schedule.
    pub fn find_active_for_schedule(
        &self,
        schedule_id: Uuid,
    ) -> Result<Option<Execution>, ExecutionError> {
        Ok(self
            .list()?
            .into_iter()
            .find(|e| e.schedule_id == schedule_id && !e.status.is_terminal()))
    }

    /// Delete an execution record. Administrative only.
    pub fn delete(&self, execution_id: Uuid) -> Result<bool, ExecutionError> {
        let path = self.record_file(execution_id);
        if !path.exists() {
            return Ok(false);
        }
        fs::remove_file(&path).map_err(|source| ExecutionError::Io {
            path: path.display().to_string(),
            source,
        })?;
        Ok(true)
    }

    fn record_file(&self, execution_id: Uuid) -> PathBuf {
        self.dir.join(format!("{}.json", execution_id))
    }
}

/// Persistent store for Delivery records.
#[derive(Clone)]
pub struct DeliveryStore {
    dir: PathBuf,
}

impl DeliveryStore {
    /// Create a store backed by the given directory, creating it if needed.
    pub fn new(dir: impl AsRef<Path>) -> Result<Self, ExecutionError> {
        let dir = dir.as_ref().to_path_buf();
        ensure_dir(&dir)?;
        Ok(Self { dir })
    }

    /// Persist a new delivery. The stored copy starts at version 1.
    pub fn insert(&self, delivery: &Delivery) -> Result<Delivery, ExecutionError> {
        let mut stored = delivery.clone();
        stored.version = 1;
        write_record(&self.record_file(stored.delivery_id), &stored)?;
        Ok(stored)
    }

    /// Get a delivery by id.
    pub fn get(&self, delivery_id: Uuid) -> Result<Option<Delivery>, ExecutionError> {
        let path = self.record_file(delivery_id);
        if !path.exists() {
            return Ok(None);
        }
        Ok(Some(read_record(&path)?))
    }

    /// Write back a modified delivery, enforcing the optimistic version
    /// check. Returns the stored copy (version bumped).
    pub fn update(&self, delivery: &Delivery) -> Result<Delivery, ExecutionError> {
        let current = self
            .get(delivery.delivery_id)?
            .ok_or(ExecutionError::DeliveryNotFound(delivery.delivery_id))?;
        if current.version != delivery.version {
            return Err(ExecutionError::ConcurrentModification {
                entity: "delivery",
                id: delivery.delivery_id,
                expected: delivery.version,
                found: current.version,
            });
        }
        let mut stored = delivery.clone();
        stored.version += 1;
        write_record(&self.record_file(stored.delivery_id), &stored)?;
        Ok(stored)
    }

    /// List the deliveries owned by one execution, in creation order.
    /// Unreadable record files are skipped and logged.
    pub fn list_by_execution(&self, execution_id: Uuid) -> Result<Vec<Delivery>, ExecutionError> {
        let mut deliveries = Vec::new();
        for path in json_files(&self.dir)? {
            match read_record::<Delivery>(&path) {
                Ok(delivery) => {
                    if delivery.execution_id == execution_id {
                        deliveries.push(delivery);
                    }
                }
                Err(e) => tracing::warn!(
                    path = %path.display(),
                    "skipping unreadable delivery record: {e}"
                ),
            }
        }
        deliveries.sort_by(|a, b| {
            a.created_at
                .cmp(&b.created_at)
                .then_with(|| a.target_name.cmp(&b.target_name))
        });
        Ok(deliveries)
    }

    /// Delete every delivery owned by an execution (cascading
    /// administrative delete). Returns how many were removed.
    pub fn delete_by_execution(&self, execution_id: Uuid) -> Result<usize, ExecutionError> {
        let deliveries = self.list_by_execution(execution_id)?;
        for delivery in &deliveries {
            let path = self.record_file(delivery.delivery_id);
            fs::remove_file(&path).map_err(|source| ExecutionError::Io {
                path: path.display().to_string(),
                source,
            })?;
        }
        Ok(deliveries.len())
    }

    fn record_file(&self, delivery_id: Uuid) -> PathBuf {
        self.dir.join(format!("{}.json", delivery_id))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::execution::ExecutionStatus;
    use tempfile::tempdir;

    fn make_execution() -> Execution {
        Execution::new(Uuid::new_v4(), "DST-1", 300, 280)
    }

    #[test]
    fn execution_insert_get_round_trip() {
        let dir = tempdir().unwrap();
        let store = ExecutionStore::new(dir.path().join("executions")).unwrap();

        let ex = make_execution();
        let stored = store.insert(&ex).unwrap();
        assert_eq!(stored.version, 1);

        let found = store.get(ex.execution_id).unwrap().unwrap();
        assert_eq!(found.execution_id, ex.execution_id);
        assert_eq!(found.version, 1);
    }

    #[test]
    fn get_nonexistent_returns_none() {
        let dir = tempdir().unwrap();
        let store = ExecutionStore::new(dir.path().join("executions")).unwrap();
        assert!(store.get(Uuid::new_v4()).unwrap().is_none());
    }

    #[test]
    fn update_bumps_version() {
        let dir = tempdir().unwrap();
        let store = ExecutionStore::new(dir.path().join("executions")).unwrap();

        let mut ex = store.insert(&make_execution()).unwrap();
        ex.notes = Some("updated".to_string());
        let stored = store.update(&ex).unwrap();
        assert_eq!(stored.version, 2);
    }

    #[test]
    fn stale_update_is_rejected() {
        let dir = tempdir().unwrap();
        let store = ExecutionStore::new(dir.path().join("executions")).unwrap();

        let ex = store.insert(&make_execution()).unwrap();

        // Two readers load version 1.
        let mut first = store.get(ex.execution_id).unwrap().unwrap();
        let mut second = store.get(ex.execution_id).unwrap().unwrap();

        first.notes = Some("winner".to_string());
        store.update(&first).unwrap();

        second.notes = Some("loser".to_string());
        let result = store.update(&second);
        assert!(matches!(
            result,
            Err(ExecutionError::ConcurrentModification { .. })
        ));

        // The winner's write is intact.
        let current = store.get(ex.execution_id).unwrap().unwrap();
        assert_eq!(current.notes.as_deref(), Some("winner"));
    }

    #[test]
    fn list_skips_corrupt_record_files() {
        let dir = tempdir().unwrap();
        let store = ExecutionStore::new(dir.path().join("executions")).unwrap();

        let ex = store.insert(&make_execution()).unwrap();
        std::fs::write(dir.path().join("executions").join("damaged.json"), "{oops").unwrap();

        // The damaged file is skipped, the healthy record still lists.
        let listed = store.list().unwrap();
        assert_eq!(listed.len(), 1);
        assert_eq!(listed[0].execution_id, ex.execution_id);
    }

    #[test]
    fn find_active_for_schedule_skips_terminal_runs() {
        let dir = tempdir().unwrap();
        let store = ExecutionStore::new(dir.path().join("executions")).unwrap();

        let schedule_id = Uuid::new_v4();
        let mut done = Execution::new(schedule_id, "DST-1", 100, 100);
        done.status = ExecutionStatus::Cancelled;
        store.insert(&done).unwrap();

        assert!(store
            .find_active_for_schedule(schedule_id)
            .unwrap()
            .is_none());

        let active = Execution::new(schedule_id, "DST-1", 100, 100);
        store.insert(&active).unwrap();
        let found = store.find_active_for_schedule(schedule_id).unwrap();
        assert_eq!(found.unwrap().execution_id, active.execution_id);
    }

    #[test]
    fn delivery_store_lists_only_owned_records() {
        let dir = tempdir().unwrap();
        let store = DeliveryStore::new(dir.path().join("deliveries")).unwrap();

        let execution_id = Uuid::new_v4();
        store
            .insert(&Delivery::new(execution_id, "A", "addr", 100))
            .unwrap();
        store
            .insert(&Delivery::new(execution_id, "B", "addr", 100))
            .unwrap();
        store
            .insert(&Delivery::new(Uuid::new_v4(), "other", "addr", 50))
            .unwrap();

        let owned = store.list_by_execution(execution_id).unwrap();
        assert_eq!(owned.len(), 2);
        assert!(owned.iter().all(|d| d.execution_id == execution_id));
    }

    #[test]
    fn delivery_stale_update_is_rejected() {
        let dir = tempdir().unwrap();
        let store = DeliveryStore::new(dir.path().join("deliveries")).unwrap();

        let d = store
            .insert(&Delivery::new(Uuid::new_v4(), "A", "addr", 100))
            .unwrap();

        let mut first = store.get(d.delivery_id).unwrap().unwrap();
        let second = store.get(d.delivery_id).unwrap().unwrap();

        first.portions_delivered = 90;
        store.update(&first).unwrap();

        let result = store.update(&second);
        assert!(matches!(
            result,
            Err(ExecutionError::ConcurrentModification { .. })
        ));
    }

    #[test]
    fn cascade_delete_removes_owned_deliveries() {
        let dir = tempdir().unwrap();
        let store = DeliveryStore::new(dir.path().join("deliveries")).unwrap();

        let execution_id = Uuid::new_v4();
        store
            .insert(&Delivery::new(execution_id, "A", "addr", 100))
            .unwrap();
        store
            .insert(&Delivery::new(execution_id, "B", "addr", 100))
            .unwrap();
        let keep = store
            .insert(&Delivery::new(Uuid::new_v4(), "keep", "addr", 50))
            .unwrap();

        let removed = store.delete_by_execution(execution_id).unwrap();
        assert_eq!(removed, 2);
        assert!(store.list_by_execution(execution_id).unwrap().is_empty());
        assert!(store.get(keep.delivery_id).unwrap().is_some());
    }
}
