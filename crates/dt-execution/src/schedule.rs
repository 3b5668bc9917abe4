// schedule.rs — The external scheduling collaborator boundary.
//
// The engine does not plan distributions; a scheduling system does. It
// supplies a Schedule (planned figures plus target list) and accepts
// activation/completion notifications. The boundary is the
// ScheduleProvider trait; FileScheduleProvider is the bundled JSON-file
// implementation used by the CLI and tests.

use std::fs;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::ExecutionError;

/// Scheduling-side status of a schedule.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum ScheduleStatus {
    /// Planned, not yet activated.
    Planned,
    /// An execution is running against it.
    InProgress,
    /// Its execution has been finalized.
    Done,
}

/// One recipient site in a schedule.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ScheduleTarget {
    pub name: String,
    pub address: String,
    pub planned_portions: u32,
}

/// A planned distribution, as supplied by the scheduling collaborator.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Schedule {
    pub schedule_id: Uuid,
    /// Human-readable distribution code (e.g., "DST-2026-0142").
    pub distribution_code: String,
    pub planned_portions: u32,
    pub planned_beneficiaries: u32,
    pub targets: Vec<ScheduleTarget>,
    pub status: ScheduleStatus,
    pub distribution_date: DateTime<Utc>,
}

impl Schedule {
    /// Create a Planned schedule. Planned portions default to the sum over
    /// targets when callers build schedules target-first.
    pub fn new(
        distribution_code: impl Into<String>,
        planned_beneficiaries: u32,
        targets: Vec<ScheduleTarget>,
    ) -> Self {
        let planned_portions = targets.iter().map(|t| t.planned_portions).sum();
        Self {
            schedule_id: Uuid::new_v4(),
            distribution_code: distribution_code.into(),
            planned_portions,
            planned_beneficiaries,
            targets,
            status: ScheduleStatus::Planned,
            distribution_date: Utc::now(),
        }
    }
}

/// The scheduling collaborator consumed by the engine.
///
/// `fetch` resolves a schedule; `mark_in_progress` is the activation
/// notification sent when an execution starts; `mark_done` is sent when
/// the execution is finalized.
pub trait ScheduleProvider: Send + Sync {
    fn fetch(&self, schedule_id: Uuid) -> Result<Schedule, ExecutionError>;
    fn mark_in_progress(&self, schedule_id: Uuid) -> Result<(), ExecutionError>;
    fn mark_done(&self, schedule_id: Uuid) -> Result<(), ExecutionError>;
}

/// JSON-file-backed schedule provider: one `<schedule_id>.json` per
/// schedule, easy to seed and inspect manually.
pub struct FileScheduleProvider {
    dir: PathBuf,
}

impl FileScheduleProvider {
    /// Create a provider backed by the given directory, creating it if
    /// needed.
    pub fn new(dir: impl AsRef<Path>) -> Result<Self, ExecutionError> {
        let dir = dir.as_ref().to_path_buf();
        fs::create_dir_all(&dir).map_err(|source| ExecutionError::Io {
            path: dir.display().to_string(),
            source,
        })?;
        Ok(Self { dir })
    }

    /// Save a schedule (used for seeding and for status notifications).
    pub fn save(&self, schedule: &Schedule) -> Result<(), ExecutionError> {
        let path = self.schedule_file(schedule.schedule_id);
        let json = serde_json::to_string_pretty(schedule)?;
        fs::write(&path, json).map_err(|source| ExecutionError::Io {
            path: path.display().to_string(),
            source,
        })?;
        Ok(())
    }

    /// List all schedules, newest distribution date first.
    pub fn list(&self) -> Result<Vec<Schedule>, ExecutionError> {
        let mut schedules = Vec::new();
        let entries = fs::read_dir(&self.dir).map_err(|source| ExecutionError::Io {
            path: self.dir.display().to_string(),
            source,
        })?;

        for entry in entries {
            let entry = entry.map_err(|source| ExecutionError::Io {
                path: self.dir.display().to_string(),
                source,
            })?;
            let path = entry.path();
            if path.extension().is_some_and(|ext| ext == "json") {
                let json = fs::read_to_string(&path).map_err(|source| ExecutionError::Io {
                    path: path.display().to_string(),
                    source,
                })?;
                match serde_json::from_str::<Schedule>(&json) {
                    Ok(schedule) => schedules.push(schedule),
                    Err(e) => tracing::warn!(
                        path = %path.display(),
                        "skipping unreadable schedule file: {e}"
                    ),
                }
            }
        }

        schedules.sort_by(|a, b| b.distribution_date.cmp(&a.distribution_date));
        Ok(schedules)
    }

    fn set_status(&self, schedule_id: Uuid, status: ScheduleStatus) -> Result<(), ExecutionError> {
        let mut schedule = self.fetch(schedule_id)?;
        schedule.status = status;
        self.save(&schedule)
    }

    fn schedule_file(&self, schedule_id: Uuid) -> PathBuf {
        self.dir.join(format!("{}.json", schedule_id))
    }
}

impl ScheduleProvider for FileScheduleProvider {
    fn fetch(&self, schedule_id: Uuid) -> Result<Schedule, ExecutionError> {
        let path = self.schedule_file(schedule_id);
        if !path.exists() {
            return Err(ExecutionError::ScheduleNotFound(schedule_id));
        }
        let json = fs::read_to_string(&path).map_err(|source| ExecutionError::Io {
            path: path.display().to_string(),
            source,
        })?;
        Ok(serde_json::from_str(&json)?)
    }

    fn mark_in_progress(&self, schedule_id: Uuid) -> Result<(), ExecutionError> {
        self.set_status(schedule_id, ScheduleStatus::InProgress)
    }

    fn mark_done(&self, schedule_id: Uuid) -> Result<(), ExecutionError> {
        self.set_status(schedule_id, ScheduleStatus::Done)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    pub(crate) fn three_target_schedule() -> Schedule {
        Schedule::new(
            "DST-2026-0142",
            280,
            vec![
                ScheduleTarget {
                    name: "SDN 04".to_string(),
                    address: "Jl. Merdeka 4".to_string(),
                    planned_portions: 100,
                },
                ScheduleTarget {
                    name: "SDN 07".to_string(),
                    address: "Jl. Merdeka 7".to_string(),
                    planned_portions: 100,
                },
                ScheduleTarget {
                    name: "SMP 02".to_string(),
                    address: "Jl. Pemuda 2".to_string(),
                    planned_portions: 100,
                },
            ],
        )
    }

    #[test]
    fn planned_portions_sum_over_targets() {
        let schedule = three_target_schedule();
        assert_eq!(schedule.planned_portions, 300);
        assert_eq!(schedule.status, ScheduleStatus::Planned);
    }

    #[test]
    fn save_and_fetch_round_trip() {
        let dir = tempdir().unwrap();
        let provider = FileScheduleProvider::new(dir.path().join("schedules")).unwrap();

        let schedule = three_target_schedule();
        provider.save(&schedule).unwrap();

        let fetched = provider.fetch(schedule.schedule_id).unwrap();
        assert_eq!(fetched.schedule_id, schedule.schedule_id);
        assert_eq!(fetched.targets.len(), 3);
    }

    #[test]
    fn fetch_missing_is_schedule_not_found() {
        let dir = tempdir().unwrap();
        let provider = FileScheduleProvider::new(dir.path().join("schedules")).unwrap();

        let result = provider.fetch(Uuid::new_v4());
        assert!(matches!(result, Err(ExecutionError::ScheduleNotFound(_))));
    }

    #[test]
    fn activation_notification_updates_status() {
        let dir = tempdir().unwrap();
        let provider = FileScheduleProvider::new(dir.path().join("schedules")).unwrap();

        let schedule = three_target_schedule();
        provider.save(&schedule).unwrap();
        provider.mark_in_progress(schedule.schedule_id).unwrap();

        let fetched = provider.fetch(schedule.schedule_id).unwrap();
        assert_eq!(fetched.status, ScheduleStatus::InProgress);

        provider.mark_done(schedule.schedule_id).unwrap();
        let fetched = provider.fetch(schedule.schedule_id).unwrap();
        assert_eq!(fetched.status, ScheduleStatus::Done);
    }

    #[test]
    fn list_returns_all_schedules() {
        let dir = tempdir().unwrap();
        let provider = FileScheduleProvider::new(dir.path().join("schedules")).unwrap();

        provider.save(&three_target_schedule()).unwrap();
        provider.save(&three_target_schedule()).unwrap();

        assert_eq!(provider.list().unwrap().len(), 2);
    }
}
