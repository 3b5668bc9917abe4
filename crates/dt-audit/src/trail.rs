// trail.rs — Append-only JSONL audit trail.
//
// The trail is stored as a JSONL file: one JSON object per line. The format
// is append-friendly and easy to inspect with standard tools (jq, grep).
// There is no update or delete operation in the public contract — entries
// only accumulate.
//
// Each entry is linked to the previous one via `previous_hash`, forming a
// hash chain. Inserting, deleting, or modifying history breaks the chain
// and is caught by `verify_chain`.

use std::collections::BTreeMap;
use std::fs::{File, OpenOptions};
use std::io::{BufRead, BufReader, BufWriter, Write};
use std::path::{Path, PathBuf};

use chrono::NaiveDate;
use uuid::Uuid;

use crate::entry::{AuditAction, AuditEntry};
use crate::error::AuditError;
use crate::hasher;

/// Filters for [`AuditTrail::query`].
#[derive(Debug, Clone, Default)]
pub struct AuditFilter {
    /// Keep only entries with this action.
    pub action: Option<AuditAction>,
    /// Maximum number of entries to return (None = no limit).
    pub limit: Option<usize>,
    /// Number of entries to skip before collecting.
    pub offset: usize,
}

/// An append-only audit trail backed by a JSONL file.
///
/// Writes are flushed after every entry so a recorded mutation is durable
/// before the triggering operation reports success.
pub struct AuditTrail {
    writer: BufWriter<File>,
    path: PathBuf,
    /// Hash of the last entry written — used to link the next entry.
    last_hash: Option<String>,
}

impl AuditTrail {
    /// Open (or create) an audit trail at the given path.
    ///
    /// If the file already exists, the last line is re-hashed to recover the
    /// chain state so new entries link correctly.
    pub fn open(path: impl AsRef<Path>) -> Result<Self, AuditError> {
        let path = path.as_ref().to_path_buf();

        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(|source| AuditError::OpenFailed {
                path: parent.to_path_buf(),
                source,
            })?;
        }

        let last_hash = if path.exists() {
            Self::read_last_hash(&path)?
        } else {
            None
        };

        // Append mode — existing history is never overwritten.
        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&path)
            .map_err(|source| AuditError::OpenFailed {
                path: path.clone(),
                source,
            })?;

        Ok(Self {
            writer: BufWriter::new(file),
            path,
            last_hash,
        })
    }

    /// Append an entry to the trail.
    ///
    /// Sets the entry's `previous_hash` to chain it to the last one, then
    /// writes and flushes.
    pub fn record(&mut self, entry: &mut AuditEntry) -> Result<(), AuditError> {
        entry.previous_hash = self.last_hash.clone();

        let json = serde_json::to_string(entry)?;
        self.last_hash = Some(hasher::hash_str(&json));

        writeln!(self.writer, "{}", json)?;
        self.writer.flush()?;

        Ok(())
    }

    /// Read all entries from a trail file, oldest first.
    pub fn read_all(path: impl AsRef<Path>) -> Result<Vec<AuditEntry>, AuditError> {
        let file = File::open(path.as_ref()).map_err(|source| AuditError::OpenFailed {
            path: path.as_ref().to_path_buf(),
            source,
        })?;
        let reader = BufReader::new(file);
        let mut entries = Vec::new();

        for line in reader.lines() {
            let line = line?;
            if line.trim().is_empty() {
                continue;
            }
            let entry: AuditEntry = serde_json::from_str(&line)?;
            entries.push(entry);
        }

        Ok(entries)
    }

    /// Query the history of one entity.
    ///
    /// Matches entries whose `entity_id` equals `entity_id`, plus entries
    /// scoped to it via `execution_id` — so querying an execution returns
    /// the delivery and issue mutations that belong to it.
    ///
    /// Ordering follows the review convention: newest day first, but
    /// chronological (oldest first) within each day. Filtering by action
    /// and offset/limit pagination are applied to that ordered sequence.
    pub fn query(
        path: impl AsRef<Path>,
        entity_id: Uuid,
        filter: &AuditFilter,
    ) -> Result<Vec<AuditEntry>, AuditError> {
        let all = Self::read_all(path)?;

        // File order is append order, i.e. chronological. Bucket by UTC day
        // while preserving that order inside each bucket.
        let mut by_day: BTreeMap<NaiveDate, Vec<AuditEntry>> = BTreeMap::new();
        for entry in all {
            let matches_entity =
                entry.entity_id == entity_id || entry.execution_id == Some(entity_id);
            let matches_action = filter.action.is_none_or(|a| entry.action == a);
            if matches_entity && matches_action {
                by_day
                    .entry(entry.recorded_at.date_naive())
                    .or_default()
                    .push(entry);
            }
        }

        let ordered: Vec<AuditEntry> = by_day.into_values().rev().flatten().collect();

        let page: Vec<AuditEntry> = ordered
            .into_iter()
            .skip(filter.offset)
            .take(filter.limit.unwrap_or(usize::MAX))
            .collect();
        Ok(page)
    }

    /// Verify the integrity of a trail file's hash chain.
    ///
    /// Checks that each entry's `previous_hash` matches the hash of the
    /// preceding raw JSON line. Returns `Ok(true)` if valid, or an
    /// `IntegrityViolation` error pinpointing the broken line.
    pub fn verify_chain(path: impl AsRef<Path>) -> Result<bool, AuditError> {
        let file = File::open(path.as_ref()).map_err(|source| AuditError::OpenFailed {
            path: path.as_ref().to_path_buf(),
            source,
        })?;
        let reader = BufReader::new(file);
        let mut previous_hash: Option<String> = None;

        for (line_num, line) in reader.lines().enumerate() {
            let line = line?;
            if line.trim().is_empty() {
                continue;
            }

            let entry: AuditEntry = serde_json::from_str(&line)?;

            if entry.previous_hash != previous_hash {
                return Err(AuditError::IntegrityViolation {
                    line: line_num + 1,
                    expected: previous_hash.unwrap_or_else(|| "None".to_string()),
                    actual: entry.previous_hash.unwrap_or_else(|| "None".to_string()),
                });
            }

            // Hash the raw line, not the re-serialized entry — re-serialization
            // could change field order.
            previous_hash = Some(hasher::hash_str(&line));
        }

        Ok(true)
    }

    /// Return the path to the trail file.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Read the hash of the last entry in an existing trail file.
    fn read_last_hash(path: &Path) -> Result<Option<String>, AuditError> {
        let file = File::open(path).map_err(|source| AuditError::OpenFailed {
            path: path.to_path_buf(),
            source,
        })?;
        let reader = BufReader::new(file);
        let mut last_line: Option<String> = None;

        for line in reader.lines() {
            let line = line?;
            if !line.trim().is_empty() {
                last_line = Some(line);
            }
        }

        Ok(last_line.map(|line| hasher::hash_str(&line)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::entry::EntityType;
    use chrono::{Duration, Utc};
    use serde_json::json;
    use tempfile::tempdir;

    fn entry_for(entity_id: Uuid, action: AuditAction) -> AuditEntry {
        AuditEntry::new(EntityType::Execution, entity_id, action, "operator-1")
    }

    #[test]
    fn record_and_read_round_trip() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("audit.jsonl");
        let id = Uuid::new_v4();

        {
            let mut trail = AuditTrail::open(&path).unwrap();
            let mut e1 = entry_for(id, AuditAction::Create).with_after(json!({"status": "preparing"}));
            let mut e2 = entry_for(id, AuditAction::StatusChange);
            trail.record(&mut e1).unwrap();
            trail.record(&mut e2).unwrap();
        }

        let entries = AuditTrail::read_all(&path).unwrap();
        assert_eq!(entries.len(), 2);
        assert_eq!(entries[0].action, AuditAction::Create);
        assert_eq!(entries[1].action, AuditAction::StatusChange);
    }

    #[test]
    fn first_entry_has_no_previous_hash() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("audit.jsonl");

        {
            let mut trail = AuditTrail::open(&path).unwrap();
            let mut entry = entry_for(Uuid::new_v4(), AuditAction::Create);
            trail.record(&mut entry).unwrap();
        }

        let entries = AuditTrail::read_all(&path).unwrap();
        assert!(entries[0].previous_hash.is_none());
    }

    #[test]
    fn second_entry_links_to_first() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("audit.jsonl");

        {
            let mut trail = AuditTrail::open(&path).unwrap();
            let mut e1 = entry_for(Uuid::new_v4(), AuditAction::Create);
            let mut e2 = entry_for(Uuid::new_v4(), AuditAction::Update);
            trail.record(&mut e1).unwrap();
            trail.record(&mut e2).unwrap();
        }

        let entries = AuditTrail::read_all(&path).unwrap();
        assert!(entries[1].previous_hash.is_some());
    }

    #[test]
    fn hash_chain_is_valid_after_many_appends() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("audit.jsonl");

        {
            let mut trail = AuditTrail::open(&path).unwrap();
            for _ in 0..5 {
                let mut entry = entry_for(Uuid::new_v4(), AuditAction::StatusChange);
                trail.record(&mut entry).unwrap();
            }
        }

        assert!(AuditTrail::verify_chain(&path).unwrap());
    }

    #[test]
    fn reopen_continues_chain() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("audit.jsonl");

        {
            let mut trail = AuditTrail::open(&path).unwrap();
            let mut entry = entry_for(Uuid::new_v4(), AuditAction::Create);
            trail.record(&mut entry).unwrap();
        }
        {
            let mut trail = AuditTrail::open(&path).unwrap();
            let mut entry = entry_for(Uuid::new_v4(), AuditAction::Complete);
            trail.record(&mut entry).unwrap();
        }

        assert!(AuditTrail::verify_chain(&path).unwrap());
        assert_eq!(AuditTrail::read_all(&path).unwrap().len(), 2);
    }

    #[test]
    fn tampered_line_breaks_chain() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("audit.jsonl");

        {
            let mut trail = AuditTrail::open(&path).unwrap();
            for _ in 0..3 {
                let mut entry = entry_for(Uuid::new_v4(), AuditAction::Create);
                trail.record(&mut entry).unwrap();
            }
        }

        // Drop the middle line to simulate history rewriting.
        let content = std::fs::read_to_string(&path).unwrap();
        let kept: Vec<&str> = content.lines().enumerate().filter(|(i, _)| *i != 1).map(|(_, l)| l).collect();
        std::fs::write(&path, kept.join("\n")).unwrap();

        let result = AuditTrail::verify_chain(&path);
        assert!(matches!(
            result,
            Err(AuditError::IntegrityViolation { .. })
        ));
    }

    #[test]
    fn query_matches_entity_and_execution_scope() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("audit.jsonl");
        let execution_id = Uuid::new_v4();
        let delivery_id = Uuid::new_v4();

        {
            let mut trail = AuditTrail::open(&path).unwrap();
            let mut on_execution = entry_for(execution_id, AuditAction::Create);
            let mut on_delivery = AuditEntry::new(
                EntityType::Delivery,
                delivery_id,
                AuditAction::StatusChange,
                "driver-1",
            )
            .with_execution(execution_id);
            let mut unrelated = entry_for(Uuid::new_v4(), AuditAction::Create);
            trail.record(&mut on_execution).unwrap();
            trail.record(&mut on_delivery).unwrap();
            trail.record(&mut unrelated).unwrap();
        }

        let entries = AuditTrail::query(&path, execution_id, &AuditFilter::default()).unwrap();
        assert_eq!(entries.len(), 2);

        // Querying the delivery directly returns only its own entry.
        let entries = AuditTrail::query(&path, delivery_id, &AuditFilter::default()).unwrap();
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].entity_id, delivery_id);
    }

    #[test]
    fn query_filters_by_action() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("audit.jsonl");
        let id = Uuid::new_v4();

        {
            let mut trail = AuditTrail::open(&path).unwrap();
            for action in [
                AuditAction::Create,
                AuditAction::StatusChange,
                AuditAction::StatusChange,
                AuditAction::Complete,
            ] {
                let mut entry = entry_for(id, action);
                trail.record(&mut entry).unwrap();
            }
        }

        let filter = AuditFilter {
            action: Some(AuditAction::StatusChange),
            ..Default::default()
        };
        let entries = AuditTrail::query(&path, id, &filter).unwrap();
        assert_eq!(entries.len(), 2);
        assert!(entries.iter().all(|e| e.action == AuditAction::StatusChange));
    }

    #[test]
    fn query_orders_newest_day_first_chronological_within_day() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("audit.jsonl");
        let id = Uuid::new_v4();

        {
            let mut trail = AuditTrail::open(&path).unwrap();
            // Two entries yesterday, two today — timestamps forced after
            // construction so the file stays in append (chronological) order.
            let yesterday = Utc::now() - Duration::days(1);
            let mut e1 = entry_for(id, AuditAction::Create);
            e1.recorded_at = yesterday;
            let mut e2 = entry_for(id, AuditAction::StatusChange);
            e2.recorded_at = yesterday + Duration::minutes(5);
            let mut e3 = entry_for(id, AuditAction::StatusChange);
            let mut e4 = entry_for(id, AuditAction::Complete);
            for e in [&mut e1, &mut e2, &mut e3, &mut e4] {
                trail.record(e).unwrap();
            }
        }

        let entries = AuditTrail::query(&path, id, &AuditFilter::default()).unwrap();
        assert_eq!(entries.len(), 4);
        // Today's group first...
        assert_eq!(entries[0].action, AuditAction::StatusChange);
        assert_eq!(entries[1].action, AuditAction::Complete);
        // ...then yesterday's, oldest first within the day.
        assert_eq!(entries[2].action, AuditAction::Create);
        assert_eq!(entries[3].action, AuditAction::StatusChange);
    }

    #[test]
    fn query_paginates_with_limit_and_offset() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("audit.jsonl");
        let id = Uuid::new_v4();

        {
            let mut trail = AuditTrail::open(&path).unwrap();
            for _ in 0..5 {
                let mut entry = entry_for(id, AuditAction::Update);
                trail.record(&mut entry).unwrap();
            }
        }

        let filter = AuditFilter {
            limit: Some(2),
            offset: 1,
            ..Default::default()
        };
        let page = AuditTrail::query(&path, id, &filter).unwrap();
        assert_eq!(page.len(), 2);

        let filter = AuditFilter {
            offset: 4,
            ..Default::default()
        };
        let tail = AuditTrail::query(&path, id, &filter).unwrap();
        assert_eq!(tail.len(), 1);
    }
}
