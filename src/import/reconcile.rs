use std::collections::HashSet;
use std::future::Future;
use std::time::Duration;

use chrono::Utc;
use uuid::Uuid;

use crate::error::SyncError;
use crate::models::task::{DuplicateAction, ImportTask};
use crate::models::vacancy::{CanonicalRecord, NewRecord};
use crate::store::RecordRepository;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    Created,
    Updated,
    Skipped,
}

/// Applies a task's duplicate policy to mapped records and tracks which
/// unique ids the current run has seen.
pub struct Reconciler<'a> {
    records: &'a dyn RecordRepository,
    task: &'a ImportTask,
    timeout: Duration,
    seen: HashSet<String>,
}

impl<'a> Reconciler<'a> {
    pub fn new(records: &'a dyn RecordRepository, task: &'a ImportTask, timeout: Duration) -> Self {
        Self {
            records,
            task,
            timeout,
            seen: HashSet::new(),
        }
    }

    /// Note a unique id as present in the source, whether or not its record
    /// could be mapped.
    pub fn mark_seen(&mut self, unique_id: &str) {
        self.seen.insert(unique_id.to_string());
    }

    pub fn seen(&self) -> usize {
        self.seen.len()
    }

    pub async fn apply(&mut self, unique_id: &str, mut record: CanonicalRecord) -> Result<Outcome, SyncError> {
        self.mark_seen(unique_id);
        let existing = bounded(
            self.timeout,
            self.records.find_by_unique_id(self.task.id, unique_id),
        )
        .await?;
        if let Some(found) = &existing
            && same_content(&found.record, &record)
        {
            record.imported_at = found.record.imported_at;
        }

        let input = NewRecord {
            task_id: self.task.id,
            unique_id: unique_id.to_string(),
            post_type: self.task.target_post_type.clone(),
            status: self.task.post_status.clone(),
            record,
        };

        match (existing, self.task.duplicate_action) {
            (None, _) | (Some(_), DuplicateAction::CreateNew) => {
                bounded(self.timeout, self.records.create(input)).await?;
                Ok(Outcome::Created)
            }
            (Some(found), DuplicateAction::Update) => {
                bounded(self.timeout, self.records.update(found.id, input)).await?;
                Ok(Outcome::Updated)
            }
            (Some(_), DuplicateAction::Skip) => Ok(Outcome::Skipped),
        }
    }

    /// Delete this task's records that were not seen in the run and have not
    /// been written within `retention`. Returns (deleted, failed).
    pub async fn retire(&self, retention: Duration) -> Result<(i64, i64), SyncError> {
        let cutoff = Utc::now()
            - chrono::Duration::from_std(retention)
                .map_err(|_| SyncError::Configuration("Retention window is too large".into()))?;
        let existing = bounded(self.timeout, self.records.list_for_task(self.task.id)).await?;

        let stale: Vec<(Uuid, String)> = existing
            .into_iter()
            .filter(|r| !self.seen.contains(&r.unique_id) && r.updated_at < cutoff)
            .map(|r| (r.id, r.unique_id))
            .collect();

        let (mut deleted, mut failed) = (0, 0);
        for (id, unique_id) in stale {
            match bounded(self.timeout, self.records.delete(id)).await {
                Ok(()) => deleted += 1,
                Err(SyncError::NotFound(_)) => {}
                Err(e) => {
                    tracing::warn!("Failed to retire record '{unique_id}': {e}");
                    failed += 1;
                }
            }
        }
        Ok((deleted, failed))
    }
}

/// Equal apart from the import stamp.
fn same_content(stored: &CanonicalRecord, mapped: &CanonicalRecord) -> bool {
    let unstamped = |r: &CanonicalRecord| CanonicalRecord {
        imported_at: None,
        ..r.clone()
    };
    unstamped(stored) == unstamped(mapped)
}

/// Bound a repository call by `timeout`.
pub async fn bounded<T, F>(timeout: Duration, call: F) -> Result<T, SyncError>
where
    F: Future<Output = Result<T, SyncError>>,
{
    tokio::time::timeout(timeout, call)
        .await
        .map_err(|_| SyncError::Storage(format!("Repository call timed out after {timeout:?}")))?
}
