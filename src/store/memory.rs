use std::collections::HashMap;
use std::sync::atomic::{AtomicI64, Ordering};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::sync::RwLock;
use uuid::Uuid;

use crate::error::SyncError;
use crate::models::run::{ImportRun, LogEntry, NewLogEntry, RunCounts, RunStatus, TriggerType};
use crate::models::task::ImportTask;
use crate::models::vacancy::{NewRecord, RecordSummary, StoredRecord};

use super::{RecordRepository, RunRecorder, TaskStore};

#[derive(Default)]
pub struct MemoryRecords {
    records: RwLock<HashMap<Uuid, StoredRecord>>,
}

impl MemoryRecords {
    pub fn new() -> Self {
        Self::default()
    }

    /// Every stored record of a task, oldest first.
    pub async fn all_for_task(&self, task_id: Uuid) -> Vec<StoredRecord> {
        let mut records: Vec<StoredRecord> = self
            .records
            .read()
            .await
            .values()
            .filter(|r| r.task_id == task_id)
            .cloned()
            .collect();
        records.sort_by_key(|r| r.created_at);
        records
    }

    /// Rewind a record's `updated_at`, for exercising retention windows.
    pub async fn backdate(&self, id: Uuid, updated_at: DateTime<Utc>) -> bool {
        match self.records.write().await.get_mut(&id) {
            Some(record) => {
                record.updated_at = updated_at;
                true
            }
            None => false,
        }
    }
}

#[async_trait]
impl RecordRepository for MemoryRecords {
    async fn find_by_unique_id(&self, task_id: Uuid, unique_id: &str) -> Result<Option<StoredRecord>, SyncError> {
        Ok(self
            .records
            .read()
            .await
            .values()
            .filter(|r| r.task_id == task_id && r.unique_id == unique_id)
            .max_by_key(|r| r.updated_at)
            .cloned())
    }

    async fn create(&self, record: NewRecord) -> Result<Uuid, SyncError> {
        let now = Utc::now();
        let id = Uuid::new_v4();
        self.records.write().await.insert(
            id,
            StoredRecord {
                id,
                task_id: record.task_id,
                unique_id: record.unique_id,
                post_type: record.post_type,
                status: record.status,
                record: record.record,
                created_at: now,
                updated_at: now,
            },
        );
        Ok(id)
    }

    async fn update(&self, id: Uuid, record: NewRecord) -> Result<(), SyncError> {
        let mut records = self.records.write().await;
        let stored = records
            .get_mut(&id)
            .ok_or_else(|| SyncError::NotFound(format!("Record {id} not found")))?;
        stored.unique_id = record.unique_id;
        stored.post_type = record.post_type;
        stored.status = record.status;
        stored.record = record.record;
        stored.updated_at = Utc::now();
        Ok(())
    }

    async fn delete(&self, id: Uuid) -> Result<(), SyncError> {
        self.records
            .write()
            .await
            .remove(&id)
            .map(|_| ())
            .ok_or_else(|| SyncError::NotFound(format!("Record {id} not found")))
    }

    async fn list_for_task(&self, task_id: Uuid) -> Result<Vec<RecordSummary>, SyncError> {
        Ok(self
            .records
            .read()
            .await
            .values()
            .filter(|r| r.task_id == task_id)
            .map(|r| RecordSummary {
                id: r.id,
                unique_id: r.unique_id.clone(),
                updated_at: r.updated_at,
            })
            .collect())
    }
}

#[derive(Default)]
pub struct MemoryRuns {
    runs: RwLock<HashMap<Uuid, ImportRun>>,
    logs: RwLock<Vec<LogEntry>>,
    next_log_id: AtomicI64,
}

impl MemoryRuns {
    pub fn new() -> Self {
        Self::default()
    }

    /// Log lines not attached to any run, such as single-flight rejections.
    pub async fn detached_logs(&self) -> Vec<LogEntry> {
        self.logs
            .read()
            .await
            .iter()
            .filter(|l| l.run_id.is_none())
            .cloned()
            .collect()
    }

    pub async fn all_runs(&self) -> Vec<ImportRun> {
        let mut runs: Vec<ImportRun> = self.runs.read().await.values().cloned().collect();
        runs.sort_by_key(|r| r.started_at);
        runs
    }
}

#[async_trait]
impl RunRecorder for MemoryRuns {
    async fn start_run(&self, task_id: Uuid, trigger: TriggerType) -> Result<ImportRun, SyncError> {
        let run = ImportRun {
            id: Uuid::new_v4(),
            task_id,
            trigger,
            status: RunStatus::Running,
            counts: RunCounts::default(),
            error: None,
            started_at: Utc::now(),
            finished_at: None,
        };
        self.runs.write().await.insert(run.id, run.clone());
        Ok(run)
    }

    async fn update_counts(&self, run_id: Uuid, counts: &RunCounts) -> Result<(), SyncError> {
        if let Some(run) = self.runs.write().await.get_mut(&run_id)
            && !run.status.is_final()
        {
            run.counts = *counts;
        }
        Ok(())
    }

    async fn append_log(&self, entry: NewLogEntry) -> Result<(), SyncError> {
        let id = self.next_log_id.fetch_add(1, Ordering::Relaxed) + 1;
        self.logs.write().await.push(LogEntry {
            id,
            run_id: entry.run_id,
            level: entry.level,
            component: entry.component,
            message: entry.message,
            context: entry.context,
            created_at: Utc::now(),
        });
        Ok(())
    }

    async fn finish_run(
        &self,
        run_id: Uuid,
        status: RunStatus,
        counts: &RunCounts,
        error: Option<&str>,
    ) -> Result<ImportRun, SyncError> {
        let mut runs = self.runs.write().await;
        let run = runs
            .get_mut(&run_id)
            .ok_or_else(|| SyncError::NotFound(format!("Run {run_id} not found")))?;
        if !run.status.is_final() {
            run.status = status;
            run.counts = *counts;
            run.error = error.map(str::to_string);
            run.finished_at = Some(Utc::now());
        }
        Ok(run.clone())
    }

    async fn get_run(&self, run_id: Uuid) -> Result<Option<ImportRun>, SyncError> {
        Ok(self.runs.read().await.get(&run_id).cloned())
    }

    async fn recent_runs(&self, task_id: Uuid, limit: i64) -> Result<Vec<ImportRun>, SyncError> {
        let mut runs: Vec<ImportRun> = self
            .runs
            .read()
            .await
            .values()
            .filter(|r| r.task_id == task_id)
            .cloned()
            .collect();
        runs.sort_by(|a, b| b.started_at.cmp(&a.started_at));
        runs.truncate(limit.max(0) as usize);
        Ok(runs)
    }

    async fn logs(&self, run_id: Uuid) -> Result<Vec<LogEntry>, SyncError> {
        Ok(self
            .logs
            .read()
            .await
            .iter()
            .filter(|l| l.run_id == Some(run_id))
            .cloned()
            .collect())
    }

    async fn last_scheduled_start(&self, task_id: Uuid) -> Result<Option<DateTime<Utc>>, SyncError> {
        Ok(self
            .runs
            .read()
            .await
            .values()
            .filter(|r| r.task_id == task_id && r.trigger == TriggerType::Scheduled)
            .map(|r| r.started_at)
            .max())
    }

    async fn recover_stale(&self) -> Result<u64, SyncError> {
        let mut recovered = 0;
        for run in self.runs.write().await.values_mut() {
            if run.status == RunStatus::Running {
                run.status = RunStatus::Failed;
                run.error = Some("Interrupted by process restart".to_string());
                run.finished_at = Some(Utc::now());
                recovered += 1;
            }
        }
        Ok(recovered)
    }
}

#[derive(Default)]
pub struct MemoryTasks {
    tasks: RwLock<HashMap<Uuid, ImportTask>>,
}

impl MemoryTasks {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl TaskStore for MemoryTasks {
    async fn get(&self, id: Uuid) -> Result<Option<ImportTask>, SyncError> {
        Ok(self.tasks.read().await.get(&id).cloned())
    }

    async fn list(&self) -> Result<Vec<ImportTask>, SyncError> {
        let mut tasks: Vec<ImportTask> = self.tasks.read().await.values().cloned().collect();
        tasks.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(tasks)
    }

    async fn create(&self, mut task: ImportTask) -> Result<ImportTask, SyncError> {
        let now = Utc::now();
        task.id = Uuid::new_v4();
        task.created_at = now;
        task.updated_at = now;
        self.tasks.write().await.insert(task.id, task.clone());
        Ok(task)
    }

    async fn update(&self, id: Uuid, mut task: ImportTask) -> Result<ImportTask, SyncError> {
        let mut tasks = self.tasks.write().await;
        let existing = tasks
            .get_mut(&id)
            .ok_or_else(|| SyncError::NotFound(format!("Task {id} not found")))?;
        task.id = id;
        task.created_at = existing.created_at;
        task.updated_at = Utc::now();
        *existing = task.clone();
        Ok(task)
    }

    async fn delete(&self, id: Uuid) -> Result<bool, SyncError> {
        Ok(self.tasks.write().await.remove(&id).is_some())
    }
}
