use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::PgPool;
use uuid::Uuid;

use crate::error::SyncError;
use crate::models::run::{ImportRun, LogEntry, NewLogEntry, RunCounts, RunStatus, TriggerType};
use crate::models::task::ImportTask;
use crate::models::vacancy::{NewRecord, RecordSummary, StoredRecord};

use super::{RecordRepository, RunRecorder, TaskStore};

#[derive(Clone)]
pub struct PgRecords {
    pool: PgPool,
}

impl PgRecords {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl RecordRepository for PgRecords {
    async fn find_by_unique_id(&self, task_id: Uuid, unique_id: &str) -> Result<Option<StoredRecord>, SyncError> {
        StoredRecord::find(&self.pool, task_id, unique_id).await
    }

    async fn create(&self, record: NewRecord) -> Result<Uuid, SyncError> {
        StoredRecord::insert(&self.pool, &record).await
    }

    async fn update(&self, id: Uuid, record: NewRecord) -> Result<(), SyncError> {
        if StoredRecord::replace(&self.pool, id, &record).await? {
            Ok(())
        } else {
            Err(SyncError::NotFound(format!("Record {id} not found")))
        }
    }

    async fn delete(&self, id: Uuid) -> Result<(), SyncError> {
        if StoredRecord::delete(&self.pool, id).await? {
            Ok(())
        } else {
            Err(SyncError::NotFound(format!("Record {id} not found")))
        }
    }

    async fn list_for_task(&self, task_id: Uuid) -> Result<Vec<RecordSummary>, SyncError> {
        StoredRecord::summaries(&self.pool, task_id).await
    }
}

#[derive(Clone)]
pub struct PgRuns {
    pool: PgPool,
}

impl PgRuns {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl RunRecorder for PgRuns {
    async fn start_run(&self, task_id: Uuid, trigger: TriggerType) -> Result<ImportRun, SyncError> {
        ImportRun::start(&self.pool, task_id, trigger).await
    }

    async fn update_counts(&self, run_id: Uuid, counts: &RunCounts) -> Result<(), SyncError> {
        ImportRun::update_counts(&self.pool, run_id, counts).await
    }

    async fn append_log(&self, entry: NewLogEntry) -> Result<(), SyncError> {
        LogEntry::append(&self.pool, &entry).await
    }

    async fn finish_run(
        &self,
        run_id: Uuid,
        status: RunStatus,
        counts: &RunCounts,
        error: Option<&str>,
    ) -> Result<ImportRun, SyncError> {
        ImportRun::finish(&self.pool, run_id, status, counts, error).await
    }

    async fn get_run(&self, run_id: Uuid) -> Result<Option<ImportRun>, SyncError> {
        ImportRun::get(&self.pool, run_id).await
    }

    async fn recent_runs(&self, task_id: Uuid, limit: i64) -> Result<Vec<ImportRun>, SyncError> {
        ImportRun::recent(&self.pool, task_id, limit).await
    }

    async fn logs(&self, run_id: Uuid) -> Result<Vec<LogEntry>, SyncError> {
        LogEntry::for_run(&self.pool, run_id).await
    }

    async fn last_scheduled_start(&self, task_id: Uuid) -> Result<Option<DateTime<Utc>>, SyncError> {
        ImportRun::last_scheduled_start(&self.pool, task_id).await
    }

    async fn recover_stale(&self) -> Result<u64, SyncError> {
        ImportRun::recover_stale(&self.pool).await
    }
}

#[derive(Clone)]
pub struct PgTasks {
    pool: PgPool,
}

impl PgTasks {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl TaskStore for PgTasks {
    async fn get(&self, id: Uuid) -> Result<Option<ImportTask>, SyncError> {
        ImportTask::get(&self.pool, id).await
    }

    async fn list(&self) -> Result<Vec<ImportTask>, SyncError> {
        ImportTask::list(&self.pool).await
    }

    async fn create(&self, mut task: ImportTask) -> Result<ImportTask, SyncError> {
        task.id = Uuid::new_v4();
        ImportTask::insert(&self.pool, &task).await
    }

    async fn update(&self, id: Uuid, mut task: ImportTask) -> Result<ImportTask, SyncError> {
        task.id = id;
        ImportTask::replace(&self.pool, &task)
            .await?
            .ok_or_else(|| SyncError::NotFound(format!("Task {id} not found")))
    }

    async fn delete(&self, id: Uuid) -> Result<bool, SyncError> {
        ImportTask::delete(&self.pool, id).await
    }
}
