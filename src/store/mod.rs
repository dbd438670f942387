// Collaborator boundaries of the import engine. Each trait has a PostgreSQL
// implementation for the service and an in-memory one for tests and dry runs.

pub mod memory;
pub mod postgres;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use uuid::Uuid;

use crate::error::SyncError;
use crate::models::run::{ImportRun, LogEntry, NewLogEntry, RunCounts, RunStatus, TriggerType};
use crate::models::task::ImportTask;
use crate::models::vacancy::{NewRecord, RecordSummary, StoredRecord};

pub use memory::{MemoryRecords, MemoryRuns, MemoryTasks};
pub use postgres::{PgRecords, PgRuns, PgTasks};

/// Keyed store of canonical records, namespaced by task.
#[async_trait]
pub trait RecordRepository: Send + Sync {
    async fn find_by_unique_id(&self, task_id: Uuid, unique_id: &str) -> Result<Option<StoredRecord>, SyncError>;

    async fn create(&self, record: NewRecord) -> Result<Uuid, SyncError>;

    /// Replace a record's content. Missing ids are `NotFound`.
    async fn update(&self, id: Uuid, record: NewRecord) -> Result<(), SyncError>;

    async fn delete(&self, id: Uuid) -> Result<(), SyncError>;

    async fn list_for_task(&self, task_id: Uuid) -> Result<Vec<RecordSummary>, SyncError>;
}

/// Persists run statistics and structured log lines.
#[async_trait]
pub trait RunRecorder: Send + Sync {
    async fn start_run(&self, task_id: Uuid, trigger: TriggerType) -> Result<ImportRun, SyncError>;

    async fn update_counts(&self, run_id: Uuid, counts: &RunCounts) -> Result<(), SyncError>;

    async fn append_log(&self, entry: NewLogEntry) -> Result<(), SyncError>;

    /// Finalize a run. Runs that are already final are returned unchanged.
    async fn finish_run(
        &self,
        run_id: Uuid,
        status: RunStatus,
        counts: &RunCounts,
        error: Option<&str>,
    ) -> Result<ImportRun, SyncError>;

    async fn get_run(&self, run_id: Uuid) -> Result<Option<ImportRun>, SyncError>;

    async fn recent_runs(&self, task_id: Uuid, limit: i64) -> Result<Vec<ImportRun>, SyncError>;

    async fn logs(&self, run_id: Uuid) -> Result<Vec<LogEntry>, SyncError>;

    async fn last_scheduled_start(&self, task_id: Uuid) -> Result<Option<DateTime<Utc>>, SyncError>;

    /// Mark runs still `running` from a previous process as failed.
    async fn recover_stale(&self) -> Result<u64, SyncError>;
}

#[async_trait]
pub trait TaskStore: Send + Sync {
    async fn get(&self, id: Uuid) -> Result<Option<ImportTask>, SyncError>;

    async fn list(&self) -> Result<Vec<ImportTask>, SyncError>;

    /// Store a new task under a fresh id.
    async fn create(&self, task: ImportTask) -> Result<ImportTask, SyncError>;

    async fn update(&self, id: Uuid, task: ImportTask) -> Result<ImportTask, SyncError>;

    async fn delete(&self, id: Uuid) -> Result<bool, SyncError>;
}
