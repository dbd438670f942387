use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::PgPool;
use uuid::Uuid;

use crate::error::SyncError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RunStatus {
    Running,
    Completed,
    Failed,
    Cancelled,
}

impl RunStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            RunStatus::Running => "running",
            RunStatus::Completed => "completed",
            RunStatus::Failed => "failed",
            RunStatus::Cancelled => "cancelled",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "running" => Some(RunStatus::Running),
            "completed" => Some(RunStatus::Completed),
            "failed" => Some(RunStatus::Failed),
            "cancelled" => Some(RunStatus::Cancelled),
            _ => None,
        }
    }

    pub fn is_final(&self) -> bool {
        *self != RunStatus::Running
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TriggerType {
    Manual,
    Scheduled,
}

impl TriggerType {
    pub fn as_str(&self) -> &'static str {
        match self {
            TriggerType::Manual => "manual",
            TriggerType::Scheduled => "scheduled",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "manual" => Some(TriggerType::Manual),
            "scheduled" => Some(TriggerType::Scheduled),
            _ => None,
        }
    }
}

/// Per-run tallies.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunCounts {
    pub fetched: i64,
    pub created: i64,
    pub updated: i64,
    pub skipped: i64,
    pub deleted: i64,
    pub errors: i64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ImportRun {
    pub id: Uuid,
    pub task_id: Uuid,
    pub trigger: TriggerType,
    pub status: RunStatus,
    #[serde(flatten)]
    pub counts: RunCounts,
    pub error: Option<String>,
    pub started_at: DateTime<Utc>,
    pub finished_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    Debug,
    Info,
    Warning,
    Error,
}

impl LogLevel {
    pub fn as_str(&self) -> &'static str {
        match self {
            LogLevel::Debug => "debug",
            LogLevel::Info => "info",
            LogLevel::Warning => "warning",
            LogLevel::Error => "error",
        }
    }

    pub fn parse(value: &str) -> Self {
        match value {
            "debug" => LogLevel::Debug,
            "warning" => LogLevel::Warning,
            "error" => LogLevel::Error,
            _ => LogLevel::Info,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct LogEntry {
    pub id: i64,
    pub run_id: Option<Uuid>,
    pub level: LogLevel,
    pub component: String,
    pub message: String,
    pub context: serde_json::Value,
    pub created_at: DateTime<Utc>,
}

/// A structured log line to append.
#[derive(Debug, Clone)]
pub struct NewLogEntry {
    pub run_id: Option<Uuid>,
    pub level: LogLevel,
    pub component: String,
    pub message: String,
    pub context: serde_json::Value,
}

#[derive(sqlx::FromRow)]
struct RunRow {
    id: Uuid,
    task_id: Uuid,
    trigger_type: String,
    status: String,
    fetched: i64,
    created: i64,
    updated: i64,
    skipped: i64,
    deleted: i64,
    errors: i64,
    error: Option<String>,
    started_at: DateTime<Utc>,
    finished_at: Option<DateTime<Utc>>,
}

impl TryFrom<RunRow> for ImportRun {
    type Error = SyncError;

    fn try_from(row: RunRow) -> Result<Self, Self::Error> {
        let status = RunStatus::parse(&row.status)
            .ok_or_else(|| SyncError::Storage(format!("Unknown run status '{}'", row.status)))?;
        let trigger = TriggerType::parse(&row.trigger_type).ok_or_else(|| {
            SyncError::Storage(format!("Unknown trigger type '{}'", row.trigger_type))
        })?;
        Ok(ImportRun {
            id: row.id,
            task_id: row.task_id,
            trigger,
            status,
            counts: RunCounts {
                fetched: row.fetched,
                created: row.created,
                updated: row.updated,
                skipped: row.skipped,
                deleted: row.deleted,
                errors: row.errors,
            },
            error: row.error,
            started_at: row.started_at,
            finished_at: row.finished_at,
        })
    }
}

#[derive(sqlx::FromRow)]
struct LogRow {
    id: i64,
    run_id: Option<Uuid>,
    level: String,
    component: String,
    message: String,
    context: serde_json::Value,
    created_at: DateTime<Utc>,
}

impl From<LogRow> for LogEntry {
    fn from(row: LogRow) -> Self {
        LogEntry {
            id: row.id,
            run_id: row.run_id,
            level: LogLevel::parse(&row.level),
            component: row.component,
            message: row.message,
            context: row.context,
            created_at: row.created_at,
        }
    }
}

fn convert(rows: Vec<RunRow>) -> Result<Vec<ImportRun>, SyncError> {
    rows.into_iter().map(ImportRun::try_from).collect()
}

impl ImportRun {
    pub async fn start(pool: &PgPool, task_id: Uuid, trigger: TriggerType) -> Result<ImportRun, SyncError> {
        let row = sqlx::query_as::<_, RunRow>(
            "INSERT INTO import_runs (id, task_id, trigger_type, status) VALUES ($1, $2, $3, 'running') RETURNING *",
        )
        .bind(Uuid::new_v4())
        .bind(task_id)
        .bind(trigger.as_str())
        .fetch_one(pool)
        .await?;
        row.try_into()
    }

    /// Write intermediate counts. Finalized runs are left untouched.
    pub async fn update_counts(pool: &PgPool, id: Uuid, counts: &RunCounts) -> Result<(), SyncError> {
        sqlx::query(
            "UPDATE import_runs SET fetched = $2, created = $3, updated = $4, skipped = $5, deleted = $6, errors = $7
             WHERE id = $1 AND status = 'running'",
        )
        .bind(id)
        .bind(counts.fetched)
        .bind(counts.created)
        .bind(counts.updated)
        .bind(counts.skipped)
        .bind(counts.deleted)
        .bind(counts.errors)
        .execute(pool)
        .await?;
        Ok(())
    }

    /// Finalize a running run. A run that is already final is returned as is.
    pub async fn finish(
        pool: &PgPool,
        id: Uuid,
        status: RunStatus,
        counts: &RunCounts,
        error: Option<&str>,
    ) -> Result<ImportRun, SyncError> {
        let row = sqlx::query_as::<_, RunRow>(
            "UPDATE import_runs SET status = $2, fetched = $3, created = $4, updated = $5, skipped = $6,
                 deleted = $7, errors = $8, error = $9, finished_at = NOW()
             WHERE id = $1 AND status = 'running'
             RETURNING *",
        )
        .bind(id)
        .bind(status.as_str())
        .bind(counts.fetched)
        .bind(counts.created)
        .bind(counts.updated)
        .bind(counts.skipped)
        .bind(counts.deleted)
        .bind(counts.errors)
        .bind(error)
        .fetch_optional(pool)
        .await?;

        match row {
            Some(row) => row.try_into(),
            None => Self::get(pool, id)
                .await?
                .ok_or_else(|| SyncError::NotFound(format!("Run {id} not found"))),
        }
    }

    pub async fn get(pool: &PgPool, id: Uuid) -> Result<Option<ImportRun>, SyncError> {
        let row = sqlx::query_as::<_, RunRow>("SELECT * FROM import_runs WHERE id = $1")
            .bind(id)
            .fetch_optional(pool)
            .await?;
        row.map(ImportRun::try_from).transpose()
    }

    pub async fn recent(pool: &PgPool, task_id: Uuid, limit: i64) -> Result<Vec<ImportRun>, SyncError> {
        let rows = sqlx::query_as::<_, RunRow>(
            "SELECT * FROM import_runs WHERE task_id = $1 ORDER BY started_at DESC LIMIT $2",
        )
        .bind(task_id)
        .bind(limit)
        .fetch_all(pool)
        .await?;
        convert(rows)
    }

    pub async fn last_scheduled_start(pool: &PgPool, task_id: Uuid) -> Result<Option<DateTime<Utc>>, SyncError> {
        let started: Option<(DateTime<Utc>,)> = sqlx::query_as(
            "SELECT started_at FROM import_runs WHERE task_id = $1 AND trigger_type = 'scheduled'
             ORDER BY started_at DESC LIMIT 1",
        )
        .bind(task_id)
        .fetch_optional(pool)
        .await?;
        Ok(started.map(|(at,)| at))
    }

    /// Fail runs left `running` by a process that died mid-run.
    pub async fn recover_stale(pool: &PgPool) -> Result<u64, SyncError> {
        let result = sqlx::query(
            "UPDATE import_runs SET status = 'failed', error = 'Interrupted by process restart', finished_at = NOW()
             WHERE status = 'running'",
        )
        .execute(pool)
        .await?;
        Ok(result.rows_affected())
    }
}

impl LogEntry {
    pub async fn append(pool: &PgPool, entry: &NewLogEntry) -> Result<(), SyncError> {
        sqlx::query(
            "INSERT INTO import_logs (run_id, level, component, message, context) VALUES ($1, $2, $3, $4, $5)",
        )
        .bind(entry.run_id)
        .bind(entry.level.as_str())
        .bind(&entry.component)
        .bind(&entry.message)
        .bind(&entry.context)
        .execute(pool)
        .await?;
        Ok(())
    }

    pub async fn for_run(pool: &PgPool, run_id: Uuid) -> Result<Vec<LogEntry>, SyncError> {
        let rows = sqlx::query_as::<_, LogRow>(
            "SELECT * FROM import_logs WHERE run_id = $1 ORDER BY id",
        )
        .bind(run_id)
        .fetch_all(pool)
        .await?;
        Ok(rows.into_iter().map(LogEntry::from).collect())
    }
}
