// Import orchestration: one end-to-end run per task, single-flight.
// Fetch through the task's provider, map every item, reconcile against the
// record repository, and record the run from start to a final status.

pub mod reconcile;
pub mod stage;

use std::any::Any;
use std::collections::HashMap;
use std::panic::AssertUnwindSafe;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use futures::FutureExt;
use serde::Serialize;
use serde_json::{Value, json};
use tokio_util::sync::CancellationToken;
use tracing::Instrument;
use uuid::Uuid;

use crate::client::ClientFactory;
use crate::error::SyncError;
use crate::mapping::path;
use crate::mapping::transform::{TransformLimits, TransformScript};
use crate::models::run::{LogLevel, NewLogEntry, RunCounts, RunStatus, TriggerType};
use crate::models::task::ImportTask;
use crate::models::vacancy::CanonicalRecord;
use crate::providers::task_source::TaskProvider;
use crate::providers::{ConnectionCheck, Provider, ProviderRegistry};
use crate::store::{RecordRepository, RunRecorder, TaskStore};

use self::reconcile::{Outcome, Reconciler, bounded};
use self::stage::{RunProgress, RunStage};

const COMPONENT: &str = "orchestrator";
const CHECKPOINT_EVERY: usize = 25;

#[derive(Debug, Clone)]
pub struct ImportSettings {
    /// Page cap for tasks that do not set their own.
    pub max_pages: u32,
    pub repository_timeout: Duration,
    /// Probe the source before fetching so bad credentials fail fast.
    pub preflight_check: bool,
    pub transform: TransformLimits,
}

impl Default for ImportSettings {
    fn default() -> Self {
        Self {
            max_pages: 100,
            repository_timeout: Duration::from_secs(10),
            preflight_check: true,
            transform: TransformLimits::default(),
        }
    }
}

/// Outcome of one run, returned to the caller that triggered it.
#[derive(Debug, Clone, Serialize)]
pub struct RunSummary {
    pub run_id: Uuid,
    pub task_id: Uuid,
    pub success: bool,
    pub status: RunStatus,
    #[serde(flatten)]
    pub counts: RunCounts,
    pub message: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct StatusReport {
    pub run_id: Uuid,
    pub task_id: Uuid,
    pub status: RunStatus,
    pub stage: RunStage,
    pub current: u64,
    pub total: u64,
    pub counts: RunCounts,
    pub error: Option<String>,
}

struct ActiveRun {
    run_id: Option<Uuid>,
    cancel: CancellationToken,
    progress: Arc<RunProgress>,
}

type ActiveRuns = Arc<Mutex<HashMap<Uuid, ActiveRun>>>;

/// Holds a task's single-flight slot; releasing happens on drop so every
/// exit path, including unwinding, frees the task.
struct SlotGuard {
    active: ActiveRuns,
    task_id: Uuid,
}

impl Drop for SlotGuard {
    fn drop(&mut self) {
        self.active
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(&self.task_id);
    }
}

struct RunContext<'a> {
    run_id: Uuid,
    cancel: CancellationToken,
    progress: Arc<RunProgress>,
    recorder: &'a dyn RunRecorder,
}

impl RunContext<'_> {
    async fn log(&self, level: LogLevel, message: impl Into<String>, context: Value) {
        let message = message.into();
        let run_id = self.run_id;
        match level {
            LogLevel::Debug => tracing::debug!(%run_id, component = COMPONENT, "{message}"),
            LogLevel::Info => tracing::info!(%run_id, component = COMPONENT, "{message}"),
            LogLevel::Warning => tracing::warn!(%run_id, component = COMPONENT, "{message}"),
            LogLevel::Error => tracing::error!(%run_id, component = COMPONENT, "{message}"),
        }
        let entry = NewLogEntry {
            run_id: Some(run_id),
            level,
            component: COMPONENT.to_string(),
            message,
            context,
        };
        if let Err(e) = self.recorder.append_log(entry).await {
            tracing::warn!(%run_id, "Failed to record run log line: {e}");
        }
    }

    fn ensure_active(&self) -> Result<(), SyncError> {
        if self.cancel.is_cancelled() {
            Err(SyncError::Cancelled)
        } else {
            Ok(())
        }
    }
}

pub struct Orchestrator {
    registry: Arc<ProviderRegistry>,
    clients: ClientFactory,
    tasks: Arc<dyn TaskStore>,
    records: Arc<dyn RecordRepository>,
    recorder: Arc<dyn RunRecorder>,
    settings: ImportSettings,
    active: ActiveRuns,
}

impl Orchestrator {
    pub fn new(
        registry: Arc<ProviderRegistry>,
        clients: ClientFactory,
        tasks: Arc<dyn TaskStore>,
        records: Arc<dyn RecordRepository>,
        recorder: Arc<dyn RunRecorder>,
        settings: ImportSettings,
    ) -> Self {
        Self {
            registry,
            clients,
            tasks,
            records,
            recorder,
            settings,
            active: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    pub fn registry(&self) -> &Arc<ProviderRegistry> {
        &self.registry
    }

    pub fn clients(&self) -> &ClientFactory {
        &self.clients
    }

    pub fn tasks(&self) -> &Arc<dyn TaskStore> {
        &self.tasks
    }

    pub fn recorder(&self) -> &Arc<dyn RunRecorder> {
        &self.recorder
    }

    pub fn settings(&self) -> &ImportSettings {
        &self.settings
    }

    pub fn is_running(&self, task_id: Uuid) -> bool {
        self.active
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .contains_key(&task_id)
    }

    /// Load a task and run it. Unknown tasks fail before a run is created.
    pub async fn run_import(&self, task_id: Uuid, trigger: TriggerType) -> Result<RunSummary, SyncError> {
        let task = bounded(self.settings.repository_timeout, self.tasks.get(task_id))
            .await?
            .ok_or_else(|| SyncError::NotFound(format!("Task {task_id} not found")))?;
        self.run_task(task, trigger).await
    }

    /// Run `task` to a final status.
    ///
    /// Returns `AlreadyRunning` without creating a run when the task already
    /// has an active one. Otherwise exactly one run is recorded and always
    /// finalized, whatever happens inside.
    pub async fn run_task(&self, task: ImportTask, trigger: TriggerType) -> Result<RunSummary, SyncError> {
        let cancel = CancellationToken::new();
        let progress = Arc::new(RunProgress::new());
        let _slot = match self.claim(task.id, cancel.clone(), progress.clone()) {
            Ok(slot) => slot,
            Err(active_run) => {
                self.log_rejection(&task, trigger, active_run).await;
                return Err(SyncError::AlreadyRunning(task.id));
            }
        };

        let run = self.recorder.start_run(task.id, trigger).await?;
        self.attach_run(task.id, run.id);

        let span = tracing::info_span!("import", task_id = %task.id, run_id = %run.id);
        async {
            let ctx = RunContext {
                run_id: run.id,
                cancel,
                progress: progress.clone(),
                recorder: self.recorder.as_ref(),
            };
            ctx.log(
                LogLevel::Info,
                format!("Starting {} import for task '{}'", trigger.as_str(), task.name),
                json!({ "task_id": task.id, "trigger": trigger }),
            )
            .await;

            let mut counts = RunCounts::default();
            let outcome = AssertUnwindSafe(self.execute(&task, &ctx, &mut counts))
                .catch_unwind()
                .await;

            let (status, error) = match outcome {
                Ok(Ok(())) => (RunStatus::Completed, None),
                Ok(Err(SyncError::Cancelled)) => {
                    progress.advance(RunStage::Cancelled);
                    (RunStatus::Cancelled, Some(SyncError::Cancelled.to_string()))
                }
                Ok(Err(e)) => {
                    progress.advance(RunStage::Failed);
                    (RunStatus::Failed, Some(e.to_string()))
                }
                Err(panic) => {
                    progress.advance(RunStage::Failed);
                    (
                        RunStatus::Failed,
                        Some(format!("Run panicked: {}", panic_message(&*panic))),
                    )
                }
            };

            let message = match &error {
                Some(e) => e.clone(),
                None => format!(
                    "Fetched {}: {} created, {} updated, {} skipped, {} deleted, {} errors",
                    counts.fetched,
                    counts.created,
                    counts.updated,
                    counts.skipped,
                    counts.deleted,
                    counts.errors
                ),
            };
            let level = match status {
                RunStatus::Failed => LogLevel::Error,
                RunStatus::Cancelled => LogLevel::Warning,
                _ => LogLevel::Info,
            };
            ctx.log(
                level,
                format!("Run {}: {message}", status.as_str()),
                json!({ "counts": counts }),
            )
            .await;

            if let Err(e) = self
                .recorder
                .finish_run(run.id, status, &counts, error.as_deref())
                .await
            {
                tracing::error!("Failed to finalize run {}: {e}", run.id);
            }

            Ok(RunSummary {
                run_id: run.id,
                task_id: task.id,
                success: status == RunStatus::Completed,
                status,
                counts,
                message,
            })
        }
        .instrument(span)
        .await
    }

    async fn execute(&self, task: &ImportTask, ctx: &RunContext<'_>, counts: &mut RunCounts) -> Result<(), SyncError> {
        ctx.progress.advance(RunStage::Fetching);

        let source = self.resolve_source(task)?;
        let transform = if task.transforms_enabled {
            Some(TransformScript::compile(&task.transforms_code, &self.settings.transform)?)
        } else {
            None
        };
        let unique_path = match task.unique_id_field.trim() {
            "" => source.unique_id_path().to_string(),
            field => field.to_string(),
        };
        if unique_path.is_empty() {
            return Err(SyncError::Configuration(
                "No unique id field is configured".to_string(),
            ));
        }

        if self.settings.preflight_check {
            source.probe().await?;
            ctx.log(LogLevel::Debug, "Preflight connection check passed", Value::Null)
                .await;
        }
        ctx.ensure_active()?;

        let max_pages = task.max_pages.unwrap_or(self.settings.max_pages);
        let fetched = source.fetch_all(max_pages, &ctx.cancel).await?;
        counts.fetched = fetched.items.len() as i64;
        ctx.log(
            LogLevel::Info,
            format!(
                "Fetched {} items over {} pages",
                fetched.items.len(),
                fetched.pages_fetched
            ),
            json!({
                "pages": fetched.pages_fetched,
                "total": fetched.total,
                "complete": fetched.complete,
            }),
        )
        .await;
        self.checkpoint(ctx, counts).await;
        ctx.ensure_active()?;

        ctx.progress.advance(RunStage::Mapping);
        ctx.progress.reset(fetched.items.len() as u64);
        let mut reconciler = Reconciler::new(
            self.records.as_ref(),
            task,
            self.settings.repository_timeout,
        );
        let mut mapped = Vec::with_capacity(fetched.items.len());
        let mut unresolved = 0usize;
        for (index, item) in fetched.items.iter().enumerate() {
            ctx.ensure_active()?;
            ctx.progress.tick();
            let Some(unique_id) = path::resolve_text(item, &unique_path) else {
                counts.errors += 1;
                unresolved += 1;
                ctx.log(
                    LogLevel::Warning,
                    format!("Item {index} has no unique id at '{unique_path}', skipping"),
                    json!({ "index": index }),
                )
                .await;
                continue;
            };
            reconciler.mark_seen(&unique_id);
            match build_record(source.as_ref(), transform.as_ref(), item, &unique_id) {
                Ok(record) => mapped.push((unique_id, record)),
                Err(e) => {
                    counts.errors += 1;
                    ctx.log(
                        LogLevel::Warning,
                        format!("Failed to map item '{unique_id}': {e}"),
                        json!({ "index": index, "unique_id": unique_id }),
                    )
                    .await;
                }
            }
        }

        ctx.progress.advance(RunStage::Reconciling);
        ctx.progress.reset(mapped.len() as u64);
        for (done, (unique_id, record)) in mapped.into_iter().enumerate() {
            ctx.ensure_active()?;
            match reconciler.apply(&unique_id, record).await {
                Ok(Outcome::Created) => counts.created += 1,
                Ok(Outcome::Updated) => counts.updated += 1,
                Ok(Outcome::Skipped) => counts.skipped += 1,
                Err(e) => {
                    counts.errors += 1;
                    ctx.log(
                        LogLevel::Warning,
                        format!("Failed to store item '{unique_id}': {e}"),
                        json!({ "unique_id": unique_id }),
                    )
                    .await;
                }
            }
            ctx.progress.tick();
            if (done + 1) % CHECKPOINT_EVERY == 0 {
                self.checkpoint(ctx, counts).await;
            }
        }

        if task.retire_missing {
            ctx.ensure_active()?;
            match task.retention_days {
                None => {
                    ctx.log(LogLevel::Info, "Retire pass skipped: no retention window", Value::Null)
                        .await;
                }
                Some(_) if !fetched.complete => {
                    ctx.log(
                        LogLevel::Warning,
                        format!("Retire pass skipped: listing cut short at {max_pages} pages"),
                        Value::Null,
                    )
                    .await;
                }
                Some(_) if unresolved > 0 => {
                    ctx.log(
                        LogLevel::Warning,
                        format!("Retire pass skipped: {unresolved} items had no unique id"),
                        json!({ "unresolved": unresolved }),
                    )
                    .await;
                }
                Some(days) => {
                    let retention = Duration::from_secs(u64::from(days) * 24 * 60 * 60);
                    match reconciler.retire(retention).await {
                        Ok((deleted, failed)) => {
                            counts.deleted += deleted;
                            counts.errors += failed;
                            ctx.log(
                                LogLevel::Info,
                                format!("Retired {deleted} records not seen in {days} days"),
                                json!({ "deleted": deleted, "failed": failed }),
                            )
                            .await;
                        }
                        Err(e) => {
                            counts.errors += 1;
                            ctx.log(LogLevel::Error, format!("Retire pass failed: {e}"), Value::Null)
                                .await;
                        }
                    }
                }
            }
        }

        ctx.progress.advance(RunStage::Completed);
        Ok(())
    }

    fn resolve_source(&self, task: &ImportTask) -> Result<Arc<dyn Provider>, SyncError> {
        task.validate()?;
        match &task.provider_id {
            Some(id) => {
                let provider = self
                    .registry
                    .get(id)
                    .ok_or_else(|| SyncError::Configuration(format!("Unknown provider '{id}'")))?;
                if !provider.is_configured() {
                    return Err(SyncError::Configuration(format!(
                        "Provider '{id}' is not configured"
                    )));
                }
                Ok(provider)
            }
            None => Ok(Arc::new(TaskProvider::from_task(task, &self.clients)?)),
        }
    }

    async fn checkpoint(&self, ctx: &RunContext<'_>, counts: &RunCounts) {
        if let Err(e) = self.recorder.update_counts(ctx.run_id, counts).await {
            tracing::warn!(run_id = %ctx.run_id, "Failed to record run counts: {e}");
        }
    }

    fn claim(
        &self,
        task_id: Uuid,
        cancel: CancellationToken,
        progress: Arc<RunProgress>,
    ) -> Result<SlotGuard, Option<Uuid>> {
        let mut active = self.active.lock().unwrap_or_else(PoisonError::into_inner);
        if let Some(existing) = active.get(&task_id) {
            return Err(existing.run_id);
        }
        active.insert(
            task_id,
            ActiveRun {
                run_id: None,
                cancel,
                progress,
            },
        );
        Ok(SlotGuard {
            active: self.active.clone(),
            task_id,
        })
    }

    fn attach_run(&self, task_id: Uuid, run_id: Uuid) {
        if let Some(slot) = self
            .active
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get_mut(&task_id)
        {
            slot.run_id = Some(run_id);
        }
    }

    async fn log_rejection(&self, task: &ImportTask, trigger: TriggerType, active_run: Option<Uuid>) {
        let message = format!(
            "Rejected {} trigger for task '{}': a run is already active",
            trigger.as_str(),
            task.name
        );
        tracing::warn!(task_id = %task.id, component = COMPONENT, "{message}");
        let entry = NewLogEntry {
            run_id: None,
            level: LogLevel::Warning,
            component: COMPONENT.to_string(),
            message,
            context: json!({ "task_id": task.id, "active_run_id": active_run }),
        };
        if let Err(e) = self.recorder.append_log(entry).await {
            tracing::warn!("Failed to record rejection: {e}");
        }
    }

    /// Status of a run, with live progress while it is active.
    pub async fn get_status(&self, run_id: Uuid) -> Result<StatusReport, SyncError> {
        let run = self
            .recorder
            .get_run(run_id)
            .await?
            .ok_or_else(|| SyncError::NotFound(format!("Run {run_id} not found")))?;

        let live = self
            .active
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .values()
            .find(|slot| slot.run_id == Some(run_id))
            .map(|slot| {
                (
                    slot.progress.stage(),
                    slot.progress.current(),
                    slot.progress.total(),
                )
            });

        let (stage, current, total) = match live {
            Some(live) => live,
            None => {
                let stage = match run.status {
                    RunStatus::Completed => RunStage::Completed,
                    RunStatus::Cancelled => RunStage::Cancelled,
                    RunStatus::Failed | RunStatus::Running => RunStage::Failed,
                };
                let done = (run.counts.fetched.max(0)) as u64;
                (stage, done, done)
            }
        };

        Ok(StatusReport {
            run_id,
            task_id: run.task_id,
            status: run.status,
            stage,
            current,
            total,
            counts: run.counts,
            error: run.error,
        })
    }

    /// Request cancellation. Returns false when the run already finished.
    pub async fn cancel(&self, run_id: Uuid) -> Result<bool, SyncError> {
        let token = self
            .active
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .values()
            .find(|slot| slot.run_id == Some(run_id))
            .map(|slot| slot.cancel.clone());

        match token {
            Some(token) => {
                token.cancel();
                tracing::info!(%run_id, "Cancellation requested");
                Ok(true)
            }
            None => match self.recorder.get_run(run_id).await? {
                Some(_) => Ok(false),
                None => Err(SyncError::NotFound(format!("Run {run_id} not found"))),
            },
        }
    }

    /// Cancel every active run, for shutdown.
    pub fn cancel_all(&self) -> usize {
        let active = self.active.lock().unwrap_or_else(PoisonError::into_inner);
        for slot in active.values() {
            slot.cancel.cancel();
        }
        active.len()
    }

    pub async fn test_task(&self, task_id: Uuid) -> Result<ConnectionCheck, SyncError> {
        let task = bounded(self.settings.repository_timeout, self.tasks.get(task_id))
            .await?
            .ok_or_else(|| SyncError::NotFound(format!("Task {task_id} not found")))?;
        match self.resolve_source(&task) {
            Ok(source) => Ok(source.test_connection().await),
            Err(e) => Ok(ConnectionCheck::failed(e.to_string())),
        }
    }

    pub async fn test_provider(&self, provider_id: &str) -> Result<ConnectionCheck, SyncError> {
        let provider = self
            .registry
            .get(provider_id)
            .ok_or_else(|| SyncError::NotFound(format!("Provider '{provider_id}' not found")))?;
        Ok(provider.test_connection().await)
    }
}

/// Normalize one raw item, default its reference to the unique id, and run
/// the task transform.
fn build_record(
    source: &dyn Provider,
    transform: Option<&TransformScript>,
    item: &Value,
    unique_id: &str,
) -> Result<CanonicalRecord, SyncError> {
    let mut record = source.normalize(item)?;
    if record.vacancy_reference.is_empty() {
        record.vacancy_reference = unique_id.to_string();
    }
    match transform {
        Some(script) => script.apply(&record),
        None => Ok(record),
    }
}

fn panic_message(panic: &(dyn Any + Send)) -> String {
    if let Some(s) = panic.downcast_ref::<&str>() {
        s.to_string()
    } else if let Some(s) = panic.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}
