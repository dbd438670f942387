use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use chrono::{DateTime, Utc};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::error::SyncError;
use crate::import::{Orchestrator, RunSummary};
use crate::models::run::TriggerType;
use crate::models::task::{ImportTask, ScheduleFrequency};

/// When a task with `frequency` is next due, given its last scheduled start.
/// A task that has never run is due immediately.
pub fn next_due(
    frequency: ScheduleFrequency,
    last: Option<DateTime<Utc>>,
    now: DateTime<Utc>,
) -> DateTime<Utc> {
    match last {
        None => now,
        Some(last) => {
            let interval = chrono::Duration::from_std(frequency.interval())
                .unwrap_or_else(|_| chrono::Duration::days(7));
            last + interval
        }
    }
}

/// Triggers scheduled runs. Each due task gets at most one run per tick, so
/// occurrences missed while the process was down collapse into one.
pub struct Scheduler {
    orchestrator: Arc<Orchestrator>,
    tick: Duration,
    /// Last trigger per task, including triggers rejected by single-flight.
    triggered: Mutex<HashMap<Uuid, DateTime<Utc>>>,
}

impl Scheduler {
    pub fn new(orchestrator: Arc<Orchestrator>, tick: Duration) -> Self {
        Self {
            orchestrator,
            tick,
            triggered: Mutex::new(HashMap::new()),
        }
    }

    async fn last_trigger(&self, task_id: Uuid) -> Result<Option<DateTime<Utc>>, SyncError> {
        let recorded = self
            .orchestrator
            .recorder()
            .last_scheduled_start(task_id)
            .await?;
        let local = self
            .triggered
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(&task_id)
            .copied();
        Ok(recorded.max(local))
    }

    pub async fn is_due(&self, task: &ImportTask, now: DateTime<Utc>) -> Result<bool, SyncError> {
        if !task.is_schedulable() {
            return Ok(false);
        }
        let last = self.last_trigger(task.id).await?;
        Ok(next_due(task.schedule_frequency, last, now) <= now)
    }

    /// Start a run for every due task. Returns the spawned runs.
    pub async fn tick(&self, now: DateTime<Utc>) -> Result<Vec<JoinHandle<Result<RunSummary, SyncError>>>, SyncError> {
        let tasks = self.orchestrator.tasks().list().await?;
        let mut started = Vec::new();
        for task in tasks {
            match self.is_due(&task, now).await {
                Ok(true) => {}
                Ok(false) => continue,
                Err(e) => {
                    tracing::warn!("Could not check schedule for task '{}': {e}", task.name);
                    continue;
                }
            }

            self.triggered
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .insert(task.id, now);
            tracing::info!(
                "Task '{}' is due ({:?}), starting scheduled run",
                task.name,
                task.schedule_frequency
            );

            let orchestrator = self.orchestrator.clone();
            started.push(tokio::spawn(async move {
                orchestrator.run_task(task, TriggerType::Scheduled).await
            }));
        }
        Ok(started)
    }

    /// Tick until `shutdown` is cancelled.
    pub async fn run(self, shutdown: CancellationToken) {
        tracing::info!("Scheduler started, checking every {:?}", self.tick);
        let mut interval = tokio::time::interval(self.tick);
        interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                biased;
                _ = shutdown.cancelled() => {
                    tracing::info!("Scheduler stopping");
                    break;
                }
                _ = interval.tick() => {
                    match self.tick(Utc::now()).await {
                        Ok(started) if !started.is_empty() => {
                            tracing::debug!("Started {} scheduled runs", started.len());
                        }
                        Ok(_) => {}
                        Err(e) => tracing::error!("Scheduler tick failed: {e}"),
                    }
                }
            }
        }
    }
}
