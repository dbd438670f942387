use std::sync::atomic::{AtomicU8, AtomicU64, Ordering};

use serde::Serialize;

use crate::models::run::RunStatus;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum RunStage {
    Pending,
    Fetching,
    Mapping,
    Reconciling,
    Completed,
    Failed,
    Cancelled,
}

impl RunStage {
    const ALL: [RunStage; 7] = [
        RunStage::Pending,
        RunStage::Fetching,
        RunStage::Mapping,
        RunStage::Reconciling,
        RunStage::Completed,
        RunStage::Failed,
        RunStage::Cancelled,
    ];

    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            RunStage::Completed | RunStage::Failed | RunStage::Cancelled
        )
    }

    pub fn can_transition_to(&self, next: RunStage) -> bool {
        use RunStage::*;
        match (self, next) {
            (Pending, Fetching) => true,
            (Fetching, Mapping) | (Mapping, Reconciling) | (Reconciling, Completed) => true,
            (Fetching | Mapping | Reconciling, Cancelled) => true,
            (from, Failed) => !from.is_terminal(),
            _ => false,
        }
    }

    pub fn run_status(&self) -> RunStatus {
        match self {
            RunStage::Completed => RunStatus::Completed,
            RunStage::Failed => RunStatus::Failed,
            RunStage::Cancelled => RunStatus::Cancelled,
            _ => RunStatus::Running,
        }
    }

    fn index(&self) -> u8 {
        Self::ALL.iter().position(|s| s == self).unwrap_or(0) as u8
    }

    fn from_index(index: u8) -> Self {
        Self::ALL
            .get(usize::from(index))
            .copied()
            .unwrap_or(RunStage::Pending)
    }
}

/// Live progress of an active run, shared with status queries.
#[derive(Debug, Default)]
pub struct RunProgress {
    stage: AtomicU8,
    current: AtomicU64,
    total: AtomicU64,
}

impl RunProgress {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn stage(&self) -> RunStage {
        RunStage::from_index(self.stage.load(Ordering::Acquire))
    }

    /// Move to `next` if the transition is legal.
    pub fn advance(&self, next: RunStage) -> bool {
        let current = self.stage();
        if !current.can_transition_to(next) {
            tracing::warn!("Ignoring run stage change {current:?} -> {next:?}");
            return false;
        }
        self.stage.store(next.index(), Ordering::Release);
        true
    }

    /// Begin a new counted phase of `total` units.
    pub fn reset(&self, total: u64) {
        self.total.store(total, Ordering::Relaxed);
        self.current.store(0, Ordering::Relaxed);
    }

    pub fn tick(&self) {
        self.current.fetch_add(1, Ordering::Relaxed);
    }

    pub fn current(&self) -> u64 {
        self.current.load(Ordering::Relaxed)
    }

    pub fn total(&self) -> u64 {
        self.total.load(Ordering::Relaxed)
    }
}
