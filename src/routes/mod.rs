pub mod api;

use std::sync::Arc;

use crate::client::ResponseCache;
use crate::import::Orchestrator;

/// Shared handler state.
#[derive(Clone)]
pub struct AppState {
    pub orchestrator: Arc<Orchestrator>,
}

impl AppState {
    pub fn new(orchestrator: Arc<Orchestrator>) -> Self {
        Self { orchestrator }
    }

    pub fn cache(&self) -> Option<&Arc<ResponseCache>> {
        self.orchestrator.clients().cache()
    }
}
