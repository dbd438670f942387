#![allow(dead_code)]

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use serde_json::{Value, json};
use vacancy_importer::client::{ClientFactory, HttpSettings, RetryPolicy};
use vacancy_importer::import::{ImportSettings, Orchestrator};
use vacancy_importer::models::task::{ImportTask, TaskStatus};
use vacancy_importer::providers::find_apprenticeship::FindApprenticeship;
use vacancy_importer::providers::registry::ProviderRegistry;
use vacancy_importer::store::{MemoryRecords, MemoryRuns, MemoryTasks, TaskStore};

pub struct Harness {
    pub orchestrator: Arc<Orchestrator>,
    pub tasks: Arc<MemoryTasks>,
    pub records: Arc<MemoryRecords>,
    pub runs: Arc<MemoryRuns>,
}

pub fn http_settings() -> HttpSettings {
    HttpSettings {
        timeout: Duration::from_secs(5),
        retry: RetryPolicy {
            max_retries: 0,
            initial_delay: Duration::from_millis(1),
            max_delay: Duration::from_millis(1),
        },
        ..HttpSettings::default()
    }
}

/// Orchestrator over in-memory stores with the preflight probe off, so
/// mock expectations count only listing requests.
pub fn harness() -> Harness {
    harness_with(|_| {})
}

pub fn harness_with(configure: impl FnOnce(&ProviderRegistry)) -> Harness {
    let clients = ClientFactory::new(http_settings(), None).unwrap();
    let mut registry = ProviderRegistry::new();
    registry.register(Arc::new(FindApprenticeship::new(clients.clone())));
    configure(&registry);

    let tasks = Arc::new(MemoryTasks::new());
    let records = Arc::new(MemoryRecords::new());
    let runs = Arc::new(MemoryRuns::new());
    let settings = ImportSettings {
        preflight_check: false,
        ..ImportSettings::default()
    };
    let orchestrator = Arc::new(Orchestrator::new(
        Arc::new(registry),
        clients,
        tasks.clone(),
        records.clone(),
        runs.clone(),
        settings,
    ));
    Harness {
        orchestrator,
        tasks,
        records,
        runs,
    }
}

/// An active generic task reading `{ data: [...], meta: { pages } }` from
/// `{base}/jobs`.
pub fn generic_task(base_url: &str) -> ImportTask {
    let mappings: BTreeMap<String, String> = [
        ("title", "title"),
        ("employer.name", "company.name"),
        ("vacancy_reference", "ref"),
    ]
    .into_iter()
    .map(|(k, v)| (k.to_string(), v.to_string()))
    .collect();

    ImportTask {
        name: "Test feed".to_string(),
        status: TaskStatus::Active,
        api_base_url: base_url.to_string(),
        api_endpoint: "/jobs".to_string(),
        data_path: "data".to_string(),
        total_pages_path: "meta.pages".to_string(),
        page_size: 10,
        unique_id_field: "id".to_string(),
        field_mappings: mappings,
        ..ImportTask::default()
    }
}

pub async fn store_task(harness: &Harness, task: ImportTask) -> ImportTask {
    harness.tasks.create(task).await.unwrap()
}

pub fn job(id: &str, title: &str) -> Value {
    json!({
        "id": id,
        "title": title,
        "company": { "name": "Acme" },
        "ref": format!("REF-{id}"),
    })
}

pub fn listing(items: Vec<Value>) -> Value {
    json!({ "data": items, "meta": { "pages": 1 } })
}
