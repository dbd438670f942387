use async_trait::async_trait;
use serde_json::Value;
use tokio_util::sync::CancellationToken;

use crate::client::{ApiClient, ClientFactory, Page, PageSpec, PagedItems, Params};
use crate::error::SyncError;
use crate::mapping::FieldMapper;
use crate::models::task::ImportTask;
use crate::models::vacancy::CanonicalRecord;

use super::schema::{ConfigSchema, ProviderConfig};
use super::{Endpoint, PageRequest, Provider, RateLimits};

/// Source described entirely by an [`ImportTask`]'s HTTP settings and field
/// mappings. Built per run and never registered.
pub struct TaskProvider {
    id: String,
    name: String,
    base_url: String,
    endpoint: String,
    params: Params,
    spec: PageSpec,
    unique_id_path: String,
    client: ApiClient,
    mapper: FieldMapper,
}

impl TaskProvider {
    pub fn from_task(task: &ImportTask, clients: &ClientFactory) -> Result<Self, SyncError> {
        task.validate()?;
        let client = clients.build(&task.api_base_url, &task.api_headers, task.auth_method())?;
        let mapper = FieldMapper::new(&task.field_mappings, &task.name);
        if mapper.is_empty() {
            return Err(SyncError::Configuration(format!(
                "Task '{}' has no usable field mappings",
                task.name
            )));
        }
        Ok(Self {
            id: format!("task:{}", task.id),
            name: task.name.clone(),
            base_url: client.base_url().to_string(),
            endpoint: task.api_endpoint.trim().to_string(),
            params: task.api_params.clone(),
            spec: task.page_spec(),
            unique_id_path: task.unique_id_field.trim().to_string(),
            client,
            mapper,
        })
    }
}

#[async_trait]
impl Provider for TaskProvider {
    fn id(&self) -> &str {
        &self.id
    }

    fn name(&self) -> &str {
        &self.name
    }

    fn description(&self) -> &str {
        "Task-defined HTTP source"
    }

    fn base_url(&self) -> String {
        self.base_url.clone()
    }

    fn config_schema(&self) -> ConfigSchema {
        ConfigSchema::new()
    }

    /// Settings live on the task itself.
    fn set_config(&self, _raw: &Value) -> ProviderConfig {
        ProviderConfig::default()
    }

    fn is_configured(&self) -> bool {
        true
    }

    async fn fetch_page(&self, request: &PageRequest) -> Result<Page, SyncError> {
        let mut params = self.params.clone();
        params.extend(request.params.clone());
        let mut spec = self.spec.clone();
        if let Some(size) = request.page_size {
            spec.page_size = size;
        }
        self.client
            .fetch_page(&self.endpoint, &params, &spec, request.page)
            .await
    }

    async fn fetch_all(&self, max_pages: u32, cancel: &CancellationToken) -> Result<PagedItems, SyncError> {
        self.client
            .fetch_all_pages(&self.endpoint, &self.params, &self.spec, max_pages, cancel)
            .await
    }

    async fn fetch_one(&self, reference: &str) -> Result<Value, SyncError> {
        let endpoint = format!(
            "{}/{}",
            self.endpoint.trim_end_matches('/'),
            reference.trim()
        );
        Ok(self.client.get(&endpoint, &self.params).await?.data)
    }

    fn normalize(&self, raw: &Value) -> Result<CanonicalRecord, SyncError> {
        self.mapper.map(raw)
    }

    fn unique_id_path(&self) -> &str {
        &self.unique_id_path
    }

    fn supported_endpoints(&self) -> Vec<Endpoint> {
        Vec::new()
    }

    fn rate_limits(&self) -> RateLimits {
        let delay_ms = self.client.page_delay().as_millis() as u64;
        let requests_per_minute = if delay_ms == 0 {
            0
        } else {
            (60_000 / delay_ms).max(1) as u32
        };
        RateLimits {
            requests_per_minute,
            delay_ms,
        }
    }
}
