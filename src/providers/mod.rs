// Provider abstraction: one external vacancy source per implementation.
// Providers are registered explicitly with a ProviderRegistry; tasks either
// name a registered provider or describe their own source (TaskProvider).

pub mod find_apprenticeship;
pub mod registry;
pub mod schema;
pub mod task_source;

use async_trait::async_trait;
use serde::Serialize;
use serde_json::Value;
use tokio_util::sync::CancellationToken;

use crate::client::{HttpMethod, Page, PagedItems, Params};
use crate::error::SyncError;
use crate::models::vacancy::CanonicalRecord;

pub use registry::ProviderRegistry;
pub use schema::{ConfigSchema, FieldType, ProviderConfig};

/// Parameters for a single page request.
#[derive(Debug, Clone, Default)]
pub struct PageRequest {
    /// 1-based page number.
    pub page: u32,
    pub page_size: Option<u32>,
    pub params: Params,
}

impl PageRequest {
    pub fn first(page_size: Option<u32>) -> Self {
        Self {
            page: 1,
            page_size,
            params: Params::new(),
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct ConnectionCheck {
    pub success: bool,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub sample: Option<Value>,
}

impl ConnectionCheck {
    pub fn ok(message: impl Into<String>, sample: Option<Value>) -> Self {
        Self {
            success: true,
            message: message.into(),
            sample,
        }
    }

    pub fn failed(message: impl Into<String>) -> Self {
        Self {
            success: false,
            message: message.into(),
            sample: None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct RateLimits {
    pub requests_per_minute: u32,
    pub delay_ms: u64,
}

#[derive(Debug, Clone, Serialize)]
pub struct Endpoint {
    pub method: HttpMethod,
    pub path: &'static str,
    pub description: &'static str,
}

/// A vacancy data source.
///
/// Configuration is applied through `set_config` and held internally, so a
/// provider can be shared behind an `Arc` and reconfigured at runtime.
#[async_trait]
pub trait Provider: Send + Sync {
    fn id(&self) -> &str;

    fn name(&self) -> &str;

    fn description(&self) -> &str;

    fn base_url(&self) -> String;

    fn config_schema(&self) -> ConfigSchema;

    /// Validate `raw` against the schema and store the result.
    fn set_config(&self, raw: &Value) -> ProviderConfig;

    /// True when every required setting holds a non-empty value.
    fn is_configured(&self) -> bool;

    async fn fetch_page(&self, request: &PageRequest) -> Result<Page, SyncError>;

    async fn fetch_all(&self, max_pages: u32, cancel: &CancellationToken) -> Result<PagedItems, SyncError>;

    async fn fetch_one(&self, reference: &str) -> Result<Value, SyncError>;

    fn normalize(&self, raw: &Value) -> Result<CanonicalRecord, SyncError>;

    /// Dot-path of the unique id in raw items, used when a task names none.
    fn unique_id_path(&self) -> &str;

    fn supported_endpoints(&self) -> Vec<Endpoint>;

    fn rate_limits(&self) -> RateLimits;

    /// Smallest possible request against the source. Errors keep their kind,
    /// so callers can fail a run with the real cause.
    async fn probe(&self) -> Result<Page, SyncError> {
        if !self.is_configured() {
            return Err(SyncError::Configuration(format!(
                "Provider '{}' is not configured",
                self.id()
            )));
        }
        self.fetch_page(&PageRequest::first(Some(1))).await
    }

    async fn test_connection(&self) -> ConnectionCheck {
        match self.probe().await {
            Ok(page) => {
                let message = match page.total {
                    Some(total) => format!("Connected to {}: {total} items available", self.name()),
                    None => format!("Connected to {}", self.name()),
                };
                ConnectionCheck::ok(message, page.items.into_iter().next())
            }
            Err(e) => ConnectionCheck::failed(e.to_string()),
        }
    }
}

/// Serializable view of a provider for listings.
#[derive(Debug, Clone, Serialize)]
pub struct ProviderInfo {
    pub id: String,
    pub name: String,
    pub description: String,
    pub base_url: String,
    pub configured: bool,
    pub schema: ConfigSchema,
    pub endpoints: Vec<Endpoint>,
    pub rate_limits: RateLimits,
}

impl ProviderInfo {
    pub fn of(provider: &dyn Provider) -> Self {
        Self {
            id: provider.id().to_string(),
            name: provider.name().to_string(),
            description: provider.description().to_string(),
            base_url: provider.base_url(),
            configured: provider.is_configured(),
            schema: provider.config_schema(),
            endpoints: provider.supported_endpoints(),
            rate_limits: provider.rate_limits(),
        }
    }
}

/// Minimum spacing between requests for a per-minute budget.
pub fn delay_for_rate(requests_per_minute: u32) -> u64 {
    if requests_per_minute == 0 {
        return 0;
    }
    60_000u64.div_ceil(u64::from(requests_per_minute))
}
