use std::collections::BTreeMap;
use std::sync::Arc;

use serde_json::Value;

use super::Provider;

/// Explicitly registered providers, keyed by id.
#[derive(Default)]
pub struct ProviderRegistry {
    providers: BTreeMap<String, Arc<dyn Provider>>,
}

impl ProviderRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a provider. Returns false, leaving the existing entry in place,
    /// when the id is already taken.
    pub fn register(&mut self, provider: Arc<dyn Provider>) -> bool {
        let id = provider.id().to_string();
        if self.providers.contains_key(&id) {
            tracing::warn!("Provider '{id}' is already registered, ignoring duplicate");
            return false;
        }
        tracing::info!("Registered provider '{id}'");
        self.providers.insert(id, provider);
        true
    }

    pub fn get(&self, id: &str) -> Option<Arc<dyn Provider>> {
        self.providers.get(id).cloned()
    }

    pub fn has(&self, id: &str) -> bool {
        self.providers.contains_key(id)
    }

    pub fn list(&self) -> Vec<Arc<dyn Provider>> {
        self.providers.values().cloned().collect()
    }

    pub fn get_configured(&self) -> Vec<Arc<dyn Provider>> {
        self.providers
            .values()
            .filter(|p| p.is_configured())
            .cloned()
            .collect()
    }

    /// Apply `{provider_id: {setting: value}}` blobs to registered providers.
    /// Returns how many providers received a configuration.
    pub fn load_configs(&self, configs: &BTreeMap<String, Value>) -> usize {
        let mut applied = 0;
        for (id, raw) in configs {
            match self.providers.get(id) {
                Some(provider) => {
                    let config = provider.set_config(raw);
                    let missing = provider.config_schema().missing_required(&config);
                    if missing.is_empty() {
                        tracing::info!("Configured provider '{id}'");
                    } else {
                        tracing::warn!(
                            "Provider '{id}' is missing required settings: {}",
                            missing.join(", ")
                        );
                    }
                    applied += 1;
                }
                None => tracing::warn!("Configuration given for unknown provider '{id}'"),
            }
        }
        applied
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::client::{Page, PagedItems};
    use crate::error::SyncError;
    use crate::models::vacancy::CanonicalRecord;
    use crate::providers::schema::{ConfigSchema, FieldType, ProviderConfig};
    use crate::providers::{Endpoint, PageRequest, RateLimits};
    use async_trait::async_trait;
    use serde_json::json;
    use std::sync::RwLock;
    use tokio_util::sync::CancellationToken;

    struct StubProvider {
        id: &'static str,
        config: RwLock<ProviderConfig>,
    }

    impl StubProvider {
        fn new(id: &'static str) -> Arc<Self> {
            Arc::new(Self {
                id,
                config: RwLock::new(ProviderConfig::default()),
            })
        }
    }

    #[async_trait]
    impl Provider for StubProvider {
        fn id(&self) -> &str {
            self.id
        }
        fn name(&self) -> &str {
            "Stub"
        }
        fn description(&self) -> &str {
            ""
        }
        fn base_url(&self) -> String {
            "https://stub.test".into()
        }
        fn config_schema(&self) -> ConfigSchema {
            ConfigSchema::new().required("token", FieldType::String, "token")
        }
        fn set_config(&self, raw: &Value) -> ProviderConfig {
            let config = self.config_schema().sanitize(raw);
            *self.config.write().unwrap() = config.clone();
            config
        }
        fn is_configured(&self) -> bool {
            self.config_schema()
                .is_satisfied_by(&self.config.read().unwrap())
        }
        async fn fetch_page(&self, _request: &PageRequest) -> Result<Page, SyncError> {
            Ok(Page::default())
        }
        async fn fetch_all(&self, _max: u32, _cancel: &CancellationToken) -> Result<PagedItems, SyncError> {
            Ok(PagedItems::default())
        }
        async fn fetch_one(&self, reference: &str) -> Result<Value, SyncError> {
            Err(SyncError::NotFound(reference.to_string()))
        }
        fn normalize(&self, _raw: &Value) -> Result<CanonicalRecord, SyncError> {
            Ok(CanonicalRecord::default())
        }
        fn unique_id_path(&self) -> &str {
            "id"
        }
        fn supported_endpoints(&self) -> Vec<Endpoint> {
            Vec::new()
        }
        fn rate_limits(&self) -> RateLimits {
            RateLimits {
                requests_per_minute: 60,
                delay_ms: 1000,
            }
        }
    }

    #[test]
    fn duplicate_ids_are_rejected() {
        let mut registry = ProviderRegistry::new();
        assert!(registry.register(StubProvider::new("a")));
        assert!(!registry.register(StubProvider::new("a")));
        assert!(registry.has("a"));
        assert!(registry.get("missing").is_none());
        assert_eq!(registry.list().len(), 1);
    }

    #[test]
    fn load_configs_applies_matching_blobs_only() {
        let mut registry = ProviderRegistry::new();
        registry.register(StubProvider::new("a"));
        registry.register(StubProvider::new("b"));

        let mut configs = BTreeMap::new();
        configs.insert("a".to_string(), json!({ "token": "t" }));
        configs.insert("b".to_string(), json!({ "token": "" }));
        configs.insert("zzz".to_string(), json!({ "token": "t" }));

        assert_eq!(registry.load_configs(&configs), 2);
        let configured: Vec<String> = registry
            .get_configured()
            .iter()
            .map(|p| p.id().to_string())
            .collect();
        assert_eq!(configured, vec!["a".to_string()]);
    }

    #[tokio::test]
    async fn unconfigured_provider_fails_connection_test_without_requests() {
        let provider = StubProvider::new("a");
        let check = provider.test_connection().await;
        assert!(!check.success);
        assert!(check.message.contains("not configured"));
    }
}
