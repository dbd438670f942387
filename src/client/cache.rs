use std::collections::{BTreeMap, HashMap};
use std::sync::{Mutex, PoisonError};
use std::time::{Duration, Instant};

use sha2::{Digest, Sha256};

use super::ApiResponse;

/// Short-lived cache of successful responses, shared by every client built
/// from one factory. Entries expire after `ttl`; operators clear it
/// explicitly through the control API.
pub struct ResponseCache {
    ttl: Duration,
    entries: Mutex<HashMap<String, (Instant, ApiResponse)>>,
}

impl ResponseCache {
    pub fn new(ttl: Duration) -> Self {
        Self {
            ttl,
            entries: Mutex::new(HashMap::new()),
        }
    }

    /// Cache key over method, URL and the sorted parameter set.
    pub fn key(method: &str, url: &str, params: &BTreeMap<String, String>) -> String {
        let mut hasher = Sha256::new();
        hasher.update(method.as_bytes());
        hasher.update([0]);
        hasher.update(url.as_bytes());
        for (k, v) in params {
            hasher.update([0]);
            hasher.update(k.as_bytes());
            hasher.update([b'=']);
            hasher.update(v.as_bytes());
        }
        hex::encode(hasher.finalize())
    }

    pub fn get(&self, key: &str) -> Option<ApiResponse> {
        let mut entries = self.entries.lock().unwrap_or_else(PoisonError::into_inner);
        let cached = entries
            .get(key)
            .map(|(stored, response)| (stored.elapsed() < self.ttl, response.clone()));
        match cached {
            Some((true, response)) => Some(response),
            Some((false, _)) => {
                entries.remove(key);
                None
            }
            None => None,
        }
    }

    pub fn put(&self, key: String, response: ApiResponse) {
        self.entries
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(key, (Instant::now(), response));
    }

    /// Drop every entry. Returns how many were removed.
    pub fn clear(&self) -> usize {
        let mut entries = self.entries.lock().unwrap_or_else(PoisonError::into_inner);
        let count = entries.len();
        entries.clear();
        count
    }

    pub fn len(&self) -> usize {
        self.entries
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn params(pairs: &[(&str, &str)]) -> BTreeMap<String, String> {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    #[test]
    fn distinct_parameter_sets_get_distinct_keys() {
        let a = ResponseCache::key("GET", "https://x/v", &params(&[("page", "1")]));
        let b = ResponseCache::key("GET", "https://x/v", &params(&[("page", "2")]));
        let c = ResponseCache::key("GET", "https://x/v", &params(&[("pa", "ge=1")]));
        assert_ne!(a, b);
        assert_ne!(a, c);
        assert_eq!(
            a,
            ResponseCache::key("GET", "https://x/v", &params(&[("page", "1")]))
        );
    }

    #[test]
    fn entries_expire_and_can_be_cleared() {
        let cache = ResponseCache::new(Duration::from_millis(20));
        let response = ApiResponse {
            status: 200,
            data: json!({ "ok": true }),
        };
        cache.put("k".into(), response.clone());
        assert_eq!(cache.get("k"), Some(response.clone()));

        std::thread::sleep(Duration::from_millis(30));
        assert_eq!(cache.get("k"), None);

        cache.put("k".into(), response);
        assert_eq!(cache.clear(), 1);
        assert!(cache.is_empty());
    }
}
