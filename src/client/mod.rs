// Generic paginated HTTP client shared by every provider.
// Handles auth injection, query/body parameters, retry with backoff, an
// optional response cache, and multi-page aggregation.

pub mod cache;
pub mod retry;

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use base64::Engine;
use base64::engine::general_purpose::STANDARD as BASE64;
use chrono::Utc;
use reqwest::header::{HeaderMap, HeaderName, HeaderValue, RETRY_AFTER};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio_util::sync::CancellationToken;

use crate::error::SyncError;
use crate::mapping::path;

pub use cache::ResponseCache;
pub use retry::RetryPolicy;

/// Query (GET) or JSON body (POST) parameters, kept sorted so cache keys and
/// logs are stable.
pub type Params = BTreeMap<String, String>;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum HttpMethod {
    #[default]
    Get,
    Post,
}

impl HttpMethod {
    pub fn as_str(&self) -> &'static str {
        match self {
            HttpMethod::Get => "GET",
            HttpMethod::Post => "POST",
        }
    }
}

/// How credentials are attached to every request.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub enum AuthMethod {
    #[default]
    None,
    /// Header named `header` carrying `value`.
    ApiKey { header: String, value: String },
    Bearer { token: String },
    Basic { username: String, password: String },
    /// Credential appended as a query parameter.
    Query { param: String, value: String },
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Pagination {
    /// Single request, no page parameter.
    None,
    /// 1-based page number in `page_param`.
    #[default]
    Page,
    /// Zero-based item offset in `page_param`.
    Offset,
}

/// Where pages live in a source's responses and how to ask for them.
#[derive(Debug, Clone)]
pub struct PageSpec {
    pub method: HttpMethod,
    pub pagination: Pagination,
    pub page_param: String,
    pub page_size_param: Option<String>,
    pub page_size: u32,
    pub items_path: String,
    pub total_path: Option<String>,
    pub total_pages_path: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ApiResponse {
    pub status: u16,
    pub data: Value,
}

/// One page of raw items.
#[derive(Debug, Clone, Default, Serialize)]
pub struct Page {
    pub items: Vec<Value>,
    pub total: Option<u64>,
    pub total_pages: Option<u64>,
}

/// Result of a multi-page fetch.
#[derive(Debug, Clone, Default, Serialize)]
pub struct PagedItems {
    pub items: Vec<Value>,
    pub total: u64,
    pub pages_fetched: u32,
    /// False when `max_pages` stopped the fetch before the source ran out.
    pub complete: bool,
}

#[derive(Debug, Clone)]
pub struct HttpSettings {
    pub timeout: Duration,
    pub retry: RetryPolicy,
    pub default_page_delay: Duration,
    pub user_agent: String,
}

impl Default for HttpSettings {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(30),
            retry: RetryPolicy::default(),
            default_page_delay: Duration::ZERO,
            user_agent: concat!("vacancy-importer/", env!("CARGO_PKG_VERSION")).to_string(),
        }
    }
}

/// Builds [`ApiClient`]s that share one connection pool and one cache.
#[derive(Clone)]
pub struct ClientFactory {
    http: reqwest::Client,
    settings: HttpSettings,
    cache: Option<Arc<ResponseCache>>,
}

impl ClientFactory {
    pub fn new(settings: HttpSettings, cache: Option<Arc<ResponseCache>>) -> Result<Self, SyncError> {
        let http = reqwest::Client::builder()
            .timeout(settings.timeout)
            .user_agent(settings.user_agent.clone())
            .build()
            .map_err(|e| SyncError::Configuration(format!("Failed to build HTTP client: {e}")))?;
        Ok(Self {
            http,
            settings,
            cache,
        })
    }

    pub fn settings(&self) -> &HttpSettings {
        &self.settings
    }

    pub fn cache(&self) -> Option<&Arc<ResponseCache>> {
        self.cache.as_ref()
    }

    pub fn build(
        &self,
        base_url: &str,
        headers: &BTreeMap<String, String>,
        auth: AuthMethod,
    ) -> Result<ApiClient, SyncError> {
        let base_url = base_url.trim().trim_end_matches('/').to_string();
        if url::Url::parse(&base_url).is_err() {
            return Err(SyncError::Configuration(format!(
                "Invalid base URL '{base_url}'"
            )));
        }

        let mut default_headers = HeaderMap::new();
        default_headers.insert(
            reqwest::header::ACCEPT,
            HeaderValue::from_static("application/json"),
        );
        for (name, value) in headers {
            let (name, value) = header_pair(name, value)?;
            default_headers.insert(name, value);
        }
        if let AuthMethod::ApiKey { header, value } = &auth {
            let (name, value) = header_pair(header, value)?;
            default_headers.insert(name, value);
        }

        let mut scope_parts = headers.clone();
        scope_parts.insert("\u{0}auth".to_string(), format!("{auth:?}"));
        let cache_scope = ResponseCache::key("", &base_url, &scope_parts);

        Ok(ApiClient {
            http: self.http.clone(),
            base_url,
            default_headers,
            auth,
            retry: self.settings.retry.clone(),
            page_delay: self.settings.default_page_delay,
            cache: self.cache.clone(),
            cache_scope,
        })
    }
}

fn header_pair(name: &str, value: &str) -> Result<(HeaderName, HeaderValue), SyncError> {
    let header = HeaderName::from_bytes(name.trim().as_bytes())
        .map_err(|_| SyncError::Configuration(format!("Invalid header name '{name}'")))?;
    let value = HeaderValue::from_str(value.trim())
        .map_err(|_| SyncError::Configuration(format!("Invalid value for header '{name}'")))?;
    Ok((header, value))
}

/// Authenticated JSON client bound to one base URL.
pub struct ApiClient {
    http: reqwest::Client,
    base_url: String,
    default_headers: HeaderMap,
    auth: AuthMethod,
    retry: RetryPolicy,
    page_delay: Duration,
    cache: Option<Arc<ResponseCache>>,
    cache_scope: String,
}

impl ApiClient {
    pub fn with_page_delay(mut self, delay: Duration) -> Self {
        self.page_delay = delay;
        self
    }

    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    pub fn page_delay(&self) -> Duration {
        self.page_delay
    }

    pub async fn get(&self, endpoint: &str, params: &Params) -> Result<ApiResponse, SyncError> {
        self.request(HttpMethod::Get, endpoint, params).await
    }

    /// Issue one request, retrying transient failures per the retry policy.
    pub async fn request(
        &self,
        method: HttpMethod,
        endpoint: &str,
        params: &Params,
    ) -> Result<ApiResponse, SyncError> {
        let url = join_url(&self.base_url, endpoint);
        let cache_key = match (&self.cache, method) {
            (Some(_), HttpMethod::Get) => {
                Some(ResponseCache::key(method.as_str(), &format!("{}|{url}", self.cache_scope), params))
            }
            _ => None,
        };
        if let (Some(cache), Some(key)) = (&self.cache, &cache_key)
            && let Some(hit) = cache.get(key)
        {
            tracing::debug!("Cache hit for {} {url}", method.as_str());
            return Ok(hit);
        }

        let mut attempt = 0;
        loop {
            match self.send_once(method, &url, params).await {
                Ok(response) => {
                    if let (Some(cache), Some(key)) = (&self.cache, cache_key) {
                        cache.put(key, response.clone());
                    }
                    return Ok(response);
                }
                Err(e) if e.is_retryable() && attempt < self.retry.max_retries => {
                    let delay = self.retry.delay_for(attempt, &e);
                    attempt += 1;
                    tracing::warn!(
                        "{} {url} failed ({e}), retry {attempt}/{} in {delay:?}",
                        method.as_str(),
                        self.retry.max_retries
                    );
                    tokio::time::sleep(delay).await;
                }
                Err(e) => return Err(e),
            }
        }
    }

    async fn send_once(
        &self,
        method: HttpMethod,
        url: &str,
        params: &Params,
    ) -> Result<ApiResponse, SyncError> {
        let mut request = match method {
            HttpMethod::Get => self.http.get(url).query(params),
            HttpMethod::Post => self.http.post(url).json(params),
        }
        .headers(self.default_headers.clone());

        request = match &self.auth {
            AuthMethod::Bearer { token } => request.bearer_auth(token),
            AuthMethod::Basic { username, password } => request.header(
                reqwest::header::AUTHORIZATION,
                format!("Basic {}", BASE64.encode(format!("{username}:{password}"))),
            ),
            AuthMethod::Query { param, value } => request.query(&[(param, value)]),
            AuthMethod::None | AuthMethod::ApiKey { .. } => request,
        };

        tracing::debug!("{} {url}", method.as_str());
        let response = request.send().await.map_err(|e| {
            if e.is_timeout() {
                SyncError::Connection(format!("Request to {url} timed out"))
            } else {
                SyncError::Connection(format!("Request to {url} failed: {e}"))
            }
        })?;

        let status = response.status().as_u16();
        let retry_after = response
            .headers()
            .get(RETRY_AFTER)
            .and_then(|v| v.to_str().ok())
            .and_then(|v| retry::parse_retry_after(v, Utc::now()));
        let body = response
            .bytes()
            .await
            .map_err(|e| SyncError::Connection(format!("Failed to read response body: {e}")))?;

        if !(200..300).contains(&status) {
            let message = snippet(&body);
            return Err(match status {
                401 | 403 => SyncError::Auth { status, message },
                429 => SyncError::RateLimited {
                    message,
                    retry_after,
                },
                _ => SyncError::Http { status, message },
            });
        }

        let data = serde_json::from_slice(&body).map_err(|e| SyncError::MalformedResponse {
            status: Some(status),
            message: format!("Response is not valid JSON: {e}"),
        })?;
        Ok(ApiResponse { status, data })
    }

    /// Fetch one page. `page` is 1-based regardless of pagination style.
    pub async fn fetch_page(
        &self,
        endpoint: &str,
        base_params: &Params,
        spec: &PageSpec,
        page: u32,
    ) -> Result<Page, SyncError> {
        let params = page_params(base_params, spec, page);
        let response = self.request(spec.method, endpoint, &params).await?;
        parse_page(&response.data, spec)
    }

    /// Fetch pages sequentially starting at page 1.
    ///
    /// Stops when the reported page count is reached, a page comes back
    /// empty, or `max_pages` requests have been made. Any failed page aborts
    /// the whole fetch and earlier pages are discarded.
    pub async fn fetch_all_pages(
        &self,
        endpoint: &str,
        base_params: &Params,
        spec: &PageSpec,
        max_pages: u32,
        cancel: &CancellationToken,
    ) -> Result<PagedItems, SyncError> {
        let max_pages = max_pages.max(1);
        let mut result = PagedItems::default();
        let mut page = 1u32;

        loop {
            if cancel.is_cancelled() {
                return Err(SyncError::Cancelled);
            }
            if page > 1 && !self.page_delay.is_zero() {
                tokio::time::sleep(self.page_delay).await;
            }

            let fetched = self.fetch_page(endpoint, base_params, spec, page).await?;
            result.pages_fetched += 1;
            let count = fetched.items.len();
            result.items.extend(fetched.items);
            result.total = fetched.total.unwrap_or(result.items.len() as u64);
            tracing::debug!(
                "Fetched page {page} of {}: {count} items",
                fetched
                    .total_pages
                    .map(|t| t.to_string())
                    .unwrap_or_else(|| "?".to_string())
            );

            let exhausted = spec.pagination == Pagination::None
                || count == 0
                || fetched.total_pages.is_some_and(|t| u64::from(page) >= t);
            if exhausted {
                result.complete = true;
                break;
            }
            if page >= max_pages {
                tracing::warn!("Stopped after {max_pages} pages (page cap reached)");
                break;
            }
            page += 1;
        }

        Ok(result)
    }
}

fn page_params(base: &Params, spec: &PageSpec, page: u32) -> Params {
    let mut params = base.clone();
    let page = page.max(1);
    match spec.pagination {
        Pagination::None => return params,
        Pagination::Page => {
            params.insert(spec.page_param.clone(), page.to_string());
        }
        Pagination::Offset => {
            let offset = u64::from(page - 1) * u64::from(spec.page_size);
            params.insert(spec.page_param.clone(), offset.to_string());
        }
    }
    if let Some(size_param) = &spec.page_size_param
        && !size_param.is_empty()
        && spec.page_size > 0
    {
        params.insert(size_param.clone(), spec.page_size.to_string());
    }
    params
}

fn parse_page(data: &Value, spec: &PageSpec) -> Result<Page, SyncError> {
    let items = path::resolve(data, &spec.items_path)
        .and_then(Value::as_array)
        .ok_or_else(|| {
            SyncError::malformed(format!(
                "Response has no item array at '{}'",
                spec.items_path
            ))
        })?
        .clone();
    let total = spec
        .total_path
        .as_deref()
        .and_then(|p| path::resolve_u64(data, p));
    let total_pages = spec
        .total_pages_path
        .as_deref()
        .and_then(|p| path::resolve_u64(data, p))
        .or_else(|| match (total, spec.page_size) {
            (Some(total), size) if size > 0 => Some(total.div_ceil(u64::from(size))),
            _ => None,
        });
    Ok(Page {
        items,
        total,
        total_pages,
    })
}

fn join_url(base: &str, endpoint: &str) -> String {
    let endpoint = endpoint.trim();
    if endpoint.starts_with("http://") || endpoint.starts_with("https://") {
        return endpoint.to_string();
    }
    if endpoint.is_empty() {
        return base.to_string();
    }
    format!(
        "{}/{}",
        base.trim_end_matches('/'),
        endpoint.trim_start_matches('/')
    )
}

fn snippet(body: &[u8]) -> String {
    let text = String::from_utf8_lossy(body);
    let text = text.trim();
    if text.is_empty() {
        return "empty response body".to_string();
    }
    text.chars().take(200).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::time::Instant;
    use wiremock::matchers::{header, method, path as url_path, query_param};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn fast_settings() -> HttpSettings {
        HttpSettings {
            timeout: Duration::from_secs(5),
            retry: RetryPolicy {
                max_retries: 2,
                initial_delay: Duration::from_millis(10),
                max_delay: Duration::from_millis(50),
            },
            ..HttpSettings::default()
        }
    }

    fn client_for(server: &MockServer, auth: AuthMethod) -> ApiClient {
        ClientFactory::new(fast_settings(), None)
            .unwrap()
            .build(&server.uri(), &BTreeMap::new(), auth)
            .unwrap()
    }

    fn spec(page_size: u32) -> PageSpec {
        PageSpec {
            method: HttpMethod::Get,
            pagination: Pagination::Page,
            page_param: "page".into(),
            page_size_param: Some("size".into()),
            page_size,
            items_path: "data.items".into(),
            total_path: Some("data.total".into()),
            total_pages_path: Some("data.totalPages".into()),
        }
    }

    fn page_body(ids: &[&str], total: u64, total_pages: u64) -> Value {
        json!({
            "data": {
                "items": ids.iter().map(|id| json!({ "id": id })).collect::<Vec<_>>(),
                "total": total,
                "totalPages": total_pages
            }
        })
    }

    #[tokio::test]
    async fn get_attaches_default_headers_and_auth() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(url_path("/v1/things"))
            .and(header("X-Api-Key", "secret"))
            .and(header("X-Version", "2"))
            .and(query_param("q", "plumber"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "ok": true })))
            .expect(1)
            .mount(&server)
            .await;

        let mut headers = BTreeMap::new();
        headers.insert("X-Version".to_string(), "2".to_string());
        let client = ClientFactory::new(fast_settings(), None)
            .unwrap()
            .build(
                &server.uri(),
                &headers,
                AuthMethod::ApiKey {
                    header: "X-Api-Key".into(),
                    value: "secret".into(),
                },
            )
            .unwrap();

        let mut params = Params::new();
        params.insert("q".into(), "plumber".into());
        let response = client.get("/v1/things", &params).await.unwrap();
        assert_eq!(response.status, 200);
        assert_eq!(response.data, json!({ "ok": true }));
    }

    #[tokio::test]
    async fn bearer_and_query_auth_are_injected() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(url_path("/bearer"))
            .and(header("Authorization", "Bearer tok"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!([])))
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(url_path("/query"))
            .and(query_param("api_key", "k1"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!([])))
            .mount(&server)
            .await;

        let bearer = client_for(&server, AuthMethod::Bearer { token: "tok".into() });
        assert!(bearer.get("bearer", &Params::new()).await.is_ok());

        let query = client_for(
            &server,
            AuthMethod::Query {
                param: "api_key".into(),
                value: "k1".into(),
            },
        );
        assert!(query.get("query", &Params::new()).await.is_ok());
    }

    #[tokio::test]
    async fn post_sends_params_as_json_body() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(url_path("/search"))
            .and(wiremock::matchers::body_json(json!({ "page": "1" })))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "items": [] })))
            .expect(1)
            .mount(&server)
            .await;

        let client = client_for(&server, AuthMethod::None);
        let mut params = Params::new();
        params.insert("page".into(), "1".into());
        client
            .request(HttpMethod::Post, "/search", &params)
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn non_success_and_non_json_are_structured_failures() {
        let server = MockServer::start().await;
        Mock::given(url_path("/missing"))
            .respond_with(ResponseTemplate::new(404).set_body_string("no such thing"))
            .expect(1)
            .mount(&server)
            .await;
        Mock::given(url_path("/denied"))
            .respond_with(ResponseTemplate::new(401))
            .expect(1)
            .mount(&server)
            .await;
        Mock::given(url_path("/html"))
            .respond_with(ResponseTemplate::new(200).set_body_string("<html></html>"))
            .expect(1)
            .mount(&server)
            .await;

        let client = client_for(&server, AuthMethod::None);

        let err = client.get("/missing", &Params::new()).await.unwrap_err();
        assert_eq!(err.status_code(), Some(404));
        assert!(err.to_string().contains("no such thing"));

        let err = client.get("/denied", &Params::new()).await.unwrap_err();
        assert!(matches!(err, SyncError::Auth { status: 401, .. }));

        let err = client.get("/html", &Params::new()).await.unwrap_err();
        assert!(matches!(
            err,
            SyncError::MalformedResponse {
                status: Some(200),
                ..
            }
        ));
    }

    #[tokio::test]
    async fn server_errors_are_retried_until_success() {
        let server = MockServer::start().await;
        Mock::given(url_path("/flaky"))
            .respond_with(ResponseTemplate::new(503))
            .up_to_n_times(2)
            .expect(2)
            .mount(&server)
            .await;
        Mock::given(url_path("/flaky"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "ok": 1 })))
            .expect(1)
            .mount(&server)
            .await;

        let client = client_for(&server, AuthMethod::None);
        let response = client.get("/flaky", &Params::new()).await.unwrap();
        assert_eq!(response.data, json!({ "ok": 1 }));
    }

    #[tokio::test]
    async fn retries_give_up_after_the_configured_maximum() {
        let server = MockServer::start().await;
        Mock::given(url_path("/down"))
            .respond_with(ResponseTemplate::new(500))
            .expect(3)
            .mount(&server)
            .await;

        let client = client_for(&server, AuthMethod::None);
        let err = client.get("/down", &Params::new()).await.unwrap_err();
        assert_eq!(err.status_code(), Some(500));
    }

    #[tokio::test]
    async fn rate_limit_honours_retry_after() {
        let server = MockServer::start().await;
        Mock::given(url_path("/limited"))
            .respond_with(ResponseTemplate::new(429).insert_header("Retry-After", "0"))
            .up_to_n_times(1)
            .expect(1)
            .mount(&server)
            .await;
        Mock::given(url_path("/limited"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({})))
            .expect(1)
            .mount(&server)
            .await;

        let client = client_for(&server, AuthMethod::None);
        assert!(client.get("/limited", &Params::new()).await.is_ok());
    }

    #[tokio::test]
    async fn client_errors_are_not_retried() {
        let server = MockServer::start().await;
        Mock::given(url_path("/bad"))
            .respond_with(ResponseTemplate::new(400))
            .expect(1)
            .mount(&server)
            .await;

        let client = client_for(&server, AuthMethod::None);
        assert!(client.get("/bad", &Params::new()).await.is_err());
    }

    #[tokio::test]
    async fn fetch_all_pages_follows_reported_page_count() {
        let server = MockServer::start().await;
        for (page, ids) in [("1", vec!["a", "b"]), ("2", vec!["c", "d"]), ("3", vec!["e"])] {
            Mock::given(url_path("/list"))
                .and(query_param("page", page))
                .and(query_param("size", "2"))
                .respond_with(ResponseTemplate::new(200).set_body_json(page_body(&ids, 5, 3)))
                .expect(1)
                .mount(&server)
                .await;
        }

        let client = client_for(&server, AuthMethod::None);
        let result = client
            .fetch_all_pages("/list", &Params::new(), &spec(2), 10, &CancellationToken::new())
            .await
            .unwrap();

        assert_eq!(result.items.len(), 5);
        assert_eq!(result.pages_fetched, 3);
        assert_eq!(result.total, 5);
        assert!(result.complete);
        assert_eq!(result.items[4], json!({ "id": "e" }));
    }

    #[tokio::test]
    async fn max_pages_caps_an_unbounded_source() {
        let server = MockServer::start().await;
        Mock::given(url_path("/endless"))
            .respond_with(
                ResponseTemplate::new(200).set_body_json(page_body(&["x", "y"], 1_000_000, 500_000)),
            )
            .expect(4)
            .mount(&server)
            .await;

        let client = client_for(&server, AuthMethod::None);
        let result = client
            .fetch_all_pages("/endless", &Params::new(), &spec(2), 4, &CancellationToken::new())
            .await
            .unwrap();

        assert_eq!(result.pages_fetched, 4);
        assert_eq!(result.items.len(), 8);
        assert!(!result.complete);
    }

    #[tokio::test]
    async fn empty_page_ends_the_fetch() {
        let server = MockServer::start().await;
        let mut no_totals = spec(2);
        no_totals.total_path = None;
        no_totals.total_pages_path = None;

        Mock::given(url_path("/open"))
            .and(query_param("page", "1"))
            .respond_with(ResponseTemplate::new(200).set_body_json(page_body(&["a", "b"], 0, 0)))
            .mount(&server)
            .await;
        Mock::given(url_path("/open"))
            .and(query_param("page", "2"))
            .respond_with(ResponseTemplate::new(200).set_body_json(page_body(&[], 0, 0)))
            .mount(&server)
            .await;

        let client = client_for(&server, AuthMethod::None);
        let result = client
            .fetch_all_pages("/open", &Params::new(), &no_totals, 50, &CancellationToken::new())
            .await
            .unwrap();

        assert_eq!(result.pages_fetched, 2);
        assert_eq!(result.items.len(), 2);
        assert_eq!(result.total, 2);
        assert!(result.complete);
    }

    #[tokio::test]
    async fn failed_page_aborts_the_aggregation() {
        let server = MockServer::start().await;
        Mock::given(url_path("/broken"))
            .and(query_param("page", "1"))
            .respond_with(ResponseTemplate::new(200).set_body_json(page_body(&["a", "b"], 6, 3)))
            .mount(&server)
            .await;
        Mock::given(url_path("/broken"))
            .and(query_param("page", "2"))
            .respond_with(ResponseTemplate::new(200).set_body_string("not json"))
            .mount(&server)
            .await;

        let client = client_for(&server, AuthMethod::None);
        let err = client
            .fetch_all_pages("/broken", &Params::new(), &spec(2), 10, &CancellationToken::new())
            .await
            .unwrap_err();
        assert!(matches!(err, SyncError::MalformedResponse { .. }));
    }

    #[tokio::test]
    async fn missing_item_array_is_malformed() {
        let server = MockServer::start().await;
        Mock::given(url_path("/shape"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "results": [] })))
            .mount(&server)
            .await;

        let client = client_for(&server, AuthMethod::None);
        let err = client
            .fetch_page("/shape", &Params::new(), &spec(2), 1)
            .await
            .unwrap_err();
        assert!(err.to_string().contains("data.items"));
    }

    #[tokio::test]
    async fn consecutive_pages_respect_the_delay() {
        let server = MockServer::start().await;
        Mock::given(url_path("/slow"))
            .respond_with(ResponseTemplate::new(200).set_body_json(page_body(&["a"], 3, 3)))
            .expect(3)
            .mount(&server)
            .await;

        let client = client_for(&server, AuthMethod::None).with_page_delay(Duration::from_millis(60));
        let started = Instant::now();
        let result = client
            .fetch_all_pages("/slow", &Params::new(), &spec(1), 10, &CancellationToken::new())
            .await
            .unwrap();

        assert_eq!(result.pages_fetched, 3);
        assert!(started.elapsed() >= Duration::from_millis(120));
    }

    #[tokio::test]
    async fn offset_pagination_and_derived_page_count() {
        let server = MockServer::start().await;
        let offset_spec = PageSpec {
            pagination: Pagination::Offset,
            page_param: "offset".into(),
            page_size_param: Some("limit".into()),
            total_pages_path: None,
            ..spec(2)
        };
        for (offset, ids) in [("0", vec!["a", "b"]), ("2", vec!["c"])] {
            Mock::given(url_path("/offset"))
                .and(query_param("offset", offset))
                .and(query_param("limit", "2"))
                .respond_with(ResponseTemplate::new(200).set_body_json(page_body(&ids, 3, 0)))
                .expect(1)
                .mount(&server)
                .await;
        }

        let client = client_for(&server, AuthMethod::None);
        let result = client
            .fetch_all_pages("/offset", &Params::new(), &offset_spec, 10, &CancellationToken::new())
            .await
            .unwrap();
        assert_eq!(result.items.len(), 3);
        assert_eq!(result.pages_fetched, 2);
    }

    #[tokio::test]
    async fn cancelled_token_stops_before_requesting() {
        let server = MockServer::start().await;
        Mock::given(url_path("/never"))
            .respond_with(ResponseTemplate::new(200).set_body_json(page_body(&["a"], 1, 1)))
            .expect(0)
            .mount(&server)
            .await;

        let client = client_for(&server, AuthMethod::None);
        let cancel = CancellationToken::new();
        cancel.cancel();
        let err = client
            .fetch_all_pages("/never", &Params::new(), &spec(1), 10, &cancel)
            .await
            .unwrap_err();
        assert!(matches!(err, SyncError::Cancelled));
    }

    #[tokio::test]
    async fn cache_short_circuits_identical_requests_only() {
        let server = MockServer::start().await;
        Mock::given(url_path("/cached"))
            .and(query_param("page", "1"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "n": 1 })))
            .expect(2)
            .mount(&server)
            .await;
        Mock::given(url_path("/cached"))
            .and(query_param("page", "2"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "n": 2 })))
            .expect(1)
            .mount(&server)
            .await;

        let cache = Arc::new(ResponseCache::new(Duration::from_secs(60)));
        let client = ClientFactory::new(fast_settings(), Some(cache.clone()))
            .unwrap()
            .build(&server.uri(), &BTreeMap::new(), AuthMethod::None)
            .unwrap();

        let mut first = Params::new();
        first.insert("page".into(), "1".into());
        let mut second = Params::new();
        second.insert("page".into(), "2".into());

        assert_eq!(client.get("/cached", &first).await.unwrap().data, json!({ "n": 1 }));
        assert_eq!(client.get("/cached", &first).await.unwrap().data, json!({ "n": 1 }));
        assert_eq!(client.get("/cached", &second).await.unwrap().data, json!({ "n": 2 }));
        assert_eq!(cache.len(), 2);

        cache.clear();
        client.get("/cached", &first).await.unwrap();
    }

    #[test]
    fn invalid_base_url_is_a_configuration_error() {
        let factory = ClientFactory::new(fast_settings(), None).unwrap();
        let err = factory
            .build("not a url", &BTreeMap::new(), AuthMethod::None)
            .err()
            .unwrap();
        assert!(matches!(err, SyncError::Configuration(_)));
    }

    #[test]
    fn urls_join_cleanly() {
        assert_eq!(join_url("https://a.test/api/", "/v1/x"), "https://a.test/api/v1/x");
        assert_eq!(join_url("https://a.test", ""), "https://a.test");
        assert_eq!(join_url("https://a.test", "https://b.test/y"), "https://b.test/y");
    }
}
