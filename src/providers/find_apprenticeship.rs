use std::collections::BTreeMap;
use std::sync::{PoisonError, RwLock};
use std::time::Duration;

use async_trait::async_trait;
use percent_encoding::{AsciiSet, NON_ALPHANUMERIC, utf8_percent_encode};
use serde_json::{Value, json};
use tokio_util::sync::CancellationToken;

use crate::client::{
    ApiClient, AuthMethod, ClientFactory, HttpMethod, Page, PageSpec, PagedItems, Pagination,
    Params,
};
use crate::error::SyncError;
use crate::mapping::schema::set_path;
use crate::mapping::{self, FieldMapper};
use crate::models::vacancy::CanonicalRecord;

use super::schema::{ConfigSchema, FieldType, ProviderConfig};
use super::{Endpoint, PageRequest, Provider, RateLimits, delay_for_rate};

pub const PROVIDER_ID: &str = "find-apprenticeship";
const DEFAULT_BASE_URL: &str = "https://api.apprenticeships.education.gov.uk/vacancies";
const SUBSCRIPTION_HEADER: &str = "Ocp-Apim-Subscription-Key";

/// Unreserved characters (RFC 3986) stay as they are in path segments.
const PATH_SEGMENT_SET: &AsciiSet = &NON_ALPHANUMERIC
    .remove(b'-')
    .remove(b'_')
    .remove(b'.')
    .remove(b'~');

/// Canonical field → Display Advert API path.
const DEFAULT_MAPPINGS: &[(&str, &str)] = &[
    ("vacancy_reference", "vacancyReference"),
    ("title", "title"),
    ("description", "description"),
    ("short_description", "shortDescription"),
    ("employer.name", "employerName"),
    ("employer.description", "employerDescription"),
    ("employer.website_url", "employerWebsiteUrl"),
    ("employer.contact_name", "employerContactName"),
    ("employer.contact_email", "employerContactEmail"),
    ("employer.contact_phone", "employerContactPhone"),
    ("provider.name", "providerName"),
    ("provider.ukprn", "ukprn"),
    ("provider.contact_name", "providerContactName"),
    ("provider.contact_email", "providerContactEmail"),
    ("provider.contact_phone", "providerContactPhone"),
    ("addresses", "addresses"),
    ("course.title", "course.title"),
    ("course.level", "course.level"),
    ("course.route", "course.route"),
    ("course.lars_code", "course.larsCode"),
    ("wage.wage_type", "wage.wageType"),
    ("wage.amount", "wage.wageAmount"),
    ("wage.amount_lower_bound", "wage.wageAmountLowerBound"),
    ("wage.amount_upper_bound", "wage.wageAmountUpperBound"),
    ("wage.unit", "wage.wageUnit"),
    ("wage.additional_information", "wage.wageAdditionalInformation"),
    ("wage.working_week_description", "wage.workingWeekDescription"),
    ("wage.hours_per_week", "hoursPerWeek"),
    ("skills", "skills"),
    ("things_to_consider", "thingsToConsider"),
    ("posted_date", "postedDate"),
    ("closing_date", "closingDate"),
    ("start_date", "startDate"),
    ("application_url", "applicationUrl"),
    ("application_instructions", "applicationInstructions"),
    ("number_of_positions", "numberOfPositions"),
    ("is_disability_confident", "isDisabilityConfident"),
    ("is_national_vacancy", "isNationalVacancy"),
];

/// Typed settings, converted once from the validated config.
#[derive(Debug, Clone, PartialEq)]
struct Settings {
    api_key: String,
    base_url: String,
    api_version: String,
    page_size: u32,
    requests_per_minute: u32,
    filters: Vec<(String, String)>,
}

impl TryFrom<&ProviderConfig> for Settings {
    type Error = SyncError;

    fn try_from(config: &ProviderConfig) -> Result<Self, Self::Error> {
        let api_key = config
            .str("api_key")
            .filter(|k| !k.is_empty())
            .ok_or_else(|| SyncError::Configuration("api_key is required".into()))?
            .to_string();

        let mut filters = Vec::new();
        for entry in config.list("filters") {
            match entry.split_once('=') {
                Some((key, value)) if !key.trim().is_empty() => {
                    filters.push((key.trim().to_string(), value.trim().to_string()));
                }
                _ => tracing::warn!("Ignoring malformed filter '{entry}', expected key=value"),
            }
        }

        Ok(Settings {
            api_key,
            base_url: config.str("base_url").unwrap_or(DEFAULT_BASE_URL).to_string(),
            api_version: config.str("api_version").unwrap_or("1").to_string(),
            page_size: config
                .u64("page_size")
                .map(|n| n.clamp(1, 100) as u32)
                .unwrap_or(50),
            requests_per_minute: config
                .u64("requests_per_minute")
                .map(|n| n.min(u64::from(u32::MAX)) as u32)
                .unwrap_or(150),
            filters,
        })
    }
}

/// UK apprenticeship vacancies from the Display Advert API.
pub struct FindApprenticeship {
    clients: ClientFactory,
    settings: RwLock<Option<Settings>>,
    mapper: FieldMapper,
}

impl FindApprenticeship {
    pub fn new(clients: ClientFactory) -> Self {
        let mappings: BTreeMap<String, String> = DEFAULT_MAPPINGS
            .iter()
            .map(|(target, source)| (target.to_string(), source.to_string()))
            .collect();
        Self {
            clients,
            settings: RwLock::new(None),
            mapper: FieldMapper::new(&mappings, PROVIDER_ID),
        }
    }

    fn settings(&self) -> Result<Settings, SyncError> {
        self.settings
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
            .ok_or_else(|| {
                SyncError::Configuration(format!("Provider '{PROVIDER_ID}' is not configured"))
            })
    }

    fn client(&self, settings: &Settings) -> Result<ApiClient, SyncError> {
        let mut headers = BTreeMap::new();
        headers.insert("X-Version".to_string(), settings.api_version.clone());
        let client = self.clients.build(
            &settings.base_url,
            &headers,
            AuthMethod::ApiKey {
                header: SUBSCRIPTION_HEADER.to_string(),
                value: settings.api_key.clone(),
            },
        )?;
        Ok(client.with_page_delay(Duration::from_millis(delay_for_rate(
            settings.requests_per_minute,
        ))))
    }

    fn page_spec(page_size: u32) -> PageSpec {
        PageSpec {
            method: HttpMethod::Get,
            pagination: Pagination::Page,
            page_param: "PageNumber".to_string(),
            page_size_param: Some("PageSize".to_string()),
            page_size,
            items_path: "vacancies".to_string(),
            total_path: Some("total".to_string()),
            total_pages_path: Some("totalPages".to_string()),
        }
    }

    fn base_params(settings: &Settings) -> Params {
        settings.filters.iter().cloned().collect()
    }
}

#[async_trait]
impl Provider for FindApprenticeship {
    fn id(&self) -> &str {
        PROVIDER_ID
    }

    fn name(&self) -> &str {
        "Find an Apprenticeship"
    }

    fn description(&self) -> &str {
        "Apprenticeship vacancies published through the Display Advert API"
    }

    fn base_url(&self) -> String {
        self.settings
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .as_ref()
            .map(|s| s.base_url.clone())
            .unwrap_or_else(|| DEFAULT_BASE_URL.to_string())
    }

    fn config_schema(&self) -> ConfigSchema {
        ConfigSchema::new()
            .required("api_key", FieldType::String, "Display Advert API subscription key")
            .optional(
                "base_url",
                FieldType::Url,
                Some(json!(DEFAULT_BASE_URL)),
                "API base URL",
            )
            .optional("api_version", FieldType::String, Some(json!("1")), "X-Version header")
            .optional("page_size", FieldType::Int, Some(json!(50)), "Vacancies per page")
            .optional(
                "requests_per_minute",
                FieldType::Int,
                Some(json!(150)),
                "Request budget per minute",
            )
            .optional(
                "filters",
                FieldType::Array,
                None,
                "Extra search parameters as key=value",
            )
    }

    fn set_config(&self, raw: &Value) -> ProviderConfig {
        let config = self.config_schema().sanitize(raw);
        let settings = if self.config_schema().is_satisfied_by(&config) {
            Settings::try_from(&config).ok()
        } else {
            None
        };
        *self.settings.write().unwrap_or_else(PoisonError::into_inner) = settings;
        config
    }

    fn is_configured(&self) -> bool {
        self.settings
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .is_some()
    }

    async fn fetch_page(&self, request: &PageRequest) -> Result<Page, SyncError> {
        let settings = self.settings()?;
        let client = self.client(&settings)?;
        let mut params = Self::base_params(&settings);
        params.extend(request.params.clone());
        let spec = Self::page_spec(request.page_size.unwrap_or(settings.page_size));
        client.fetch_page("/vacancy", &params, &spec, request.page).await
    }

    async fn fetch_all(&self, max_pages: u32, cancel: &CancellationToken) -> Result<PagedItems, SyncError> {
        let settings = self.settings()?;
        let client = self.client(&settings)?;
        let spec = Self::page_spec(settings.page_size);
        client
            .fetch_all_pages("/vacancy", &Self::base_params(&settings), &spec, max_pages, cancel)
            .await
    }

    async fn fetch_one(&self, reference: &str) -> Result<Value, SyncError> {
        let reference = reference.trim();
        if reference.is_empty() {
            return Err(SyncError::Configuration("A vacancy reference is required".into()));
        }
        let settings = self.settings()?;
        let client = self.client(&settings)?;
        let endpoint = format!(
            "/vacancy/{}",
            utf8_percent_encode(reference, PATH_SEGMENT_SET)
        );
        match client.get(&endpoint, &Params::new()).await {
            Ok(response) => Ok(response.data),
            Err(SyncError::Http { status: 404, .. }) => {
                Err(SyncError::NotFound(format!("Vacancy '{reference}' not found")))
            }
            Err(e) => Err(e),
        }
    }

    fn normalize(&self, raw: &Value) -> Result<CanonicalRecord, SyncError> {
        let mut candidate = self.mapper.candidate(raw);
        let qualifications = format_qualifications(raw);
        if !qualifications.is_empty() {
            set_path(&mut candidate, "qualifications", json!(qualifications));
        }
        if raw.get("applicationUrl").is_none_or(Value::is_null)
            && let Some(url) = raw.get("vacancyUrl")
        {
            set_path(&mut candidate, "application_url", url.clone());
        }
        mapping::finish(candidate, PROVIDER_ID, raw)
    }

    fn unique_id_path(&self) -> &str {
        "vacancyReference"
    }

    fn supported_endpoints(&self) -> Vec<Endpoint> {
        vec![
            Endpoint {
                method: HttpMethod::Get,
                path: "/vacancy",
                description: "Paged vacancy search",
            },
            Endpoint {
                method: HttpMethod::Get,
                path: "/vacancy/{reference}",
                description: "Single vacancy by reference",
            },
        ]
    }

    fn rate_limits(&self) -> RateLimits {
        let requests_per_minute = self
            .settings
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .as_ref()
            .map(|s| s.requests_per_minute)
            .unwrap_or(150);
        RateLimits {
            requests_per_minute,
            delay_ms: delay_for_rate(requests_per_minute),
        }
    }
}

/// "GCSE in Maths (grade 4, essential)" style lines.
fn format_qualifications(raw: &Value) -> Vec<String> {
    let Some(items) = raw.get("qualifications").and_then(Value::as_array) else {
        return Vec::new();
    };
    items
        .iter()
        .filter_map(|q| {
            let field = |name: &str| {
                q.get(name)
                    .and_then(Value::as_str)
                    .map(str::trim)
                    .filter(|s| !s.is_empty())
            };
            let mut line = match (field("qualificationType"), field("subject")) {
                (Some(kind), Some(subject)) => format!("{kind} in {subject}"),
                (Some(only), None) | (None, Some(only)) => only.to_string(),
                (None, None) => return q.as_str().map(str::to_string),
            };
            let extras: Vec<String> = [
                field("grade").map(|g| format!("grade {g}")),
                field("weighting").map(str::to_lowercase),
            ]
            .into_iter()
            .flatten()
            .collect();
            if !extras.is_empty() {
                line.push_str(&format!(" ({})", extras.join(", ")));
            }
            Some(line)
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::client::HttpSettings;
    use pretty_assertions::assert_eq;
    use wiremock::matchers::{header, method, path, query_param};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn provider() -> FindApprenticeship {
        FindApprenticeship::new(ClientFactory::new(HttpSettings::default(), None).unwrap())
    }

    fn sample_vacancy() -> Value {
        json!({
            "vacancyReference": "VAC1000012345",
            "title": "Apprentice Electrician",
            "description": "Learn the trade",
            "employerName": "Sparks Ltd",
            "employerWebsiteUrl": "https://sparks.test",
            "providerName": "Trade College",
            "ukprn": 10012345,
            "addresses": [
                { "addressLine1": "1 Volt Way", "postcode": "AB1 2CD", "latitude": 52.1, "longitude": -1.5 }
            ],
            "course": { "title": "Electrotechnical", "level": 3, "route": "Construction", "larsCode": 123 },
            "wage": { "wageType": "Custom", "wageAmount": "15000", "wageUnit": "Annually" },
            "hoursPerWeek": 37.5,
            "qualifications": [
                { "qualificationType": "GCSE", "subject": "Maths", "grade": "4", "weighting": "Essential" },
                { "qualificationType": "A Level", "subject": "Physics", "weighting": "Desired" }
            ],
            "postedDate": "2025-03-01T09:00:00",
            "closingDate": "2025-04-01",
            "vacancyUrl": "https://findapprenticeship.test/VAC1000012345",
            "numberOfPositions": 2,
            "isDisabilityConfident": true
        })
    }

    #[test]
    fn required_key_gates_configuration() {
        let p = provider();
        assert!(!p.is_configured());

        p.set_config(&json!({ "api_key": "" }));
        assert!(!p.is_configured());

        let config = p.set_config(&json!({ "api_key": "k", "page_size": "20" }));
        assert!(p.is_configured());
        assert_eq!(config.u64("page_size"), Some(20));
        assert_eq!(config.str("api_version"), Some("1"));
        assert_eq!(p.rate_limits(), RateLimits { requests_per_minute: 150, delay_ms: 400 });
    }

    #[test]
    fn normalizes_display_advert_vacancies() {
        let p = provider();
        let record = p.normalize(&sample_vacancy()).unwrap();

        assert_eq!(record.source, PROVIDER_ID);
        assert_eq!(record.vacancy_reference, "VAC1000012345");
        assert_eq!(record.employer.name, "Sparks Ltd");
        assert_eq!(record.provider.ukprn, "10012345");
        assert_eq!(record.address.postcode, "AB1 2CD");
        assert_eq!(record.address.latitude, Some(52.1));
        assert_eq!(record.course.level, 3);
        assert_eq!(record.course.lars_code, 123);
        assert_eq!(record.wage.amount, 15000.0);
        assert_eq!(record.wage.hours_per_week, 37.5);
        assert_eq!(
            record.qualifications,
            vec![
                "GCSE in Maths (grade 4, essential)".to_string(),
                "A Level in Physics (desired)".to_string()
            ]
        );
        assert_eq!(record.application_url, "https://findapprenticeship.test/VAC1000012345");
        assert_eq!(record.number_of_positions, 2);
        assert!(record.is_disability_confident);
        assert!(!record.is_national_vacancy);
        assert!(record.closing_date.is_some());
    }

    #[tokio::test]
    async fn fetches_pages_with_subscription_headers() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/vacancy"))
            .and(header(SUBSCRIPTION_HEADER, "secret"))
            .and(header("X-Version", "2"))
            .and(query_param("PageNumber", "1"))
            .and(query_param("PageSize", "10"))
            .and(query_param("Sort", "AgeDesc"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "vacancies": [sample_vacancy()],
                "total": 1,
                "totalFiltered": 1,
                "totalPages": 1
            })))
            .expect(1)
            .mount(&server)
            .await;

        let p = provider();
        p.set_config(&json!({
            "api_key": "secret",
            "base_url": server.uri(),
            "api_version": "2",
            "page_size": 10,
            "requests_per_minute": 6000,
            "filters": ["Sort=AgeDesc"]
        }));

        let result = p.fetch_all(5, &CancellationToken::new()).await.unwrap();
        assert_eq!(result.items.len(), 1);
        assert!(result.complete);
    }

    #[tokio::test]
    async fn fetch_one_encodes_the_reference_and_maps_404() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/vacancy/VAC1"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "vacancyReference": "VAC1" })))
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/vacancy/GONE"))
            .respond_with(ResponseTemplate::new(404))
            .mount(&server)
            .await;

        let p = provider();
        p.set_config(&json!({ "api_key": "k", "base_url": server.uri() }));

        let item = p.fetch_one("VAC1").await.unwrap();
        assert_eq!(item["vacancyReference"], json!("VAC1"));
        assert!(matches!(p.fetch_one("GONE").await, Err(SyncError::NotFound(_))));
    }

    #[tokio::test]
    async fn connection_test_reports_auth_failures() {
        let server = MockServer::start().await;
        Mock::given(path("/vacancy"))
            .respond_with(ResponseTemplate::new(401).set_body_string("Access denied due to invalid subscription key"))
            .mount(&server)
            .await;

        let p = provider();
        p.set_config(&json!({ "api_key": "wrong", "base_url": server.uri() }));
        let check = p.test_connection().await;
        assert!(!check.success);
        assert!(check.message.contains("401"));
    }
}
