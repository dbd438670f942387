use std::collections::BTreeMap;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::PgPool;
use uuid::Uuid;

use crate::client::{AuthMethod, HttpMethod, PageSpec, Pagination};
use crate::error::SyncError;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TaskStatus {
    #[default]
    Draft,
    Active,
    Inactive,
}

impl TaskStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            TaskStatus::Draft => "draft",
            TaskStatus::Active => "active",
            TaskStatus::Inactive => "inactive",
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AuthType {
    #[default]
    None,
    ApiKey,
    Bearer,
    Basic,
    Query,
}

/// What to do when a fetched item's unique id already has a record.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum DuplicateAction {
    #[default]
    Update,
    Skip,
    #[serde(alias = "create_new")]
    CreateNew,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ScheduleFrequency {
    Hourly,
    #[serde(alias = "twice_daily")]
    TwiceDaily,
    #[default]
    Daily,
    Weekly,
}

impl ScheduleFrequency {
    pub fn interval(&self) -> Duration {
        const HOUR: u64 = 60 * 60;
        match self {
            ScheduleFrequency::Hourly => Duration::from_secs(HOUR),
            ScheduleFrequency::TwiceDaily => Duration::from_secs(12 * HOUR),
            ScheduleFrequency::Daily => Duration::from_secs(24 * HOUR),
            ScheduleFrequency::Weekly => Duration::from_secs(7 * 24 * HOUR),
        }
    }
}

/// Configuration for one import: where to fetch, how to map, and how to
/// reconcile. Serialized as-is into the `definition` column.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ImportTask {
    pub id: Uuid,
    pub name: String,
    pub description: String,
    pub status: TaskStatus,

    /// Registered provider that fetches and normalizes for this task. When
    /// set, the `api_*` fields and field mappings are not used.
    pub provider_id: Option<String>,

    pub api_base_url: String,
    pub api_endpoint: String,
    pub api_method: HttpMethod,
    pub api_headers: BTreeMap<String, String>,
    pub api_params: BTreeMap<String, String>,
    pub api_auth_type: AuthType,
    pub api_auth_key: String,
    pub api_auth_value: String,

    pub response_format: String,
    pub data_path: String,
    pub total_path: String,
    pub total_pages_path: String,
    pub pagination_type: Pagination,
    pub page_param: String,
    pub page_size_param: String,
    pub page_size: u32,
    pub max_pages: Option<u32>,

    pub field_mappings: BTreeMap<String, String>,
    pub unique_id_field: String,
    pub transforms_enabled: bool,
    pub transforms_code: String,

    pub target_post_type: String,
    pub post_status: String,
    pub duplicate_action: DuplicateAction,
    pub retire_missing: bool,
    pub retention_days: Option<u32>,

    pub schedule_enabled: bool,
    pub schedule_frequency: ScheduleFrequency,

    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Default for ImportTask {
    fn default() -> Self {
        Self {
            id: Uuid::nil(),
            name: String::new(),
            description: String::new(),
            status: TaskStatus::Draft,
            provider_id: None,
            api_base_url: String::new(),
            api_endpoint: String::new(),
            api_method: HttpMethod::Get,
            api_headers: BTreeMap::new(),
            api_params: BTreeMap::new(),
            api_auth_type: AuthType::None,
            api_auth_key: String::new(),
            api_auth_value: String::new(),
            response_format: "json".to_string(),
            data_path: String::new(),
            total_path: String::new(),
            total_pages_path: String::new(),
            pagination_type: Pagination::Page,
            page_param: "page".to_string(),
            page_size_param: String::new(),
            page_size: 50,
            max_pages: None,
            field_mappings: BTreeMap::new(),
            unique_id_field: String::new(),
            transforms_enabled: false,
            transforms_code: String::new(),
            target_post_type: "vacancy".to_string(),
            post_status: "draft".to_string(),
            duplicate_action: DuplicateAction::Update,
            retire_missing: false,
            retention_days: None,
            schedule_enabled: false,
            schedule_frequency: ScheduleFrequency::Daily,
            created_at: DateTime::<Utc>::UNIX_EPOCH,
            updated_at: DateTime::<Utc>::UNIX_EPOCH,
        }
    }
}

impl ImportTask {
    /// Check the task is runnable. Failures are configuration errors and are
    /// raised before any HTTP traffic.
    pub fn validate(&self) -> Result<(), SyncError> {
        let fail = |msg: String| Err(SyncError::Configuration(msg));

        if self.name.trim().is_empty() {
            return fail("Task name is required".into());
        }
        if !self.response_format.eq_ignore_ascii_case("json") {
            return fail(format!(
                "Unsupported response format '{}'",
                self.response_format
            ));
        }
        if self.retire_missing && self.retention_days.is_none() {
            return fail("retire_missing requires retention_days".into());
        }
        if self.transforms_enabled && self.transforms_code.trim().is_empty() {
            return fail("Transforms are enabled but no transform code is set".into());
        }
        if self.max_pages == Some(0) {
            return fail("max_pages must be at least 1".into());
        }
        if self.provider_id.is_some() {
            return Ok(());
        }

        match url::Url::parse(self.api_base_url.trim()) {
            Ok(url) if matches!(url.scheme(), "http" | "https") => {}
            _ => {
                return fail(format!(
                    "api_base_url '{}' is not an absolute http(s) URL",
                    self.api_base_url
                ));
            }
        }
        if self.unique_id_field.trim().is_empty() {
            return fail("unique_id_field is required".into());
        }
        if self.field_mappings.is_empty() {
            return fail("At least one field mapping is required".into());
        }
        if self.pagination_type != Pagination::None {
            if self.page_param.trim().is_empty() {
                return fail("page_param is required for paginated sources".into());
            }
            if self.page_size == 0 {
                return fail("page_size must be at least 1".into());
            }
        }
        let needs_key = matches!(
            self.api_auth_type,
            AuthType::Basic | AuthType::Query
        );
        if needs_key && self.api_auth_key.trim().is_empty() {
            return fail("api_auth_key is required for this auth type".into());
        }
        if self.api_auth_type != AuthType::None && self.api_auth_value.is_empty() {
            return fail("api_auth_value is required when authentication is enabled".into());
        }
        Ok(())
    }

    pub fn auth_method(&self) -> AuthMethod {
        let key = self.api_auth_key.trim();
        let value = self.api_auth_value.clone();
        match self.api_auth_type {
            AuthType::None => AuthMethod::None,
            AuthType::ApiKey => AuthMethod::ApiKey {
                header: if key.is_empty() { "X-API-Key".to_string() } else { key.to_string() },
                value,
            },
            AuthType::Bearer => AuthMethod::Bearer { token: value },
            AuthType::Basic => AuthMethod::Basic {
                username: key.to_string(),
                password: value,
            },
            AuthType::Query => AuthMethod::Query {
                param: key.to_string(),
                value,
            },
        }
    }

    pub fn page_spec(&self) -> PageSpec {
        let optional = |s: &str| {
            let s = s.trim();
            (!s.is_empty()).then(|| s.to_string())
        };
        PageSpec {
            method: self.api_method,
            pagination: self.pagination_type,
            page_param: self.page_param.trim().to_string(),
            page_size_param: optional(&self.page_size_param),
            page_size: self.page_size,
            items_path: self.data_path.trim().to_string(),
            total_path: optional(&self.total_path),
            total_pages_path: optional(&self.total_pages_path),
        }
    }

    pub fn is_schedulable(&self) -> bool {
        self.status == TaskStatus::Active && self.schedule_enabled
    }
}

#[derive(sqlx::FromRow)]
struct TaskRow {
    id: Uuid,
    definition: sqlx::types::Json<ImportTask>,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl From<TaskRow> for ImportTask {
    fn from(row: TaskRow) -> Self {
        ImportTask {
            id: row.id,
            created_at: row.created_at,
            updated_at: row.updated_at,
            ..row.definition.0
        }
    }
}

const TASK_COLUMNS: &str = "id, definition, created_at, updated_at";

impl ImportTask {
    pub async fn list(pool: &PgPool) -> Result<Vec<ImportTask>, SyncError> {
        let rows = sqlx::query_as::<_, TaskRow>(&format!(
            "SELECT {TASK_COLUMNS} FROM import_tasks ORDER BY name"
        ))
        .fetch_all(pool)
        .await?;
        Ok(rows.into_iter().map(ImportTask::from).collect())
    }

    pub async fn get(pool: &PgPool, id: Uuid) -> Result<Option<ImportTask>, SyncError> {
        let row = sqlx::query_as::<_, TaskRow>(&format!(
            "SELECT {TASK_COLUMNS} FROM import_tasks WHERE id = $1"
        ))
        .bind(id)
        .fetch_optional(pool)
        .await?;
        Ok(row.map(ImportTask::from))
    }

    pub async fn insert(pool: &PgPool, task: &ImportTask) -> Result<ImportTask, SyncError> {
        let row = sqlx::query_as::<_, TaskRow>(&format!(
            "INSERT INTO import_tasks (id, name, status, definition) VALUES ($1, $2, $3, $4)
             RETURNING {TASK_COLUMNS}"
        ))
        .bind(task.id)
        .bind(&task.name)
        .bind(task.status.as_str())
        .bind(sqlx::types::Json(task))
        .fetch_one(pool)
        .await?;
        Ok(row.into())
    }

    pub async fn replace(pool: &PgPool, task: &ImportTask) -> Result<Option<ImportTask>, SyncError> {
        let row = sqlx::query_as::<_, TaskRow>(&format!(
            "UPDATE import_tasks SET name = $2, status = $3, definition = $4, updated_at = NOW()
             WHERE id = $1 RETURNING {TASK_COLUMNS}"
        ))
        .bind(task.id)
        .bind(&task.name)
        .bind(task.status.as_str())
        .bind(sqlx::types::Json(task))
        .fetch_optional(pool)
        .await?;
        Ok(row.map(ImportTask::from))
    }

    pub async fn delete(pool: &PgPool, id: Uuid) -> Result<bool, SyncError> {
        let result = sqlx::query("DELETE FROM import_tasks WHERE id = $1")
            .bind(id)
            .execute(pool)
            .await?;
        Ok(result.rows_affected() > 0)
    }
}
