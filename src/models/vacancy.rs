use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::PgPool;
use uuid::Uuid;

use crate::error::SyncError;

/// Source-agnostic vacancy representation.
///
/// Every field is always present; fields a source does not supply hold their
/// zero value. Records are built once per fetched item and replaced, never
/// patched.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CanonicalRecord {
    pub vacancy_reference: String,
    pub source: String,
    pub title: String,
    pub description: String,
    pub short_description: String,
    pub employer: EmployerInfo,
    pub provider: TrainingProviderInfo,
    pub address: Address,
    pub addresses: Vec<Address>,
    pub course: CourseInfo,
    pub qualifications: Vec<String>,
    pub wage: WageInfo,
    pub skills: Vec<String>,
    pub things_to_consider: Vec<String>,
    pub posted_date: Option<DateTime<Utc>>,
    pub closing_date: Option<DateTime<Utc>>,
    pub start_date: Option<DateTime<Utc>>,
    pub application_url: String,
    pub application_instructions: String,
    pub number_of_positions: i64,
    pub is_disability_confident: bool,
    pub is_national_vacancy: bool,
    pub raw: serde_json::Value,
    pub imported_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EmployerInfo {
    pub name: String,
    pub description: String,
    pub website_url: String,
    pub contact_name: String,
    pub contact_email: String,
    pub contact_phone: String,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TrainingProviderInfo {
    pub name: String,
    pub ukprn: String,
    pub contact_name: String,
    pub contact_email: String,
    pub contact_phone: String,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Address {
    #[serde(alias = "addressLine1", alias = "address_line1")]
    pub line1: String,
    #[serde(alias = "addressLine2", alias = "address_line2")]
    pub line2: String,
    #[serde(alias = "addressLine3", alias = "address_line3")]
    pub line3: String,
    #[serde(alias = "addressLine4", alias = "address_line4")]
    pub line4: String,
    #[serde(alias = "postCode", alias = "post_code")]
    pub postcode: String,
    #[serde(alias = "lat")]
    pub latitude: Option<f64>,
    #[serde(alias = "lon", alias = "lng")]
    pub longitude: Option<f64>,
}

impl Address {
    pub fn is_empty(&self) -> bool {
        self == &Address::default()
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CourseInfo {
    pub title: String,
    pub level: i64,
    pub route: String,
    pub lars_code: i64,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct WageInfo {
    pub wage_type: String,
    pub amount: f64,
    pub amount_lower_bound: f64,
    pub amount_upper_bound: f64,
    pub unit: String,
    pub additional_information: String,
    pub working_week_description: String,
    pub hours_per_week: f64,
}

/// A canonical record as persisted for one task.
#[derive(Debug, Clone, Serialize)]
pub struct StoredRecord {
    pub id: Uuid,
    pub task_id: Uuid,
    pub unique_id: String,
    pub post_type: String,
    pub status: String,
    pub record: CanonicalRecord,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Input for creating or replacing a stored record.
#[derive(Debug, Clone)]
pub struct NewRecord {
    pub task_id: Uuid,
    pub unique_id: String,
    pub post_type: String,
    pub status: String,
    pub record: CanonicalRecord,
}

/// The subset of a stored record the retire pass needs.
#[derive(Debug, Clone, sqlx::FromRow)]
pub struct RecordSummary {
    pub id: Uuid,
    pub unique_id: String,
    pub updated_at: DateTime<Utc>,
}

#[derive(sqlx::FromRow)]
struct VacancyRow {
    id: Uuid,
    task_id: Uuid,
    unique_id: String,
    post_type: String,
    status: String,
    record: sqlx::types::Json<CanonicalRecord>,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl From<VacancyRow> for StoredRecord {
    fn from(row: VacancyRow) -> Self {
        StoredRecord {
            id: row.id,
            task_id: row.task_id,
            unique_id: row.unique_id,
            post_type: row.post_type,
            status: row.status,
            record: row.record.0,
            created_at: row.created_at,
            updated_at: row.updated_at,
        }
    }
}

impl StoredRecord {
    /// Most recently written record for a task and unique id.
    pub async fn find(
        pool: &PgPool,
        task_id: Uuid,
        unique_id: &str,
    ) -> Result<Option<StoredRecord>, SyncError> {
        let row = sqlx::query_as::<_, VacancyRow>(
            "SELECT * FROM vacancies WHERE task_id = $1 AND unique_id = $2 ORDER BY updated_at DESC LIMIT 1",
        )
        .bind(task_id)
        .bind(unique_id)
        .fetch_optional(pool)
        .await?;
        Ok(row.map(StoredRecord::from))
    }

    pub async fn insert(pool: &PgPool, input: &NewRecord) -> Result<Uuid, SyncError> {
        let (id,): (Uuid,) = sqlx::query_as(
            "INSERT INTO vacancies (id, task_id, unique_id, post_type, status, record) VALUES ($1, $2, $3, $4, $5, $6) RETURNING id",
        )
        .bind(Uuid::new_v4())
        .bind(input.task_id)
        .bind(&input.unique_id)
        .bind(&input.post_type)
        .bind(&input.status)
        .bind(sqlx::types::Json(&input.record))
        .fetch_one(pool)
        .await?;
        Ok(id)
    }

    pub async fn replace(pool: &PgPool, id: Uuid, input: &NewRecord) -> Result<bool, SyncError> {
        let result = sqlx::query(
            "UPDATE vacancies SET unique_id = $2, post_type = $3, status = $4, record = $5, updated_at = NOW() WHERE id = $1",
        )
        .bind(id)
        .bind(&input.unique_id)
        .bind(&input.post_type)
        .bind(&input.status)
        .bind(sqlx::types::Json(&input.record))
        .execute(pool)
        .await?;
        Ok(result.rows_affected() > 0)
    }

    pub async fn delete(pool: &PgPool, id: Uuid) -> Result<bool, SyncError> {
        let result = sqlx::query("DELETE FROM vacancies WHERE id = $1")
            .bind(id)
            .execute(pool)
            .await?;
        Ok(result.rows_affected() > 0)
    }

    pub async fn summaries(pool: &PgPool, task_id: Uuid) -> Result<Vec<RecordSummary>, SyncError> {
        let rows = sqlx::query_as::<_, RecordSummary>(
            "SELECT id, unique_id, updated_at FROM vacancies WHERE task_id = $1",
        )
        .bind(task_id)
        .fetch_all(pool)
        .await?;
        Ok(rows)
    }
}
