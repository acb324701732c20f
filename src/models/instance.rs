use chrono::{DateTime, Utc};
use serde::Serialize;
use uuid::Uuid;

/// A stored submission row. Rendered to clients through `data::render`.
#[derive(Debug, Clone, sqlx::FromRow, Serialize)]
pub struct Instance {
    pub id: i64,
    pub xform_id: i64,
    pub submitted_by: Option<Uuid>,
    pub uuid: String,
    pub json: serde_json::Value,
    pub status: String,
    pub latitude: Option<f64>,
    pub longitude: Option<f64>,
    pub tags: Vec<String>,
    #[serde(skip_serializing)]
    pub metadata: serde_json::Value,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub deleted_at: Option<DateTime<Utc>>,
    /// Username of `submitted_by`, joined in by every read.
    pub submitter: Option<String>,
}
