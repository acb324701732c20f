use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::types::Json;
use uuid::Uuid;

/// A published form. `id` doubles as the `formid`/`pk` path segment.
#[derive(Debug, Clone, sqlx::FromRow, Serialize, Deserialize)]
pub struct XForm {
    pub id: i64,
    pub user_id: Uuid,
    pub id_string: String,
    pub title: String,
    pub description: String,
    pub fields: Json<Vec<FieldDef>>,
    pub shared_data: bool,
    pub downloadable: bool,
    pub bamboo_dataset: String,
    pub tags: Vec<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl XForm {
    /// Names of the geopoint questions in definition order.
    pub fn geopoint_fields(&self) -> impl Iterator<Item = &str> {
        self.fields
            .iter()
            .filter(|f| f.field_type == "geopoint")
            .map(|f| f.name.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FieldDef {
    pub name: String,
    #[serde(rename = "type", default = "default_field_type")]
    pub field_type: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub label: Option<String>,
    #[serde(default)]
    pub required: bool,
}

fn default_field_type() -> String {
    "text".to_string()
}
