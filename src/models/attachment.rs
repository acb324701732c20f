use chrono::{DateTime, Utc};
use serde::Serialize;

#[derive(Debug, Clone, sqlx::FromRow)]
pub struct Attachment {
    pub id: i64,
    pub instance_id: i64,
    pub filename: String,
    pub mimetype: String,
    pub size: i64,
    pub content: Vec<u8>,
    pub created_at: DateTime<Utc>,
}

/// Attachment row without its payload, for listing.
#[derive(Debug, Clone, sqlx::FromRow, Serialize)]
pub struct AttachmentInfo {
    pub id: i64,
    pub instance_id: i64,
    pub filename: String,
    pub mimetype: String,
    pub size: i64,
}
