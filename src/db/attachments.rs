use std::collections::HashMap;

use sqlx::PgPool;

use crate::models::{Attachment, AttachmentInfo};

pub async fn create<'e, E: sqlx::PgExecutor<'e>>(
    executor: E,
    instance_id: i64,
    filename: &str,
    mimetype: &str,
    content: &[u8],
) -> Result<AttachmentInfo, sqlx::Error> {
    sqlx::query_as::<_, AttachmentInfo>(
        "INSERT INTO attachments (instance_id, filename, mimetype, size, content)
         VALUES ($1, $2, $3, $4, $5)
         RETURNING id, instance_id, filename, mimetype, size",
    )
    .bind(instance_id)
    .bind(filename)
    .bind(mimetype)
    .bind(content.len() as i64)
    .bind(content)
    .fetch_one(executor)
    .await
}

/// Attachment listings for a page of instances, keyed by instance id.
pub async fn list_for_instances(
    pool: &PgPool,
    instance_ids: &[i64],
) -> Result<HashMap<i64, Vec<AttachmentInfo>>, sqlx::Error> {
    if instance_ids.is_empty() {
        return Ok(HashMap::new());
    }

    let rows = sqlx::query_as::<_, AttachmentInfo>(
        "SELECT id, instance_id, filename, mimetype, size FROM attachments
         WHERE instance_id = ANY($1) ORDER BY id",
    )
    .bind(instance_ids)
    .fetch_all(pool)
    .await?;

    let mut grouped: HashMap<i64, Vec<AttachmentInfo>> = HashMap::new();
    for row in rows {
        grouped.entry(row.instance_id).or_default().push(row);
    }
    Ok(grouped)
}

pub async fn find(
    pool: &PgPool,
    instance_id: i64,
    id: i64,
) -> Result<Option<Attachment>, sqlx::Error> {
    sqlx::query_as::<_, Attachment>(
        "SELECT * FROM attachments WHERE instance_id = $1 AND id = $2",
    )
    .bind(instance_id)
    .bind(id)
    .fetch_optional(pool)
    .await
}
