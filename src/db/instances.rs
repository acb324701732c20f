use sqlx::{PgPool, Postgres, QueryBuilder};
use uuid::Uuid;

use crate::data::query::{DataQuery, Filter};
use crate::models::Instance;

/// Every instance read goes through this projection so the submitter's
/// username is available for rendering and filtering.
const SELECT_INSTANCE: &str = "SELECT i.*, u.username AS submitter
     FROM instances i LEFT JOIN users u ON u.id = i.submitted_by";

pub struct NewInstance<'a> {
    pub xform_id: i64,
    pub submitted_by: Option<Uuid>,
    pub uuid: &'a str,
    pub json: &'a serde_json::Value,
    pub latitude: Option<f64>,
    pub longitude: Option<f64>,
    pub tags: &'a [String],
    pub metadata: &'a serde_json::Value,
}

/// Insert a submission. `None` when the form already holds `new.uuid`.
pub async fn create<'e, E: sqlx::PgExecutor<'e>>(
    executor: E,
    new: &NewInstance<'_>,
) -> Result<Option<Instance>, sqlx::Error> {
    sqlx::query_as::<_, Instance>(
        "WITH ins AS (
            INSERT INTO instances (xform_id, submitted_by, uuid, json, latitude, longitude, tags, metadata)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
            ON CONFLICT (xform_id, uuid) DO NOTHING
            RETURNING *
         )
         SELECT ins.*, u.username AS submitter FROM ins LEFT JOIN users u ON u.id = ins.submitted_by",
    )
    .bind(new.xform_id)
    .bind(new.submitted_by)
    .bind(new.uuid)
    .bind(new.json)
    .bind(new.latitude)
    .bind(new.longitude)
    .bind(new.tags)
    .bind(new.metadata)
    .fetch_optional(executor)
    .await
}

/// Existing submission with the same uuid, deleted or not.
pub async fn find_id_by_uuid(
    pool: &PgPool,
    xform_id: i64,
    uuid: &str,
) -> Result<Option<i64>, sqlx::Error> {
    sqlx::query_scalar("SELECT id FROM instances WHERE xform_id = $1 AND uuid = $2")
        .bind(xform_id)
        .bind(uuid)
        .fetch_optional(pool)
        .await
}

pub async fn find(pool: &PgPool, xform_id: i64, id: i64) -> Result<Option<Instance>, sqlx::Error> {
    sqlx::query_as::<_, Instance>(&format!(
        "{SELECT_INSTANCE} WHERE i.xform_id = $1 AND i.id = $2 AND i.deleted_at IS NULL"
    ))
    .bind(xform_id)
    .bind(id)
    .fetch_optional(pool)
    .await
}

pub async fn list(
    pool: &PgPool,
    xform_id: i64,
    query: &DataQuery,
) -> Result<Vec<Instance>, sqlx::Error> {
    let mut qb = QueryBuilder::<Postgres>::new(SELECT_INSTANCE);
    push_scope(&mut qb, xform_id, &query.filter);
    query.push_paging(&mut qb);

    qb.build_query_as::<Instance>().fetch_all(pool).await
}

pub async fn count(pool: &PgPool, xform_id: i64, filter: &Filter) -> Result<i64, sqlx::Error> {
    let mut qb = QueryBuilder::<Postgres>::new(
        "SELECT COUNT(*) FROM instances i LEFT JOIN users u ON u.id = i.submitted_by",
    );
    push_scope(&mut qb, xform_id, filter);

    qb.build_query_scalar::<i64>().fetch_one(pool).await
}

fn push_scope(qb: &mut QueryBuilder<'_, Postgres>, xform_id: i64, filter: &Filter) {
    qb.push(" WHERE i.xform_id = ")
        .push_bind(xform_id)
        .push(" AND i.deleted_at IS NULL");
    filter.push_sql(qb);
}

pub async fn soft_delete(pool: &PgPool, xform_id: i64, id: i64) -> Result<bool, sqlx::Error> {
    let result = sqlx::query(
        "UPDATE instances SET deleted_at = now(), updated_at = now()
         WHERE xform_id = $1 AND id = $2 AND deleted_at IS NULL",
    )
    .bind(xform_id)
    .bind(id)
    .execute(pool)
    .await?;
    Ok(result.rows_affected() > 0)
}

pub async fn add_tags(pool: &PgPool, id: i64, tags: &[String]) -> Result<Vec<String>, sqlx::Error> {
    sqlx::query_scalar(
        "UPDATE instances
         SET tags = ARRAY(SELECT DISTINCT t FROM unnest(tags || $2::text[]) AS t ORDER BY t),
             updated_at = now()
         WHERE id = $1 RETURNING tags",
    )
    .bind(id)
    .bind(tags)
    .fetch_one(pool)
    .await
}

pub async fn remove_tag(pool: &PgPool, id: i64, tag: &str) -> Result<Vec<String>, sqlx::Error> {
    sqlx::query_scalar(
        "UPDATE instances SET tags = array_remove(tags, $2), updated_at = now()
         WHERE id = $1 RETURNING tags",
    )
    .bind(id)
    .bind(tag)
    .fetch_one(pool)
    .await
}
