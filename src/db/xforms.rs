use sqlx::PgPool;
use sqlx::types::Json;
use uuid::Uuid;

use crate::models::{FieldDef, XForm};

/// How a `formid`/`pk` path segment addresses a form.
#[derive(Debug, Clone, PartialEq)]
pub enum FormKey {
    Id(i64),
    IdString(String),
}

impl FormKey {
    pub fn parse(raw: &str) -> Self {
        match raw.parse::<i64>() {
            Ok(id) => FormKey::Id(id),
            Err(_) => FormKey::IdString(raw.to_string()),
        }
    }
}

pub struct NewXForm<'a> {
    pub id_string: &'a str,
    pub title: &'a str,
    pub description: &'a str,
    pub fields: &'a [FieldDef],
    pub shared_data: bool,
    pub downloadable: bool,
}

pub async fn create(pool: &PgPool, user_id: Uuid, form: &NewXForm<'_>) -> Result<XForm, sqlx::Error> {
    sqlx::query_as::<_, XForm>(
        "INSERT INTO xforms (user_id, id_string, title, description, fields, shared_data, downloadable)
         VALUES ($1, $2, $3, $4, $5, $6, $7) RETURNING *",
    )
    .bind(user_id)
    .bind(form.id_string)
    .bind(form.title)
    .bind(form.description)
    .bind(Json(form.fields))
    .bind(form.shared_data)
    .bind(form.downloadable)
    .fetch_one(pool)
    .await
}

pub async fn list_by_user(pool: &PgPool, user_id: Uuid) -> Result<Vec<XForm>, sqlx::Error> {
    sqlx::query_as::<_, XForm>("SELECT * FROM xforms WHERE user_id = $1 ORDER BY id")
        .bind(user_id)
        .fetch_all(pool)
        .await
}

/// Forms owned by `owner` that `viewer` may read: all of them for the owner,
/// shared ones for everybody else.
pub async fn list_readable_by_owner(
    pool: &PgPool,
    owner: &str,
    viewer: Uuid,
) -> Result<Vec<XForm>, sqlx::Error> {
    sqlx::query_as::<_, XForm>(
        "SELECT f.* FROM xforms f
         JOIN users u ON u.id = f.user_id
         WHERE u.username = $1 AND (f.user_id = $2 OR f.shared_data)
         ORDER BY f.id",
    )
    .bind(owner)
    .bind(viewer)
    .fetch_all(pool)
    .await
}

pub async fn find_by_owner(
    pool: &PgPool,
    owner: &str,
    key: &FormKey,
) -> Result<Option<XForm>, sqlx::Error> {
    match key {
        FormKey::Id(id) => {
            sqlx::query_as::<_, XForm>(
                "SELECT f.* FROM xforms f JOIN users u ON u.id = f.user_id
                 WHERE u.username = $1 AND f.id = $2",
            )
            .bind(owner)
            .bind(id)
            .fetch_optional(pool)
            .await
        }
        FormKey::IdString(id_string) => {
            sqlx::query_as::<_, XForm>(
                "SELECT f.* FROM xforms f JOIN users u ON u.id = f.user_id
                 WHERE u.username = $1 AND f.id_string = $2",
            )
            .bind(owner)
            .bind(id_string)
            .fetch_optional(pool)
            .await
        }
    }
}

/// Current tags of a form, holding a share lock on its row until the
/// transaction ends so concurrent label changes wait for it.
pub async fn lock_tags<'e, E: sqlx::PgExecutor<'e>>(
    executor: E,
    id: i64,
) -> Result<Option<Vec<String>>, sqlx::Error> {
    sqlx::query_scalar("SELECT tags FROM xforms WHERE id = $1 FOR SHARE")
        .bind(id)
        .fetch_optional(executor)
        .await
}

pub struct XFormChanges {
    pub title: Option<String>,
    pub description: Option<String>,
    pub shared_data: Option<bool>,
    pub downloadable: Option<bool>,
}

pub async fn update(pool: &PgPool, id: i64, changes: &XFormChanges) -> Result<XForm, sqlx::Error> {
    sqlx::query_as::<_, XForm>(
        "UPDATE xforms SET
            title = COALESCE($2, title),
            description = COALESCE($3, description),
            shared_data = COALESCE($4, shared_data),
            downloadable = COALESCE($5, downloadable),
            updated_at = now()
         WHERE id = $1 RETURNING *",
    )
    .bind(id)
    .bind(changes.title.as_deref())
    .bind(changes.description.as_deref())
    .bind(changes.shared_data)
    .bind(changes.downloadable)
    .fetch_one(pool)
    .await
}

pub async fn delete(pool: &PgPool, id: i64) -> Result<(), sqlx::Error> {
    sqlx::query("DELETE FROM xforms WHERE id = $1")
        .bind(id)
        .execute(pool)
        .await?;
    Ok(())
}

/// Add `tags` to the form and to every one of its submissions in one
/// transaction. Returns the form's resulting (sorted) tag list.
pub async fn add_tags(pool: &PgPool, id: i64, tags: &[String]) -> Result<Vec<String>, sqlx::Error> {
    let mut tx = pool.begin().await?;

    let form_tags: Vec<String> = sqlx::query_scalar(
        "UPDATE xforms
         SET tags = ARRAY(SELECT DISTINCT t FROM unnest(tags || $2::text[]) AS t ORDER BY t),
             updated_at = now()
         WHERE id = $1 RETURNING tags",
    )
    .bind(id)
    .bind(tags)
    .fetch_one(&mut *tx)
    .await?;

    let touched = sqlx::query(
        "UPDATE instances
         SET tags = ARRAY(SELECT DISTINCT t FROM unnest(tags || $2::text[]) AS t ORDER BY t)
         WHERE xform_id = $1 AND NOT (tags @> $2::text[])",
    )
    .bind(id)
    .bind(tags)
    .execute(&mut *tx)
    .await?
    .rows_affected();

    tx.commit().await?;
    tracing::debug!("Propagated tags {tags:?} from form {id} to {touched} submissions");

    Ok(form_tags)
}

/// Remove `tag` from the form and from every one of its submissions.
pub async fn remove_tag(pool: &PgPool, id: i64, tag: &str) -> Result<Vec<String>, sqlx::Error> {
    let mut tx = pool.begin().await?;

    let form_tags: Vec<String> = sqlx::query_scalar(
        "UPDATE xforms SET tags = array_remove(tags, $2), updated_at = now()
         WHERE id = $1 RETURNING tags",
    )
    .bind(id)
    .bind(tag)
    .fetch_one(&mut *tx)
    .await?;

    sqlx::query(
        "UPDATE instances SET tags = array_remove(tags, $2)
         WHERE xform_id = $1 AND $2 = ANY(tags)",
    )
    .bind(id)
    .bind(tag)
    .execute(&mut *tx)
    .await?;

    tx.commit().await?;

    Ok(form_tags)
}
