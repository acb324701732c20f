use axum::body::Bytes;
use axum::extract::{Path, Query, State};
use axum::http::{HeaderMap, StatusCode, header};
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::Deserialize;
use serde_json::{Map, Value, json};

use crate::access;
use crate::auth::extractor::AuthUser;
use crate::data::export;
use crate::data::query::DataQuery;
use crate::data::render::{self, RenderContext};
use crate::db;
use crate::error::AppError;
use crate::middleware::audit;
use crate::models::{Instance, XForm};
use crate::routes::forms::tags_from_body;
use crate::state::SharedState;

#[derive(Deserialize, Default)]
pub struct DataParams {
    pub query: Option<String>,
    pub fields: Option<String>,
    pub sort: Option<String>,
    pub start: Option<i64>,
    pub limit: Option<i64>,
    pub count: Option<String>,
    pub format: Option<String>,
}

impl DataParams {
    fn wants_count(&self) -> bool {
        matches!(self.count.as_deref(), Some("1" | "true"))
    }
}

fn data_url(base_url: &str, owner: &str, xform: &XForm) -> String {
    format!("{base_url}/api/v1/data/{owner}/{}", xform.id)
}

/// `GET /api/v1/data`: the caller's forms, `id_string` -> data URL.
pub async fn list_forms(
    auth: AuthUser,
    State(state): State<SharedState>,
) -> Result<Json<Map<String, Value>>, AppError> {
    let forms = db::xforms::list_by_user(&state.pool, auth.user_id).await?;
    Ok(Json(
        forms
            .iter()
            .map(|f| {
                (
                    f.id_string.clone(),
                    Value::String(data_url(&state.config.base_url, &auth.username, f)),
                )
            })
            .collect(),
    ))
}

/// `GET /api/v1/data/<owner>`: the owner's forms readable by the caller.
pub async fn list_owner_forms(
    auth: AuthUser,
    State(state): State<SharedState>,
    Path(owner): Path<String>,
) -> Result<Json<Map<String, Value>>, AppError> {
    let forms = db::xforms::list_readable_by_owner(&state.pool, &owner, auth.user_id).await?;
    Ok(Json(
        forms
            .iter()
            .map(|f| {
                (
                    f.id_string.clone(),
                    Value::String(data_url(&state.config.base_url, &owner, f)),
                )
            })
            .collect(),
    ))
}

async fn render_all(
    state: &SharedState,
    ctx: &RenderContext<'_>,
    instances: &[Instance],
) -> Result<Vec<Map<String, Value>>, AppError> {
    let ids: Vec<i64> = instances.iter().map(|i| i.id).collect();
    let mut attachments = db::attachments::list_for_instances(&state.pool, &ids).await?;

    Ok(instances
        .iter()
        .map(|instance| {
            let files = attachments.remove(&instance.id).unwrap_or_default();
            ctx.render(instance, &files)
        })
        .collect())
}

/// `GET /api/v1/data/<owner>/<formid>`: the form's records.
pub async fn list_records(
    auth: AuthUser,
    State(state): State<SharedState>,
    Path((owner, formid)): Path<(String, String)>,
    Query(params): Query<DataParams>,
) -> Result<Response, AppError> {
    let xform = access::readable_form(&state, &auth, &owner, &formid).await?;

    let query = DataQuery::parse(
        params.query.as_deref(),
        params.sort.as_deref(),
        params.fields.as_deref(),
        params.start,
        params.limit,
    )?;

    if params.wants_count() {
        let count = db::instances::count(&state.pool, xform.id, &query.filter).await?;
        return Ok(Json(json!([{ "count": count }])).into_response());
    }

    let instances = db::instances::list(&state.pool, xform.id, &query).await?;
    let ctx = RenderContext {
        base_url: &state.config.base_url,
        owner: &owner,
        xform: &xform,
    };
    let mut records = render_all(&state, &ctx, &instances).await?;

    if let Some(fields) = &query.fields {
        records = records
            .into_iter()
            .map(|r| render::project(r, fields))
            .collect();
    }

    if params.format.as_deref() == Some("csv") {
        if !xform.downloadable && xform.user_id != auth.user_id {
            return Err(AppError::Forbidden("This form is not downloadable".to_string()));
        }
        let disposition = format!("attachment; filename=\"{}.csv\"", xform.id_string);
        return Ok((
            [
                (header::CONTENT_TYPE, "text/csv".to_string()),
                (header::CONTENT_DISPOSITION, disposition),
            ],
            export::to_csv(&records),
        )
            .into_response());
    }

    Ok(Json(records).into_response())
}

/// A record of a readable form, or `None` for a non-numeric or unknown id.
async fn find_record(
    state: &SharedState,
    xform: &XForm,
    dataid: &str,
) -> Result<Option<Instance>, AppError> {
    let Ok(id) = dataid.parse::<i64>() else {
        return Ok(None);
    };
    Ok(db::instances::find(&state.pool, xform.id, id).await?)
}

/// `GET /api/v1/data/<owner>/<formid>/<dataid>`: one record as an object,
/// or an empty list if `dataid` does not name one.
pub async fn get_record(
    auth: AuthUser,
    State(state): State<SharedState>,
    Path((owner, formid, dataid)): Path<(String, String, String)>,
) -> Result<Json<Value>, AppError> {
    let xform = access::readable_form(&state, &auth, &owner, &formid).await?;

    let Some(instance) = find_record(&state, &xform, &dataid).await? else {
        return Ok(Json(json!([])));
    };

    let ctx = RenderContext {
        base_url: &state.config.base_url,
        owner: &owner,
        xform: &xform,
    };
    let mut records = render_all(&state, &ctx, std::slice::from_ref(&instance)).await?;
    Ok(Json(Value::Object(records.remove(0))))
}

pub async fn delete_record(
    auth: AuthUser,
    State(state): State<SharedState>,
    Path((owner, formid, dataid)): Path<(String, String, String)>,
) -> Result<StatusCode, AppError> {
    let xform = access::owned_form(&state, &auth, &owner, &formid).await?;
    let instance = find_record(&state, &xform, &dataid)
        .await?
        .ok_or_else(AppError::record_not_found)?;

    if !db::instances::soft_delete(&state.pool, xform.id, instance.id).await? {
        return Err(AppError::record_not_found());
    }

    audit::log_event(
        &state.pool,
        Some(auth.user_id),
        "submission.deleted",
        "instance",
        instance.id,
        Some(json!({ "xform": xform.id })),
    )
    .await;

    Ok(StatusCode::NO_CONTENT)
}

pub async fn record_labels(
    auth: AuthUser,
    State(state): State<SharedState>,
    Path((owner, formid, dataid)): Path<(String, String, String)>,
) -> Result<Json<Vec<String>>, AppError> {
    let xform = access::readable_form(&state, &auth, &owner, &formid).await?;
    let instance = find_record(&state, &xform, &dataid)
        .await?
        .ok_or_else(AppError::record_not_found)?;
    Ok(Json(instance.tags))
}

pub async fn add_record_labels(
    auth: AuthUser,
    State(state): State<SharedState>,
    Path((owner, formid, dataid)): Path<(String, String, String)>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<(StatusCode, Json<Vec<String>>), AppError> {
    let xform = access::owned_form(&state, &auth, &owner, &formid).await?;
    let instance = find_record(&state, &xform, &dataid)
        .await?
        .ok_or_else(AppError::record_not_found)?;
    let new_tags = tags_from_body(&headers, body).await?;

    let all = db::instances::add_tags(&state.pool, instance.id, &new_tags).await?;

    audit::log_event(
        &state.pool,
        Some(auth.user_id),
        "submission.tags_added",
        "instance",
        instance.id,
        Some(json!({ "tags": new_tags })),
    )
    .await;

    Ok((StatusCode::CREATED, Json(all)))
}

pub async fn remove_record_label(
    auth: AuthUser,
    State(state): State<SharedState>,
    Path((owner, formid, dataid, label)): Path<(String, String, String, String)>,
) -> Result<Json<Vec<String>>, AppError> {
    let xform = access::owned_form(&state, &auth, &owner, &formid).await?;
    let instance = find_record(&state, &xform, &dataid)
        .await?
        .ok_or_else(AppError::record_not_found)?;

    let remaining = db::instances::remove_tag(&state.pool, instance.id, &label).await?;

    audit::log_event(
        &state.pool,
        Some(auth.user_id),
        "submission.tag_removed",
        "instance",
        instance.id,
        Some(json!({ "tag": label })),
    )
    .await;

    Ok(Json(remaining))
}

pub async fn download_attachment(
    auth: AuthUser,
    State(state): State<SharedState>,
    Path((owner, formid, dataid, attachment_id)): Path<(String, String, String, String)>,
) -> Result<Response, AppError> {
    let xform = access::readable_form(&state, &auth, &owner, &formid).await?;
    let instance = find_record(&state, &xform, &dataid)
        .await?
        .ok_or_else(AppError::record_not_found)?;

    let not_found = || AppError::NotFound("Attachment not found".to_string());
    let attachment_id: i64 = attachment_id.parse().map_err(|_| not_found())?;
    let attachment = db::attachments::find(&state.pool, instance.id, attachment_id)
        .await?
        .ok_or_else(not_found)?;

    let disposition = format!(
        "attachment; filename=\"{}\"",
        attachment.filename.replace('"', "")
    );
    Ok((
        [
            (header::CONTENT_TYPE, attachment.mimetype),
            (header::CONTENT_DISPOSITION, disposition),
        ],
        attachment.content,
    )
        .into_response())
}
