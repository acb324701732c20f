use std::sync::LazyLock;

use axum::body::Bytes;
use axum::extract::{Path, State};
use axum::http::{HeaderMap, StatusCode};
use axum::Json;
use regex::Regex;
use serde::Deserialize;
use serde_json::{Value, json};

use crate::access;
use crate::auth::extractor::AuthUser;
use crate::db;
use crate::db::xforms::{NewXForm, XFormChanges};
use crate::error::AppError;
use crate::middleware::audit;
use crate::models::{FieldDef, XForm};
use crate::state::SharedState;
use crate::submission::{fields, parser};
use crate::tags;

static ID_STRING: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[A-Za-z_][A-Za-z0-9_.\-]{0,99}$").unwrap());

#[derive(Deserialize)]
pub struct CreateForm {
    pub id_string: String,
    pub title: String,
    pub description: Option<String>,
    pub fields: Vec<FieldDef>,
    pub shared_data: Option<bool>,
    pub downloadable: Option<bool>,
}

#[derive(Deserialize)]
pub struct UpdateForm {
    pub title: Option<String>,
    pub description: Option<String>,
    pub shared_data: Option<bool>,
    pub downloadable: Option<bool>,
}

pub fn form_json(xform: &XForm, owner: &str, base_url: &str) -> Value {
    json!({
        "formid": xform.id,
        "owner": owner,
        "id_string": xform.id_string,
        "title": xform.title,
        "description": xform.description,
        "fields": xform.fields,
        "shared_data": xform.shared_data,
        "downloadable": xform.downloadable,
        "tags": xform.tags,
        "url": format!("{base_url}/api/v1/forms/{owner}/{}", xform.id),
        "data_url": format!("{base_url}/api/v1/data/{owner}/{}", xform.id),
        "date_created": xform.created_at,
        "date_modified": xform.updated_at,
    })
}

pub async fn list(
    auth: AuthUser,
    State(state): State<SharedState>,
) -> Result<Json<Vec<Value>>, AppError> {
    let forms = db::xforms::list_by_user(&state.pool, auth.user_id).await?;
    Ok(Json(
        forms
            .iter()
            .map(|f| form_json(f, &auth.username, &state.config.base_url))
            .collect(),
    ))
}

pub async fn create(
    auth: AuthUser,
    State(state): State<SharedState>,
    Json(req): Json<CreateForm>,
) -> Result<(StatusCode, Json<Value>), AppError> {
    if !ID_STRING.is_match(&req.id_string) {
        return Err(AppError::BadRequest(
            "id_string must start with a letter or '_' and contain only letters, digits, '_', '.' and '-'"
                .to_string(),
        ));
    }
    if req.title.trim().is_empty() {
        return Err(AppError::BadRequest("title is required".to_string()));
    }
    fields::validate_definition(&req.fields).map_err(AppError::BadRequest)?;

    let xform = db::xforms::create(
        &state.pool,
        auth.user_id,
        &NewXForm {
            id_string: &req.id_string,
            title: req.title.trim(),
            description: req.description.as_deref().unwrap_or(""),
            fields: &req.fields,
            shared_data: req.shared_data.unwrap_or(false),
            downloadable: req.downloadable.unwrap_or(true),
        },
    )
    .await
    .map_err(|e| match e {
        sqlx::Error::Database(ref db_err) if db_err.is_unique_violation() => {
            AppError::Conflict(format!("A form with id_string '{}' already exists", req.id_string))
        }
        _ => AppError::Database(e),
    })?;

    audit::log_event(
        &state.pool,
        Some(auth.user_id),
        "form.created",
        "xform",
        xform.id,
        Some(json!({ "id_string": xform.id_string })),
    )
    .await;

    Ok((
        StatusCode::CREATED,
        Json(form_json(&xform, &auth.username, &state.config.base_url)),
    ))
}

pub async fn get(
    auth: AuthUser,
    State(state): State<SharedState>,
    Path((owner, pk)): Path<(String, String)>,
) -> Result<Json<Value>, AppError> {
    let xform = access::readable_form(&state, &auth, &owner, &pk).await?;
    Ok(Json(form_json(&xform, &owner, &state.config.base_url)))
}

pub async fn update(
    auth: AuthUser,
    State(state): State<SharedState>,
    Path((owner, pk)): Path<(String, String)>,
    Json(req): Json<UpdateForm>,
) -> Result<Json<Value>, AppError> {
    let xform = access::owned_form(&state, &auth, &owner, &pk).await?;

    if req.title.as_deref().is_some_and(|t| t.trim().is_empty()) {
        return Err(AppError::BadRequest("title cannot be empty".to_string()));
    }

    let updated = db::xforms::update(
        &state.pool,
        xform.id,
        &XFormChanges {
            title: req.title.map(|t| t.trim().to_string()),
            description: req.description,
            shared_data: req.shared_data,
            downloadable: req.downloadable,
        },
    )
    .await?;

    audit::log_event(&state.pool, Some(auth.user_id), "form.updated", "xform", xform.id, None).await;

    Ok(Json(form_json(&updated, &owner, &state.config.base_url)))
}

pub async fn delete(
    auth: AuthUser,
    State(state): State<SharedState>,
    Path((owner, pk)): Path<(String, String)>,
) -> Result<StatusCode, AppError> {
    let xform = access::owned_form(&state, &auth, &owner, &pk).await?;
    db::xforms::delete(&state.pool, xform.id).await?;

    audit::log_event(
        &state.pool,
        Some(auth.user_id),
        "form.deleted",
        "xform",
        xform.id,
        Some(json!({ "id_string": xform.id_string })),
    )
    .await;

    Ok(StatusCode::NO_CONTENT)
}

pub async fn labels(
    auth: AuthUser,
    State(state): State<SharedState>,
    Path((owner, pk)): Path<(String, String)>,
) -> Result<Json<Vec<String>>, AppError> {
    let xform = access::readable_form(&state, &auth, &owner, &pk).await?;
    Ok(Json(xform.tags))
}

pub async fn add_labels(
    auth: AuthUser,
    State(state): State<SharedState>,
    Path((owner, pk)): Path<(String, String)>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<(StatusCode, Json<Vec<String>>), AppError> {
    let xform = access::owned_form(&state, &auth, &owner, &pk).await?;
    let new_tags = tags_from_body(&headers, body).await?;

    let all = db::xforms::add_tags(&state.pool, xform.id, &new_tags).await?;

    audit::log_event(
        &state.pool,
        Some(auth.user_id),
        "form.tags_added",
        "xform",
        xform.id,
        Some(json!({ "tags": new_tags })),
    )
    .await;

    Ok((StatusCode::CREATED, Json(all)))
}

pub async fn remove_label(
    auth: AuthUser,
    State(state): State<SharedState>,
    Path((owner, pk, label)): Path<(String, String, String)>,
) -> Result<Json<Vec<String>>, AppError> {
    let xform = access::owned_form(&state, &auth, &owner, &pk).await?;

    let remaining = db::xforms::remove_tag(&state.pool, xform.id, &label).await?;

    audit::log_event(
        &state.pool,
        Some(auth.user_id),
        "form.tag_removed",
        "xform",
        xform.id,
        Some(json!({ "tag": label })),
    )
    .await;

    Ok(Json(remaining))
}

/// `tags` from a JSON, urlencoded or multipart body.
pub async fn tags_from_body(headers: &HeaderMap, body: Bytes) -> Result<Vec<String>, AppError> {
    let content_type = headers.get("content-type").and_then(|v| v.to_str().ok());

    if content_type.is_some_and(|ct| ct.contains("multipart/form-data")) {
        let parsed = parser::parse_multipart(headers, body)
            .await
            .map_err(AppError::BadRequest)?;
        return tags::parse(parsed.answers.get("tags"));
    }

    let parsed = parser::parse_body(content_type, &body).map_err(AppError::BadRequest)?;
    tags::parse(parsed.get("tags"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::HeaderValue;

    fn headers(content_type: &'static str) -> HeaderMap {
        let mut headers = HeaderMap::new();
        headers.insert("content-type", HeaderValue::from_static(content_type));
        headers
    }

    #[tokio::test]
    async fn tags_from_multipart_body() {
        let body = Bytes::from_static(
            b"--XX\r\n\
              Content-Disposition: form-data; name=\"tags\"\r\n\r\n\
              hello\r\n\
              --XX--\r\n",
        );
        let tags = tags_from_body(&headers("multipart/form-data; boundary=XX"), body)
            .await
            .unwrap();
        assert_eq!(tags, vec!["hello".to_string()]);
    }

    #[tokio::test]
    async fn tags_from_urlencoded_and_json_bodies() {
        let tags = tags_from_body(
            &headers("application/x-www-form-urlencoded"),
            Bytes::from_static(b"tags=a%2C+b"),
        )
        .await
        .unwrap();
        assert_eq!(tags, vec!["a".to_string(), "b".to_string()]);

        let tags = tags_from_body(
            &headers("application/json"),
            Bytes::from_static(br#"{"tags": ["x", "x"]}"#),
        )
        .await
        .unwrap();
        assert_eq!(tags, vec!["x".to_string()]);
    }

    #[tokio::test]
    async fn missing_tags_is_bad_request() {
        let err = tags_from_body(&headers("application/json"), Bytes::from_static(b"{}"))
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::BadRequest(_)));
    }
}
