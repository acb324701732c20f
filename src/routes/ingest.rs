use std::net::SocketAddr;

use axum::body::Bytes;
use axum::extract::{ConnectInfo, Path, State};
use axum::http::{HeaderMap, StatusCode};
use axum::Json;
use serde_json::{Value, json};

use crate::access;
use crate::auth::extractor::AuthUser;
use crate::error::AppError;
use crate::state::SharedState;
use crate::submission::parser;
use crate::submission::pipeline::{self, Outcome};

/// `POST /api/v1/submissions/<owner>/<formid>`: store one filled-in form.
pub async fn submit(
    submitter: Option<AuthUser>,
    State(state): State<SharedState>,
    Path((owner, formid)): Path<(String, String)>,
    ConnectInfo(addr): ConnectInfo<SocketAddr>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<(StatusCode, Json<Value>), AppError> {
    let xform = access::submittable_form(&state, &owner, &formid).await?;

    let content_type = headers.get("content-type").and_then(|v| v.to_str().ok());

    let parsed = if content_type.is_some_and(|ct| ct.contains("multipart/form-data")) {
        parser::parse_multipart(&headers, body).await
    } else {
        parser::parse_answers(content_type, &body)
    }
    .map_err(AppError::BadRequest)?;

    let outcome =
        pipeline::run(&state, &xform, submitter.as_ref(), &headers, addr.ip(), parsed).await?;

    Ok(match outcome {
        Outcome::Created { id, uuid } => (
            StatusCode::CREATED,
            Json(json!({ "status": "created", "_id": id, "_uuid": uuid })),
        ),
        Outcome::Duplicate { id, uuid } => (
            StatusCode::ACCEPTED,
            Json(json!({ "status": "duplicate", "_id": id, "_uuid": uuid })),
        ),
    })
}
