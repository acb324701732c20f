use std::net::IpAddr;

use axum::http::HeaderMap;
use serde_json::{Map, Value};

use crate::auth::extractor::AuthUser;
use crate::db;
use crate::error::AppError;
use crate::models::XForm;
use crate::state::SharedState;

use super::fields;
use super::geo;
use super::metadata::ClientInfo;
use super::parser::ParsedBody;

pub enum Outcome {
    Created { id: i64, uuid: String },
    /// The uuid was already stored for this form; nothing was written.
    Duplicate { id: i64, uuid: String },
}

pub async fn run(
    state: &SharedState,
    xform: &XForm,
    submitter: Option<&AuthUser>,
    headers: &HeaderMap,
    peer_addr: IpAddr,
    body: ParsedBody,
) -> Result<Outcome, AppError> {
    let client = ClientInfo::extract(headers, peer_addr, &state.config.trusted_proxies);

    if let Err(retry_after) = state.submission_limiter.check(
        xform.id,
        client.ip,
        state.config.submission_rate_limit,
        state.config.submission_rate_window_secs,
    ) {
        tracing::warn!("Submission rate limit hit for form {} from {}", xform.id, client.ip);
        return Err(AppError::RateLimited {
            message: format!("Rate limited. Retry after {retry_after}s"),
            retry_after,
        });
    }

    let ParsedBody { answers, uploads } = body;
    let (uuid, answers) = split_reserved(answers);

    let warnings = fields::validate_answers(&answers, &xform.fields);
    if !warnings.is_empty() {
        tracing::debug!("Validation warnings for form {}: {:?}", xform.id, warnings);
    }

    let (latitude, longitude) = geolocation(xform, &answers);

    let json = Value::Object(answers);
    let meta = client.to_json();

    let mut tx = state.pool.begin().await?;

    // Current tags under the form's row lock; `xform.tags` may be stale.
    let tags = db::xforms::lock_tags(&mut *tx, xform.id)
        .await?
        .ok_or_else(AppError::form_not_found)?;

    let created = db::instances::create(
        &mut *tx,
        &db::instances::NewInstance {
            xform_id: xform.id,
            submitted_by: submitter.map(|s| s.user_id),
            uuid: &uuid,
            json: &json,
            latitude,
            longitude,
            tags: &tags,
            metadata: &meta,
        },
    )
    .await?;

    let Some(instance) = created else {
        tx.rollback().await?;
        let id = db::instances::find_id_by_uuid(&state.pool, xform.id, &uuid)
            .await?
            .ok_or_else(|| AppError::Conflict("Duplicate submission".to_string()))?;
        tracing::debug!("Duplicate submission {uuid} for form {}", xform.id);
        return Ok(Outcome::Duplicate { id, uuid });
    };

    for upload in &uploads {
        db::attachments::create(
            &mut *tx,
            instance.id,
            &upload.filename,
            &upload.mimetype,
            &upload.content,
        )
        .await?;
    }
    tx.commit().await?;

    tracing::info!(
        "Stored submission {} for form {} ({} attachments)",
        instance.id,
        xform.id,
        uploads.len()
    );

    Ok(Outcome::Created {
        id: instance.id,
        uuid: instance.uuid,
    })
}

/// Coordinates from the first geopoint question holding a parseable point.
fn geolocation(xform: &XForm, answers: &Map<String, Value>) -> (Option<f64>, Option<f64>) {
    xform
        .geopoint_fields()
        .filter_map(|name| answers.get(name))
        .filter_map(Value::as_str)
        .find_map(geo::parse_geopoint)
        .map_or((None, None), |(lat, lng)| (Some(lat), Some(lng)))
}

/// Pull the instance uuid out of the answers and drop `_`-prefixed keys,
/// which are reserved for rendered metadata.
fn split_reserved(mut answers: Map<String, Value>) -> (String, Map<String, Value>) {
    let declared = ["meta/instanceID", "_uuid"]
        .iter()
        .find_map(|key| answers.get(*key).and_then(Value::as_str))
        .map(|raw| raw.trim().trim_start_matches("uuid:").to_string())
        .filter(|uuid| !uuid.is_empty());

    let uuid = declared.unwrap_or_else(|| uuid::Uuid::new_v4().to_string());
    answers.retain(|key, _| !key.starts_with('_'));
    (uuid, answers)
}
