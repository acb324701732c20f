pub mod auth;
pub mod data;
pub mod forms;
pub mod ingest;

use axum::http::{Method, header};
use axum::routing::{delete, get, post};
use axum::Router;
use tower_http::cors::{Any, CorsLayer};

use crate::state::SharedState;

pub fn api_routes() -> Router<SharedState> {
    Router::new()
        // Auth
        .route("/api/v1/auth/register", post(auth::register))
        .route("/api/v1/auth/login", post(auth::login))
        .route("/api/v1/auth/api-token", post(auth::rotate_api_token))
        .route("/api/v1/user", get(auth::me))
        .route("/api/v1/audit", get(auth::audit_log))
        // Forms
        .route("/api/v1/forms", get(forms::list).post(forms::create))
        .route(
            "/api/v1/forms/{owner}/{pk}",
            get(forms::get).patch(forms::update).delete(forms::delete),
        )
        .route(
            "/api/v1/forms/{owner}/{pk}/labels",
            get(forms::labels).post(forms::add_labels),
        )
        .route(
            "/api/v1/forms/{owner}/{pk}/labels/{label}",
            delete(forms::remove_label),
        )
        // Data
        .route("/api/v1/data", get(data::list_forms))
        .route("/api/v1/data/{owner}", get(data::list_owner_forms))
        .route("/api/v1/data/{owner}/{formid}", get(data::list_records))
        .route(
            "/api/v1/data/{owner}/{formid}/{dataid}",
            get(data::get_record).delete(data::delete_record),
        )
        .route(
            "/api/v1/data/{owner}/{formid}/{dataid}/labels",
            get(data::record_labels).post(data::add_record_labels),
        )
        .route(
            "/api/v1/data/{owner}/{formid}/{dataid}/labels/{label}",
            delete(data::remove_record_label),
        )
        .route(
            "/api/v1/data/{owner}/{formid}/{dataid}/attachments/{attachment_id}",
            get(data::download_attachment),
        )
}

/// Submissions may come from browser-based collection clients on any origin.
pub fn ingest_routes() -> Router<SharedState> {
    Router::new()
        .route("/api/v1/submissions/{owner}/{formid}", post(ingest::submit))
        .layer(
            CorsLayer::new()
                .allow_origin(Any)
                .allow_methods([Method::POST, Method::OPTIONS])
                .allow_headers([header::CONTENT_TYPE, header::AUTHORIZATION])
                .max_age(std::time::Duration::from_secs(86400)),
        )
}
