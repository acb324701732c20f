use std::sync::LazyLock;

use axum::extract::{Query, State};
use axum::Json;
use axum_extra::extract::cookie::{Cookie, SameSite};
use axum_extra::extract::CookieJar;
use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::auth::extractor::AuthUser;
use crate::auth::jwt::{Claims, encode_token};
use crate::auth::credentials;
use crate::config::RegistrationMode;
use crate::db;
use crate::error::AppError;
use crate::middleware::audit;
use crate::models::AuditEvent;
use crate::state::SharedState;

static USERNAME: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[A-Za-z0-9_.\-]{1,64}$").unwrap());

#[derive(Deserialize)]
pub struct RegisterRequest {
    pub username: String,
    pub email: String,
    pub password: String,
}

#[derive(Deserialize)]
pub struct LoginRequest {
    pub username: String,
    pub password: String,
}

#[derive(Serialize)]
pub struct RegisterResponse {
    pub username: String,
    pub access_token: String,
    pub api_token: String,
}

#[derive(Serialize)]
pub struct LoginResponse {
    pub access_token: String,
}

#[derive(Serialize)]
pub struct ApiTokenResponse {
    pub api_token: String,
}

#[derive(Serialize)]
pub struct Profile {
    pub id: uuid::Uuid,
    pub username: String,
    pub email: String,
}

#[derive(Deserialize)]
pub struct AuditParams {
    pub page: Option<i64>,
    pub per_page: Option<i64>,
}

fn access_cookie(access_token: &str) -> CookieJar {
    let access = Cookie::build(("access_token", access_token.to_string()))
        .path("/")
        .http_only(true)
        .secure(true)
        .same_site(SameSite::Lax)
        .build();

    CookieJar::new().add(access)
}

pub async fn register(
    State(state): State<SharedState>,
    Json(req): Json<RegisterRequest>,
) -> Result<(CookieJar, Json<RegisterResponse>), AppError> {
    if req.username.is_empty() || req.email.is_empty() || req.password.is_empty() {
        return Err(AppError::BadRequest("All fields are required".to_string()));
    }

    if !USERNAME.is_match(&req.username) {
        return Err(AppError::BadRequest(
            "Username may only contain letters, digits, '_', '.' and '-'".to_string(),
        ));
    }

    credentials::check_password_strength(&req.password).map_err(AppError::BadRequest)?;

    let pw_hash = credentials::hash_password(&req.password).map_err(AppError::Internal)?;

    // Advisory lock serialises the "first user" check
    let mut tx = state.pool.begin().await?;
    sqlx::query("SELECT pg_advisory_xact_lock(1)")
        .execute(&mut *tx)
        .await?;

    let count = db::users::count_all(&mut *tx).await?;
    if count > 0 && state.config.registration == RegistrationMode::Closed {
        return Err(AppError::Forbidden(
            "Registration is disabled. Contact your system administrator.".to_string(),
        ));
    }

    let user = db::users::create(&mut *tx, &req.username, &req.email, &pw_hash)
        .await
        .map_err(|e| match e {
            sqlx::Error::Database(ref db_err) if db_err.is_unique_violation() => {
                AppError::Conflict("Username or email already registered".to_string())
            }
            _ => AppError::Database(e),
        })?;

    let api_token = credentials::generate_api_token();
    db::api_tokens::replace(&mut *tx, user.id, &credentials::hash_api_token(&api_token))
        .await?;

    tx.commit().await?;

    let claims = Claims::new(user.id, user.username.clone());
    let access_token =
        encode_token(&claims, &state.config.jwt_secret).map_err(AppError::Internal)?;

    audit::log_event(
        &state.pool,
        Some(user.id),
        "user.registered",
        "user",
        user.id,
        None,
    )
    .await;

    tracing::info!("Registered user {}", user.username);

    Ok((
        access_cookie(&access_token),
        Json(RegisterResponse {
            username: user.username,
            access_token,
            api_token,
        }),
    ))
}

pub async fn login(
    State(state): State<SharedState>,
    Json(req): Json<LoginRequest>,
) -> Result<(CookieJar, Json<LoginResponse>), AppError> {
    if let Err(retry_after) = state.login_limiter.check(&req.username) {
        return Err(AppError::RateLimited {
            message: "Too many login attempts. Please try again later.".to_string(),
            retry_after,
        });
    }

    let user = db::users::find_by_username(&state.pool, &req.username)
        .await?
        .ok_or_else(|| AppError::Unauthorized("Invalid credentials".to_string()))?;

    let valid = credentials::verify_password(&req.password, &user.password_hash)
        .map_err(AppError::Internal)?;

    if !valid {
        state.login_limiter.record_failure(&req.username);
        return Err(AppError::Unauthorized("Invalid credentials".to_string()));
    }

    let claims = Claims::new(user.id, user.username.clone());
    let access_token =
        encode_token(&claims, &state.config.jwt_secret).map_err(AppError::Internal)?;

    audit::log_event(&state.pool, Some(user.id), "user.login", "user", user.id, None).await;

    Ok((access_cookie(&access_token), Json(LoginResponse { access_token })))
}

pub async fn rotate_api_token(
    auth: AuthUser,
    State(state): State<SharedState>,
) -> Result<Json<ApiTokenResponse>, AppError> {
    let api_token = credentials::generate_api_token();
    let key_hash = credentials::hash_api_token(&api_token);
    db::api_tokens::replace(&state.pool, auth.user_id, &key_hash).await?;

    audit::log_event(
        &state.pool,
        Some(auth.user_id),
        "user.api_token_rotated",
        "user",
        auth.user_id,
        None,
    )
    .await;

    Ok(Json(ApiTokenResponse { api_token }))
}

pub async fn me(
    auth: AuthUser,
    State(state): State<SharedState>,
) -> Result<Json<Profile>, AppError> {
    let user = db::users::find_by_id(&state.pool, auth.user_id)
        .await?
        .ok_or_else(|| AppError::Unauthorized("User not found".to_string()))?;

    Ok(Json(Profile {
        id: user.id,
        username: user.username,
        email: user.email,
    }))
}

pub async fn audit_log(
    auth: AuthUser,
    State(state): State<SharedState>,
    Query(params): Query<AuditParams>,
) -> Result<Json<Vec<AuditEvent>>, AppError> {
    let page = params.page.unwrap_or(1).max(1);
    let per_page = params.per_page.unwrap_or(50).clamp(1, 200);

    let events =
        db::audit::list_for_user(&state.pool, auth.user_id, per_page, (page - 1) * per_page)
            .await?;
    Ok(Json(events))
}
