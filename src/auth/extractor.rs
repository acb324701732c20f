use axum::extract::{FromRequestParts, OptionalFromRequestParts};
use axum::http::request::Parts;
use axum_extra::extract::CookieJar;
use uuid::Uuid;

use crate::auth::{credentials, jwt};
use crate::db;
use crate::error::AppError;
use crate::state::SharedState;

#[derive(Debug, Clone)]
pub struct AuthUser {
    pub user_id: Uuid,
    pub username: String,
}

impl AuthUser {
    /// Reject anyone but `owner_id` from mutating an owned resource.
    pub fn require_owner(&self, owner_id: Uuid) -> Result<(), AppError> {
        if self.user_id == owner_id {
            Ok(())
        } else {
            Err(AppError::Forbidden(
                "Only the form owner may do this".to_string(),
            ))
        }
    }
}

/// Resolve credentials from the request, `Ok(None)` when none are presented.
async fn authenticate(parts: &Parts, state: &SharedState) -> Result<Option<AuthUser>, AppError> {
    if let Some(auth_header) = parts.headers.get("authorization") {
        let auth_str = auth_header
            .to_str()
            .map_err(|_| AppError::Unauthorized("Invalid authorization header".to_string()))?;

        if let Some(key) = auth_str.strip_prefix("Token ") {
            let key_hash = credentials::hash_api_token(key.trim());
            let user = db::api_tokens::find_user_by_hash(&state.pool, &key_hash)
                .await?
                .ok_or_else(|| AppError::Unauthorized("Invalid token".to_string()))?;

            return Ok(Some(AuthUser {
                user_id: user.id,
                username: user.username,
            }));
        }

        if let Some(bearer) = auth_str.strip_prefix("Bearer ") {
            let claims = jwt::decode_token(bearer.trim(), &state.config.jwt_secret)
                .map_err(|_| AppError::Unauthorized("Invalid or expired token".to_string()))?;

            return Ok(Some(AuthUser {
                user_id: claims.sub,
                username: claims.usr,
            }));
        }

        return Err(AppError::Unauthorized(
            "Unsupported authorization scheme".to_string(),
        ));
    }

    let jar = CookieJar::from_headers(&parts.headers);
    if let Some(cookie) = jar.get("access_token") {
        let claims = jwt::decode_token(cookie.value(), &state.config.jwt_secret)
            .map_err(|_| AppError::Unauthorized("Invalid or expired token".to_string()))?;

        return Ok(Some(AuthUser {
            user_id: claims.sub,
            username: claims.usr,
        }));
    }

    Ok(None)
}

impl FromRequestParts<SharedState> for AuthUser {
    type Rejection = AppError;

    async fn from_request_parts(
        parts: &mut Parts,
        state: &SharedState,
    ) -> Result<Self, Self::Rejection> {
        authenticate(parts, state).await?.ok_or_else(|| {
            AppError::Unauthorized("Authentication credentials were not provided".to_string())
        })
    }
}

impl OptionalFromRequestParts<SharedState> for AuthUser {
    type Rejection = AppError;

    async fn from_request_parts(
        parts: &mut Parts,
        state: &SharedState,
    ) -> Result<Option<Self>, Self::Rejection> {
        authenticate(parts, state).await
    }
}
