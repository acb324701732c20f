//! Resolution of `<owner>/<formid>` path segments to forms the caller may
//! see. Forms the caller cannot read are reported as missing.

use crate::auth::extractor::AuthUser;
use crate::db;
use crate::db::xforms::FormKey;
use crate::error::AppError;
use crate::models::XForm;
use crate::state::SharedState;

/// The form if it exists and is owned by the caller or shared, else 404.
pub async fn readable_form(
    state: &SharedState,
    auth: &AuthUser,
    owner: &str,
    formid: &str,
) -> Result<XForm, AppError> {
    let xform = db::xforms::find_by_owner(&state.pool, owner, &FormKey::parse(formid))
        .await?
        .ok_or_else(AppError::form_not_found)?;

    if xform.user_id == auth.user_id || xform.shared_data {
        Ok(xform)
    } else {
        Err(AppError::form_not_found())
    }
}

/// Like [`readable_form`], additionally requiring ownership (403 otherwise).
pub async fn owned_form(
    state: &SharedState,
    auth: &AuthUser,
    owner: &str,
    formid: &str,
) -> Result<XForm, AppError> {
    let xform = readable_form(state, auth, owner, formid).await?;
    auth.require_owner(xform.user_id)?;
    Ok(xform)
}

/// Any form by owner and key, for anonymous submission.
pub async fn submittable_form(
    state: &SharedState,
    owner: &str,
    formid: &str,
) -> Result<XForm, AppError> {
    db::xforms::find_by_owner(&state.pool, owner, &FormKey::parse(formid))
        .await?
        .ok_or_else(AppError::form_not_found)
}
