// src/users/handlers.rs

use axum::{
    extract::{Extension, Path},
    Json,
};
use serde_json::json;
use tracing::{debug, info};

use crate::auth::{Account, Principal};
use crate::common::{ApiError, SharedState};

fn user_not_found() -> ApiError {
    ApiError::NotFound("User not found".to_string())
}

/// GET /user/profile - Fresh copy of the caller's own account
pub async fn get_profile(
    Extension(state_lock): Extension<SharedState>,
    principal: Principal,
) -> Result<Json<Account>, ApiError> {
    let state = state_lock.read().await.clone();

    let account = state
        .accounts
        .find_by_id(&principal.id)
        .await?
        .ok_or_else(|| {
            debug!(user_id = %principal.id, "Profile requested for a missing account");
            user_not_found()
        })?;

    Ok(Json(account))
}

/// GET /user - All accounts (admin)
pub async fn list_users(
    Extension(state_lock): Extension<SharedState>,
    principal: Principal,
) -> Result<Json<serde_json::Value>, ApiError> {
    let state = state_lock.read().await.clone();

    let accounts = state.accounts.list_accounts().await?;

    info!(
        admin_user_id = %principal.id,
        user_count = accounts.len(),
        "User list fetched"
    );

    Ok(Json(json!({ "users": accounts })))
}

/// GET /user/:user_id - One account by id (admin)
pub async fn get_user(
    Extension(state_lock): Extension<SharedState>,
    Path(user_id): Path<String>,
) -> Result<Json<Account>, ApiError> {
    let state = state_lock.read().await.clone();

    let account = state
        .accounts
        .find_by_id(&user_id)
        .await?
        .ok_or_else(user_not_found)?;

    Ok(Json(account))
}
