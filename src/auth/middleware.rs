//! Session middleware and the role gate

use axum::{
    extract::{Extension, Request, State},
    middleware::Next,
    response::Response,
};
use tracing::{debug, warn};

use super::cookies::read_cookie;
use super::models::{Principal, Role};
use crate::common::{safe_token_log, ApiError, SharedState};

/// Resolve the session cookie into a [`Principal`] on the request.
///
/// A missing cookie and a rejected token both stop the request with 401; the
/// downstream handler only runs with a verified principal attached. No store
/// lookup happens here: the claims are trusted until they expire.
pub async fn require_session(
    Extension(state_lock): Extension<SharedState>,
    mut request: Request,
    next: Next,
) -> Result<Response, ApiError> {
    let state = state_lock.read().await.clone();
    let path = request.uri().path().to_string();

    let token = read_cookie(request.headers(), &state.config.session.cookie_name)
        .ok_or_else(|| {
            debug!(path = %path, "Request without session cookie");
            ApiError::Unauthorized("Not authenticated".to_string())
        })?;

    let claims = state.tokens.verify(&token).map_err(|rejection| {
        warn!(
            path = %path,
            token = %safe_token_log(&token),
            reason = %rejection,
            "Session token rejected"
        );
        ApiError::Unauthorized("Invalid or expired token".to_string())
    })?;

    debug!(user_id = %claims.sub, role = %claims.role, path = %path, "Session verified");
    request.extensions_mut().insert(Principal::from(claims));

    Ok(next.run(request).await)
}

/// Exact role match; there is no hierarchy between roles.
pub fn authorize(principal: &Principal, expected: Role) -> Result<(), ApiError> {
    if principal.role == expected {
        Ok(())
    } else {
        warn!(
            user_id = %principal.id,
            role = %principal.role,
            required = %expected,
            "Role check failed"
        );
        Err(ApiError::Forbidden("Unauthorized access".to_string()))
    }
}

/// Route layer form of [`authorize`]:
/// `middleware::from_fn_with_state(Role::Admin, require_role)`.
/// Must sit inside `require_session`.
pub async fn require_role(
    State(expected): State<Role>,
    principal: Principal,
    request: Request,
    next: Next,
) -> Result<Response, ApiError> {
    authorize(&principal, expected)?;
    Ok(next.run(request).await)
}
