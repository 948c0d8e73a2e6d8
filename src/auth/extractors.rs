//! Authentication extractors for Axum

use async_trait::async_trait;
use axum::{extract::FromRequestParts, http::request::Parts};
use tracing::error;

use super::models::Principal;
use crate::common::ApiError;

/// The principal attached by the session middleware.
///
/// Only routes layered behind `require_session` can produce one; anywhere
/// else extraction fails, so a handler or guard taking `Principal` can never
/// observe an unauthenticated request.
#[async_trait]
impl<S> FromRequestParts<S> for Principal
where
    S: Send + Sync,
{
    type Rejection = ApiError;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        parts.extensions.get::<Principal>().cloned().ok_or_else(|| {
            error!(
                path = %parts.uri.path(),
                "Principal requested on a route without session middleware"
            );
            ApiError::Unauthorized("Not authenticated".to_string())
        })
    }
}
