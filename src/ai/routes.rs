// src/ai/routes.rs

use axum::{middleware, routing::post, Router};

use super::handlers;
use crate::auth::require_session;
use crate::rate_limit_middleware::ai_rate_limit;

/// `POST /ai/chat`. The session layer is added last so it runs first and the
/// usage governor can key on the principal.
pub fn ai_routes() -> Router {
    Router::new()
        .route("/ai/chat", post(handlers::chat))
        .route_layer(middleware::from_fn(ai_rate_limit))
        .route_layer(middleware::from_fn(require_session))
}
