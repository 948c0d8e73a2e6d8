// src/users/routes.rs

use axum::{middleware, routing::get, Router};

use super::handlers;
use crate::auth::{require_role, require_session, Role};

/// Account routes. All require a session; listing and lookup by id are
/// admin-only.
pub fn users_routes() -> Router {
    let admin = Router::new()
        .route("/user", get(handlers::list_users))
        .route("/user/:user_id", get(handlers::get_user))
        .route_layer(middleware::from_fn_with_state(Role::Admin, require_role));

    Router::new()
        .route("/user/profile", get(handlers::get_profile))
        .merge(admin)
        .route_layer(middleware::from_fn(require_session))
}
