//! Authentication routes

use axum::{
    middleware,
    routing::{get, post},
    Router,
};

use super::handlers;
use crate::rate_limit_middleware::auth_rate_limit;

/// Creates and returns the authentication router
///
/// # Routes
/// - `POST /auth/signup` - Register a local account
/// - `POST /auth/signin` - Password sign-in, sets the session cookie
/// - `POST /auth/signout` - Clear the session cookie
/// - `GET /auth/me` - Current account from the session cookie
/// - `GET /auth/google` - Start the Google OAuth flow
/// - `GET /auth/google/callback` - Complete the Google OAuth flow
///
/// Every route shares the auth rate governor.
pub fn auth_routes() -> Router {
    Router::new()
        .route("/auth/signup", post(handlers::signup))
        .route("/auth/signin", post(handlers::signin))
        .route("/auth/signout", post(handlers::signout))
        .route("/auth/me", get(handlers::me))
        .route("/auth/google", get(handlers::google_oauth_start))
        .route("/auth/google/callback", get(handlers::google_oauth_callback))
        .route_layer(middleware::from_fn(auth_rate_limit))
}
