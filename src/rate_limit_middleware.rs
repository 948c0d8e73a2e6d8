// rate_limit_middleware.rs
use crate::auth::models::Principal;
use crate::common::{ApiError, SharedState};
use crate::services::rate_limit::{RateGovernor, RateKey, RateLimitResult};
use axum::{
    extract::{ConnectInfo, Extension, Request},
    http::HeaderMap,
    middleware::Next,
    response::Response,
};
use std::net::SocketAddr;
use tracing::debug;

const UNKNOWN_ORIGIN: &str = "unknown";

/// Resolve the network origin of a request.
///
/// Forwarding headers are only honoured when the deployment sits behind a
/// proxy that sets them; otherwise any client could pick its own key.
fn extract_origin(
    headers: &HeaderMap,
    connect_info: Option<&ConnectInfo<SocketAddr>>,
    trust_proxy_headers: bool,
) -> String {
    if trust_proxy_headers {
        // Take the first IP in the X-Forwarded-For chain
        let forwarded = headers
            .get("x-forwarded-for")
            .and_then(|h| h.to_str().ok())
            .and_then(|chain| chain.split(',').next())
            .map(str::trim)
            .filter(|ip| !ip.is_empty());
        if let Some(ip) = forwarded {
            return ip.to_string();
        }

        let real_ip = headers
            .get("x-real-ip")
            .and_then(|h| h.to_str().ok())
            .map(str::trim)
            .filter(|ip| !ip.is_empty());
        if let Some(ip) = real_ip {
            return ip.to_string();
        }
    }

    connect_info
        .map(|info| info.0.ip().to_string())
        .unwrap_or_else(|| UNKNOWN_ORIGIN.to_string())
}

async fn govern(
    governor: &RateGovernor,
    trust_proxy_headers: bool,
    connect_info: Option<ConnectInfo<SocketAddr>>,
    request: Request,
    next: Next,
) -> Result<Response, ApiError> {
    let origin = extract_origin(request.headers(), connect_info.as_ref(), trust_proxy_headers);
    let key = RateKey::select(request.extensions().get::<Principal>(), &origin);
    let path = request.uri().path().to_string();

    match governor.check(&key).await {
        RateLimitResult::Allowed { remaining } => {
            debug!(
                route_class = governor.route_class(),
                key = ?key,
                path = %path,
                remaining = remaining,
                "Request allowed by rate limiter"
            );
            Ok(next.run(request).await)
        }
        RateLimitResult::Limited { retry_after } => {
            governor.log_violation(&key, &path, retry_after);
            Err(governor.limit_error(retry_after))
        }
    }
}

/// Governor for the /auth routes, keyed by network origin
pub async fn auth_rate_limit(
    Extension(state_lock): Extension<SharedState>,
    connect_info: Option<ConnectInfo<SocketAddr>>,
    request: Request,
    next: Next,
) -> Result<Response, ApiError> {
    let state = state_lock.read().await.clone();
    let trust = state.config.rate_limit.trust_proxy_headers;
    govern(&state.auth_governor, trust, connect_info, request, next).await
}

/// Governor for the AI route. Runs after the session middleware, so requests
/// are keyed by principal.
pub async fn ai_rate_limit(
    Extension(state_lock): Extension<SharedState>,
    connect_info: Option<ConnectInfo<SocketAddr>>,
    request: Request,
    next: Next,
) -> Result<Response, ApiError> {
    let state = state_lock.read().await.clone();
    let trust = state.config.rate_limit.trust_proxy_headers;
    govern(&state.ai_governor, trust, connect_info, request, next).await
}
