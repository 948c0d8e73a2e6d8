//! Session and OAuth-state cookie helpers

use axum::http::{header::COOKIE, HeaderMap};

use crate::common::config::SessionConfig;

/// Cookie carrying the CSRF nonce between the two OAuth steps
pub const OAUTH_STATE_COOKIE: &str = "oauth_state";

const OAUTH_STATE_MAX_AGE_SECS: u64 = 10 * 60;

fn secure_attr(secure: bool) -> &'static str {
    if secure {
        "; Secure"
    } else {
        ""
    }
}

/// `Set-Cookie` value carrying a freshly issued session token
pub fn session_cookie(token: &str, config: &SessionConfig) -> String {
    format!(
        "{}={}; Path=/; HttpOnly; SameSite=Strict; Max-Age={}{}",
        config.cookie_name,
        token,
        config.ttl.as_secs(),
        secure_attr(config.cookie_secure)
    )
}

/// `Set-Cookie` value that makes the browser drop the session cookie
pub fn clear_session_cookie(config: &SessionConfig) -> String {
    format!(
        "{}=; Path=/; HttpOnly; SameSite=Strict; Max-Age=0{}",
        config.cookie_name,
        secure_attr(config.cookie_secure)
    )
}

/// SameSite=Lax so the cookie survives the top-level redirect back from the provider
pub fn oauth_state_cookie(state: &str, secure: bool) -> String {
    format!(
        "{}={}; Path=/auth/google; HttpOnly; SameSite=Lax; Max-Age={}{}",
        OAUTH_STATE_COOKIE,
        state,
        OAUTH_STATE_MAX_AGE_SECS,
        secure_attr(secure)
    )
}

pub fn clear_oauth_state_cookie(secure: bool) -> String {
    format!(
        "{}=; Path=/auth/google; HttpOnly; SameSite=Lax; Max-Age=0{}",
        OAUTH_STATE_COOKIE,
        secure_attr(secure)
    )
}

/// Value of the first non-empty cookie called `name` across all `Cookie` headers
pub fn read_cookie(headers: &HeaderMap, name: &str) -> Option<String> {
    headers
        .get_all(COOKIE)
        .iter()
        .filter_map(|value| value.to_str().ok())
        .flat_map(|raw| raw.split(';'))
        .filter_map(|pair| pair.trim().split_once('='))
        .find(|(key, value)| *key == name && !value.is_empty())
        .map(|(_, value)| value.to_string())
}
