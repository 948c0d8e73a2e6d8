//! Authentication handlers

use axum::{
    extract::{rejection::JsonRejection, Extension, Json, Query},
    http::{header::SET_COOKIE, HeaderMap, StatusCode},
    response::{AppendHeaders, IntoResponse, Redirect, Response},
};
use serde_json::json;
use tracing::{debug, error, info, warn};

use super::cookies::{
    clear_oauth_state_cookie, clear_session_cookie, oauth_state_cookie, read_cookie,
    session_cookie, OAUTH_STATE_COOKIE,
};
use super::models::{Account, GoogleCallbackParams, SignInRequest, SignUpRequest};
use crate::common::{
    generate_raw_id, is_plausible_email, safe_email_log, ApiError, AppState, SharedState,
    ValidationResult, Validator,
};

const MAX_USERNAME_LEN: usize = 64;
/// bcrypt ignores everything past 72 bytes
const MAX_PASSWORD_BYTES: usize = 72;
const OAUTH_STATE_LEN: usize = 32;

fn required(value: Option<String>) -> Option<String> {
    value.filter(|v| !v.trim().is_empty())
}

fn all_fields_required() -> ApiError {
    ApiError::BadRequest("All fields are required".to_string())
}

/// Format checks that run after the presence check
pub struct SignUpValidator;

pub struct SignUpFields {
    pub username: String,
    pub email: String,
    pub password: String,
}

impl Validator<SignUpFields> for SignUpValidator {
    fn validate(&self, data: &SignUpFields) -> ValidationResult {
        let mut result = ValidationResult::new();

        if data.username.trim().chars().count() > MAX_USERNAME_LEN {
            result.add_error("username", "Username must be at most 64 characters");
        }
        if !is_plausible_email(&data.email) {
            result.add_error("email", "Email is invalid");
        }
        if data.password.len() > MAX_PASSWORD_BYTES {
            result.add_error("password", "Password must be at most 72 bytes");
        }

        result
    }
}

fn issue_session(state: &AppState, account: &Account) -> Result<String, ApiError> {
    let token = state.tokens.issue(account).map_err(|e| {
        error!(error = %e, user_id = %account.id, "JWT encoding error");
        ApiError::InternalServer("jwt error".to_string())
    })?;
    Ok(session_cookie(&token, &state.config.session))
}

/// POST /auth/signup
/// Creates a local account. Does not start a session.
///
/// # Response
/// ```json
/// { "message": "User registered successfully", "id": "U_..." }
/// ```
pub async fn signup(
    Extension(state_lock): Extension<SharedState>,
    payload: Result<Json<SignUpRequest>, JsonRejection>,
) -> Result<impl IntoResponse, ApiError> {
    let state = state_lock.read().await.clone();

    let Json(payload) = payload.map_err(|e| {
        debug!(error = %e, "Unreadable sign-up body");
        all_fields_required()
    })?;

    let (Some(username), Some(email), Some(password)) = (
        required(payload.username),
        required(payload.email),
        required(payload.password),
    ) else {
        return Err(all_fields_required());
    };

    let fields = SignUpFields {
        username,
        email,
        password,
    };
    let validation = SignUpValidator.validate(&fields);
    if !validation.is_valid {
        return Err(validation.into());
    }

    let account = state
        .resolver
        .sign_up(&fields.username, &fields.email, &fields.password)
        .await?;

    Ok((
        StatusCode::CREATED,
        Json(json!({
            "message": "User registered successfully",
            "id": account.id,
        })),
    ))
}

/// POST /auth/signin
/// Verifies a local password and sets the session cookie.
///
/// # Response
/// ```json
/// { "message": "Login successful", "user": { ... } }
/// ```
pub async fn signin(
    Extension(state_lock): Extension<SharedState>,
    payload: Result<Json<SignInRequest>, JsonRejection>,
) -> Result<impl IntoResponse, ApiError> {
    let state = state_lock.read().await.clone();

    let Json(payload) = payload.map_err(|e| {
        debug!(error = %e, "Unreadable sign-in body");
        all_fields_required()
    })?;

    let (Some(email), Some(password)) = (required(payload.email), required(payload.password))
    else {
        return Err(all_fields_required());
    };

    let account = state.resolver.sign_in(&email, &password).await?;
    let cookie = issue_session(&state, &account)?;

    info!(
        user_id = %account.id,
        email = %safe_email_log(&account.email),
        provider = "local",
        "User signed in"
    );

    Ok((
        [(SET_COOKIE, cookie)],
        Json(json!({
            "message": "Login successful",
            "user": account,
        })),
    ))
}

/// POST /auth/signout
/// Clears the session cookie. Tokens are stateless, so an already copied
/// token stays valid until it expires.
pub async fn signout(Extension(state_lock): Extension<SharedState>) -> impl IntoResponse {
    let state = state_lock.read().await.clone();
    (
        [(SET_COOKIE, clear_session_cookie(&state.config.session))],
        Json(json!({ "message": "Logged out successfully" })),
    )
}

/// GET /auth/me
/// Returns the stored account behind the session cookie. Unlike the session
/// middleware this re-reads the store, so a deleted account yields 401.
/// Store failures stay 500.
pub async fn me(
    Extension(state_lock): Extension<SharedState>,
    headers: HeaderMap,
) -> Result<Json<Account>, ApiError> {
    let state = state_lock.read().await.clone();
    let not_authenticated = || ApiError::Unauthorized("Not authenticated".to_string());

    let token = read_cookie(&headers, &state.config.session.cookie_name)
        .ok_or_else(not_authenticated)?;

    let claims = state.tokens.verify(&token).map_err(|rejection| {
        debug!(reason = %rejection, "Session token rejected on /auth/me");
        not_authenticated()
    })?;

    let account = state
        .accounts
        .find_by_id(&claims.sub)
        .await?
        .ok_or_else(|| {
            debug!(user_id = %claims.sub, "Session refers to a missing account");
            not_authenticated()
        })?;

    Ok(Json(account))
}

/// GET /auth/google - Start Google OAuth flow
/// Redirects the browser to Google's consent page with a fresh CSRF state
pub async fn google_oauth_start(
    Extension(state_lock): Extension<SharedState>,
) -> Result<Response, ApiError> {
    let state = state_lock.read().await.clone();

    let nonce = generate_raw_id(OAUTH_STATE_LEN);
    let auth_url = state
        .google_service
        .get_authorization_url(&nonce)
        .map_err(|e| {
            error!(error = %e, "Failed to generate Google OAuth URL");
            ApiError::InternalServer(format!("Failed to generate OAuth URL: {}", e))
        })?;

    debug!("Redirecting to Google OAuth consent page");
    let cookie = oauth_state_cookie(&nonce, state.config.session.cookie_secure);
    Ok(([(SET_COOKIE, cookie)], Redirect::to(&auth_url)).into_response())
}

/// `failure_url` with an `error` query parameter appended
fn failure_redirect(state: &AppState, reason: &str) -> Response {
    let base = &state.config.google.failure_url;
    let separator = if base.contains('?') { '&' } else { '?' };
    let target = format!("{}{}error={}", base, separator, urlencoding::encode(reason));
    let clear = clear_oauth_state_cookie(state.config.session.cookie_secure);
    ([(SET_COOKIE, clear)], Redirect::to(&target)).into_response()
}

/// GET /auth/google/callback - Handle OAuth callback from Google
/// Every outcome is a browser redirect: success lands on the client success
/// page with a session cookie, failure on the client failure page.
pub async fn google_oauth_callback(
    Extension(state_lock): Extension<SharedState>,
    headers: HeaderMap,
    Query(params): Query<GoogleCallbackParams>,
) -> Response {
    let state = state_lock.read().await.clone();

    if let Some(error) = params.error {
        warn!(oauth_error = %error, "Google OAuth returned error");
        return failure_redirect(&state, &error);
    }

    let expected = read_cookie(&headers, OAUTH_STATE_COOKIE);
    match (&expected, &params.state) {
        (Some(expected), Some(actual)) if expected == actual => {}
        _ => {
            warn!(
                has_cookie = expected.is_some(),
                has_param = params.state.is_some(),
                "OAuth state mismatch"
            );
            return failure_redirect(&state, "invalid_state");
        }
    }

    let Some(code) = params.code.filter(|c| !c.is_empty()) else {
        warn!("No authorization code in OAuth callback");
        return failure_redirect(&state, "missing_code");
    };

    let identity = match state.google_service.authenticate(&code).await {
        Ok(identity) => identity,
        Err(e) => {
            warn!(error = %e, "Google code exchange failed");
            return failure_redirect(&state, "oauth_failed");
        }
    };

    let account = match state.resolver.federated_callback(&identity).await {
        Ok(account) => account,
        Err(e) => {
            error!(
                error = %e,
                email = %safe_email_log(&identity.email),
                "Failed to resolve federated identity"
            );
            return failure_redirect(&state, "server_error");
        }
    };

    let cookie = match issue_session(&state, &account) {
        Ok(cookie) => cookie,
        Err(_) => return failure_redirect(&state, "server_error"),
    };

    info!(
        user_id = %account.id,
        email = %safe_email_log(&account.email),
        provider = "google",
        "User signed in"
    );

    (
        AppendHeaders([
            (SET_COOKIE, cookie),
            (
                SET_COOKIE,
                clear_oauth_state_cookie(state.config.session.cookie_secure),
            ),
        ]),
        Redirect::to(&state.config.google.success_url),
    )
        .into_response()
}
