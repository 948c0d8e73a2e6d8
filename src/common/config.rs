// src/common/config.rs
//! Process-wide configuration loaded once at startup from the environment
//! (and `.env` via dotenv). Everything downstream receives these values
//! explicitly; nothing re-reads the environment per request.

use std::collections::HashSet;
use std::env;
use std::time::Duration;
use tracing::warn;

const DEV_JWT_SECRET: &str = "replace_with_strong_secret";
/// Upper bound on session lifetime (one year)
pub const MAX_SESSION_TTL: Duration = Duration::from_secs(365 * 24 * 60 * 60);

/// Session cookie and token settings
#[derive(Debug, Clone)]
pub struct SessionConfig {
    pub jwt_secret: String,
    pub ttl: Duration,
    pub cookie_name: String,
    pub cookie_secure: bool,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            jwt_secret: DEV_JWT_SECRET.to_string(),
            ttl: Duration::from_secs(7 * 24 * 60 * 60),
            cookie_name: "token".to_string(),
            cookie_secure: false,
        }
    }
}

/// Google OAuth client settings
#[derive(Debug, Clone)]
pub struct GoogleOAuthConfig {
    pub client_id: Option<String>,
    pub client_secret: Option<String>,
    pub redirect_uri: String,
    pub auth_url: String,
    pub token_url: String,
    pub userinfo_url: String,
    /// Where the browser lands after a successful callback
    pub success_url: String,
    /// Where the browser lands when the handshake fails
    pub failure_url: String,
}

impl Default for GoogleOAuthConfig {
    fn default() -> Self {
        Self {
            client_id: None,
            client_secret: None,
            redirect_uri: "http://localhost:2121/auth/google/callback".to_string(),
            auth_url: "https://accounts.google.com/o/oauth2/v2/auth".to_string(),
            token_url: "https://oauth2.googleapis.com/token".to_string(),
            userinfo_url: "https://www.googleapis.com/oauth2/v2/userinfo".to_string(),
            success_url: "http://localhost:5173/oauth-success".to_string(),
            failure_url: "http://localhost:5173/auth".to_string(),
        }
    }
}

/// Gemini pass-through settings
#[derive(Debug, Clone)]
pub struct GeminiConfig {
    pub api_key: Option<String>,
    pub model: String,
    pub base_url: String,
}

impl Default for GeminiConfig {
    fn default() -> Self {
        Self {
            api_key: None,
            model: "gemini-2.5-flash".to_string(),
            base_url: "https://generativelanguage.googleapis.com/v1beta".to_string(),
        }
    }
}

/// Ceiling and window for one rate governor
#[derive(Debug, Clone, Copy)]
pub struct GovernorConfig {
    pub max_requests: u32,
    pub window: Duration,
}

#[derive(Debug, Clone)]
pub struct RateLimitConfig {
    pub enabled: bool,
    /// Honour X-Forwarded-For / X-Real-IP when resolving the network origin
    pub trust_proxy_headers: bool,
    pub auth: GovernorConfig,
    pub ai: GovernorConfig,
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            trust_proxy_headers: false,
            auth: GovernorConfig {
                max_requests: 10,
                window: Duration::from_secs(5 * 60),
            },
            ai: GovernorConfig {
                max_requests: 10,
                window: Duration::from_secs(15 * 60),
            },
        }
    }
}

#[derive(Debug, Clone)]
pub struct AppConfig {
    pub database_url: String,
    pub port: u16,
    pub session: SessionConfig,
    pub bcrypt_cost: u32,
    /// Lower-cased emails that are provisioned with the admin role
    pub admin_emails: HashSet<String>,
    pub cors_origins: Vec<String>,
    pub google: GoogleOAuthConfig,
    pub gemini: GeminiConfig,
    pub rate_limit: RateLimitConfig,
    pub sentry_dsn: Option<String>,
    /// Reported to sentry with every event
    pub environment: String,
    pub sentry_traces_sample_rate: f32,
    /// Drop and recreate the schema on startup
    pub reset_db: bool,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            database_url: "sqlite://scribo.db".to_string(),
            port: 2121,
            session: SessionConfig::default(),
            bcrypt_cost: 10,
            admin_emails: HashSet::new(),
            cors_origins: vec!["http://localhost:5173".to_string()],
            google: GoogleOAuthConfig::default(),
            gemini: GeminiConfig::default(),
            rate_limit: RateLimitConfig::default(),
            sentry_dsn: None,
            environment: "development".to_string(),
            sentry_traces_sample_rate: 0.0,
            reset_db: false,
        }
    }
}

impl AppConfig {
    /// Load configuration from environment variables, falling back to defaults
    pub fn from_env() -> Self {
        let mut config = Self::default();

        if let Ok(url) = env::var("DATABASE_URL") {
            config.database_url = url;
        }
        if let Some(port) = parse_var::<u16>("PORT") {
            config.port = port;
        }

        match env::var("JWT_SECRET") {
            Ok(secret) if !secret.trim().is_empty() => config.session.jwt_secret = secret,
            _ => warn!("JWT_SECRET not set, using the development signing secret"),
        }
        if let Some(secs) = parse_var::<u64>("SESSION_TTL_SECONDS") {
            config.session.ttl = clamp_session_ttl(Duration::from_secs(secs));
        }
        if let Ok(name) = env::var("SESSION_COOKIE_NAME") {
            if !name.trim().is_empty() {
                config.session.cookie_name = name.trim().to_string();
            }
        }
        if let Some(secure) = parse_flag("COOKIE_SECURE") {
            config.session.cookie_secure = secure;
        }

        if let Some(cost) = parse_var::<u32>("BCRYPT_COST") {
            config.bcrypt_cost = cost;
        }

        config.admin_emails = split_list(&env::var("ADMIN_EMAILS").unwrap_or_default())
            .into_iter()
            .map(|email| email.to_lowercase())
            .collect();

        if let Ok(origins) = env::var("CORS_ORIGINS") {
            config.cors_origins = split_list(&origins);
        }

        config.google.client_id = non_empty_var("GOOGLE_CLIENT_ID");
        config.google.client_secret = non_empty_var("GOOGLE_CLIENT_SECRET");
        if let Some(uri) = non_empty_var("GOOGLE_OAUTH_REDIRECT_URI") {
            config.google.redirect_uri = uri;
        }
        if let Some(url) = non_empty_var("CLIENT_SUCCESS_URL") {
            config.google.success_url = url;
        }
        if let Some(url) = non_empty_var("CLIENT_FAILURE_URL") {
            config.google.failure_url = url;
        }

        config.gemini.api_key = non_empty_var("GEMINI_API_KEY");
        if let Some(model) = non_empty_var("GEMINI_MODEL") {
            config.gemini.model = model;
        }

        // RATE_LIMIT_ENABLED - set to "false" to disable both governors
        if let Some(enabled) = parse_flag("RATE_LIMIT_ENABLED") {
            config.rate_limit.enabled = enabled;
        }
        if let Some(trust) = parse_flag("RATE_LIMIT_TRUST_PROXY") {
            config.rate_limit.trust_proxy_headers = trust;
        }
        if let Some(max) = parse_var::<u32>("AUTH_RATE_LIMIT_MAX") {
            config.rate_limit.auth.max_requests = max;
        }
        if let Some(secs) = parse_var::<u64>("AUTH_RATE_LIMIT_WINDOW_SECONDS") {
            config.rate_limit.auth.window = Duration::from_secs(secs);
        }
        if let Some(max) = parse_var::<u32>("AI_RATE_LIMIT_MAX") {
            config.rate_limit.ai.max_requests = max;
        }
        if let Some(secs) = parse_var::<u64>("AI_RATE_LIMIT_WINDOW_SECONDS") {
            config.rate_limit.ai.window = Duration::from_secs(secs);
        }

        config.sentry_dsn = non_empty_var("SENTRY_DSN");
        if let Some(environment) = non_empty_var("ENVIRONMENT") {
            config.environment = environment;
        }
        if let Some(rate) = parse_var::<f32>("SENTRY_TRACES_SAMPLE_RATE") {
            config.sentry_traces_sample_rate = rate.clamp(0.0, 1.0);
        }
        config.reset_db = non_empty_var("RESET_DB").is_some_and(|v| v == "true");

        config
    }
}

fn non_empty_var(key: &str) -> Option<String> {
    env::var(key)
        .ok()
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

fn parse_var<T: std::str::FromStr>(key: &str) -> Option<T> {
    let raw = non_empty_var(key)?;
    match raw.parse::<T>() {
        Ok(value) => Some(value),
        Err(_) => {
            warn!(key = %key, value = %raw, "Ignoring unparsable configuration value");
            None
        }
    }
}

fn clamp_session_ttl(ttl: Duration) -> Duration {
    if ttl > MAX_SESSION_TTL {
        warn!(
            requested_secs = ttl.as_secs(),
            max_secs = MAX_SESSION_TTL.as_secs(),
            "SESSION_TTL_SECONDS too large, clamping"
        );
        return MAX_SESSION_TTL;
    }
    ttl
}

fn parse_flag(key: &str) -> Option<bool> {
    non_empty_var(key).map(|v| v.to_lowercase() != "false")
}

fn split_list(raw: &str) -> Vec<String> {
    raw.split(',')
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
        .collect()
}
