// Application state shared across all modules

use sqlx::SqlitePool;
use std::sync::Arc;
use tokio::sync::RwLock;

use super::config::AppConfig;
use crate::auth::password::PasswordHasher;
use crate::auth::resolver::IdentityResolver;
use crate::auth::store::{AccountStore, SqliteAccountStore};
use crate::auth::tokens::TokenService;
use crate::services::rate_limit::{AI_LIMIT_MESSAGE, AUTH_LIMIT_MESSAGE};
use crate::services::{GeminiService, GoogleService, RateGovernor};

/// Handle passed to handlers and middleware through `Extension`
pub type SharedState = Arc<RwLock<AppState>>;

/// Application state containing configuration, the credential store and services
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<AppConfig>,
    pub accounts: Arc<dyn AccountStore>,
    pub resolver: Arc<IdentityResolver>,
    pub tokens: Arc<TokenService>,
    pub google_service: Arc<GoogleService>,
    pub gemini_service: Arc<GeminiService>,
    pub auth_governor: Arc<RateGovernor>,
    pub ai_governor: Arc<RateGovernor>,
}

impl AppState {
    pub fn new(config: AppConfig, pool: SqlitePool) -> Self {
        Self::with_store(config, Arc::new(SqliteAccountStore::new(pool)))
    }

    /// Wire every service around an arbitrary credential store
    pub fn with_store(config: AppConfig, accounts: Arc<dyn AccountStore>) -> Self {
        let resolver = IdentityResolver::new(
            accounts.clone(),
            PasswordHasher::new(config.bcrypt_cost),
            config.admin_emails.clone(),
        );
        let tokens = TokenService::new(&config.session.jwt_secret, config.session.ttl);

        let limits = &config.rate_limit;
        let auth_governor =
            RateGovernor::new("auth", limits.auth, limits.enabled, AUTH_LIMIT_MESSAGE);
        let ai_governor = RateGovernor::new("ai", limits.ai, limits.enabled, AI_LIMIT_MESSAGE);

        Self {
            accounts,
            resolver: Arc::new(resolver),
            tokens: Arc::new(tokens),
            google_service: Arc::new(GoogleService::new(config.google.clone())),
            gemini_service: Arc::new(GeminiService::new(config.gemini.clone())),
            auth_governor: Arc::new(auth_governor),
            ai_governor: Arc::new(ai_governor),
            config: Arc::new(config),
        }
    }

    pub fn into_shared(self) -> SharedState {
        Arc::new(RwLock::new(self))
    }
}
