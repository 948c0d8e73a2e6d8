//! Identity resolution: sign-up, sign-in and federated callback all funnel
//! through here so that one email maps to exactly one account.

use std::collections::HashSet;
use std::sync::Arc;
use thiserror::Error;
use tracing::{debug, error, info, warn};

use super::models::{Account, AuthProvider, NewAccount, Role};
use super::password::{PasswordError, PasswordHasher};
use super::store::{AccountStore, StoreError};
use crate::common::{safe_email_log, ApiError};

#[derive(Debug, Error)]
pub enum AuthError {
    #[error("email already registered")]
    Conflict,

    /// No account for the email. Reported as "Invalid email".
    #[error("invalid email")]
    InvalidEmail,

    /// Account exists but was created through the federated provider
    #[error("account must sign in through the federated provider")]
    WrongProvider,

    #[error("wrong password")]
    WrongPassword,

    #[error(transparent)]
    Store(#[from] StoreError),

    #[error(transparent)]
    Password(#[from] PasswordError),
}

impl From<AuthError> for ApiError {
    fn from(err: AuthError) -> Self {
        match err {
            AuthError::Conflict => ApiError::Conflict("Email already registered".to_string()),
            AuthError::InvalidEmail => ApiError::BadRequest("Invalid email".to_string()),
            AuthError::WrongProvider => ApiError::BadRequest(
                "This account uses Google sign-in. Please log in through Google.".to_string(),
            ),
            AuthError::WrongPassword => ApiError::BadRequest("Wrong password".to_string()),
            AuthError::Store(e) => e.into(),
            AuthError::Password(e) => ApiError::InternalServer(e.to_string()),
        }
    }
}

/// Identity asserted by the federated provider after a successful code exchange
#[derive(Debug, Clone)]
pub struct FederatedIdentity {
    pub subject: String,
    pub email: String,
    pub display_name: Option<String>,
}

/// Trim and lower-case an email so it can serve as the join key
pub fn normalize_email(email: &str) -> String {
    email.trim().to_lowercase()
}

pub struct IdentityResolver {
    store: Arc<dyn AccountStore>,
    hasher: PasswordHasher,
    admin_emails: HashSet<String>,
}

impl IdentityResolver {
    pub fn new(
        store: Arc<dyn AccountStore>,
        hasher: PasswordHasher,
        admin_emails: HashSet<String>,
    ) -> Self {
        Self {
            store,
            hasher,
            admin_emails,
        }
    }

    fn role_for(&self, email: &str) -> Role {
        if self.admin_emails.contains(email) {
            Role::Admin
        } else {
            Role::User
        }
    }

    /// Create a local account. Any existing account with the email, whatever
    /// its provider, is a conflict.
    pub async fn sign_up(
        &self,
        username: &str,
        email: &str,
        password: &str,
    ) -> Result<Account, AuthError> {
        let email = normalize_email(email);

        if self.store.find_by_email(&email).await?.is_some() {
            debug!(email = %safe_email_log(&email), "Sign-up rejected: email already registered");
            return Err(AuthError::Conflict);
        }

        let password_hash = self.hasher.hash(password).await?;
        let new_account = NewAccount {
            username: username.trim().to_string(),
            role: self.role_for(&email),
            email,
            password_hash: Some(password_hash),
            google_id: None,
            auth_provider: AuthProvider::Local,
        };

        match self.store.insert_account(new_account).await {
            Ok(account) => {
                info!(
                    user_id = %account.id,
                    email = %safe_email_log(&account.email),
                    role = %account.role,
                    "Local account created"
                );
                Ok(account)
            }
            // Lost a race with a concurrent sign-up for the same email
            Err(StoreError::DuplicateEmail) => Err(AuthError::Conflict),
            Err(e) => Err(e.into()),
        }
    }

    /// Check a local password. Returns the account for token issuance.
    pub async fn sign_in(&self, email: &str, password: &str) -> Result<Account, AuthError> {
        let email = normalize_email(email);

        let account = match self.store.find_by_email(&email).await? {
            Some(account) => account,
            None => {
                debug!(email = %safe_email_log(&email), "Sign-in rejected: unknown email");
                return Err(AuthError::InvalidEmail);
            }
        };

        let hash = match (&account.auth_provider, &account.password_hash) {
            (AuthProvider::Local, Some(hash)) => hash,
            _ => {
                debug!(
                    user_id = %account.id,
                    provider = %account.auth_provider.as_str(),
                    "Sign-in rejected: account has no local password"
                );
                return Err(AuthError::WrongProvider);
            }
        };

        if !self.hasher.verify(password, hash).await? {
            debug!(user_id = %account.id, "Sign-in rejected: password mismatch");
            return Err(AuthError::WrongPassword);
        }

        Ok(account)
    }

    /// Resolve a federated identity to an account: create, link, or reuse.
    /// Replaying the same identity always yields the same account.
    pub async fn federated_callback(
        &self,
        identity: &FederatedIdentity,
    ) -> Result<Account, AuthError> {
        let email = normalize_email(&identity.email);

        if let Some(existing) = self.store.find_by_email(&email).await? {
            return self.link(existing, &identity.subject).await;
        }

        let username = identity
            .display_name
            .as_deref()
            .map(str::trim)
            .filter(|name| !name.is_empty())
            .map(str::to_string)
            .unwrap_or_else(|| email.split('@').next().unwrap_or_default().to_string());

        let new_account = NewAccount {
            username,
            role: self.role_for(&email),
            email: email.clone(),
            password_hash: None,
            google_id: Some(identity.subject.clone()),
            auth_provider: AuthProvider::Google,
        };

        match self.store.insert_account(new_account).await {
            Ok(account) => {
                info!(
                    user_id = %account.id,
                    email = %safe_email_log(&account.email),
                    provider = "google",
                    "Federated account created"
                );
                Ok(account)
            }
            Err(StoreError::DuplicateEmail) => {
                // A concurrent request created the account first; converge on it.
                let existing = self.store.find_by_email(&email).await?.ok_or_else(|| {
                    error!(email = %safe_email_log(&email), "Duplicate email but no row found");
                    AuthError::Store(StoreError::Corrupt("duplicate email vanished".to_string()))
                })?;
                self.link(existing, &identity.subject).await
            }
            Err(e) => Err(e.into()),
        }
    }

    async fn link(&self, account: Account, subject: &str) -> Result<Account, AuthError> {
        if let Some(current) = &account.google_id {
            if current != subject {
                warn!(
                    user_id = %account.id,
                    "Federated subject differs from the linked one; keeping the existing link"
                );
            }
            return Ok(account);
        }

        let linked = self.store.set_federated_id(&account.email, subject).await?;
        if linked {
            info!(
                user_id = %account.id,
                email = %safe_email_log(&account.email),
                provider = "google",
                "Linked federated identity to existing account"
            );
        }

        let refreshed = self.store.find_by_id(&account.id).await?;
        Ok(refreshed.unwrap_or(account))
    }
}
