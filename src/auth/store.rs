//! Credential store contract and its SQLite implementation

use async_trait::async_trait;
use sqlx::SqlitePool;
use thiserror::Error;
use tracing::{debug, error};

use super::models::{Account, AccountRow, NewAccount};
use crate::common::{generate_user_id, safe_email_log, ApiError};

#[derive(Debug, Error)]
pub enum StoreError {
    /// The unique email constraint rejected an insert
    #[error("an account with this email already exists")]
    DuplicateEmail,

    #[error("stored account is unreadable: {0}")]
    Corrupt(String),

    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),
}

impl From<StoreError> for ApiError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::Database(e) => ApiError::DatabaseError(e),
            StoreError::DuplicateEmail => {
                ApiError::Conflict("Email already registered".to_string())
            }
            StoreError::Corrupt(detail) => ApiError::InternalServer(detail),
        }
    }
}

/// Durable account table. Every method is a single atomic row operation;
/// callers never hold a transaction across requests.
#[async_trait]
pub trait AccountStore: Send + Sync {
    async fn find_by_email(&self, email: &str) -> Result<Option<Account>, StoreError>;

    async fn find_by_id(&self, id: &str) -> Result<Option<Account>, StoreError>;

    /// Insert a new account. Fails with [`StoreError::DuplicateEmail`] when the
    /// email is already taken.
    async fn insert_account(&self, account: NewAccount) -> Result<Account, StoreError>;

    /// Attach a federated subject to the account with `email`, only if none is
    /// attached yet. Returns whether a row changed.
    async fn set_federated_id(&self, email: &str, subject: &str) -> Result<bool, StoreError>;

    async fn list_accounts(&self) -> Result<Vec<Account>, StoreError>;
}

#[derive(Debug, Clone)]
pub struct SqliteAccountStore {
    pool: SqlitePool,
}

impl SqliteAccountStore {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }
}

fn into_account(row: AccountRow) -> Result<Account, StoreError> {
    let id = row.id.clone();
    Account::try_from(row).map_err(|e| {
        error!(user_id = %id, error = %e, "Account row failed to decode");
        StoreError::Corrupt(e)
    })
}

/// Only the email constraint means "already registered"; any other
/// constraint failure is a plain database error.
fn is_email_violation(db_err: &dyn sqlx::error::DatabaseError) -> bool {
    db_err.is_unique_violation() && db_err.message().contains("users.email")
}

#[async_trait]
impl AccountStore for SqliteAccountStore {
    async fn find_by_email(&self, email: &str) -> Result<Option<Account>, StoreError> {
        let row = sqlx::query_as::<_, AccountRow>("SELECT * FROM users WHERE email = ?")
            .bind(email)
            .fetch_optional(&self.pool)
            .await?;
        row.map(into_account).transpose()
    }

    async fn find_by_id(&self, id: &str) -> Result<Option<Account>, StoreError> {
        let row = sqlx::query_as::<_, AccountRow>("SELECT * FROM users WHERE id = ?")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;
        row.map(into_account).transpose()
    }

    async fn insert_account(&self, account: NewAccount) -> Result<Account, StoreError> {
        let id = generate_user_id();

        let result = sqlx::query(
            r#"
            INSERT INTO users (id, username, email, password_hash, google_id, auth_provider, role)
            VALUES (?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(&id)
        .bind(&account.username)
        .bind(&account.email)
        .bind(account.password_hash.as_deref())
        .bind(account.google_id.as_deref())
        .bind(account.auth_provider.as_str())
        .bind(account.role.as_str())
        .execute(&self.pool)
        .await;

        if let Err(e) = result {
            if let sqlx::Error::Database(db_err) = &e {
                if is_email_violation(db_err.as_ref()) {
                    debug!(
                        email = %safe_email_log(&account.email),
                        "Insert rejected by unique email constraint"
                    );
                    return Err(StoreError::DuplicateEmail);
                }
            }
            return Err(StoreError::Database(e));
        }

        self.find_by_id(&id)
            .await?
            .ok_or(StoreError::Database(sqlx::Error::RowNotFound))
    }

    async fn set_federated_id(&self, email: &str, subject: &str) -> Result<bool, StoreError> {
        let result = sqlx::query(
            r#"
            UPDATE users
            SET google_id = ?, updated_at = datetime('now')
            WHERE email = ? AND google_id IS NULL
            "#,
        )
        .bind(subject)
        .bind(email)
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected() > 0)
    }

    async fn list_accounts(&self) -> Result<Vec<Account>, StoreError> {
        let rows = sqlx::query_as::<_, AccountRow>("SELECT * FROM users ORDER BY created_at, id")
            .fetch_all(&self.pool)
            .await?;
        rows.into_iter().map(into_account).collect()
    }
}
