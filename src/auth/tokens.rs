//! Session token issuance and verification

use chrono::{DateTime, Duration, Utc};
use jsonwebtoken::{
    decode, encode, errors::ErrorKind, Algorithm, DecodingKey, EncodingKey, Header, Validation,
};
use std::fmt;
use tracing::debug;

use super::models::{Account, Claims};
use crate::common::config::MAX_SESSION_TTL;

/// Why a presented token was refused. Verification never fails any other way.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TokenRejection {
    Malformed,
    BadSignature,
    Expired,
}

impl fmt::Display for TokenRejection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TokenRejection::Malformed => f.write_str("malformed token"),
            TokenRejection::BadSignature => f.write_str("signature mismatch"),
            TokenRejection::Expired => f.write_str("token expired"),
        }
    }
}

/// Signs and verifies HS256 session tokens with the process-wide secret.
#[derive(Clone)]
pub struct TokenService {
    encoding: EncodingKey,
    decoding: DecodingKey,
    validation: Validation,
    ttl: Duration,
}

impl fmt::Debug for TokenService {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TokenService")
            .field("ttl", &self.ttl)
            .finish_non_exhaustive()
    }
}

impl TokenService {
    pub fn new(secret: &str, ttl: std::time::Duration) -> Self {
        let mut validation = Validation::new(Algorithm::HS256);
        validation.leeway = 0;

        Self {
            encoding: EncodingKey::from_secret(secret.as_bytes()),
            decoding: DecodingKey::from_secret(secret.as_bytes()),
            validation,
            ttl: Duration::from_std(ttl.min(MAX_SESSION_TTL))
                .unwrap_or_else(|_| Duration::days(7)),
        }
    }

    /// Issue a token whose claims snapshot `account` as of now
    pub fn issue(&self, account: &Account) -> Result<String, jsonwebtoken::errors::Error> {
        self.issue_at(account, Utc::now())
    }

    pub fn issue_at(
        &self,
        account: &Account,
        issued_at: DateTime<Utc>,
    ) -> Result<String, jsonwebtoken::errors::Error> {
        let expires_at = issued_at
            .checked_add_signed(self.ttl)
            .ok_or(ErrorKind::InvalidToken)?;
        let claims = Claims {
            sub: account.id.clone(),
            username: account.username.clone(),
            email: account.email.clone(),
            role: account.role,
            iat: issued_at.timestamp(),
            exp: expires_at.timestamp(),
        };
        encode(&Header::new(Algorithm::HS256), &claims, &self.encoding)
    }

    /// Check signature and expiry of an untrusted token
    pub fn verify(&self, token: &str) -> Result<Claims, TokenRejection> {
        decode::<Claims>(token, &self.decoding, &self.validation)
            .map(|data| data.claims)
            .map_err(|e| {
                let rejection = match e.kind() {
                    ErrorKind::InvalidSignature => TokenRejection::BadSignature,
                    ErrorKind::ExpiredSignature => TokenRejection::Expired,
                    _ => TokenRejection::Malformed,
                };
                debug!(error = %e, rejection = %rejection, "Session token rejected");
                rejection
            })
    }
}
