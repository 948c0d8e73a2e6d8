//! # Auth Module
//!
//! Identity and session handling:
//! - Credential store and password hashing
//! - Session token issuance and verification
//! - Local sign-up/sign-in and Google OAuth identity resolution
//! - Session middleware, `Principal` extractor and the role gate

pub mod cookies;
pub mod extractors;
pub mod handlers;
pub mod middleware;
pub mod models;
pub mod password;
pub mod resolver;
pub mod routes;
pub mod store;
pub mod tokens;

#[cfg(test)]
mod tests;

pub use middleware::{require_role, require_session};
pub use models::{Account, Principal, Role};
pub use routes::auth_routes;
