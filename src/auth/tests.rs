//! Tests for auth module
//!
//! These tests verify identity resolution against a real (in-memory) store
//! and the auth routes end to end through the router.

#[cfg(test)]
mod tests {
    use super::super::*;
    use crate::common::state::test_support::{
        call, get_request, json_request, sign_up_and_in, test_app, test_config,
    };
    use crate::common::{AppConfig, AppState};
    use async_trait::async_trait;
    use axum::http::{header, Method, StatusCode};
    use chrono::{Duration, Utc};
    use crate::auth::models::{AuthProvider, NewAccount};
    use crate::auth::password::PasswordHasher;
    use crate::auth::resolver::{AuthError, FederatedIdentity, IdentityResolver};
    use crate::auth::store::test_support::memory_pool;
    use crate::auth::store::{AccountStore, SqliteAccountStore, StoreError};
    use serde_json::json;
    use std::collections::HashSet;
    use std::sync::Arc;

    async fn resolver_with(admins: &[&str]) -> (IdentityResolver, Arc<dyn AccountStore>) {
        let store: Arc<dyn AccountStore> = Arc::new(SqliteAccountStore::new(memory_pool().await));
        let admins: HashSet<String> = admins.iter().map(|e| e.to_string()).collect();
        let resolver = IdentityResolver::new(store.clone(), PasswordHasher::new(4), admins);
        (resolver, store)
    }

    fn google(subject: &str, email: &str) -> FederatedIdentity {
        FederatedIdentity {
            subject: subject.to_string(),
            email: email.to_string(),
            display_name: Some("Ada Lovelace".to_string()),
        }
    }

    // ---- Identity resolver ----

    #[tokio::test]
    async fn test_sign_up_then_sign_in_with_normalized_email() {
        let (resolver, _) = resolver_with(&[]).await;

        let created = resolver.sign_up(" ada ", "Ada@X.com ", "secret123").await.unwrap();
        assert_eq!(created.email, "ada@x.com");
        assert_eq!(created.username, "ada");
        assert_eq!(created.auth_provider, AuthProvider::Local);
        assert_eq!(created.role, Role::User);
        assert!(created.password_hash.is_some());
        assert_ne!(created.password_hash.as_deref(), Some("secret123"));

        let signed_in = resolver.sign_in("ada@x.com", "secret123").await.unwrap();
        assert_eq!(signed_in.id, created.id);
    }

    #[tokio::test]
    async fn test_sign_in_failures() {
        let (resolver, _) = resolver_with(&[]).await;
        resolver.sign_up("ada", "ada@x.com", "secret123").await.unwrap();

        assert!(matches!(
            resolver.sign_in("bob@x.com", "secret123").await,
            Err(AuthError::InvalidEmail)
        ));
        assert!(matches!(
            resolver.sign_in("ada@x.com", "wrong").await,
            Err(AuthError::WrongPassword)
        ));
    }

    #[tokio::test]
    async fn test_duplicate_sign_up_is_conflict() {
        let (resolver, store) = resolver_with(&[]).await;
        resolver.sign_up("ada", "ada@x.com", "secret123").await.unwrap();

        assert!(matches!(
            resolver.sign_up("ada2", "ADA@x.com", "other").await,
            Err(AuthError::Conflict)
        ));
        assert_eq!(store.list_accounts().await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_concurrent_sign_ups_create_one_account() {
        let (resolver, store) = resolver_with(&[]).await;

        let (a, b) = tokio::join!(
            resolver.sign_up("ada", "ada@x.com", "secret123"),
            resolver.sign_up("ada", "ada@x.com", "secret456"),
        );

        assert_eq!(a.is_ok() as u8 + b.is_ok() as u8, 1);
        let loser = if a.is_ok() { b } else { a };
        assert!(matches!(loser, Err(AuthError::Conflict)));
        assert_eq!(store.list_accounts().await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_federated_callback_creates_google_account() {
        let (resolver, _) = resolver_with(&[]).await;

        let account = resolver
            .federated_callback(&google("g-1", "ada@gmail.com"))
            .await
            .unwrap();
        assert_eq!(account.auth_provider, AuthProvider::Google);
        assert_eq!(account.google_id.as_deref(), Some("g-1"));
        assert_eq!(account.username, "Ada Lovelace");
        assert!(account.password_hash.is_none());

        assert!(matches!(
            resolver.sign_in("ada@gmail.com", "anything").await,
            Err(AuthError::WrongProvider)
        ));
    }

    #[tokio::test]
    async fn test_federated_callback_is_idempotent() {
        let (resolver, store) = resolver_with(&[]).await;

        let first = resolver
            .federated_callback(&google("g-1", "ada@gmail.com"))
            .await
            .unwrap();
        let second = resolver
            .federated_callback(&google("g-1", "ada@gmail.com"))
            .await
            .unwrap();

        assert_eq!(first.id, second.id);
        assert_eq!(store.list_accounts().await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_concurrent_federated_callbacks_converge() {
        let (resolver, store) = resolver_with(&[]).await;
        let identity = google("g-1", "ada@gmail.com");

        let (a, b) = tokio::join!(
            resolver.federated_callback(&identity),
            resolver.federated_callback(&identity),
        );

        assert_eq!(a.unwrap().id, b.unwrap().id);
        assert_eq!(store.list_accounts().await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_federated_callback_links_local_account() {
        let (resolver, store) = resolver_with(&[]).await;
        let local = resolver.sign_up("ada", "ada@x.com", "secret123").await.unwrap();

        let linked = resolver
            .federated_callback(&google("g-1", "Ada@X.com"))
            .await
            .unwrap();

        assert_eq!(linked.id, local.id);
        assert_eq!(linked.google_id.as_deref(), Some("g-1"));
        assert_eq!(linked.auth_provider, AuthProvider::Local);
        assert_eq!(linked.password_hash, local.password_hash);
        assert_eq!(store.list_accounts().await.unwrap().len(), 1);

        // The local password still works after linking
        assert_eq!(
            resolver.sign_in("ada@x.com", "secret123").await.unwrap().id,
            local.id
        );
    }

    #[tokio::test]
    async fn test_changed_google_email_creates_account_for_new_email() {
        let (resolver, store) = resolver_with(&[]).await;
        let old = resolver
            .federated_callback(&google("g-1", "old@gmail.com"))
            .await
            .unwrap();

        let new = resolver
            .federated_callback(&google("g-1", "new@gmail.com"))
            .await
            .unwrap();

        assert_ne!(new.id, old.id);
        assert_eq!(new.email, "new@gmail.com");
        assert_eq!(new.google_id.as_deref(), Some("g-1"));
        assert_eq!(store.list_accounts().await.unwrap().len(), 2);
    }

    #[tokio::test]
    async fn test_subject_linked_elsewhere_still_links_local_account() {
        let (resolver, store) = resolver_with(&[]).await;
        resolver
            .federated_callback(&google("g-1", "ada@gmail.com"))
            .await
            .unwrap();
        let bob = resolver.sign_up("bob", "bob@x.com", "secret123").await.unwrap();

        let linked = resolver
            .federated_callback(&google("g-1", "bob@x.com"))
            .await
            .unwrap();

        assert_eq!(linked.id, bob.id);
        assert_eq!(linked.google_id.as_deref(), Some("g-1"));
        assert_eq!(linked.auth_provider, AuthProvider::Local);
        assert_eq!(store.list_accounts().await.unwrap().len(), 2);
    }

    #[tokio::test]
    async fn test_google_account_rejects_every_password() {
        let (resolver, _) = resolver_with(&[]).await;
        resolver
            .federated_callback(&google("g-1", "ada@gmail.com"))
            .await
            .unwrap();

        for password in ["secret123", "", "   ", "x", "ada@gmail.com"] {
            assert!(
                matches!(
                    resolver.sign_in("ada@gmail.com", password).await,
                    Err(AuthError::WrongProvider)
                ),
                "password {:?} should not sign in",
                password
            );
        }
    }

    #[tokio::test]
    async fn test_sign_up_after_federated_account_is_conflict() {
        let (resolver, _) = resolver_with(&[]).await;
        resolver
            .federated_callback(&google("g-1", "ada@gmail.com"))
            .await
            .unwrap();

        assert!(matches!(
            resolver.sign_up("ada", "ada@gmail.com", "secret123").await,
            Err(AuthError::Conflict)
        ));
    }

    #[tokio::test]
    async fn test_admin_emails_are_provisioned_as_admin() {
        let (resolver, _) = resolver_with(&["root@x.com"]).await;

        let admin = resolver.sign_up("root", "Root@x.com", "secret123").await.unwrap();
        assert_eq!(admin.role, Role::Admin);

        let google_admin = resolver
            .federated_callback(&google("g-9", "root@x.com"))
            .await
            .unwrap();
        assert_eq!(google_admin.id, admin.id);

        let user = resolver.sign_up("ada", "ada@x.com", "secret123").await.unwrap();
        assert_eq!(user.role, Role::User);
    }

    // ---- Routes ----

    #[tokio::test]
    async fn test_signup_and_signin_flow() {
        let (app, _) = test_app(test_config()).await;

        let signup = call(
            &app,
            json_request(
                Method::POST,
                "/auth/signup",
                json!({ "username": "ada", "email": "ada@x.com", "password": "secret123" }),
                None,
            ),
        )
        .await;
        assert_eq!(signup.status, StatusCode::CREATED);
        assert_eq!(signup.body["message"], "User registered successfully");
        assert!(signup.body["id"].as_str().unwrap().starts_with("U_"));
        assert!(signup.headers.get(header::SET_COOKIE).is_none());

        let duplicate = call(
            &app,
            json_request(
                Method::POST,
                "/auth/signup",
                json!({ "username": "ada", "email": "ada@x.com", "password": "secret123" }),
                None,
            ),
        )
        .await;
        assert_eq!(duplicate.status, StatusCode::BAD_REQUEST);
        assert_eq!(duplicate.body["error"], "Email already registered");

        let signin = call(
            &app,
            json_request(
                Method::POST,
                "/auth/signin",
                json!({ "email": "ada@x.com", "password": "secret123" }),
                None,
            ),
        )
        .await;
        assert_eq!(signin.status, StatusCode::OK);
        assert_eq!(signin.body["message"], "Login successful");
        assert_eq!(signin.body["user"]["email"], "ada@x.com");
        assert!(signin.body["user"].get("password_hash").is_none());

        let set_cookie = &signin.set_cookies()[0];
        assert!(set_cookie.starts_with("token="));
        assert!(set_cookie.contains("HttpOnly"));
        assert!(set_cookie.contains("SameSite=Strict"));
        assert!(set_cookie.contains("Max-Age=604800"));

        let me = call(&app, get_request("/auth/me", signin.cookie().as_deref())).await;
        assert_eq!(me.status, StatusCode::OK);
        assert_eq!(me.body["email"], "ada@x.com");
        assert_eq!(me.body["role"], "user");
        assert_eq!(me.body["auth_provider"], "LOCAL");
    }

    #[tokio::test]
    async fn test_signup_requires_all_fields() {
        let (app, _) = test_app(test_config()).await;

        for body in [
            json!({ "email": "ada@x.com", "password": "secret123" }),
            json!({ "username": "ada", "password": "secret123" }),
            json!({ "username": "ada", "email": "ada@x.com" }),
            json!({ "username": "  ", "email": "ada@x.com", "password": "secret123" }),
        ] {
            let response =
                call(&app, json_request(Method::POST, "/auth/signup", body, None)).await;
            assert_eq!(response.status, StatusCode::BAD_REQUEST);
            assert_eq!(response.body["error"], "All fields are required");
        }

        let malformed = call(
            &app,
            axum::http::Request::builder()
                .method(Method::POST)
                .uri("/auth/signup")
                .header(header::CONTENT_TYPE, "application/json")
                .body(axum::body::Body::from("{not json"))
                .unwrap(),
        )
        .await;
        assert_eq!(malformed.status, StatusCode::BAD_REQUEST);
        assert_eq!(malformed.body["error"], "All fields are required");
    }

    #[tokio::test]
    async fn test_signup_rejects_invalid_email() {
        let (app, _) = test_app(test_config()).await;

        let response = call(
            &app,
            json_request(
                Method::POST,
                "/auth/signup",
                json!({ "username": "ada", "email": "not-an-email", "password": "secret123" }),
                None,
            ),
        )
        .await;
        assert_eq!(response.status, StatusCode::BAD_REQUEST);
        assert_eq!(response.body["code"], "VALIDATION_ERROR");
        assert_eq!(response.body["error"], "email: Email is invalid");
    }

    #[tokio::test]
    async fn test_signin_error_messages() {
        let (app, _) = test_app(test_config()).await;
        sign_up_and_in(&app, "ada", "ada@x.com").await;

        let cases = [
            (json!({ "email": "ada@x.com" }), "All fields are required"),
            (json!({ "email": "bob@x.com", "password": "secret123" }), "Invalid email"),
            (json!({ "email": "ada@x.com", "password": "nope" }), "Wrong password"),
        ];
        for (body, message) in cases {
            let response =
                call(&app, json_request(Method::POST, "/auth/signin", body, None)).await;
            assert_eq!(response.status, StatusCode::BAD_REQUEST);
            assert_eq!(response.body["error"], message);
            assert!(response.headers.get(header::SET_COOKIE).is_none());
        }
    }

    #[tokio::test]
    async fn test_signin_to_google_account_is_wrong_provider() {
        let (app, shared) = test_app(test_config()).await;
        let state = shared.read().await.clone();
        state
            .resolver
            .federated_callback(&google("g-1", "ada@gmail.com"))
            .await
            .unwrap();

        for password in ["secret123", "wrong", "ada@gmail.com"] {
            let response = call(
                &app,
                json_request(
                    Method::POST,
                    "/auth/signin",
                    json!({ "email": "ada@gmail.com", "password": password }),
                    None,
                ),
            )
            .await;
            assert_eq!(response.status, StatusCode::BAD_REQUEST);
            assert_eq!(
                response.body["error"],
                "This account uses Google sign-in. Please log in through Google."
            );
            assert!(response.headers.get(header::SET_COOKIE).is_none());
        }
    }

    #[tokio::test]
    async fn test_me_rejections() {
        let (app, shared) = test_app(test_config()).await;

        let anonymous = call(&app, get_request("/auth/me", None)).await;
        assert_eq!(anonymous.status, StatusCode::UNAUTHORIZED);
        assert_eq!(anonymous.body["error"], "Not authenticated");

        let garbage = call(&app, get_request("/auth/me", Some("token=garbage"))).await;
        assert_eq!(garbage.status, StatusCode::UNAUTHORIZED);
        assert_eq!(garbage.body["error"], "Not authenticated");

        // Valid signature, but the account no longer exists
        let state = shared.read().await.clone();
        let ghost = Account {
            id: "U_GHOST001".to_string(),
            username: "ghost".to_string(),
            email: "ghost@x.com".to_string(),
            password_hash: None,
            google_id: None,
            auth_provider: AuthProvider::Local,
            role: Role::User,
            created_at: String::new(),
            updated_at: String::new(),
        };
        let token = state.tokens.issue(&ghost).unwrap();
        let gone = call(&app, get_request("/auth/me", Some(&format!("token={}", token)))).await;
        assert_eq!(gone.status, StatusCode::UNAUTHORIZED);
        assert_eq!(gone.body["error"], "Not authenticated");
    }

    #[tokio::test]
    async fn test_signout_clears_cookie() {
        let (app, _) = test_app(test_config()).await;
        let cookie = sign_up_and_in(&app, "ada", "ada@x.com").await;

        let response = call(
            &app,
            json_request(Method::POST, "/auth/signout", json!({}), Some(&cookie)),
        )
        .await;
        assert_eq!(response.status, StatusCode::OK);
        let cleared = &response.set_cookies()[0];
        assert!(cleared.starts_with("token=;"));
        assert!(cleared.contains("Max-Age=0"));
    }

    #[tokio::test]
    async fn test_session_middleware_rejects_bad_tokens() {
        let (app, shared) = test_app(test_config()).await;
        let cookie = sign_up_and_in(&app, "ada", "ada@x.com").await;

        let missing = call(&app, get_request("/user/profile", None)).await;
        assert_eq!(missing.status, StatusCode::UNAUTHORIZED);
        assert_eq!(missing.body["error"], "Not authenticated");

        // Flip one character in the middle of the signature
        let token = cookie.trim_start_matches("token=");
        let (head, signature) = token.rsplit_once('.').unwrap();
        let mut sig: Vec<char> = signature.chars().collect();
        let mid = sig.len() / 2;
        sig[mid] = if sig[mid] == 'A' { 'B' } else { 'A' };
        let tampered = format!("token={}.{}", head, sig.into_iter().collect::<String>());

        let response = call(&app, get_request("/user/profile", Some(&tampered))).await;
        assert_eq!(response.status, StatusCode::UNAUTHORIZED);
        assert_eq!(response.body["error"], "Invalid or expired token");

        // Issued eight days ago with a seven day lifetime
        let state = shared.read().await.clone();
        let account = state.accounts.find_by_email("ada@x.com").await.unwrap().unwrap();
        let expired = state
            .tokens
            .issue_at(&account, Utc::now() - Duration::days(8))
            .unwrap();
        let response = call(
            &app,
            get_request("/user/profile", Some(&format!("token={}", expired))),
        )
        .await;
        assert_eq!(response.status, StatusCode::UNAUTHORIZED);
        assert_eq!(response.body["error"], "Invalid or expired token");

        let ok = call(&app, get_request("/user/profile", Some(&cookie))).await;
        assert_eq!(ok.status, StatusCode::OK);
    }

    #[tokio::test]
    async fn test_auth_governor_limits_by_origin() {
        let mut config = test_config();
        config.rate_limit.auth.max_requests = 3;
        let (app, _) = test_app(config).await;

        for _ in 0..3 {
            let response = call(&app, get_request("/auth/me", None)).await;
            assert_eq!(response.status, StatusCode::UNAUTHORIZED);
        }

        let limited = call(&app, get_request("/auth/me", None)).await;
        assert_eq!(limited.status, StatusCode::TOO_MANY_REQUESTS);
        assert_eq!(limited.body["error"], "Too many login attempts. Try again later");
        assert!(limited.headers.get(header::RETRY_AFTER).is_some());

        // Routes outside the auth class are not counted
        let root = call(&app, get_request("/", None)).await;
        assert_eq!(root.status, StatusCode::OK);
        assert_eq!(root.text, "hello from server");
    }

    #[tokio::test]
    async fn test_google_start_requires_configuration() {
        let (app, _) = test_app(test_config()).await;
        let response = call(&app, get_request("/auth/google", None)).await;
        assert_eq!(response.status, StatusCode::INTERNAL_SERVER_ERROR);
    }

    fn google_config() -> AppConfig {
        let mut config = test_config();
        config.google.client_id = Some("client-id".to_string());
        config.google.client_secret = Some("client-secret".to_string());
        config
    }

    #[tokio::test]
    async fn test_google_start_redirects_with_state_cookie() {
        let (app, _) = test_app(google_config()).await;

        let response = call(&app, get_request("/auth/google", None)).await;
        assert_eq!(response.status, StatusCode::SEE_OTHER);

        let location = response.location();
        assert!(location.starts_with("https://accounts.google.com/o/oauth2/v2/auth?"));
        assert!(location.contains("scope=openid%20email%20profile"));

        let state_cookie = response.cookie().unwrap();
        let nonce = state_cookie.strip_prefix("oauth_state=").unwrap();
        assert_eq!(nonce.len(), 32);
        assert!(location.contains(&format!("state={}", nonce)));
    }

    #[tokio::test]
    async fn test_google_callback_rejects_state_mismatch() {
        let (app, shared) = test_app(google_config()).await;

        let no_cookie = call(
            &app,
            get_request("/auth/google/callback?code=abc&state=nonce", None),
        )
        .await;
        assert_eq!(no_cookie.status, StatusCode::SEE_OTHER);
        assert_eq!(
            no_cookie.location(),
            "http://localhost:5173/auth?error=invalid_state"
        );

        let mismatch = call(
            &app,
            get_request(
                "/auth/google/callback?code=abc&state=nonce",
                Some("oauth_state=other"),
            ),
        )
        .await;
        assert_eq!(mismatch.location(), "http://localhost:5173/auth?error=invalid_state");

        let denied = call(
            &app,
            get_request("/auth/google/callback?error=access_denied", None),
        )
        .await;
        assert_eq!(denied.location(), "http://localhost:5173/auth?error=access_denied");

        let missing_code = call(
            &app,
            get_request("/auth/google/callback?state=nonce", Some("oauth_state=nonce")),
        )
        .await;
        assert_eq!(
            missing_code.location(),
            "http://localhost:5173/auth?error=missing_code"
        );

        // Nothing reached the store
        let state = shared.read().await.clone();
        assert!(state.accounts.list_accounts().await.unwrap().is_empty());
    }

    /// Store whose every operation fails like an unreachable database
    struct FailingStore;

    #[async_trait]
    impl AccountStore for FailingStore {
        async fn find_by_email(&self, _email: &str) -> Result<Option<Account>, StoreError> {
            Err(StoreError::Database(sqlx::Error::PoolTimedOut))
        }

        async fn find_by_id(&self, _id: &str) -> Result<Option<Account>, StoreError> {
            Err(StoreError::Database(sqlx::Error::PoolTimedOut))
        }

        async fn insert_account(&self, _account: NewAccount) -> Result<Account, StoreError> {
            Err(StoreError::Database(sqlx::Error::PoolTimedOut))
        }

        async fn set_federated_id(&self, _email: &str, _subject: &str) -> Result<bool, StoreError> {
            Err(StoreError::Database(sqlx::Error::PoolTimedOut))
        }

        async fn list_accounts(&self) -> Result<Vec<Account>, StoreError> {
            Err(StoreError::Database(sqlx::Error::PoolTimedOut))
        }
    }

    #[tokio::test]
    async fn test_store_failure_is_server_error() {
        let config = test_config();
        let shared_state =
            AppState::with_store(config.clone(), Arc::new(FailingStore)).into_shared();
        let app = crate::build_router(shared_state.clone(), &config);

        for (uri, body) in [
            (
                "/auth/signup",
                json!({ "username": "ada", "email": "ada@x.com", "password": "secret123" }),
            ),
            ("/auth/signin", json!({ "email": "ada@x.com", "password": "secret123" })),
        ] {
            let response = call(&app, json_request(Method::POST, uri, body, None)).await;
            assert_eq!(response.status, StatusCode::INTERNAL_SERVER_ERROR);
            assert_eq!(response.body["error"], "Server error");
        }

        // A valid session must not be reported as signed out when the store is down
        let account = Account {
            id: "U_TEST0001".to_string(),
            username: "ada".to_string(),
            email: "ada@x.com".to_string(),
            password_hash: None,
            google_id: None,
            auth_provider: AuthProvider::Local,
            role: Role::User,
            created_at: "2024-01-01 00:00:00".to_string(),
            updated_at: "2024-01-01 00:00:00".to_string(),
        };
        let state = shared_state.read().await.clone();
        let token = state.tokens.issue(&account).unwrap();
        let cookie = format!("{}={}", config.session.cookie_name, token);

        let response = call(&app, get_request("/auth/me", Some(&cookie))).await;
        assert_eq!(response.status, StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(response.body["code"], "DATABASE_ERROR");
    }
}
