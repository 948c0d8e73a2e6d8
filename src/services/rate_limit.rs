// src/services/rate_limit.rs
use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::RwLock;
use tracing::{debug, info, warn};

use crate::auth::models::Principal;
use crate::common::config::GovernorConfig;
use crate::common::ApiError;

pub const AUTH_LIMIT_MESSAGE: &str = "Too many login attempts. Try again later";
pub const AI_LIMIT_MESSAGE: &str = "AI request limit exceeded. Please wait.";

/// Who a request is counted against
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RateKey {
    Principal(String),
    Origin(String),
}

impl RateKey {
    /// The authenticated principal when there is one, otherwise the network origin
    pub fn select(principal: Option<&Principal>, origin: &str) -> Self {
        match principal {
            Some(principal) => RateKey::Principal(principal.id.clone()),
            None => RateKey::Origin(origin.to_string()),
        }
    }

    fn as_key(&self) -> String {
        match self {
            RateKey::Principal(id) => format!("user:{}", id),
            RateKey::Origin(origin) => format!("ip:{}", origin),
        }
    }
}

#[derive(Debug, Clone)]
struct RateWindow {
    count: u32,
    window_start: Instant,
}

impl RateWindow {
    fn new(now: Instant) -> Self {
        Self {
            count: 0,
            window_start: now,
        }
    }

    fn elapsed(&self, now: Instant) -> Duration {
        now.saturating_duration_since(self.window_start)
    }

    fn is_expired(&self, window: Duration, now: Instant) -> bool {
        self.elapsed(now) >= window
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RateLimitResult {
    Allowed { remaining: u32 },
    Limited { retry_after: u32 },
}

/// Fixed-window request counter for one route class.
///
/// Admits at most `max_requests` per key per window. The check and the
/// increment happen under one write lock, so concurrent requests for the same
/// key can never push the count past the ceiling.
#[derive(Debug)]
pub struct RateGovernor {
    route_class: &'static str,
    max_requests: u32,
    window: Duration,
    enabled: bool,
    message: &'static str,
    windows: Arc<RwLock<HashMap<String, RateWindow>>>,
}

impl RateGovernor {
    pub fn new(
        route_class: &'static str,
        config: GovernorConfig,
        enabled: bool,
        message: &'static str,
    ) -> Self {
        info!(
            route_class = route_class,
            enabled = enabled,
            max_requests = config.max_requests,
            window_seconds = config.window.as_secs(),
            "Initializing rate governor"
        );
        Self {
            route_class,
            max_requests: config.max_requests,
            window: config.window,
            enabled,
            message,
            windows: Arc::new(RwLock::new(HashMap::new())),
        }
    }

    pub fn route_class(&self) -> &'static str {
        self.route_class
    }

    pub async fn check(&self, key: &RateKey) -> RateLimitResult {
        self.check_at(key, Instant::now()).await
    }

    /// Count one request for `key` at `now`
    pub async fn check_at(&self, key: &RateKey, now: Instant) -> RateLimitResult {
        if !self.enabled {
            return RateLimitResult::Allowed {
                remaining: self.max_requests,
            };
        }

        let storage_key = format!("{}:{}", self.route_class, key.as_key());
        let mut windows = self.windows.write().await;

        let entry = windows
            .entry(storage_key)
            .or_insert_with(|| RateWindow::new(now));

        if entry.is_expired(self.window, now) {
            *entry = RateWindow::new(now);
        }

        if entry.count >= self.max_requests {
            let left = self.window.saturating_sub(entry.elapsed(now));
            let retry_after = left.as_secs_f64().ceil().max(1.0) as u32;
            return RateLimitResult::Limited { retry_after };
        }

        entry.count += 1;
        RateLimitResult::Allowed {
            remaining: self.max_requests - entry.count,
        }
    }

    /// The 429 error this governor answers with
    pub fn limit_error(&self, retry_after: u32) -> ApiError {
        ApiError::TooManyRequests {
            message: self.message.to_string(),
            retry_after,
        }
    }

    /// Log a rate limit violation
    pub fn log_violation(&self, key: &RateKey, path: &str, retry_after: u32) {
        warn!(
            route_class = self.route_class,
            key = ?key,
            path = %path,
            retry_after = retry_after,
            "Rate limit violation detected"
        );
    }

    /// Drop windows that have run out (called periodically)
    pub async fn cleanup_expired(&self) -> usize {
        self.cleanup_expired_at(Instant::now()).await
    }

    pub async fn cleanup_expired_at(&self, now: Instant) -> usize {
        let mut windows = self.windows.write().await;
        let before = windows.len();
        windows.retain(|_, state| !state.is_expired(self.window, now));
        let removed = before - windows.len();
        debug!(
            route_class = self.route_class,
            removed = removed,
            remaining = windows.len(),
            "Cleaned up expired rate limit entries"
        );
        removed
    }

    #[cfg(test)]
    async fn tracked_keys(&self) -> usize {
        self.windows.read().await.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::models::Role;

    fn governor(max_requests: u32, window_secs: u64) -> RateGovernor {
        RateGovernor::new(
            "auth",
            GovernorConfig {
                max_requests,
                window: Duration::from_secs(window_secs),
            },
            true,
            AUTH_LIMIT_MESSAGE,
        )
    }

    fn origin(ip: &str) -> RateKey {
        RateKey::Origin(ip.to_string())
    }

    #[tokio::test]
    async fn test_admits_exactly_the_ceiling() {
        let governor = governor(10, 300);
        let start = Instant::now();
        let key = origin("203.0.113.7");

        for i in 0..10 {
            let result = governor.check_at(&key, start + Duration::from_secs(i)).await;
            assert_eq!(result, RateLimitResult::Allowed { remaining: 9 - i as u32 });
        }

        let result = governor.check_at(&key, start + Duration::from_secs(10)).await;
        assert_eq!(result, RateLimitResult::Limited { retry_after: 290 });
    }

    #[tokio::test]
    async fn test_window_reopens_after_expiry() {
        let governor = governor(2, 60);
        let start = Instant::now();
        let key = origin("203.0.113.7");

        governor.check_at(&key, start).await;
        governor.check_at(&key, start).await;
        assert!(matches!(
            governor.check_at(&key, start + Duration::from_secs(59)).await,
            RateLimitResult::Limited { retry_after: 1 }
        ));
        assert!(matches!(
            governor.check_at(&key, start + Duration::from_secs(60)).await,
            RateLimitResult::Allowed { remaining: 1 }
        ));
    }

    #[tokio::test]
    async fn test_keys_are_independent() {
        let governor = governor(1, 60);
        let now = Instant::now();

        assert!(matches!(
            governor.check_at(&origin("10.0.0.1"), now).await,
            RateLimitResult::Allowed { .. }
        ));
        assert!(matches!(
            governor.check_at(&origin("10.0.0.1"), now).await,
            RateLimitResult::Limited { .. }
        ));
        assert!(matches!(
            governor.check_at(&origin("10.0.0.2"), now).await,
            RateLimitResult::Allowed { .. }
        ));
        assert!(matches!(
            governor
                .check_at(&RateKey::Principal("10.0.0.1".to_string()), now)
                .await,
            RateLimitResult::Allowed { .. }
        ));
    }

    #[tokio::test]
    async fn test_concurrent_requests_never_exceed_ceiling() {
        let governor = Arc::new(governor(10, 300));
        let mut handles = Vec::new();

        for _ in 0..50 {
            let governor = governor.clone();
            handles.push(tokio::spawn(async move {
                governor.check(&origin("198.51.100.1")).await
            }));
        }

        let mut allowed = 0;
        for handle in handles {
            if matches!(handle.await.unwrap(), RateLimitResult::Allowed { .. }) {
                allowed += 1;
            }
        }
        assert_eq!(allowed, 10);
    }

    #[tokio::test]
    async fn test_disabled_governor_admits_everything() {
        let governor = RateGovernor::new(
            "ai",
            GovernorConfig {
                max_requests: 1,
                window: Duration::from_secs(60),
            },
            false,
            AI_LIMIT_MESSAGE,
        );
        for _ in 0..5 {
            assert!(matches!(
                governor.check(&origin("10.0.0.1")).await,
                RateLimitResult::Allowed { .. }
            ));
        }
        assert_eq!(governor.tracked_keys().await, 0);
    }

    #[tokio::test]
    async fn test_cleanup_drops_only_expired_windows() {
        let governor = governor(5, 60);
        let start = Instant::now();

        governor.check_at(&origin("10.0.0.1"), start).await;
        governor
            .check_at(&origin("10.0.0.2"), start + Duration::from_secs(30))
            .await;

        let removed = governor
            .cleanup_expired_at(start + Duration::from_secs(61))
            .await;
        assert_eq!(removed, 1);
        assert_eq!(governor.tracked_keys().await, 1);
    }

    #[test]
    fn test_rate_key_prefers_principal() {
        let principal = Principal {
            id: "U_TEST0001".to_string(),
            username: "ada".to_string(),
            email: "ada@x.com".to_string(),
            role: Role::User,
        };
        assert_eq!(
            RateKey::select(Some(&principal), "10.0.0.1"),
            RateKey::Principal("U_TEST0001".to_string())
        );
        assert_eq!(
            RateKey::select(None, "10.0.0.1"),
            RateKey::Origin("10.0.0.1".to_string())
        );
    }

    #[test]
    fn test_limit_error_carries_message() {
        match governor(1, 60).limit_error(30) {
            ApiError::TooManyRequests {
                message,
                retry_after,
            } => {
                assert_eq!(message, AUTH_LIMIT_MESSAGE);
                assert_eq!(retry_after, 30);
            }
            other => panic!("unexpected {:?}", other),
        }
    }
}
