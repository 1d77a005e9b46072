//! Application state and rate limiting.

use std::collections::HashMap;
use std::net::IpAddr;
use std::time::Instant;

use axum::http::HeaderMap;
use rapid_core::{Caller, Catalog, RapidService};
use tokio::sync::Mutex;

use super::RATE_LIMIT_WINDOW_SECS;

/// Per-IP request counts: (request count, window start time).
struct IpTracker {
    windows: HashMap<IpAddr, (u64, Instant)>,
    last_sweep: Instant,
}

/// In-memory per-IP rate limiter.
pub(crate) struct RateLimiter {
    tracker: Mutex<IpTracker>,
    /// Maximum requests per window. Zero disables limiting.
    pub(crate) max_requests: u64,
}

impl RateLimiter {
    pub(crate) fn new(max_requests: u64) -> Self {
        Self {
            tracker: Mutex::new(IpTracker {
                windows: HashMap::new(),
                last_sweep: Instant::now(),
            }),
            max_requests,
        }
    }

    /// Check if a request from the given IP is allowed.
    /// Returns Ok(()) if allowed, Err(retry_after_secs) if rate limited.
    pub(crate) async fn check(&self, ip: IpAddr) -> Result<(), u64> {
        self.check_at(ip, Instant::now()).await
    }

    async fn check_at(&self, ip: IpAddr, now: Instant) -> Result<(), u64> {
        if self.max_requests == 0 {
            return Ok(());
        }
        let mut tracker = self.tracker.lock().await;

        // Forget clients whose window has run out, at most once per window.
        if now.duration_since(tracker.last_sweep).as_secs() >= RATE_LIMIT_WINDOW_SECS {
            tracker.windows.retain(|_, (_, started)| {
                now.duration_since(*started).as_secs() < RATE_LIMIT_WINDOW_SECS
            });
            tracker.last_sweep = now;
        }

        let entry = tracker.windows.entry(ip).or_insert((0, now));

        let elapsed = now.duration_since(entry.1).as_secs();
        if elapsed >= RATE_LIMIT_WINDOW_SECS {
            entry.0 = 0;
            entry.1 = now;
        }

        entry.0 += 1;
        if entry.0 > self.max_requests {
            Err(RATE_LIMIT_WINDOW_SECS.saturating_sub(elapsed))
        } else {
            Ok(())
        }
    }

    #[cfg(test)]
    async fn tracked_clients(&self) -> usize {
        self.tracker.lock().await.windows.len()
    }
}

/// Application state shared across request handlers.
pub(crate) struct AppState<S> {
    pub(crate) service: RapidService<S, Catalog>,
    pub(crate) rate_limiter: RateLimiter,
    /// Bearer tokens that carry the staff capability.
    pub(crate) staff_keys: Vec<String>,
    /// Key required on `POST /events`. None = open.
    pub(crate) ingest_key: Option<String>,
}

impl<S> AppState<S> {
    /// Decide the caller's staff capability from its `Authorization` header.
    pub(crate) fn caller(&self, headers: &HeaderMap) -> Caller {
        let is_staff = bearer_token(headers)
            .is_some_and(|token| self.staff_keys.iter().any(|key| key == token));
        Caller::from_capability(is_staff)
    }
}

pub(crate) fn bearer_token(headers: &HeaderMap) -> Option<&str> {
    headers
        .get("authorization")
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.strip_prefix("Bearer "))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::net::Ipv4Addr;
    use std::time::Duration;

    #[tokio::test]
    async fn limits_per_ip() {
        let limiter = RateLimiter::new(2);
        let a = IpAddr::V4(Ipv4Addr::new(10, 0, 0, 1));
        let b = IpAddr::V4(Ipv4Addr::new(10, 0, 0, 2));

        assert!(limiter.check(a).await.is_ok());
        assert!(limiter.check(a).await.is_ok());
        assert!(limiter.check(a).await.is_err());
        assert!(limiter.check(b).await.is_ok());
    }

    #[tokio::test]
    async fn zero_disables_limit() {
        let limiter = RateLimiter::new(0);
        let ip = IpAddr::V4(Ipv4Addr::LOCALHOST);
        for _ in 0..100 {
            assert!(limiter.check(ip).await.is_ok());
        }
    }

    #[tokio::test]
    async fn expired_clients_are_forgotten() {
        let limiter = RateLimiter::new(5);
        let start = Instant::now();
        for i in 0..100u8 {
            let ip = IpAddr::V4(Ipv4Addr::new(10, 0, 1, i));
            assert!(limiter.check_at(ip, start).await.is_ok());
        }
        assert_eq!(limiter.tracked_clients().await, 100);

        let later = start + Duration::from_secs(RATE_LIMIT_WINDOW_SECS + 1);
        let fresh = IpAddr::V4(Ipv4Addr::new(10, 0, 2, 1));
        assert!(limiter.check_at(fresh, later).await.is_ok());
        assert_eq!(limiter.tracked_clients().await, 1);
    }

    #[test]
    fn bearer_token_is_extracted() {
        let mut headers = HeaderMap::new();
        assert_eq!(bearer_token(&headers), None);
        headers.insert("authorization", "Bearer k1".parse().unwrap());
        assert_eq!(bearer_token(&headers), Some("k1"));
        headers.insert("authorization", "Basic k1".parse().unwrap());
        assert_eq!(bearer_token(&headers), None);
    }
}
