//! Login throttling
//!
//! Two sliding windows guard the login route: failed attempts per email
//! (5 per 15 minutes) and requests per client IP (10 per minute).

use chrono::{DateTime, Duration, Utc};
use std::collections::HashMap;
use std::hash::Hash;
use std::net::IpAddr;
use std::sync::Arc;
use tokio::sync::RwLock;

/// Timestamps of recent events per key, trimmed to `window` on access
struct SlidingWindow<K> {
    limit: usize,
    window: Duration,
    events: Arc<RwLock<HashMap<K, Vec<DateTime<Utc>>>>>,
}

impl<K: Eq + Hash + Clone> SlidingWindow<K> {
    fn new(limit: usize, window: Duration) -> Self {
        Self {
            limit,
            window,
            events: Arc::new(RwLock::new(HashMap::new())),
        }
    }

    async fn is_limited(&self, key: &K, now: DateTime<Utc>) -> bool {
        let cutoff = now - self.window;
        let mut events = self.events.write().await;
        match events.get_mut(key) {
            Some(times) => {
                times.retain(|t| *t > cutoff);
                times.len() >= self.limit
            }
            None => false,
        }
    }

    async fn record(&self, key: K, now: DateTime<Utc>) {
        self.events.write().await.entry(key).or_default().push(now);
    }

    async fn clear(&self, key: &K) {
        self.events.write().await.remove(key);
    }

    async fn prune(&self, now: DateTime<Utc>) {
        let cutoff = now - self.window;
        self.events.write().await.retain(|_, times| {
            times.retain(|t| *t > cutoff);
            !times.is_empty()
        });
    }
}

pub struct LoginRateLimiter {
    by_email: SlidingWindow<String>,
    by_ip: SlidingWindow<IpAddr>,
}

impl LoginRateLimiter {
    pub fn new() -> Self {
        Self {
            by_email: SlidingWindow::new(5, Duration::minutes(15)),
            by_ip: SlidingWindow::new(10, Duration::minutes(1)),
        }
    }

    pub async fn is_email_limited(&self, email: &str) -> bool {
        self.by_email.is_limited(&email.to_lowercase(), Utc::now()).await
    }

    pub async fn record_failed_attempt(&self, email: &str) {
        self.by_email.record(email.to_lowercase(), Utc::now()).await;
    }

    /// Forget failures after a successful login
    pub async fn clear_email(&self, email: &str) {
        self.by_email.clear(&email.to_lowercase()).await;
    }

    pub async fn is_ip_limited(&self, ip: IpAddr) -> bool {
        self.by_ip.is_limited(&ip, Utc::now()).await
    }

    pub async fn record_ip_request(&self, ip: IpAddr) {
        self.by_ip.record(ip, Utc::now()).await;
    }

    /// Drop expired entries; run periodically from a background task
    pub async fn cleanup(&self) {
        let now = Utc::now();
        self.by_email.prune(now).await;
        self.by_ip.prune(now).await;
    }
}

impl Default for LoginRateLimiter {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_email_limit_after_five_failures() {
        let limiter = LoginRateLimiter::new();

        for _ in 0..4 {
            limiter.record_failed_attempt("a@example.com").await;
        }
        assert!(!limiter.is_email_limited("a@example.com").await);

        limiter.record_failed_attempt("A@Example.com").await;
        assert!(limiter.is_email_limited("a@example.com").await);
        assert!(!limiter.is_email_limited("b@example.com").await);

        limiter.clear_email("a@example.com").await;
        assert!(!limiter.is_email_limited("a@example.com").await);
    }

    #[tokio::test]
    async fn test_ip_limit_after_ten_requests() {
        let limiter = LoginRateLimiter::new();
        let ip: IpAddr = "10.0.0.1".parse().unwrap();

        for _ in 0..9 {
            limiter.record_ip_request(ip).await;
        }
        assert!(!limiter.is_ip_limited(ip).await);
        limiter.record_ip_request(ip).await;
        assert!(limiter.is_ip_limited(ip).await);
    }

    #[tokio::test]
    async fn test_window_expires_old_events() {
        let window = SlidingWindow::new(2, Duration::minutes(1));
        let start = Utc::now();
        window.record("k".to_string(), start).await;
        window.record("k".to_string(), start).await;

        assert!(window.is_limited(&"k".to_string(), start).await);
        assert!(!window.is_limited(&"k".to_string(), start + Duration::minutes(2)).await);

        window.prune(start + Duration::minutes(2)).await;
        assert!(window.events.read().await.is_empty());
    }
}
