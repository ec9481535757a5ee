//! Fixed-window rate limiting keyed by operation class and owner

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio::sync::Mutex;

use crate::config::{RateLimitPolicy, RateLimits};
use crate::error::{Error, Result};

/// The operation classes with independently configured limits.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum OperationClass {
    Sync,
    Export,
    Bulk,
}

impl OperationClass {
    pub const fn label(self) -> &'static str {
        match self {
            Self::Sync => "sync",
            Self::Export => "export",
            Self::Bulk => "bulk",
        }
    }
}

#[derive(Default)]
struct LimiterMetrics {
    sync_allowed: AtomicU64,
    sync_limited: AtomicU64,
    export_allowed: AtomicU64,
    export_limited: AtomicU64,
    bulk_allowed: AtomicU64,
    bulk_limited: AtomicU64,
}

/// Point-in-time view of limiter counters, for status endpoints.
#[derive(Debug, Clone, Copy, serde::Serialize)]
pub struct LimiterMetricsSnapshot {
    pub sync_allowed: u64,
    pub sync_limited: u64,
    pub export_allowed: u64,
    pub export_limited: u64,
    pub bulk_allowed: u64,
    pub bulk_limited: u64,
}

#[derive(Debug, Clone, Copy)]
struct RateWindow {
    started_at: Instant,
    count: u32,
}

/// Fixed-window counter keyed by `(operation class, owner)`.
///
/// The read-increment-compare happens under one lock so two
/// near-simultaneous calls cannot both slip past a limit.
#[derive(Clone)]
pub struct RateLimiter {
    state: Arc<Mutex<HashMap<String, RateWindow>>>,
    limits: RateLimits,
    metrics: Arc<LimiterMetrics>,
}

impl RateLimiter {
    #[must_use]
    pub fn new(limits: RateLimits) -> Self {
        Self {
            state: Arc::new(Mutex::new(HashMap::new())),
            limits,
            metrics: Arc::new(LimiterMetrics::default()),
        }
    }

    fn policy(&self, class: OperationClass) -> RateLimitPolicy {
        match class {
            OperationClass::Sync => self.limits.sync,
            OperationClass::Export => self.limits.export,
            OperationClass::Bulk => self.limits.bulk,
        }
    }

    /// Admit or reject one call for `owner_id` in the given class.
    ///
    /// A denial carries the seconds until the window rolls over so the
    /// caller can schedule a retry.
    pub async fn check(&self, class: OperationClass, owner_id: &str) -> Result<()> {
        let policy = self.policy(class);
        let key = format!("{}:{owner_id}", class.label());

        if !self
            .allow(&key, policy.max_requests, policy.window)
            .await
        {
            let retry_after_secs = self.retry_after(&key, policy.window).await;
            self.mark_limited(class);
            tracing::warn!(
                class = class.label(),
                owner = owner_id,
                retry_after_secs,
                "Rate limit exceeded"
            );
            return Err(Error::RateLimited { retry_after_secs });
        }

        self.mark_allowed(class);
        Ok(())
    }

    /// Raw fixed-window admission for one key.
    pub async fn allow(&self, key: &str, max_requests: u32, window: Duration) -> bool {
        let now = Instant::now();
        let mut guard = self.state.lock().await;
        let entry = guard.entry(key.to_string()).or_insert(RateWindow {
            started_at: now,
            count: 0,
        });

        if now.duration_since(entry.started_at) >= window {
            entry.started_at = now;
            entry.count = 0;
        }

        if entry.count >= max_requests {
            return false;
        }

        entry.count += 1;
        true
    }

    async fn retry_after(&self, key: &str, window: Duration) -> u64 {
        let guard = self.state.lock().await;
        guard.get(key).map_or(0, |entry| {
            window
                .saturating_sub(entry.started_at.elapsed())
                .as_secs()
                .max(1)
        })
    }

    pub fn metrics_snapshot(&self) -> LimiterMetricsSnapshot {
        LimiterMetricsSnapshot {
            sync_allowed: self.metrics.sync_allowed.load(Ordering::Relaxed),
            sync_limited: self.metrics.sync_limited.load(Ordering::Relaxed),
            export_allowed: self.metrics.export_allowed.load(Ordering::Relaxed),
            export_limited: self.metrics.export_limited.load(Ordering::Relaxed),
            bulk_allowed: self.metrics.bulk_allowed.load(Ordering::Relaxed),
            bulk_limited: self.metrics.bulk_limited.load(Ordering::Relaxed),
        }
    }

    fn mark_allowed(&self, class: OperationClass) {
        let counter = match class {
            OperationClass::Sync => &self.metrics.sync_allowed,
            OperationClass::Export => &self.metrics.export_allowed,
            OperationClass::Bulk => &self.metrics.bulk_allowed,
        };
        counter.fetch_add(1, Ordering::Relaxed);
    }

    fn mark_limited(&self, class: OperationClass) {
        let counter = match class {
            OperationClass::Sync => &self.metrics.sync_limited,
            OperationClass::Export => &self.metrics.export_limited,
            OperationClass::Bulk => &self.metrics.bulk_limited,
        };
        counter.fetch_add(1, Ordering::Relaxed);
    }
}

impl Default for RateLimiter {
    fn default() -> Self {
        Self::new(RateLimits::default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::RateLimitPolicy;

    fn tight_limiter(max: u32) -> RateLimiter {
        RateLimiter::new(RateLimits {
            sync: RateLimitPolicy::new(max, Duration::from_secs(60)),
            export: RateLimitPolicy::new(max, Duration::from_secs(60)),
            bulk: RateLimitPolicy::new(max, Duration::from_secs(60)),
        })
    }

    #[tokio::test]
    async fn blocks_after_limit() {
        let limiter = tight_limiter(2);

        limiter.check(OperationClass::Sync, "user-a").await.unwrap();
        limiter.check(OperationClass::Sync, "user-a").await.unwrap();

        let err = limiter
            .check(OperationClass::Sync, "user-a")
            .await
            .unwrap_err();
        assert!(matches!(err, Error::RateLimited { retry_after_secs } if retry_after_secs > 0));

        let metrics = limiter.metrics_snapshot();
        assert_eq!(metrics.sync_allowed, 2);
        assert_eq!(metrics.sync_limited, 1);
    }

    #[tokio::test]
    async fn classes_count_independently() {
        let limiter = tight_limiter(1);

        limiter.check(OperationClass::Sync, "user-a").await.unwrap();
        limiter.check(OperationClass::Bulk, "user-a").await.unwrap();
        limiter
            .check(OperationClass::Export, "user-a")
            .await
            .unwrap();

        assert!(limiter.check(OperationClass::Sync, "user-a").await.is_err());
        assert!(limiter.check(OperationClass::Bulk, "user-a").await.is_err());
    }

    #[tokio::test]
    async fn owners_count_independently() {
        let limiter = tight_limiter(1);

        limiter.check(OperationClass::Sync, "user-a").await.unwrap();
        limiter.check(OperationClass::Sync, "user-b").await.unwrap();
        assert!(limiter.check(OperationClass::Sync, "user-a").await.is_err());
    }

    #[tokio::test]
    async fn window_rolls_over() {
        let limiter = RateLimiter::new(RateLimits {
            sync: RateLimitPolicy::new(1, Duration::from_millis(20)),
            ..RateLimits::default()
        });

        limiter.check(OperationClass::Sync, "user-a").await.unwrap();
        assert!(limiter.check(OperationClass::Sync, "user-a").await.is_err());

        tokio::time::sleep(Duration::from_millis(30)).await;
        limiter.check(OperationClass::Sync, "user-a").await.unwrap();
    }
}
