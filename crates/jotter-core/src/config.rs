//! Engine configuration

use std::time::Duration;

/// Allowance for one operation class within a fixed window.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RateLimitPolicy {
    /// Calls admitted per window
    pub max_requests: u32,
    /// Window length
    pub window: Duration,
}

impl RateLimitPolicy {
    #[must_use]
    pub const fn new(max_requests: u32, window: Duration) -> Self {
        Self {
            max_requests,
            window,
        }
    }
}

/// Independently configured limits per operation class.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RateLimits {
    /// Interactive sync: tight window, high allowance
    pub sync: RateLimitPolicy,
    /// Export: very low allowance, long window
    pub export: RateLimitPolicy,
    /// Bulk operations: low allowance, long window
    pub bulk: RateLimitPolicy,
}

impl Default for RateLimits {
    fn default() -> Self {
        Self {
            sync: RateLimitPolicy::new(30, Duration::from_secs(60)),
            export: RateLimitPolicy::new(5, Duration::from_secs(3_600)),
            bulk: RateLimitPolicy::new(10, Duration::from_secs(600)),
        }
    }
}

/// Tunables for the sync engine.
#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// Transport failures per queue entry before it is finalized as a
    /// permanent failure
    pub attempt_ceiling: i64,
    /// Per-session upload/download concurrency window
    pub max_in_flight: usize,
    /// Deadline after which a session stops admitting work and returns a
    /// partial report
    pub session_deadline: Duration,
    /// How long a cached network sample stays fresh
    pub network_refresh: Duration,
    /// Age past which resolved conflicts and dead queue entries may be
    /// cleared
    pub retention: Duration,
    /// Hard cap on bulk operation batch size
    pub max_bulk_batch: usize,
    /// Per-class rate limits
    pub limits: RateLimits,
    /// How long the scheduler waits after a mutation before syncing
    pub debounce: Duration,
    /// Optional periodic sync trigger; `None` disables the timer
    pub tick_interval: Option<Duration>,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            attempt_ceiling: 5,
            max_in_flight: 4,
            session_deadline: Duration::from_secs(30),
            network_refresh: Duration::from_secs(5),
            retention: Duration::from_secs(7 * 24 * 3_600),
            max_bulk_batch: 100,
            limits: RateLimits::default(),
            debounce: Duration::from_secs(2),
            tick_interval: None,
        }
    }
}

impl EngineConfig {
    /// Set the attempt ceiling
    #[must_use]
    pub const fn with_attempt_ceiling(mut self, ceiling: i64) -> Self {
        self.attempt_ceiling = ceiling;
        self
    }

    /// Set the in-flight concurrency window
    #[must_use]
    pub const fn with_max_in_flight(mut self, max_in_flight: usize) -> Self {
        self.max_in_flight = max_in_flight;
        self
    }

    /// Set the session deadline
    #[must_use]
    pub const fn with_session_deadline(mut self, deadline: Duration) -> Self {
        self.session_deadline = deadline;
        self
    }

    /// Set the rate limits
    #[must_use]
    pub const fn with_limits(mut self, limits: RateLimits) -> Self {
        self.limits = limits;
        self
    }

    /// Enable the periodic sync trigger
    #[must_use]
    pub const fn with_tick_interval(mut self, interval: Duration) -> Self {
        self.tick_interval = Some(interval);
        self
    }

    /// Retention cutoff as a Unix-ms timestamp relative to `now_ms`.
    #[must_use]
    pub fn retention_cutoff(&self, now_ms: i64) -> i64 {
        now_ms - self.retention.as_millis() as i64
    }
}
