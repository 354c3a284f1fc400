//! Keyed request gate with fixed-window reset.
//!
//! Single-process scope: buckets live in a `DashMap` and are swept
//! periodically. Deployments behind multiple replicas need an external
//! shared store instead.

use chrono::{DateTime, Duration, Utc};
use dashmap::DashMap;
use tracing::debug;

/// Outcome of a rate-limit check.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Decision {
    pub allowed: bool,
    /// Requests left in the current window (after this one).
    pub remaining: u32,
    /// Seconds until the window resets; zero when allowed.
    pub retry_after: i64,
}

/// Named presets applied at the HTTP boundary.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RatePreset {
    Register,
    Message,
    Offer,
    General,
}

impl RatePreset {
    pub fn limit(&self) -> u32 {
        match self {
            Self::Register => 2,
            Self::Message => 10,
            Self::Offer => 5,
            Self::General => 100,
        }
    }

    pub fn window(&self) -> Duration {
        match self {
            Self::Register => Duration::hours(1),
            Self::Message | Self::Offer | Self::General => Duration::minutes(1),
        }
    }
}

struct Bucket {
    count: u32,
    window_started: DateTime<Utc>,
}

pub struct RateLimiter {
    buckets: DashMap<String, Bucket>,
}

impl Default for RateLimiter {
    fn default() -> Self {
        Self::new()
    }
}

impl RateLimiter {
    pub fn new() -> Self {
        Self {
            buckets: DashMap::new(),
        }
    }

    /// Count one request against `key`. The window starts at the first
    /// request and resets `window` later.
    pub fn check(&self, key: &str, limit: u32, window: Duration) -> Decision {
        self.check_at(key, limit, window, Utc::now())
    }

    pub fn check_preset(&self, key: &str, preset: RatePreset) -> Decision {
        self.check(key, preset.limit(), preset.window())
    }

    fn check_at(&self, key: &str, limit: u32, window: Duration, now: DateTime<Utc>) -> Decision {
        let mut bucket = self.buckets.entry(key.to_string()).or_insert(Bucket {
            count: 0,
            window_started: now,
        });

        if now - bucket.window_started >= window {
            bucket.count = 0;
            bucket.window_started = now;
        }

        if bucket.count >= limit {
            let reset_at = bucket.window_started + window;
            let retry_after = (reset_at - now).num_seconds().max(1);
            debug!(key, limit, retry_after, "Rate limit exceeded");
            return Decision {
                allowed: false,
                remaining: 0,
                retry_after,
            };
        }

        bucket.count += 1;
        Decision {
            allowed: true,
            remaining: limit - bucket.count,
            retry_after: 0,
        }
    }

    /// Drop buckets whose window expired at least `max_age` ago.
    pub fn sweep(&self, max_age: Duration) {
        let now = Utc::now();
        let before = self.buckets.len();
        self.buckets
            .retain(|_, bucket| now - bucket.window_started < max_age);
        let removed = before.saturating_sub(self.buckets.len());
        if removed > 0 {
            debug!(removed, "Swept expired rate-limit buckets");
        }
    }

    pub fn tracked_keys(&self) -> usize {
        self.buckets.len()
    }
}
