use std::time::{Duration, SystemTime, UNIX_EPOCH};

use dashmap::DashMap;
use serde::{Deserialize, Serialize};

pub const BUCKET_SECS: u64 = 3_600;

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default, rename_all = "kebab-case")]
pub struct RateLimitConfig {
    pub requests_per_hour: u32,
    /// How often stale hour buckets are swept from memory.
    pub prune_interval_secs: u64,
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            requests_per_hour: 100,
            prune_interval_secs: 300,
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum RateDecision {
    Allowed { remaining: u32 },
    LimitExceeded { retry_after: Duration },
}

/// Fixed hour-bucket request counter keyed on `(identity, unix_secs / 3600)`.
///
/// Increment-and-compare happens while the DashMap shard holding the key is
/// write-locked, so concurrent callers sharing an identity never lose counts.
pub struct RateLimiter {
    limit: u32,
    windows: DashMap<(String, u64), u32>,
}

impl RateLimiter {
    pub fn new(limit: u32) -> Self {
        Self {
            limit,
            windows: DashMap::new(),
        }
    }

    pub fn check(&self, identity: &str, now: SystemTime) -> RateDecision {
        let secs = unix_secs(now);
        let bucket = secs / BUCKET_SECS;
        let mut counter = self
            .windows
            .entry((identity.to_owned(), bucket))
            .or_insert(0);
        if *counter >= self.limit {
            let next_bucket = (bucket + 1) * BUCKET_SECS;
            return RateDecision::LimitExceeded {
                retry_after: Duration::from_secs(next_bucket - secs),
            };
        }
        *counter += 1;
        RateDecision::Allowed {
            remaining: self.limit - *counter,
        }
    }

    /// Requests counted for `identity` in the bucket containing `now`.
    pub fn count(&self, identity: &str, now: SystemTime) -> u32 {
        let bucket = unix_secs(now) / BUCKET_SECS;
        self.windows
            .get(&(identity.to_owned(), bucket))
            .map(|counter| *counter)
            .unwrap_or(0)
    }

    /// Drops buckets older than the one containing `now`; returns how many went.
    pub fn prune(&self, now: SystemTime) -> usize {
        let current = unix_secs(now) / BUCKET_SECS;
        let before = self.windows.len();
        self.windows.retain(|(_, bucket), _| *bucket >= current);
        before.saturating_sub(self.windows.len())
    }

    pub fn tracked_windows(&self) -> usize {
        self.windows.len()
    }
}

fn unix_secs(now: SystemTime) -> u64 {
    now.duration_since(UNIX_EPOCH).unwrap_or_default().as_secs()
}
