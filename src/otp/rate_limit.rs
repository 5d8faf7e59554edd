//! Hourly passcode dispatch limit per identity.
//!
//! Buckets are keyed by identity and UTC calendar hour, so a new hour starts
//! a fresh counter without any cleanup job.
//!
//! When the backing store cannot be reached the limiter **fails open** and
//! lets the dispatch through. The per-challenge attempt ceiling still bounds
//! guessing.

use chrono::{DateTime, Utc};
use std::sync::Arc;
use tracing::{debug, warn};

use super::store::RateLimitStore;

pub const DEFAULT_HOURLY_LIMIT: u32 = 100;

/// Bucket key for the calendar hour containing `now`.
#[must_use]
pub fn hour_bucket(now: DateTime<Utc>) -> String {
    now.format("%Y-%m-%dT%H").to_string()
}

#[derive(Clone)]
pub struct RateLimiter {
    store: Arc<dyn RateLimitStore>,
    ceiling: u32,
}

impl RateLimiter {
    #[must_use]
    pub fn new(store: Arc<dyn RateLimitStore>) -> Self {
        Self {
            store,
            ceiling: DEFAULT_HOURLY_LIMIT,
        }
    }

    #[must_use]
    pub fn with_ceiling(mut self, ceiling: u32) -> Self {
        self.ceiling = ceiling;
        self
    }

    #[must_use]
    pub fn ceiling(&self) -> u32 {
        self.ceiling
    }

    /// Record one dispatch for `identity`; `false` once the hour's ceiling is reached.
    pub async fn try_consume(&self, identity: &str, now: DateTime<Utc>) -> bool {
        let bucket = hour_bucket(now);
        match self
            .store
            .increment_below(identity, &bucket, self.ceiling)
            .await
        {
            Ok(Some(count)) => {
                debug!(bucket = %bucket, count, "otp dispatch counted");
                true
            }
            Ok(None) => false,
            Err(err) => {
                warn!("otp rate limit store unavailable, allowing dispatch: {err:#}");
                true
            }
        }
    }
}

impl std::fmt::Debug for RateLimiter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RateLimiter")
            .field("ceiling", &self.ceiling)
            .finish_non_exhaustive()
    }
}
