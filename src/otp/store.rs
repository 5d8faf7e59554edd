//! Storage seams for challenges and rate-limit buckets.
//!
//! Both stores expose atomic primitives rather than plain read/write pairs:
//! rate limiting is a conditional increment and every challenge transition is
//! a compare-and-swap on `(id, attempts, state = active)`. That keeps parallel
//! requests for the same identity from losing updates, whichever backend is
//! wired in.

use anyhow::Result;
use async_trait::async_trait;
use std::collections::HashMap;
use tokio::sync::Mutex;
use uuid::Uuid;

use super::models::{ChallengeState, OtpChallenge, Purpose};

/// Target of a challenge compare-and-swap.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Transition {
    pub state: ChallengeState,
    pub attempts: u32,
}

#[async_trait]
pub trait ChallengeStore: Send + Sync {
    /// Store `challenge` as the only challenge for its `(identity, purpose)`,
    /// superseding whatever was there.
    async fn replace(&self, challenge: &OtpChallenge) -> Result<()>;

    /// Current challenge for the key, whatever its state.
    async fn current(&self, identity: &str, purpose: Purpose) -> Result<Option<OtpChallenge>>;

    /// Apply `next` only if challenge `id` is still active with `expected_attempts`.
    /// Returns `false` when another request got there first.
    async fn transition(&self, id: Uuid, expected_attempts: u32, next: Transition) -> Result<bool>;
}

#[async_trait]
pub trait RateLimitStore: Send + Sync {
    /// Increment the `(identity, bucket)` counter unless it already reached `ceiling`.
    /// Returns the new count, or `None` when the bucket is full.
    async fn increment_below(&self, identity: &str, bucket: &str, ceiling: u32)
    -> Result<Option<u32>>;
}

#[derive(Debug, Default)]
pub struct MemoryChallengeStore {
    challenges: Mutex<HashMap<(String, Purpose), OtpChallenge>>,
}

impl MemoryChallengeStore {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl ChallengeStore for MemoryChallengeStore {
    async fn replace(&self, challenge: &OtpChallenge) -> Result<()> {
        let mut challenges = self.challenges.lock().await;
        challenges.insert(
            (challenge.identity.clone(), challenge.purpose),
            challenge.clone(),
        );
        Ok(())
    }

    async fn current(&self, identity: &str, purpose: Purpose) -> Result<Option<OtpChallenge>> {
        let challenges = self.challenges.lock().await;
        Ok(challenges.get(&(identity.to_string(), purpose)).cloned())
    }

    async fn transition(&self, id: Uuid, expected_attempts: u32, next: Transition) -> Result<bool> {
        let mut challenges = self.challenges.lock().await;
        let Some(challenge) = challenges.values_mut().find(|challenge| challenge.id == id) else {
            return Ok(false);
        };
        if challenge.state != ChallengeState::Active || challenge.attempts != expected_attempts {
            return Ok(false);
        }
        challenge.state = next.state;
        challenge.attempts = next.attempts;
        Ok(true)
    }
}

#[derive(Debug, Default)]
pub struct MemoryRateLimitStore {
    buckets: Mutex<HashMap<(String, String), u32>>,
}

impl MemoryRateLimitStore {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl RateLimitStore for MemoryRateLimitStore {
    async fn increment_below(
        &self,
        identity: &str,
        bucket: &str,
        ceiling: u32,
    ) -> Result<Option<u32>> {
        let mut buckets = self.buckets.lock().await;
        let count = buckets
            .entry((identity.to_string(), bucket.to_string()))
            .or_insert(0);
        if *count >= ceiling {
            return Ok(None);
        }
        *count += 1;
        Ok(Some(*count))
    }
}
