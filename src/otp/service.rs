//! Passcode issuance and verification.
//!
//! Flow Overview:
//! 1) `issue` checks the hourly limit, stores a fresh challenge for the
//!    `(identity, purpose)` key and hands the code to the dispatcher on a
//!    background task.
//! 2) `verify` walks the challenge state machine:
//!    `Active -> {Consumed, Expired, Exhausted}`. Terminal states never yield
//!    `Authenticated` again; a new `issue` is the only way back.
//!
//! Every transition is a compare-and-swap against the stored attempts and
//! state. Losing the swap means another request changed the challenge, so the
//! rules are evaluated again against the fresh row.

use chrono::{DateTime, Duration, Utc};
use secrecy::{ExposeSecret, SecretString};
use std::sync::Arc;
use tracing::{error, info, warn};
use uuid::Uuid;

use super::code::{generate_code, hash_code};
use super::dispatch::{Dispatcher, OtpMessage};
use super::models::{Authenticated, ChallengeState, IssuedChallenge, OtpChallenge, Purpose};
use super::rate_limit::RateLimiter;
use super::store::{ChallengeStore, RateLimitStore, Transition};
use crate::error::AuthError;

pub const DEFAULT_CODE_TTL_SECONDS: i64 = 10 * 60;
pub const DEFAULT_MAX_ATTEMPTS: u32 = 5;
// Bounds the re-read loop when the swap keeps losing to concurrent requests.
const MAX_SWAP_RETRIES: usize = 16;

/// Tunables read from configuration.
pub struct OtpOptions {
    pub code_ttl_seconds: i64,
    pub max_attempts: u32,
    pub hourly_limit: u32,
    pub bypass_code: Option<SecretString>,
}

impl Default for OtpOptions {
    fn default() -> Self {
        Self {
            code_ttl_seconds: DEFAULT_CODE_TTL_SECONDS,
            max_attempts: DEFAULT_MAX_ATTEMPTS,
            hourly_limit: super::rate_limit::DEFAULT_HOURLY_LIMIT,
            bypass_code: None,
        }
    }
}

impl std::fmt::Debug for OtpOptions {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OtpOptions")
            .field("code_ttl_seconds", &self.code_ttl_seconds)
            .field("max_attempts", &self.max_attempts)
            .field("hourly_limit", &self.hourly_limit)
            .field("bypass_code", &self.bypass_code.as_ref().map(|_| "***"))
            .finish()
    }
}

#[derive(Clone)]
pub struct OtpService {
    challenges: Arc<dyn ChallengeStore>,
    rate_limiter: RateLimiter,
    dispatcher: Arc<dyn Dispatcher>,
    code_ttl: Duration,
    max_attempts: u32,
    bypass_hash: Option<Vec<u8>>,
}

impl OtpService {
    #[must_use]
    pub fn new(
        challenges: Arc<dyn ChallengeStore>,
        rate_limiter: RateLimiter,
        dispatcher: Arc<dyn Dispatcher>,
    ) -> Self {
        Self {
            challenges,
            rate_limiter,
            dispatcher,
            code_ttl: Duration::seconds(DEFAULT_CODE_TTL_SECONDS),
            max_attempts: DEFAULT_MAX_ATTEMPTS,
            bypass_hash: None,
        }
    }

    /// Wire stores and dispatcher with configured limits.
    #[must_use]
    pub fn from_options(
        challenges: Arc<dyn ChallengeStore>,
        rate_limits: Arc<dyn RateLimitStore>,
        dispatcher: Arc<dyn Dispatcher>,
        options: OtpOptions,
    ) -> Self {
        let limiter = RateLimiter::new(rate_limits).with_ceiling(options.hourly_limit);
        let service = Self::new(challenges, limiter, dispatcher)
            .with_code_ttl_seconds(options.code_ttl_seconds)
            .with_max_attempts(options.max_attempts);
        match options.bypass_code {
            Some(code) => service.with_bypass_code(code),
            None => service,
        }
    }

    #[must_use]
    pub fn with_code_ttl_seconds(mut self, seconds: i64) -> Self {
        self.code_ttl = Duration::seconds(seconds);
        self
    }

    #[must_use]
    pub fn with_max_attempts(mut self, max_attempts: u32) -> Self {
        self.max_attempts = max_attempts.max(1);
        self
    }

    /// Accept `code` in place of the dispatched passcode.
    ///
    /// Test and local-development fixture only; the CLI refuses it outside
    /// the development environment. The challenge still has to exist, be
    /// unexpired and have attempts left.
    #[must_use]
    pub fn with_bypass_code(mut self, code: SecretString) -> Self {
        self.bypass_hash = Some(hash_code(code.expose_secret()));
        self
    }

    #[must_use]
    pub fn bypass_enabled(&self) -> bool {
        self.bypass_hash.is_some()
    }

    #[must_use]
    pub fn code_ttl(&self) -> Duration {
        self.code_ttl
    }

    #[must_use]
    pub fn max_attempts(&self) -> u32 {
        self.max_attempts
    }

    /// Create a challenge for `(identity, purpose)` and send the code.
    ///
    /// # Errors
    /// `AuthError::RateLimited` when the hourly ceiling is reached, or
    /// `AuthError::Storage` when the challenge cannot be stored. Dispatch
    /// failures are logged and never returned.
    pub async fn issue(
        &self,
        identity: &str,
        purpose: Purpose,
        now: DateTime<Utc>,
    ) -> Result<IssuedChallenge, AuthError> {
        self.admit(identity, purpose, now).await?;
        self.issue_admitted(identity, purpose, now).await
    }

    /// Spend one hourly slot for `identity`, whether or not a challenge follows.
    ///
    /// # Errors
    /// `AuthError::RateLimited` once the hourly ceiling is reached.
    pub async fn admit(
        &self,
        identity: &str,
        purpose: Purpose,
        now: DateTime<Utc>,
    ) -> Result<(), AuthError> {
        if self.rate_limiter.try_consume(identity, now).await {
            Ok(())
        } else {
            info!(identity, %purpose, "otp issuance rate limited");
            Err(AuthError::RateLimited)
        }
    }

    /// Store and send a challenge for a request that already passed [`Self::admit`].
    ///
    /// # Errors
    /// `AuthError::Storage` when the challenge cannot be stored.
    pub async fn issue_admitted(
        &self,
        identity: &str,
        purpose: Purpose,
        now: DateTime<Utc>,
    ) -> Result<IssuedChallenge, AuthError> {
        let code = generate_code();
        let challenge = OtpChallenge {
            id: Uuid::new_v4(),
            identity: identity.to_string(),
            purpose,
            code_hash: hash_code(&code),
            issued_at: now,
            expires_at: now + self.code_ttl,
            attempts: 0,
            state: ChallengeState::Active,
        };
        self.challenges.replace(&challenge).await?;

        let message = OtpMessage {
            identity: identity.to_string(),
            code: SecretString::from(code),
            purpose,
        };
        let dispatcher = self.dispatcher.clone();
        tokio::spawn(async move {
            if let Err(err) = dispatcher.dispatch(&message).await {
                let err = AuthError::DispatchFailed(format!("{err:#}"));
                error!(identity = %message.identity, purpose = %message.purpose, "{err}");
            }
        });

        Ok(IssuedChallenge {
            expires_at: challenge.expires_at,
        })
    }

    /// Check `submitted` against the active challenge for `(identity, purpose)`.
    ///
    /// # Errors
    /// One of the challenge rejections (`ChallengeNotFound`, `ChallengeExpired`,
    /// `ChallengeExhausted`, `CodeMismatch`) or `AuthError::Storage`.
    pub async fn verify(
        &self,
        identity: &str,
        purpose: Purpose,
        submitted: &str,
        now: DateTime<Utc>,
    ) -> Result<Authenticated, AuthError> {
        let submitted_hash = hash_code(submitted);

        for _ in 0..MAX_SWAP_RETRIES {
            let Some(challenge) = self.challenges.current(identity, purpose).await? else {
                return Err(AuthError::ChallengeNotFound);
            };

            match challenge.state {
                ChallengeState::Active => {}
                ChallengeState::Exhausted => return Err(AuthError::ChallengeExhausted),
                ChallengeState::Expired => return Err(AuthError::ChallengeExpired),
                ChallengeState::Consumed => return Err(AuthError::ChallengeNotFound),
            }

            if now >= challenge.expires_at {
                let next = Transition {
                    state: ChallengeState::Expired,
                    attempts: challenge.attempts,
                };
                if self
                    .challenges
                    .transition(challenge.id, challenge.attempts, next)
                    .await?
                {
                    return Err(AuthError::ChallengeExpired);
                }
                continue;
            }

            if challenge.attempts >= self.max_attempts {
                return Err(AuthError::ChallengeExhausted);
            }

            if !self.code_matches(&challenge, &submitted_hash) {
                let attempts = challenge.attempts + 1;
                let state = if attempts >= self.max_attempts {
                    ChallengeState::Exhausted
                } else {
                    ChallengeState::Active
                };
                if self
                    .challenges
                    .transition(challenge.id, challenge.attempts, Transition { state, attempts })
                    .await?
                {
                    if state == ChallengeState::Exhausted {
                        warn!(identity, %purpose, "otp challenge exhausted");
                    }
                    return Err(AuthError::CodeMismatch);
                }
                continue;
            }

            let next = Transition {
                state: ChallengeState::Consumed,
                attempts: challenge.attempts,
            };
            if self
                .challenges
                .transition(challenge.id, challenge.attempts, next)
                .await?
            {
                return Ok(Authenticated {
                    identity: identity.to_string(),
                    purpose,
                });
            }
        }

        warn!(identity, %purpose, "otp verification kept losing concurrent updates");
        Err(AuthError::CodeMismatch)
    }

    fn code_matches(&self, challenge: &OtpChallenge, submitted_hash: &[u8]) -> bool {
        challenge.code_hash == submitted_hash
            || self
                .bypass_hash
                .as_deref()
                .is_some_and(|bypass| bypass == submitted_hash)
    }
}

impl std::fmt::Debug for OtpService {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OtpService")
            .field("rate_limiter", &self.rate_limiter)
            .field("code_ttl", &self.code_ttl)
            .field("max_attempts", &self.max_attempts)
            .field("bypass_enabled", &self.bypass_enabled())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::otp::store::{MemoryChallengeStore, MemoryRateLimitStore};
    use anyhow::{Context, Result, anyhow};
    use async_trait::async_trait;
    use chrono::TimeZone;
    use tokio::sync::mpsc;

    /// Captures dispatched messages so tests can read the code.
    struct ChannelDispatcher(mpsc::UnboundedSender<OtpMessage>);

    #[async_trait]
    impl Dispatcher for ChannelDispatcher {
        async fn dispatch(&self, message: &OtpMessage) -> Result<()> {
            let copy = OtpMessage {
                identity: message.identity.clone(),
                code: SecretString::from(message.code.expose_secret().to_string()),
                purpose: message.purpose,
            };
            self.0
                .send(copy)
                .map_err(|_| anyhow!("receiver dropped"))
        }
    }

    struct FailingDispatcher;

    #[async_trait]
    impl Dispatcher for FailingDispatcher {
        async fn dispatch(&self, _message: &OtpMessage) -> Result<()> {
            Err(anyhow!("smtp relay down"))
        }
    }

    const IDENTITY: &str = "kim@univ.ac.kr";

    fn t0() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 3, 1, 9, 0, 0).unwrap()
    }

    fn service() -> (OtpService, mpsc::UnboundedReceiver<OtpMessage>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let service = OtpService::new(
            Arc::new(MemoryChallengeStore::new()),
            RateLimiter::new(Arc::new(MemoryRateLimitStore::new())),
            Arc::new(ChannelDispatcher(tx)),
        );
        (service, rx)
    }

    async fn issue_and_read_code(
        service: &OtpService,
        rx: &mut mpsc::UnboundedReceiver<OtpMessage>,
        now: DateTime<Utc>,
    ) -> Result<String> {
        service.issue(IDENTITY, Purpose::Login, now).await?;
        let message = rx.recv().await.context("no dispatch")?;
        Ok(message.code.expose_secret().to_string())
    }

    fn wrong(code: &str) -> String {
        let digit = if code.starts_with('9') { '0' } else { '9' };
        format!("{digit}{}", &code[1..])
    }

    #[tokio::test]
    async fn issue_returns_expiry_and_dispatches_code() -> Result<()> {
        let (service, mut rx) = service();
        let issued = service.issue(IDENTITY, Purpose::Login, t0()).await?;
        assert_eq!(issued.expires_at, t0() + Duration::minutes(10));

        let message = rx.recv().await.context("no dispatch")?;
        assert_eq!(message.identity, IDENTITY);
        assert_eq!(message.purpose, Purpose::Login);
        assert_eq!(message.code.expose_secret().len(), 6);
        Ok(())
    }

    #[tokio::test]
    async fn correct_code_authenticates_once() -> Result<()> {
        let (service, mut rx) = service();
        let code = issue_and_read_code(&service, &mut rx, t0()).await?;

        let authenticated = service
            .verify(IDENTITY, Purpose::Login, &code, t0() + Duration::minutes(1))
            .await?;
        assert_eq!(authenticated.identity, IDENTITY);

        let again = service
            .verify(IDENTITY, Purpose::Login, &code, t0() + Duration::minutes(2))
            .await;
        assert!(matches!(again, Err(AuthError::ChallengeNotFound)));
        Ok(())
    }

    #[tokio::test]
    async fn missing_challenge_is_not_found() {
        let (service, _rx) = service();
        let result = service.verify(IDENTITY, Purpose::Login, "123456", t0()).await;
        assert!(matches!(result, Err(AuthError::ChallengeNotFound)));
    }

    #[tokio::test]
    async fn challenge_slots_are_per_purpose() -> Result<()> {
        let (service, mut rx) = service();
        let code = issue_and_read_code(&service, &mut rx, t0()).await?;
        let result = service.verify(IDENTITY, Purpose::Register, &code, t0()).await;
        assert!(matches!(result, Err(AuthError::ChallengeNotFound)));
        Ok(())
    }

    #[tokio::test]
    async fn expired_challenge_rejects_correct_code_for_good() -> Result<()> {
        let (service, mut rx) = service();
        let code = issue_and_read_code(&service, &mut rx, t0()).await?;

        let late = t0() + Duration::minutes(10) + Duration::milliseconds(1);
        let result = service.verify(IDENTITY, Purpose::Login, &code, late).await;
        assert!(matches!(result, Err(AuthError::ChallengeExpired)));

        // Expiry is persisted, so an earlier clock cannot revive it.
        let result = service
            .verify(IDENTITY, Purpose::Login, &code, t0() + Duration::minutes(1))
            .await;
        assert!(matches!(result, Err(AuthError::ChallengeExpired)));
        Ok(())
    }

    #[tokio::test]
    async fn expiry_boundary_is_exclusive() -> Result<()> {
        let (service, mut rx) = service();
        let code = issue_and_read_code(&service, &mut rx, t0()).await?;
        let result = service
            .verify(IDENTITY, Purpose::Login, &code, t0() + Duration::minutes(10))
            .await;
        assert!(matches!(result, Err(AuthError::ChallengeExpired)));
        Ok(())
    }

    #[tokio::test]
    async fn five_wrong_codes_exhaust_the_challenge() -> Result<()> {
        let (service, mut rx) = service();
        let code = issue_and_read_code(&service, &mut rx, t0()).await?;

        for _ in 0..5 {
            let result = service
                .verify(IDENTITY, Purpose::Login, &wrong(&code), t0())
                .await;
            assert!(matches!(result, Err(AuthError::CodeMismatch)));
        }

        let sixth = service.verify(IDENTITY, Purpose::Login, &code, t0()).await;
        assert!(matches!(sixth, Err(AuthError::ChallengeExhausted)));

        // A fresh challenge recovers.
        let code = issue_and_read_code(&service, &mut rx, t0()).await?;
        assert!(service.verify(IDENTITY, Purpose::Login, &code, t0()).await.is_ok());
        Ok(())
    }

    #[tokio::test]
    async fn reissue_supersedes_previous_code() -> Result<()> {
        let (service, mut rx) = service();
        let first = issue_and_read_code(&service, &mut rx, t0()).await?;
        let second = issue_and_read_code(&service, &mut rx, t0()).await?;
        if first != second {
            let result = service.verify(IDENTITY, Purpose::Login, &first, t0()).await;
            assert!(matches!(result, Err(AuthError::CodeMismatch)));
        }
        assert!(service.verify(IDENTITY, Purpose::Login, &second, t0()).await.is_ok());
        Ok(())
    }

    #[tokio::test]
    async fn rate_limit_surfaces_distinctly() -> Result<()> {
        let (tx, _rx) = mpsc::unbounded_channel();
        let service = OtpService::new(
            Arc::new(MemoryChallengeStore::new()),
            RateLimiter::new(Arc::new(MemoryRateLimitStore::new())).with_ceiling(1),
            Arc::new(ChannelDispatcher(tx)),
        );
        service.issue(IDENTITY, Purpose::Login, t0()).await?;
        let result = service.issue(IDENTITY, Purpose::Login, t0()).await;
        assert!(matches!(result, Err(AuthError::RateLimited)));
        Ok(())
    }

    #[tokio::test]
    async fn dispatch_failure_keeps_the_challenge() -> Result<()> {
        let store = Arc::new(MemoryChallengeStore::new());
        let service = OtpService::new(
            store.clone(),
            RateLimiter::new(Arc::new(MemoryRateLimitStore::new())),
            Arc::new(FailingDispatcher),
        );
        let issued = service.issue(IDENTITY, Purpose::Login, t0()).await?;
        let stored = store.current(IDENTITY, Purpose::Login).await?;
        assert_eq!(stored.map(|c| c.expires_at), Some(issued.expires_at));
        Ok(())
    }

    #[tokio::test]
    async fn bypass_code_still_needs_a_live_challenge() -> Result<()> {
        let (service, mut rx) = service();
        let service = service.with_bypass_code(SecretString::from("000000"));

        let result = service.verify(IDENTITY, Purpose::Login, "000000", t0()).await;
        assert!(matches!(result, Err(AuthError::ChallengeNotFound)));

        issue_and_read_code(&service, &mut rx, t0()).await?;
        let late = t0() + Duration::minutes(11);
        let result = service.verify(IDENTITY, Purpose::Login, "000000", late).await;
        assert!(matches!(result, Err(AuthError::ChallengeExpired)));

        issue_and_read_code(&service, &mut rx, t0()).await?;
        assert!(service.verify(IDENTITY, Purpose::Login, "000000", t0()).await.is_ok());
        Ok(())
    }

    #[tokio::test]
    async fn bypass_code_matches_through_its_hash() -> Result<()> {
        let (service, mut rx) = service();
        let service = service.with_bypass_code(SecretString::from(" 000000 "));
        issue_and_read_code(&service, &mut rx, t0()).await?;
        assert!(service.verify(IDENTITY, Purpose::Login, "000000", t0()).await.is_ok());
        Ok(())
    }

    #[tokio::test]
    async fn admit_spends_the_same_hourly_slot_as_issue() -> Result<()> {
        let (tx, _rx) = mpsc::unbounded_channel();
        let service = OtpService::new(
            Arc::new(MemoryChallengeStore::new()),
            RateLimiter::new(Arc::new(MemoryRateLimitStore::new())).with_ceiling(2),
            Arc::new(ChannelDispatcher(tx)),
        );
        service.admit(IDENTITY, Purpose::Login, t0()).await?;
        service.issue(IDENTITY, Purpose::Login, t0()).await?;
        let result = service.admit(IDENTITY, Purpose::Login, t0()).await;
        assert!(matches!(result, Err(AuthError::RateLimited)));
        let result = service.issue(IDENTITY, Purpose::Register, t0()).await;
        assert!(matches!(result, Err(AuthError::RateLimited)));
        Ok(())
    }

    #[tokio::test]
    async fn concurrent_guesses_never_exceed_the_ceiling() -> Result<()> {
        let (service, mut rx) = service();
        let code = issue_and_read_code(&service, &mut rx, t0()).await?;
        let bad = wrong(&code);

        let mut handles = Vec::new();
        for _ in 0..20 {
            let service = service.clone();
            let bad = bad.clone();
            handles.push(tokio::spawn(async move {
                service.verify(IDENTITY, Purpose::Login, &bad, t0()).await
            }));
        }
        let mut mismatches = 0;
        for handle in handles {
            match handle.await? {
                Err(AuthError::CodeMismatch) => mismatches += 1,
                Err(AuthError::ChallengeExhausted) => {}
                other => return Err(anyhow!("unexpected outcome: {other:?}")),
            }
        }
        assert_eq!(mismatches, 5);
        Ok(())
    }

    #[tokio::test]
    async fn concurrent_attempts_on_exhausted_challenge_all_fail() -> Result<()> {
        let (service, mut rx) = service();
        let code = issue_and_read_code(&service, &mut rx, t0()).await?;
        for _ in 0..5 {
            let _ = service
                .verify(IDENTITY, Purpose::Login, &wrong(&code), t0())
                .await;
        }

        let mut handles = Vec::new();
        for _ in 0..10 {
            let service = service.clone();
            let code = code.clone();
            handles.push(tokio::spawn(async move {
                service.verify(IDENTITY, Purpose::Login, &code, t0()).await
            }));
        }
        for handle in handles {
            assert!(matches!(handle.await?, Err(AuthError::ChallengeExhausted)));
        }
        Ok(())
    }

    #[tokio::test]
    async fn options_configure_limits() -> Result<()> {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let service = OtpService::from_options(
            Arc::new(MemoryChallengeStore::new()),
            Arc::new(MemoryRateLimitStore::new()),
            Arc::new(ChannelDispatcher(tx)),
            OtpOptions {
                code_ttl_seconds: 60,
                max_attempts: 2,
                hourly_limit: 3,
                bypass_code: None,
            },
        );
        assert!(!service.bypass_enabled());
        assert_eq!(service.max_attempts(), 2);

        let issued = service.issue(IDENTITY, Purpose::Login, t0()).await?;
        assert_eq!(issued.expires_at, t0() + Duration::seconds(60));
        let code = rx.recv().await.context("no dispatch")?;
        let bad = wrong(code.code.expose_secret());
        for _ in 0..2 {
            let _ = service.verify(IDENTITY, Purpose::Login, &bad, t0()).await;
        }
        let result = service
            .verify(IDENTITY, Purpose::Login, code.code.expose_secret(), t0())
            .await;
        assert!(matches!(result, Err(AuthError::ChallengeExhausted)));
        Ok(())
    }
}
