//! Error taxonomy for the passcode and session flows.

use crate::directory::Role;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum AuthError {
    #[error("too many passcodes requested")]
    RateLimited,
    #[error("no active challenge")]
    ChallengeNotFound,
    #[error("challenge expired")]
    ChallengeExpired,
    #[error("challenge attempts exhausted")]
    ChallengeExhausted,
    #[error("code mismatch")]
    CodeMismatch,
    #[error("invalid session token")]
    InvalidToken,
    #[error("role {0} is not allowed here")]
    Unauthorized(Role),
    #[error("passcode dispatch failed: {0}")]
    DispatchFailed(String),
    #[error("storage error")]
    Storage(#[from] anyhow::Error),
}

impl AuthError {
    /// Challenge failures are reported to clients as a single generic rejection.
    #[must_use]
    pub fn is_challenge_rejection(&self) -> bool {
        matches!(
            self,
            Self::ChallengeNotFound
                | Self::ChallengeExpired
                | Self::ChallengeExhausted
                | Self::CodeMismatch
        )
    }
}
