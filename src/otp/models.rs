use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::{fmt, str::FromStr};
use utoipa::ToSchema;
use uuid::Uuid;

/// Why a passcode was requested. Each purpose has its own challenge slot.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "snake_case")]
pub enum Purpose {
    Login,
    Register,
    PasswordReset,
}

impl Purpose {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Login => "login",
            Self::Register => "register",
            Self::PasswordReset => "password_reset",
        }
    }
}

impl fmt::Display for Purpose {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Purpose {
    type Err = String;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value {
            "login" => Ok(Self::Login),
            "register" => Ok(Self::Register),
            "password_reset" => Ok(Self::PasswordReset),
            _ => Err(format!("invalid purpose: {value}")),
        }
    }
}

/// Lifecycle of a challenge. Everything except `Active` is terminal.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ChallengeState {
    Active,
    Consumed,
    Expired,
    Exhausted,
}

impl ChallengeState {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Active => "active",
            Self::Consumed => "consumed",
            Self::Expired => "expired",
            Self::Exhausted => "exhausted",
        }
    }

    pub(crate) fn from_db(value: &str) -> Result<Self, sqlx::Error> {
        match value {
            "active" => Ok(Self::Active),
            "consumed" => Ok(Self::Consumed),
            "expired" => Ok(Self::Expired),
            "exhausted" => Ok(Self::Exhausted),
            _ => Err(sqlx::Error::Decode(Box::new(std::io::Error::new(
                std::io::ErrorKind::InvalidData,
                format!("invalid otp_challenges.state value: {value}"),
            )))),
        }
    }
}

/// A stored passcode challenge. Only the SHA-256 of the code is kept.
#[derive(Clone, Debug)]
pub struct OtpChallenge {
    pub id: Uuid,
    pub identity: String,
    pub purpose: Purpose,
    pub code_hash: Vec<u8>,
    pub issued_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
    pub attempts: u32,
    pub state: ChallengeState,
}

/// What the issuer hands back to callers: never the code itself.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct IssuedChallenge {
    pub expires_at: DateTime<Utc>,
}

/// Successful verification outcome.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Authenticated {
    pub identity: String,
    pub purpose: Purpose,
}
