//! One-time passcode challenges.

pub mod code;
pub mod dispatch;
pub mod models;
pub mod rate_limit;
pub mod repo;
pub mod service;
pub mod store;

pub use dispatch::{Dispatcher, LogDispatcher, OtpMessage, WebhookDispatcher};
pub use models::{Authenticated, ChallengeState, IssuedChallenge, OtpChallenge, Purpose};
pub use rate_limit::RateLimiter;
pub use repo::{PgChallengeStore, PgRateLimitStore};
pub use service::{OtpOptions, OtpService};
pub use store::{ChallengeStore, MemoryChallengeStore, MemoryRateLimitStore, RateLimitStore};
