//! # careergate (auth core)
//!
//! Authentication and route authorization for a closed-membership
//! job-hunting community of students and alumni.
//!
//! ## Passcode login
//!
//! Members identify with their email and receive a six-digit one-time code.
//! Codes are stored only as SHA-256 hashes, expire after 10 minutes and allow
//! 5 wrong guesses. Each identity can request at most 100 codes per UTC hour.
//! Delivery goes through an external mail webhook and never blocks the request.
//!
//! ## Sessions
//!
//! A verified code mints an HS256-signed token carrying identity, role and
//! display name. It lives in the `auth-token` cookie (`HttpOnly`,
//! `SameSite=Strict`) for 24 hours. The companion `user-role` cookie is a UI
//! hint only and is never trusted for authorization.
//!
//! ## Route gate
//!
//! Every request path is classified as public, auth-only, protected or
//! admin-only and checked against the verified token before it reaches a
//! handler.

pub mod api;
pub mod cli;
pub mod directory;
pub mod error;
pub mod gate;
pub mod otp;
pub mod session;

#[allow(clippy::doc_markdown, clippy::needless_raw_string_hashes)]
pub mod built_info {
    include!(concat!(env!("OUT_DIR"), "/built.rs"));
}

pub const GIT_COMMIT_HASH: &str = match built_info::GIT_COMMIT_HASH {
    Some(hash) => hash,
    None => "unknown",
};

pub const APP_USER_AGENT: &str = concat!(env!("CARGO_PKG_NAME"), "/", env!("CARGO_PKG_VERSION"),);
