//! Auth handlers and supporting modules.
//!
//! Members sign in with a six-digit passcode sent to their email. A verified
//! passcode mints a signed session token that travels in the `auth-token`
//! cookie; nothing about the session is stored server-side.
//!
//! ## Passcode limits
//!
//! - **Dispatch:** 100 passcodes per identity per UTC hour.
//! - **Attempts:** 5 wrong codes exhaust a challenge; a new passcode is needed.
//! - **Lifetime:** 10 minutes from issuance.

pub(crate) mod otp;
pub(crate) mod session;
mod state;
pub(crate) mod types;
mod utils;

pub use state::{AuthConfig, AuthState, Environment};
