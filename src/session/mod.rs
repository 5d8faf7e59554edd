//! Stateless sessions: a signed token in an `HttpOnly` cookie.

pub mod cookie;
pub mod token;

pub use cookie::{AUTH_COOKIE, CookiePolicy, ROLE_COOKIE, extract_token};
pub use token::{SecretError, SessionClaims, SessionTokens};
