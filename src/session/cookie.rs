//! `Set-Cookie` construction for the session token and the role hint.
//!
//! `user-role` only lets the UI pick a layout. Authorization never reads it.

use axum::http::{
    HeaderMap, HeaderValue,
    header::{COOKIE, InvalidHeaderValue},
};

use crate::directory::Role;

pub const AUTH_COOKIE: &str = "auth-token";
pub const ROLE_COOKIE: &str = "user-role";

#[derive(Clone, Copy, Debug)]
pub struct CookiePolicy {
    max_age_seconds: i64,
    secure: bool,
}

impl CookiePolicy {
    #[must_use]
    pub fn new(max_age_seconds: i64, secure: bool) -> Self {
        Self {
            max_age_seconds,
            secure,
        }
    }

    #[must_use]
    pub fn secure(&self) -> bool {
        self.secure
    }

    fn render(&self, name: &str, value: &str, max_age: i64) -> Result<HeaderValue, InvalidHeaderValue> {
        let mut cookie =
            format!("{name}={value}; Path=/; HttpOnly; SameSite=Strict; Max-Age={max_age}");
        if self.secure {
            cookie.push_str("; Secure");
        }
        HeaderValue::from_str(&cookie)
    }

    /// Cookies for a freshly minted session.
    ///
    /// # Errors
    /// Fails if the token contains bytes not allowed in a header value.
    pub fn establish(&self, token: &str, role: Role) -> Result<[HeaderValue; 2], InvalidHeaderValue> {
        Ok([
            self.render(AUTH_COOKIE, token, self.max_age_seconds)?,
            self.render(ROLE_COOKIE, role.as_str(), self.max_age_seconds)?,
        ])
    }

    /// Expire both cookies.
    #[must_use]
    pub fn clear(&self) -> Vec<HeaderValue> {
        [AUTH_COOKIE, ROLE_COOKIE]
            .into_iter()
            .filter_map(|name| self.render(name, "", 0).ok())
            .collect()
    }
}

/// Value of the `auth-token` cookie, if the request carries one.
#[must_use]
pub fn extract_token(headers: &HeaderMap) -> Option<String> {
    headers
        .get_all(COOKIE)
        .iter()
        .filter_map(|header| header.to_str().ok())
        .flat_map(|value| value.split(';'))
        .find_map(|pair| {
            let (key, val) = pair.trim().split_once('=')?;
            (key.trim() == AUTH_COOKIE && !val.trim().is_empty()).then(|| val.trim().to_string())
        })
}
