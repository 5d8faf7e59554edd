//! Auth state and configuration shared by the auth handlers.

use std::{fmt, str::FromStr, sync::Arc};

use crate::directory::UserDirectory;
use crate::otp::OtpService;
use crate::session::{CookiePolicy, SessionTokens};

/// Deployment environment. Only `Development` relaxes cookie and bypass rules.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum Environment {
    #[default]
    Production,
    Development,
}

impl Environment {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Production => "production",
            Self::Development => "development",
        }
    }

    #[must_use]
    pub fn is_development(self) -> bool {
        self == Self::Development
    }
}

impl fmt::Display for Environment {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Environment {
    type Err = String;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value {
            "production" => Ok(Self::Production),
            "development" => Ok(Self::Development),
            _ => Err(format!("invalid environment: {value}")),
        }
    }
}

#[derive(Clone, Debug)]
pub struct AuthConfig {
    frontend_base_url: String,
    environment: Environment,
    session_ttl_seconds: i64,
}

impl AuthConfig {
    #[must_use]
    pub fn new(frontend_base_url: String) -> Self {
        Self {
            frontend_base_url,
            environment: Environment::default(),
            session_ttl_seconds: crate::session::token::DEFAULT_SESSION_TTL_SECONDS,
        }
    }

    #[must_use]
    pub fn with_environment(mut self, environment: Environment) -> Self {
        self.environment = environment;
        self
    }

    #[must_use]
    pub fn with_session_ttl_seconds(mut self, seconds: i64) -> Self {
        self.session_ttl_seconds = seconds;
        self
    }

    #[must_use]
    pub fn environment(&self) -> Environment {
        self.environment
    }

    #[must_use]
    pub fn session_ttl_seconds(&self) -> i64 {
        self.session_ttl_seconds
    }

    pub(crate) fn frontend_base_url(&self) -> &str {
        &self.frontend_base_url
    }

    pub(crate) fn session_cookie_secure(&self) -> bool {
        !self.environment.is_development()
    }

    #[must_use]
    pub fn cookie_policy(&self) -> CookiePolicy {
        CookiePolicy::new(self.session_ttl_seconds, self.session_cookie_secure())
    }
}

pub struct AuthState {
    config: AuthConfig,
    otp: OtpService,
    tokens: SessionTokens,
    directory: Arc<dyn UserDirectory>,
}

impl AuthState {
    #[must_use]
    pub fn new(
        config: AuthConfig,
        otp: OtpService,
        tokens: SessionTokens,
        directory: Arc<dyn UserDirectory>,
    ) -> Self {
        Self {
            config,
            otp,
            tokens,
            directory,
        }
    }

    #[must_use]
    pub fn config(&self) -> &AuthConfig {
        &self.config
    }

    #[must_use]
    pub fn otp(&self) -> &OtpService {
        &self.otp
    }

    #[must_use]
    pub fn tokens(&self) -> &SessionTokens {
        &self.tokens
    }

    #[must_use]
    pub fn directory(&self) -> &dyn UserDirectory {
        self.directory.as_ref()
    }

    #[must_use]
    pub fn cookies(&self) -> CookiePolicy {
        self.config.cookie_policy()
    }
}

impl fmt::Debug for AuthState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AuthState")
            .field("config", &self.config)
            .field("otp", &self.otp)
            .field("tokens", &self.tokens)
            .finish_non_exhaustive()
    }
}
