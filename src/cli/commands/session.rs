use anyhow::{Result, anyhow, bail};
use clap::{Arg, ArgMatches, Command};
use secrecy::SecretString;

use crate::api::Environment;

pub const ARG_ENVIRONMENT: &str = "environment";
pub const ARG_SESSION_SECRET: &str = "session-secret";
pub const ARG_SESSION_TTL_SECONDS: &str = "session-ttl-seconds";
pub const ARG_FRONTEND_BASE_URL: &str = "frontend-base-url";

pub struct Options {
    pub environment: Environment,
    pub secret: SecretString,
    pub ttl_seconds: i64,
    pub frontend_base_url: String,
}

impl Options {
    /// Parse session arguments from matches.
    ///
    /// # Errors
    /// Returns an error if the signing secret is missing or the environment is unknown.
    pub fn parse(matches: &ArgMatches) -> Result<Self> {
        let secret = match matches.get_one::<String>(ARG_SESSION_SECRET) {
            Some(value) if !value.trim().is_empty() => SecretString::from(value.clone()),
            _ => bail!("missing required argument: --{ARG_SESSION_SECRET}"),
        };

        let environment = matches
            .get_one::<String>(ARG_ENVIRONMENT)
            .map_or(Ok(Environment::Production), |value| value.parse())
            .map_err(|err: String| anyhow!(err))?;

        Ok(Self {
            environment,
            secret,
            ttl_seconds: matches
                .get_one::<i64>(ARG_SESSION_TTL_SECONDS)
                .copied()
                .unwrap_or(crate::session::token::DEFAULT_SESSION_TTL_SECONDS),
            frontend_base_url: matches
                .get_one::<String>(ARG_FRONTEND_BASE_URL)
                .cloned()
                .unwrap_or_else(|| "https://careergate.dev".to_string()),
        })
    }
}

#[must_use]
pub fn with_args(command: Command) -> Command {
    command
        .arg(
            Arg::new(ARG_ENVIRONMENT)
                .long(ARG_ENVIRONMENT)
                .help("Deployment environment")
                .long_help(
                    "Deployment environment. `development` drops the Secure cookie attribute and allows --otp-bypass-code.",
                )
                .env("CAREERGATE_ENVIRONMENT")
                .value_parser(["production", "development"])
                .default_value("production"),
        )
        .arg(
            Arg::new(ARG_SESSION_SECRET)
                .long(ARG_SESSION_SECRET)
                .help("HMAC key for session tokens, at least 32 bytes")
                .env("CAREERGATE_SESSION_SECRET")
                .hide_env_values(true),
        )
        .arg(
            Arg::new(ARG_SESSION_TTL_SECONDS)
                .long(ARG_SESSION_TTL_SECONDS)
                .help("Session token and cookie TTL in seconds")
                .env("CAREERGATE_SESSION_TTL_SECONDS")
                .default_value("86400")
                .value_parser(clap::value_parser!(i64).range(1..)),
        )
        .arg(
            Arg::new(ARG_FRONTEND_BASE_URL)
                .long(ARG_FRONTEND_BASE_URL)
                .help("Frontend base URL allowed by CORS")
                .env("CAREERGATE_FRONTEND_BASE_URL")
                .default_value("https://careergate.dev"),
        )
}
