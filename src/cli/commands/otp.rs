use clap::{Arg, ArgMatches, Command};
use secrecy::SecretString;

use crate::otp::{
    rate_limit::DEFAULT_HOURLY_LIMIT,
    service::{DEFAULT_CODE_TTL_SECONDS, DEFAULT_MAX_ATTEMPTS},
};

pub const ARG_OTP_TTL_SECONDS: &str = "otp-ttl-seconds";
pub const ARG_OTP_MAX_ATTEMPTS: &str = "otp-max-attempts";
pub const ARG_OTP_HOURLY_LIMIT: &str = "otp-hourly-limit";
pub const ARG_OTP_BYPASS_CODE: &str = "otp-bypass-code";

pub struct Options {
    pub ttl_seconds: i64,
    pub max_attempts: u32,
    pub hourly_limit: u32,
    pub bypass_code: Option<SecretString>,
}

impl Options {
    #[must_use]
    pub fn parse(matches: &ArgMatches) -> Self {
        Self {
            ttl_seconds: matches
                .get_one::<i64>(ARG_OTP_TTL_SECONDS)
                .copied()
                .unwrap_or(DEFAULT_CODE_TTL_SECONDS),
            max_attempts: matches
                .get_one::<u32>(ARG_OTP_MAX_ATTEMPTS)
                .copied()
                .unwrap_or(DEFAULT_MAX_ATTEMPTS),
            hourly_limit: matches
                .get_one::<u32>(ARG_OTP_HOURLY_LIMIT)
                .copied()
                .unwrap_or(DEFAULT_HOURLY_LIMIT),
            bypass_code: matches
                .get_one::<String>(ARG_OTP_BYPASS_CODE)
                .filter(|value| !value.trim().is_empty())
                .map(|value| SecretString::from(value.trim().to_string())),
        }
    }
}

#[must_use]
pub fn with_args(command: Command) -> Command {
    command
        .arg(
            Arg::new(ARG_OTP_TTL_SECONDS)
                .long(ARG_OTP_TTL_SECONDS)
                .help("Passcode lifetime in seconds")
                .env("CAREERGATE_OTP_TTL_SECONDS")
                .default_value("600")
                .value_parser(clap::value_parser!(i64).range(1..)),
        )
        .arg(
            Arg::new(ARG_OTP_MAX_ATTEMPTS)
                .long(ARG_OTP_MAX_ATTEMPTS)
                .help("Wrong codes allowed before a challenge is exhausted")
                .env("CAREERGATE_OTP_MAX_ATTEMPTS")
                .default_value("5")
                .value_parser(clap::value_parser!(u32).range(1..)),
        )
        .arg(
            Arg::new(ARG_OTP_HOURLY_LIMIT)
                .long(ARG_OTP_HOURLY_LIMIT)
                .help("Passcodes dispatched per identity per hour")
                .env("CAREERGATE_OTP_HOURLY_LIMIT")
                .default_value("100")
                .value_parser(clap::value_parser!(u32)),
        )
        .arg(
            Arg::new(ARG_OTP_BYPASS_CODE)
                .long(ARG_OTP_BYPASS_CODE)
                .help("Fixed six-digit code accepted for any live challenge (development only)")
                .env("CAREERGATE_OTP_BYPASS_CODE")
                .hide_env_values(true),
        )
}
