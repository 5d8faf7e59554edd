//! Map parsed arguments to an [`Action`], rejecting unsafe combinations
//! before anything starts.

use crate::cli::actions::{Action, server::Args};
use crate::cli::commands::{dispatch, otp, session};
use crate::otp::code::well_formed;
use crate::session::token::MIN_SECRET_BYTES;
use anyhow::{Context, Result, bail};
use secrecy::ExposeSecret;

/// Map validated CLI matches to a server action.
///
/// # Errors
/// Returns an error if required arguments are missing or inconsistent.
pub fn handler(matches: &clap::ArgMatches) -> Result<Action> {
    let port = matches.get_one::<u16>("port").copied().unwrap_or(8080);
    let dsn = matches
        .get_one::<String>("dsn")
        .cloned()
        .context("missing required argument: --dsn")?;

    let session_opts = session::Options::parse(matches)?;
    let secret_len = session_opts.secret.expose_secret().len();
    if secret_len < MIN_SECRET_BYTES {
        bail!(
            "--{} must be at least {MIN_SECRET_BYTES} bytes, got {secret_len}",
            session::ARG_SESSION_SECRET
        );
    }

    let otp_opts = otp::Options::parse(matches);
    if let Some(code) = &otp_opts.bypass_code {
        if !session_opts.environment.is_development() {
            bail!(
                "--{} is only allowed with --{} development",
                otp::ARG_OTP_BYPASS_CODE,
                session::ARG_ENVIRONMENT
            );
        }
        if !well_formed(code.expose_secret()) {
            bail!("--{} must be six digits", otp::ARG_OTP_BYPASS_CODE);
        }
    }

    let dispatch_opts = dispatch::Options::parse(matches)?;

    Ok(Action::Server(Args {
        port,
        dsn,
        environment: session_opts.environment,
        session_secret: session_opts.secret,
        session_ttl_seconds: session_opts.ttl_seconds,
        frontend_base_url: session_opts.frontend_base_url,
        otp_ttl_seconds: otp_opts.ttl_seconds,
        otp_max_attempts: otp_opts.max_attempts,
        otp_hourly_limit: otp_opts.hourly_limit,
        otp_bypass_code: otp_opts.bypass_code,
        dispatch_webhook: dispatch_opts.webhook,
    }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::api::Environment;

    const SECRET: &str = "0123456789abcdef0123456789abcdef";

    fn run(vars: &[(&str, Option<&str>)]) -> Result<Action> {
        let mut all: Vec<(&str, Option<&str>)> = vec![
            ("CAREERGATE_DSN", Some("postgres://careergate@localhost:5432/careergate")),
            ("CAREERGATE_SESSION_SECRET", Some(SECRET)),
            ("CAREERGATE_ENVIRONMENT", None),
            ("CAREERGATE_OTP_BYPASS_CODE", None),
            ("CAREERGATE_DISPATCH_URL", None),
            ("CAREERGATE_DISPATCH_SECRET", None),
        ];
        for &(key, value) in vars {
            match all.iter_mut().find(|(k, _)| *k == key) {
                Some(slot) => slot.1 = value,
                None => all.push((key, value)),
            }
        }
        temp_env::with_vars(all, || {
            let matches = crate::cli::commands::new().get_matches_from(vec!["careergate"]);
            handler(&matches)
        })
    }

    fn error_message(result: Result<Action>) -> String {
        match result {
            Ok(action) => panic!("expected error, got {action:?}"),
            Err(err) => err.to_string(),
        }
    }

    #[test]
    fn session_secret_is_required() {
        let message = error_message(run(&[("CAREERGATE_SESSION_SECRET", None)]));
        assert!(message.contains("missing required argument: --session-secret"));
    }

    #[test]
    fn short_session_secret_is_rejected() {
        let message = error_message(run(&[("CAREERGATE_SESSION_SECRET", Some("short"))]));
        assert!(message.contains("at least 32 bytes"));
    }

    #[test]
    fn bypass_code_rejected_outside_development() {
        let message = error_message(run(&[("CAREERGATE_OTP_BYPASS_CODE", Some("000000"))]));
        assert!(message.contains("only allowed with --environment development"));
    }

    #[test]
    fn bypass_code_must_be_six_digits() {
        let message = error_message(run(&[
            ("CAREERGATE_ENVIRONMENT", Some("development")),
            ("CAREERGATE_OTP_BYPASS_CODE", Some("letmein")),
        ]));
        assert!(message.contains("six digits"));
    }

    #[test]
    fn bypass_code_allowed_in_development() -> Result<()> {
        let Action::Server(args) = run(&[
            ("CAREERGATE_ENVIRONMENT", Some("development")),
            ("CAREERGATE_OTP_BYPASS_CODE", Some("000000")),
        ])?;
        assert_eq!(args.environment, Environment::Development);
        assert!(args.otp_bypass_code.is_some());
        Ok(())
    }

    #[test]
    fn dispatch_url_requires_secret() {
        let message = error_message(run(&[(
            "CAREERGATE_DISPATCH_URL",
            Some("https://mail.careergate.dev/otp"),
        )]));
        assert!(message.contains("--dispatch-secret"));
    }

    #[test]
    fn defaults_produce_server_action() -> Result<()> {
        let Action::Server(args) = run(&[])?;
        assert_eq!(args.port, 8080);
        assert_eq!(args.environment, Environment::Production);
        assert_eq!(args.session_ttl_seconds, 86_400);
        assert_eq!(args.otp_ttl_seconds, 600);
        assert_eq!(args.otp_max_attempts, 5);
        assert_eq!(args.otp_hourly_limit, 100);
        assert!(args.otp_bypass_code.is_none());
        assert!(args.dispatch_webhook.is_none());
        Ok(())
    }

    #[test]
    fn dispatch_webhook_is_parsed() -> Result<()> {
        let Action::Server(args) = run(&[
            ("CAREERGATE_DISPATCH_URL", Some("https://mail.careergate.dev/otp")),
            ("CAREERGATE_DISPATCH_SECRET", Some("hook-secret")),
        ])?;
        let (url, _) = args.dispatch_webhook.context("missing webhook")?;
        assert_eq!(url.as_str(), "https://mail.careergate.dev/otp");
        Ok(())
    }
}
