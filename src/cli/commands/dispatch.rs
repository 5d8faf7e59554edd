use anyhow::{Context, Result, bail};
use clap::{Arg, ArgMatches, Command};
use secrecy::SecretString;
use url::Url;

pub const ARG_DISPATCH_URL: &str = "dispatch-url";
pub const ARG_DISPATCH_SECRET: &str = "dispatch-secret";

/// Mail webhook target; `None` means passcodes are only logged.
pub struct Options {
    pub webhook: Option<(Url, SecretString)>,
}

impl Options {
    /// Parse dispatch arguments from matches.
    ///
    /// # Errors
    /// Returns an error if the URL is invalid or set without a shared secret.
    pub fn parse(matches: &ArgMatches) -> Result<Self> {
        let get_non_empty = |id: &str| {
            matches
                .get_one::<String>(id)
                .cloned()
                .filter(|v| !v.trim().is_empty())
        };

        let Some(url) = get_non_empty(ARG_DISPATCH_URL) else {
            return Ok(Self { webhook: None });
        };
        let url = Url::parse(&url).with_context(|| format!("invalid --{ARG_DISPATCH_URL}: {url}"))?;
        let Some(secret) = get_non_empty(ARG_DISPATCH_SECRET) else {
            bail!("missing required argument: --{ARG_DISPATCH_SECRET} (required with --{ARG_DISPATCH_URL})");
        };

        Ok(Self {
            webhook: Some((url, SecretString::from(secret))),
        })
    }
}

#[must_use]
pub fn with_args(command: Command) -> Command {
    command
        .arg(
            Arg::new(ARG_DISPATCH_URL)
                .long(ARG_DISPATCH_URL)
                .help("Mail webhook receiving passcodes")
                .long_help(
                    "Mail webhook receiving passcodes as JSON {identity, code, purpose, sharedSecret}. When unset, passcodes are not delivered and only their dispatch is logged.",
                )
                .env("CAREERGATE_DISPATCH_URL"),
        )
        .arg(
            Arg::new(ARG_DISPATCH_SECRET)
                .long(ARG_DISPATCH_SECRET)
                .help("Shared secret sent to the mail webhook")
                .env("CAREERGATE_DISPATCH_SECRET")
                .hide_env_values(true),
        )
}
