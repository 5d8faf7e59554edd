use crate::{
    api::{self, AuthConfig, Environment, ServerConfig},
    gate::RouteTable,
    otp::{Dispatcher, LogDispatcher, OtpOptions, WebhookDispatcher},
    session::SessionTokens,
};
use anyhow::{Context, Result};
use secrecy::SecretString;
use std::sync::Arc;
use tracing::{debug, warn};
use url::Url;

pub struct Args {
    pub port: u16,
    pub dsn: String,
    pub environment: Environment,
    pub session_secret: SecretString,
    pub session_ttl_seconds: i64,
    pub frontend_base_url: String,
    pub otp_ttl_seconds: i64,
    pub otp_max_attempts: u32,
    pub otp_hourly_limit: u32,
    pub otp_bypass_code: Option<SecretString>,
    pub dispatch_webhook: Option<(Url, SecretString)>,
}

impl std::fmt::Debug for Args {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Args")
            .field("port", &self.port)
            .field("environment", &self.environment)
            .field("session_secret", &"***")
            .field("session_ttl_seconds", &self.session_ttl_seconds)
            .field("frontend_base_url", &self.frontend_base_url)
            .field("otp_ttl_seconds", &self.otp_ttl_seconds)
            .field("otp_max_attempts", &self.otp_max_attempts)
            .field("otp_hourly_limit", &self.otp_hourly_limit)
            .field("otp_bypass_code", &self.otp_bypass_code.as_ref().map(|_| "***"))
            .field(
                "dispatch_url",
                &self.dispatch_webhook.as_ref().map(|(url, _)| url.as_str()),
            )
            .finish_non_exhaustive()
    }
}

/// Execute the server action.
/// # Errors
/// Returns an error if the session secret is unusable, the dispatch client
/// cannot be built, or the server fails to start.
pub async fn execute(args: Args) -> Result<()> {
    debug!("Server args: {:?}", args);

    let tokens = SessionTokens::new(args.session_secret)
        .context("Invalid session secret")?
        .with_ttl_seconds(args.session_ttl_seconds);

    let dispatcher: Arc<dyn Dispatcher> = match args.dispatch_webhook {
        Some((url, secret)) => Arc::new(WebhookDispatcher::new(url, secret)?),
        None => {
            warn!("No dispatch webhook configured, passcodes will not be delivered");
            Arc::new(LogDispatcher)
        }
    };

    let auth = AuthConfig::new(args.frontend_base_url)
        .with_environment(args.environment)
        .with_session_ttl_seconds(args.session_ttl_seconds);

    let config = ServerConfig {
        auth,
        tokens,
        otp: OtpOptions {
            code_ttl_seconds: args.otp_ttl_seconds,
            max_attempts: args.otp_max_attempts,
            hourly_limit: args.otp_hourly_limit,
            bypass_code: args.otp_bypass_code,
        },
        routes: RouteTable::default(),
    };

    api::new(args.port, args.dsn, config, dispatcher).await
}
