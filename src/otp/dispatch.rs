//! Outbound passcode delivery.
//!
//! The mail channel lives outside this service. Passcodes are handed to it
//! through a webhook that authenticates with a shared secret; the receiver
//! answers `{"delivered": bool}`. `LogDispatcher` is the local stand-in when no
//! webhook is configured and never writes the code to the log.

use anyhow::{Context, Result, anyhow};
use async_trait::async_trait;
use reqwest::Client;
use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::{Instrument, info, info_span};
use url::Url;

use super::models::Purpose;
use crate::APP_USER_AGENT;

#[derive(Debug)]
pub struct OtpMessage {
    pub identity: String,
    pub code: SecretString,
    pub purpose: Purpose,
}

#[async_trait]
pub trait Dispatcher: Send + Sync {
    /// Deliver the passcode or return an error describing why it was not delivered.
    async fn dispatch(&self, message: &OtpMessage) -> Result<()>;
}

#[derive(Clone, Debug)]
pub struct LogDispatcher;

#[async_trait]
impl Dispatcher for LogDispatcher {
    async fn dispatch(&self, message: &OtpMessage) -> Result<()> {
        info!(
            identity = %message.identity,
            purpose = %message.purpose,
            "otp dispatch stub, code withheld"
        );
        Ok(())
    }
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct WebhookPayload<'a> {
    identity: &'a str,
    code: &'a str,
    purpose: Purpose,
    shared_secret: &'a str,
}

#[derive(Deserialize)]
struct WebhookReceipt {
    delivered: bool,
}

pub struct WebhookDispatcher {
    client: Client,
    url: Url,
    shared_secret: SecretString,
}

impl WebhookDispatcher {
    /// Build a dispatcher posting to `url`.
    ///
    /// # Errors
    /// Returns an error if the HTTP client cannot be built.
    pub fn new(url: Url, shared_secret: SecretString) -> Result<Self> {
        let client = Client::builder()
            .user_agent(APP_USER_AGENT)
            .timeout(Duration::from_secs(10))
            .build()
            .context("failed to build dispatch client")?;
        Ok(Self {
            client,
            url,
            shared_secret,
        })
    }
}

impl std::fmt::Debug for WebhookDispatcher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WebhookDispatcher")
            .field("url", &self.url.as_str())
            .field("shared_secret", &"***")
            .finish_non_exhaustive()
    }
}

#[async_trait]
impl Dispatcher for WebhookDispatcher {
    async fn dispatch(&self, message: &OtpMessage) -> Result<()> {
        let payload = WebhookPayload {
            identity: &message.identity,
            code: message.code.expose_secret(),
            purpose: message.purpose,
            shared_secret: self.shared_secret.expose_secret(),
        };

        let span = info_span!("otp.dispatch", http.url = %self.url, purpose = %message.purpose);
        let response = self
            .client
            .post(self.url.clone())
            .json(&payload)
            .send()
            .instrument(span)
            .await
            .context("dispatch webhook unreachable")?;

        let status = response.status();
        if !status.is_success() {
            return Err(anyhow!("dispatch webhook answered {status}"));
        }

        let receipt: WebhookReceipt = response
            .json()
            .await
            .context("dispatch webhook returned an invalid receipt")?;
        if receipt.delivered {
            Ok(())
        } else {
            Err(anyhow!("dispatch webhook reported the passcode as undelivered"))
        }
    }
}
