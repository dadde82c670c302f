//! Webhook notification delivery.
//!
//! Sends alert text to a DingTalk-compatible webhook. Delivery is
//! fire-and-forget: failures are reported to the caller for logging and
//! never retried.

use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::config::Config;

/// Fixed send timeout, kept below the default poll interval so a hung
/// webhook cannot back cycles up behind it.
const SEND_TIMEOUT: Duration = Duration::from_secs(5);

/// Delivery error types.
#[derive(Error, Debug)]
pub enum DeliveryError {
    /// Transport-level failure: timeout, connection refused, DNS.
    #[error("transport error: {0}")]
    Transport(String),
    /// The endpoint answered with a non-200 status.
    #[error("webhook returned HTTP {0}")]
    Http(u16),
    /// HTTP 200, but the response body carried an application error.
    #[error("webhook rejected message (errcode {code}): {message}")]
    Rejected { code: i64, message: String },
}

/// Outcome of a notification attempt that did not error.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NotifyOutcome {
    /// Notifications disabled or no endpoint configured; nothing sent.
    Skipped,
    /// The endpoint accepted the message.
    Delivered,
}

#[derive(Serialize)]
struct TextMessage<'a> {
    msgtype: &'static str,
    text: TextContent<'a>,
}

#[derive(Serialize)]
struct TextContent<'a> {
    content: &'a str,
}

#[derive(Deserialize)]
struct WebhookResponse {
    #[serde(default)]
    errcode: i64,
    #[serde(default)]
    errmsg: String,
}

/// Sends alert messages to the configured webhook.
pub struct Notifier {
    client: reqwest::Client,
    endpoint: Option<String>,
    enabled: bool,
}

impl Notifier {
    pub fn new(endpoint: Option<String>, enabled: bool) -> Self {
        let client = reqwest::Client::builder()
            .timeout(SEND_TIMEOUT)
            .build()
            .expect("failed to create HTTP client");

        Self {
            client,
            endpoint,
            enabled,
        }
    }

    pub fn from_config(config: &Config) -> Self {
        Self::new(config.webhook_endpoint.clone(), config.notifications_enabled)
    }

    /// Send one text message to the webhook.
    ///
    /// Returns [`NotifyOutcome::Skipped`] without touching the network
    /// when notifications are off or no endpoint is set. Success means
    /// HTTP 200 with `errcode == 0` in the response body; everything
    /// else is a [`DeliveryError`].
    pub async fn notify(&self, message: &str) -> Result<NotifyOutcome, DeliveryError> {
        if !self.enabled {
            return Ok(NotifyOutcome::Skipped);
        }
        let Some(endpoint) = self.endpoint.as_deref().filter(|e| !e.is_empty()) else {
            tracing::warn!("webhook endpoint not configured, skipping notification");
            return Ok(NotifyOutcome::Skipped);
        };

        let payload = TextMessage {
            msgtype: "text",
            text: TextContent { content: message },
        };

        let response = self
            .client
            .post(endpoint)
            .json(&payload)
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    DeliveryError::Transport(format!("send timed out after {:?}", SEND_TIMEOUT))
                } else {
                    DeliveryError::Transport(e.to_string())
                }
            })?;

        let status = response.status();
        if status != reqwest::StatusCode::OK {
            return Err(DeliveryError::Http(status.as_u16()));
        }

        let body: WebhookResponse = response
            .json()
            .await
            .map_err(|e| DeliveryError::Transport(format!("invalid response body: {}", e)))?;

        if body.errcode != 0 {
            return Err(DeliveryError::Rejected {
                code: body.errcode,
                message: body.errmsg,
            });
        }

        tracing::debug!("webhook notification delivered");
        Ok(NotifyOutcome::Delivered)
    }
}
