//! Outgoing message delivery.
//!
//! [`Messenger`] is the host chat client seen from the relay: a way to send
//! text to an opaque delivery target. [`WebhookMessenger`] implements it for
//! webhook URLs.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::{Client, StatusCode};
use serde::Serialize;
use thiserror::Error;

use crate::config::DeliveryConfig;
use crate::{RelayError, Result};

/// User agent string for outgoing deliveries.
const USER_AGENT: &str = "feed-relay/0.1 (delivery)";

/// Failure of a single send.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum DeliveryError {
    /// The target refused the message.
    #[error("permission denied: {0}")]
    PermissionDenied(String),

    /// The target does not exist.
    #[error("target missing: {0}")]
    TargetMissing(String),

    /// Network or server failure.
    #[error("transport error: {0}")]
    Transport(String),
}

/// Capability to send text to a delivery target.
#[async_trait]
pub trait Messenger: Send + Sync {
    /// Send `text` to `target`.
    async fn send(&self, target: &str, text: &str) -> std::result::Result<(), DeliveryError>;

    /// Check that `target` can currently receive messages.
    async fn probe(&self, _target: &str) -> std::result::Result<(), DeliveryError> {
        Ok(())
    }
}

#[derive(Serialize)]
struct WebhookMessage<'a> {
    content: &'a str,
}

/// Messenger posting to webhook URLs.
///
/// The target of every subscription is the webhook URL itself.
pub struct WebhookMessenger {
    client: Client,
}

impl WebhookMessenger {
    /// Create a messenger with the given timeouts.
    pub fn new(config: &DeliveryConfig) -> Result<Self> {
        let client = Client::builder()
            .connect_timeout(Duration::from_secs(config.connect_timeout_secs))
            .timeout(Duration::from_secs(config.total_timeout_secs))
            .user_agent(USER_AGENT)
            .build()
            .map_err(|e| RelayError::Http(format!("failed to create HTTP client: {}", e)))?;

        Ok(Self { client })
    }
}

#[async_trait]
impl Messenger for WebhookMessenger {
    async fn send(&self, target: &str, text: &str) -> std::result::Result<(), DeliveryError> {
        let response = self
            .client
            .post(target)
            .json(&WebhookMessage { content: text })
            .send()
            .await
            .map_err(|e| DeliveryError::Transport(e.to_string()))?;

        classify_status(response.status())
    }

    async fn probe(&self, target: &str) -> std::result::Result<(), DeliveryError> {
        let response = self
            .client
            .get(target)
            .send()
            .await
            .map_err(|e| DeliveryError::Transport(e.to_string()))?;

        classify_status(response.status())
    }
}

/// Map an HTTP status to a delivery result.
fn classify_status(status: StatusCode) -> std::result::Result<(), DeliveryError> {
    if status.is_success() {
        return Ok(());
    }
    match status {
        StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => {
            Err(DeliveryError::PermissionDenied(status.to_string()))
        }
        StatusCode::NOT_FOUND | StatusCode::GONE => {
            Err(DeliveryError::TargetMissing(status.to_string()))
        }
        _ => Err(DeliveryError::Transport(format!("HTTP error: {}", status))),
    }
}
