//! Outcome notifications
//!
//! SMS through the Twilio Messages API, or the log when SMS is disabled.

use async_trait::async_trait;
use reqwest::Client;
use serde::Deserialize;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, error, info, warn};

use crate::config::{NotifyConfig, TwilioConfig};
use crate::error::{NotificationError, PostSignalError, Result};
use crate::strategy::Notifier;

/// Twilio SMS notifier
#[derive(Clone)]
pub struct TwilioNotifier {
    client: Client,
    messages_url: String,
    account_sid: String,
    auth_token: String,
    from_number: String,
    to_number: String,
}

#[derive(Deserialize)]
struct MessageResponse {
    sid: Option<String>,
}

impl TwilioNotifier {
    pub fn new(config: &TwilioConfig, timeout: Duration) -> Result<Self> {
        if !config.is_configured() {
            return Err(PostSignalError::InvalidConfig(
                "Twilio credentials and phone numbers must all be set".to_string(),
            ));
        }

        let client = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| PostSignalError::Internal(format!("Failed to create HTTP client: {}", e)))?;

        Ok(Self {
            client,
            messages_url: format!(
                "{}/2010-04-01/Accounts/{}/Messages.json",
                config.base_url.trim_end_matches('/'),
                config.account_sid
            ),
            account_sid: config.account_sid.clone(),
            auth_token: config.auth_token.clone(),
            from_number: config.from_number.clone(),
            to_number: config.to_number.clone(),
        })
    }
}

#[async_trait]
impl Notifier for TwilioNotifier {
    async fn send(&self, message: &str) -> std::result::Result<(), NotificationError> {
        if message.is_empty() {
            return Err(NotificationError("empty message".to_string()));
        }

        let resp = self
            .client
            .post(&self.messages_url)
            .basic_auth(&self.account_sid, Some(&self.auth_token))
            .form(&[
                ("From", self.from_number.as_str()),
                ("To", self.to_number.as_str()),
                ("Body", message),
            ])
            .send()
            .await
            .map_err(|e| {
                error!("Twilio request failed: {}", e);
                NotificationError(e.to_string())
            })?;

        let status = resp.status();
        if !status.is_success() {
            let body = resp.text().await.unwrap_or_default();
            error!("Twilio SMS failed: {} - {}", status, body);
            return Err(NotificationError(format!("HTTP {}: {}", status, body)));
        }

        let sid = resp
            .json::<MessageResponse>()
            .await
            .ok()
            .and_then(|m| m.sid)
            .unwrap_or_default();
        info!(sid = %sid, to = %self.to_number, "SMS sent");
        Ok(())
    }
}

/// Writes outcome messages to the log
#[derive(Debug, Clone, Default)]
pub struct LogNotifier;

#[async_trait]
impl Notifier for LogNotifier {
    async fn send(&self, message: &str) -> std::result::Result<(), NotificationError> {
        info!(target: "postsignal::notify", "{}", message);
        Ok(())
    }
}

/// Notifier for the configured channel. SMS falls back to the log when the
/// Twilio client cannot be built.
pub fn build_notifier(config: &NotifyConfig) -> Arc<dyn Notifier> {
    if !config.sms_enabled {
        debug!("SMS disabled, outcomes go to the log");
        return Arc::new(LogNotifier);
    }

    match TwilioNotifier::new(&config.twilio, config.timeout()) {
        Ok(twilio) => {
            info!("SMS notifications enabled");
            Arc::new(twilio)
        }
        Err(e) => {
            warn!("SMS notifications disabled: {}", e);
            Arc::new(LogNotifier)
        }
    }
}
