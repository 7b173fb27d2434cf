//! Twilio WhatsApp transport.

use crate::{DeliveryError, DeliveryId, Messenger};
use async_trait::async_trait;
use std::time::Duration;

/// Twilio sandbox sender, usable without a provisioned WhatsApp number.
const SANDBOX_FROM: &str = "whatsapp:+14155238886";
const REQUEST_TIMEOUT: Duration = Duration::from_secs(15);

pub struct TwilioWhatsApp {
    http: reqwest::Client,
    account_sid: String,
    auth_token: String,
    from: String,
}

impl TwilioWhatsApp {
    pub fn new(account_sid: String, auth_token: String, from: Option<String>) -> Self {
        let http = reqwest::Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .build()
            .expect("reqwest client");
        Self {
            http,
            account_sid,
            auth_token,
            from: from.unwrap_or_else(|| SANDBOX_FROM.to_string()),
        }
    }

    /// Build from `TWILIO_ACCOUNT_SID` / `TWILIO_AUTH_TOKEN` /
    /// `TWILIO_FROM_WHATSAPP`. Missing credentials yield
    /// [`DeliveryError::NotConfigured`] so the daemon can fall back to a
    /// log-only messenger.
    pub fn from_env() -> Result<Self, DeliveryError> {
        let account_sid =
            std::env::var("TWILIO_ACCOUNT_SID").map_err(|_| DeliveryError::NotConfigured)?;
        let auth_token =
            std::env::var("TWILIO_AUTH_TOKEN").map_err(|_| DeliveryError::NotConfigured)?;
        let from = std::env::var("TWILIO_FROM_WHATSAPP").ok();
        Ok(Self::new(account_sid, auth_token, from))
    }
}

#[async_trait]
impl Messenger for TwilioWhatsApp {
    async fn send(&self, recipient: &str, body: &str) -> Result<DeliveryId, DeliveryError> {
        let url = format!(
            "https://api.twilio.com/2010-04-01/Accounts/{}/Messages.json",
            self.account_sid
        );

        let response = self
            .http
            .post(&url)
            .basic_auth(&self.account_sid, Some(&self.auth_token))
            .form(&[
                ("From", self.from.as_str()),
                ("To", recipient),
                ("Body", body),
            ])
            .send()
            .await
            .map_err(|e| DeliveryError::Transport(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            let message = response.text().await.unwrap_or_default();
            return Err(DeliveryError::Rejected {
                status: status.as_u16(),
                message,
            });
        }

        let payload: serde_json::Value = response
            .json()
            .await
            .map_err(|e| DeliveryError::Transport(e.to_string()))?;
        let sid = payload["sid"].as_str().unwrap_or_default().to_string();
        Ok(DeliveryId(sid))
    }
}
