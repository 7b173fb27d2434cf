//! reunite-alert — outbound notifications for case matches.
//!
//! The dispatcher owns a queue and its own worker; the scan path hands
//! over ranked results and returns immediately. Delivery failures are
//! logged per candidate and never reach the scan response.

pub mod dispatcher;
pub mod message;
pub mod twilio;

pub use dispatcher::{AlertDispatcher, AlertPolicy};
pub use twilio::TwilioWhatsApp;

use async_trait::async_trait;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum DeliveryError {
    #[error("transport error: {0}")]
    Transport(String),
    #[error("provider rejected message ({status}): {message}")]
    Rejected { status: u16, message: String },
    #[error("messaging credentials not configured")]
    NotConfigured,
}

/// Provider-assigned id of an accepted message.
#[derive(Debug, Clone)]
pub struct DeliveryId(pub String);

/// The opaque messaging-transport seam.
#[async_trait]
pub trait Messenger: Send + Sync {
    async fn send(&self, recipient: &str, body: &str) -> Result<DeliveryId, DeliveryError>;
}

/// Messenger for development and tests: logs instead of sending.
pub struct LogMessenger;

#[async_trait]
impl Messenger for LogMessenger {
    async fn send(&self, recipient: &str, body: &str) -> Result<DeliveryId, DeliveryError> {
        tracing::info!(recipient, chars = body.len(), "log-only messenger: delivery skipped");
        Ok(DeliveryId("logged".to_string()))
    }
}
