//! Outbound channel port.
//!
//! The core never talks to WhatsApp, SMS or email directly. It hands an
//! [`OutboundMessage`] to an [`OutboundSender`], which the infrastructure
//! layer implements per transport.

use std::sync::{Arc, Mutex};

use switchboard_types::error::ChannelError;
use switchboard_types::message::OutboundMessage;

/// Delivers messages to contacts.
pub trait OutboundSender: Send + Sync {
    fn send(
        &self,
        message: &OutboundMessage,
    ) -> impl std::future::Future<Output = Result<(), ChannelError>> + Send;
}

/// Sender that keeps every message in memory.
///
/// Used by tests and by dry runs that want to inspect what would be sent.
#[derive(Debug, Clone, Default)]
pub struct RecordingSender {
    sent: Arc<Mutex<Vec<OutboundMessage>>>,
}

impl RecordingSender {
    pub fn new() -> Self {
        Self::default()
    }

    /// Snapshot of everything sent so far.
    pub fn sent(&self) -> Vec<OutboundMessage> {
        self.sent.lock().map(|v| v.clone()).unwrap_or_default()
    }

    /// Texts sent to one contact, in order.
    pub fn texts_for(&self, contact_id: &str) -> Vec<String> {
        self.sent()
            .into_iter()
            .filter(|m| m.contact_id == contact_id)
            .map(|m| m.text)
            .collect()
    }
}

impl OutboundSender for RecordingSender {
    async fn send(&self, message: &OutboundMessage) -> Result<(), ChannelError> {
        self.sent
            .lock()
            .map_err(|_| ChannelError::Delivery("recording sender poisoned".to_string()))?
            .push(message.clone());
        Ok(())
    }
}
