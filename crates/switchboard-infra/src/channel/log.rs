//! Sender that writes outbound messages to the log instead of a transport.

use switchboard_core::channel::OutboundSender;
use switchboard_types::error::ChannelError;
use switchboard_types::message::OutboundMessage;

#[derive(Debug, Clone, Copy, Default)]
pub struct LogSender;

impl OutboundSender for LogSender {
    async fn send(&self, message: &OutboundMessage) -> Result<(), ChannelError> {
        tracing::info!(
            contact_id = %message.contact_id,
            session_id = ?message.session_id,
            text = %message.text,
            "outbound message"
        );
        Ok(())
    }
}
