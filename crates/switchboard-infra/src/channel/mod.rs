//! Outbound channel senders.
//!
//! [`ChannelSender`] picks the transport from [`ChannelConfig`]: an HTTP
//! POST to the adapter when `outbound_url` is set, otherwise a sender that
//! only logs.

pub mod http;
pub mod log;

use secrecy::SecretString;
use switchboard_core::channel::OutboundSender;
use switchboard_types::config::ChannelConfig;
use switchboard_types::error::ChannelError;
use switchboard_types::message::OutboundMessage;

pub use http::HttpChannelSender;
pub use log::LogSender;

pub enum ChannelSender {
    Http(HttpChannelSender),
    Log(LogSender),
}

impl ChannelSender {
    pub fn from_config(config: &ChannelConfig) -> Result<Self, ChannelError> {
        match config.outbound_url.as_deref().filter(|u| !u.trim().is_empty()) {
            Some(url) => {
                let token = config
                    .outbound_token
                    .as_ref()
                    .map(|t| SecretString::from(t.clone()));
                tracing::info!(url, authenticated = token.is_some(), "outbound channel: http");
                Ok(Self::Http(HttpChannelSender::new(url, token)?))
            }
            None => {
                tracing::info!("outbound channel: log only");
                Ok(Self::Log(LogSender))
            }
        }
    }

    pub fn transport(&self) -> &'static str {
        match self {
            Self::Http(_) => "http",
            Self::Log(_) => "log",
        }
    }
}

impl OutboundSender for ChannelSender {
    async fn send(&self, message: &OutboundMessage) -> Result<(), ChannelError> {
        match self {
            Self::Http(sender) => sender.send(message).await,
            Self::Log(sender) => sender.send(message).await,
        }
    }
}
