//! Channel message contracts.
//!
//! Inbound messages are consumed from a channel adapter; outbound messages
//! are produced for one. Both use camelCase on the wire.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Tenant used when an adapter does not send one.
pub const DEFAULT_TENANT: &str = "default";

/// A message received from a contact.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InboundMessage {
    pub contact_id: String,
    pub channel: String,
    pub raw_text: String,
    pub received_at: DateTime<Utc>,
    /// Provider message id, used for redelivery detection when present.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message_id: Option<String>,
    /// Flow requested by the adapter for a new session.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub flow_id: Option<String>,
    #[serde(default = "default_tenant")]
    pub tenant_id: String,
}

fn default_tenant() -> String {
    DEFAULT_TENANT.to_string()
}

impl InboundMessage {
    pub fn new(contact_id: &str, channel: &str, raw_text: &str, received_at: DateTime<Utc>) -> Self {
        Self {
            contact_id: contact_id.to_string(),
            channel: channel.to_string(),
            raw_text: raw_text.to_string(),
            received_at,
            message_id: None,
            flow_id: None,
            tenant_id: default_tenant(),
        }
    }
}

/// A message to deliver to a contact.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OutboundMessage {
    pub contact_id: String,
    pub text: String,
    /// Absent for ticket-level notices sent after the session ended.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub session_id: Option<Uuid>,
}
