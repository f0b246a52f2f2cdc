use std::collections::BTreeMap;

use {
    parley_common::MessageKind,
    serde::{Deserialize, Serialize},
};

/// A decoded inbound message, independent of the channel's wire format.
///
/// Transient: produced by a channel decoder and consumed by the gateway.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InboundEvent {
    /// Sender address on the channel. Empty when the channel omitted it.
    pub phone_number: String,
    pub channel_message_id: String,
    pub kind: MessageKind,
    /// Text body, caption, or a synthesized description.
    pub content: String,
    /// Channel-local media id for media kinds.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub media_id: Option<String>,
    /// Profile name the channel reported for the sender.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub sender_name: Option<String>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub metadata: BTreeMap<String, serde_json::Value>,
}

impl InboundEvent {
    pub fn metadata_str(&self, key: &str) -> Option<&str> {
        self.metadata.get(key).and_then(|v| v.as_str())
    }
}
