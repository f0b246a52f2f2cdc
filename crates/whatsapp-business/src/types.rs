//! Webhook envelope as delivered by the Cloud API.
//!
//! `entry` is required and every array must be well-formed; individual
//! messages stay as raw JSON so one odd message cannot fail the delivery.

use serde::Deserialize;

/// The `object` value of WhatsApp Business webhook deliveries.
pub const WEBHOOK_OBJECT: &str = "whatsapp_business_account";

/// Top-level webhook delivery.
#[derive(Debug, Clone, Deserialize)]
pub struct WebhookPayload {
    #[serde(default)]
    pub object: String,
    pub entry: Vec<WebhookEntry>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct WebhookEntry {
    /// WhatsApp Business Account id.
    #[serde(default)]
    pub id: String,
    #[serde(default)]
    pub changes: Vec<WebhookChange>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct WebhookChange {
    #[serde(default)]
    pub field: String,
    #[serde(default)]
    pub value: ChangeValue,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct ChangeValue {
    #[serde(default)]
    pub messaging_product: Option<String>,
    #[serde(default)]
    pub metadata: Option<ChangeMetadata>,
    #[serde(default)]
    pub contacts: Vec<ProfileContact>,
    /// Raw messages, decoded one by one.
    #[serde(default)]
    pub messages: Vec<serde_json::Value>,
    /// Delivery status callbacks. Ignored.
    #[serde(default)]
    pub statuses: Vec<serde_json::Value>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ChangeMetadata {
    #[serde(default)]
    pub display_phone_number: String,
    #[serde(default)]
    pub phone_number_id: String,
}

/// Sender profile attached to a change.
#[derive(Debug, Clone, Deserialize)]
pub struct ProfileContact {
    #[serde(default)]
    pub wa_id: String,
    pub profile: Option<Profile>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct Profile {
    #[serde(default)]
    pub name: String,
}

impl WebhookPayload {
    /// Parse a raw delivery body.
    pub fn from_slice(body: &[u8]) -> parley_common::Result<Self> {
        serde_json::from_slice(body)
            .map_err(|e| parley_common::Error::validation(format!("malformed webhook: {e}")))
    }

    pub fn from_value(value: serde_json::Value) -> parley_common::Result<Self> {
        serde_json::from_value(value)
            .map_err(|e| parley_common::Error::validation(format!("malformed webhook: {e}")))
    }

    pub fn is_whatsapp_business(&self) -> bool {
        self.object == WEBHOOK_OBJECT
    }

    /// Total raw messages across all `messages` changes.
    pub fn message_count(&self) -> usize {
        self.entry
            .iter()
            .flat_map(|e| &e.changes)
            .filter(|c| c.field == "messages")
            .map(|c| c.value.messages.len())
            .sum()
    }
}

#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    #[test]
    fn missing_entry_fails_whole_decode() {
        let err = WebhookPayload::from_value(json!({ "object": WEBHOOK_OBJECT })).unwrap_err();
        assert_eq!(err.status_code(), 400);
        assert!(err.to_string().contains("entry"));
    }

    #[test]
    fn malformed_array_fails_whole_decode() {
        let body = json!({ "object": WEBHOOK_OBJECT, "entry": [{ "changes": {"not": "an array"} }] });
        assert!(WebhookPayload::from_value(body).is_err());
    }

    #[test]
    fn status_only_delivery_has_no_messages() {
        let body = json!({
            "object": WEBHOOK_OBJECT,
            "entry": [{ "id": "waba", "changes": [{
                "field": "messages",
                "value": { "statuses": [{ "id": "wamid.1", "status": "delivered" }] }
            }]}]
        });
        let payload = WebhookPayload::from_value(body).unwrap();
        assert!(payload.is_whatsapp_business());
        assert_eq!(payload.message_count(), 0);
    }
}
