//! WhatsApp Business Cloud API channel.
//!
//! Decodes inbound webhook deliveries into [`parley_channels::InboundEvent`]s,
//! verifies webhook signatures and subscriptions, and implements
//! [`parley_channels::ChannelClient`] against the Graph API.

pub mod client;
pub mod decode;
pub mod envelope;
pub mod types;
pub mod webhook;

pub use {
    client::GraphApiClient,
    decode::{AUDIO_PLACEHOLDER, kind_from_channel},
    types::{WEBHOOK_OBJECT, WebhookPayload},
    webhook::{SIGNATURE_HEADER, verify_signature, verify_webhook_subscription},
};
