//! Channel capability contracts.
//!
//! A channel (WhatsApp Business today) implements [`ChannelClient`] for
//! outbound sends and media retrieval, and produces [`InboundEvent`]s from its
//! webhook decoder.

pub mod client;
pub mod event;

pub use {
    client::{
        ChannelClient, ChannelCredentials, MediaMetadata, OutboundMessage, SendReceipt,
    },
    event::InboundEvent,
};
