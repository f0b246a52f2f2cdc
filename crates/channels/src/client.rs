use {
    async_trait::async_trait,
    bytes::Bytes,
    parley_common::{ChannelType, Result},
    secrecy::Secret,
    serde::{Deserialize, Serialize},
    tokio_util::sync::CancellationToken,
};

/// Per-organization credentials for a channel integration.
#[derive(Debug, Clone)]
pub struct ChannelCredentials {
    pub access_token: Secret<String>,
    /// Sending identity on the channel (the business phone number id).
    pub phone_number_id: String,
}

/// Outbound payloads a channel can deliver.
#[derive(Debug, Clone, PartialEq)]
pub enum OutboundMessage {
    /// Pre-approved template, required to open a conversation window.
    Template {
        to: String,
        name: String,
        language: String,
    },
    Text {
        to: String,
        body: String,
        preview_url: bool,
    },
    /// Read receipt for an inbound message (also shows the typing indicator).
    MarkRead { message_id: String },
}

impl OutboundMessage {
    pub fn text(to: impl Into<String>, body: impl Into<String>) -> Self {
        Self::Text {
            to: to.into(),
            body: body.into(),
            preview_url: false,
        }
    }

    pub fn kind(&self) -> &'static str {
        match self {
            Self::Template { .. } => "template",
            Self::Text { .. } => "text",
            Self::MarkRead { .. } => "read",
        }
    }
}

/// What the channel returned for an accepted send.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SendReceipt {
    pub message_ids: Vec<String>,
}

/// Short-lived download descriptor for a channel media id.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MediaMetadata {
    pub id: String,
    /// Signed URL, valid for a few minutes.
    pub url: String,
    #[serde(default)]
    pub mime_type: String,
    #[serde(default)]
    pub sha256: String,
    #[serde(default)]
    pub file_size: Option<u64>,
}

/// Outbound capability of a messaging channel.
///
/// Every call honors `cancel`; implementations retry transient failures with
/// a bounded policy and report non-success responses as
/// [`parley_common::Error::Upstream`].
#[async_trait]
pub trait ChannelClient: Send + Sync {
    fn channel_type(&self) -> ChannelType;

    async fn send(
        &self,
        credentials: &ChannelCredentials,
        message: &OutboundMessage,
        cancel: &CancellationToken,
    ) -> Result<SendReceipt>;

    /// First media hop: resolve a media id to a signed URL and metadata.
    async fn fetch_media_metadata(
        &self,
        credentials: &ChannelCredentials,
        media_id: &str,
        cancel: &CancellationToken,
    ) -> Result<MediaMetadata>;

    /// Second media hop: fetch the bytes behind a signed URL.
    async fn download_media(
        &self,
        credentials: &ChannelCredentials,
        metadata: &MediaMetadata,
        cancel: &CancellationToken,
    ) -> Result<Bytes>;
}
