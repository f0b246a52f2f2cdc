//! Canonical records: contacts, conversations, messages and attachments.

use {
    parley_common::{ChannelType, MessageKind, now_ms},
    serde::{Deserialize, Serialize},
};

/// Lowercase string enums stored as TEXT columns.
macro_rules! text_enum {
    (
        $(#[$meta:meta])*
        $name:ident { $($variant:ident => $text:literal),+ $(,)? } default $default:ident
    ) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
        #[serde(rename_all = "lowercase")]
        pub enum $name {
            $($variant,)+
        }

        impl Default for $name {
            fn default() -> Self {
                Self::$default
            }
        }

        impl $name {
            pub fn as_str(&self) -> &'static str {
                match self {
                    $(Self::$variant => $text,)+
                }
            }
        }

        impl std::fmt::Display for $name {
            fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
                f.write_str(self.as_str())
            }
        }

        impl std::str::FromStr for $name {
            type Err = parley_common::Error;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                match s {
                    $($text => Ok(Self::$variant),)+
                    other => Err(parley_common::Error::validation(format!(
                        concat!("unknown ", stringify!($name), ": {}"),
                        other
                    ))),
                }
            }
        }
    };
}

text_enum! {
    ConversationStatus { Open => "open", Pending => "pending", Resolved => "resolved", Closed => "closed" }
    default Open
}

text_enum! {
    Priority { Low => "low", Medium => "medium", High => "high", Urgent => "urgent" }
    default Low
}

text_enum! {
    /// Role of a message's author.
    SenderType { Customer => "customer", Agent => "agent", Ai => "ai", System => "system" }
    default Customer
}

text_enum! {
    Direction { Inbound => "inbound", Outbound => "outbound" }
    default Inbound
}

text_enum! {
    DeliveryStatus {
        Pending => "pending",
        Sent => "sent",
        Delivered => "delivered",
        Read => "read",
        Failed => "failed",
    }
    default Pending
}

text_enum! {
    AttachmentKind { Image => "image", Video => "video", Audio => "audio", Document => "document" }
    default Document
}

impl AttachmentKind {
    /// Attachment type for a media message kind. Stickers are images.
    pub fn for_message_kind(kind: MessageKind) -> Option<Self> {
        match kind {
            MessageKind::Image | MessageKind::Sticker => Some(Self::Image),
            MessageKind::Video => Some(Self::Video),
            MessageKind::Audio => Some(Self::Audio),
            MessageKind::Document => Some(Self::Document),
            MessageKind::Text | MessageKind::Location | MessageKind::ContactCard => None,
        }
    }
}

/// Key of the single active conversation.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct IdentityTuple {
    pub organization_id: String,
    /// Assigned responder (bot or agent user).
    pub user_id: String,
    pub contact_id: String,
    pub channel: ChannelType,
}

impl IdentityTuple {
    pub fn new(
        organization_id: impl Into<String>,
        user_id: impl Into<String>,
        contact_id: impl Into<String>,
        channel: ChannelType,
    ) -> Self {
        Self {
            organization_id: organization_id.into(),
            user_id: user_id.into(),
            contact_id: contact_id.into(),
            channel,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Contact {
    pub id: String,
    pub organization_id: String,
    pub phone_number: String,
    pub name: Option<String>,
    pub created_at: i64,
}

impl Contact {
    pub fn new(
        organization_id: impl Into<String>,
        phone_number: impl Into<String>,
        name: Option<String>,
    ) -> Self {
        Self {
            id: new_id(),
            organization_id: organization_id.into(),
            phone_number: phone_number.into(),
            name,
            created_at: now_ms(),
        }
    }
}

/// Snapshot of the newest message, denormalized onto the conversation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LastMessage {
    pub sender_id: Option<String>,
    pub sender_type: SenderType,
    pub sender_name: Option<String>,
    pub content: String,
    pub kind: MessageKind,
    pub media_reference: Option<String>,
    pub at: i64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Conversation {
    pub id: String,
    pub organization_id: String,
    pub user_id: String,
    pub contact_id: String,
    pub channel: ChannelType,
    pub status: ConversationStatus,
    pub priority: Priority,
    pub ai_enabled: bool,
    /// Opaque per-conversation automation settings.
    pub ai_config: serde_json::Value,
    pub last_message: Option<LastMessage>,
    pub active: bool,
    pub archived: bool,
    pub deleted: bool,
    pub created_at: i64,
    pub updated_at: i64,
}

impl Conversation {
    /// A fresh active conversation with default status and priority.
    pub fn open(tuple: &IdentityTuple) -> Self {
        let now = now_ms();
        Self {
            id: new_id(),
            organization_id: tuple.organization_id.clone(),
            user_id: tuple.user_id.clone(),
            contact_id: tuple.contact_id.clone(),
            channel: tuple.channel,
            status: ConversationStatus::default(),
            priority: Priority::default(),
            ai_enabled: true,
            ai_config: serde_json::Value::Object(Default::default()),
            last_message: None,
            active: true,
            archived: false,
            deleted: false,
            created_at: now,
            updated_at: now,
        }
    }

    pub fn identity(&self) -> IdentityTuple {
        IdentityTuple::new(
            self.organization_id.clone(),
            self.user_id.clone(),
            self.contact_id.clone(),
            self.channel,
        )
    }
}

/// Uploaded media object linked to a message.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Attachment {
    pub id: String,
    #[serde(rename = "type")]
    pub kind: AttachmentKind,
    pub url: String,
    pub filename: String,
    pub size: u64,
    pub mime_type: String,
}

impl Attachment {
    pub fn new(
        kind: AttachmentKind,
        url: impl Into<String>,
        filename: impl Into<String>,
        size: u64,
        mime_type: impl Into<String>,
    ) -> Self {
        Self {
            id: new_id(),
            kind,
            url: url.into(),
            filename: filename.into(),
            size,
            mime_type: mime_type.into(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Message {
    pub id: String,
    pub organization_id: String,
    pub conversation_id: String,
    pub sender_type: SenderType,
    pub sender_id: Option<String>,
    pub direction: Direction,
    pub kind: MessageKind,
    pub content: String,
    /// Channel media id at first, public blob URL once enriched.
    pub media_reference: Option<String>,
    pub attachments: Vec<Attachment>,
    pub ai_generated: bool,
    pub ai_confidence: Option<f64>,
    pub status: DeliveryStatus,
    pub failure_reason: Option<String>,
    pub channel_message_id: Option<String>,
    pub created_at: i64,
    pub updated_at: i64,
}

pub(crate) fn new_id() -> String {
    uuid::Uuid::new_v4().to_string()
}
