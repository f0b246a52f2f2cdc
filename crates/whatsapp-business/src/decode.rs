//! Webhook decoder: raw Cloud API messages to [`InboundEvent`]s.
//!
//! Decoding is best-effort per message. A message whose body does not match
//! the shape of its kind is skipped; the envelope itself is validated by
//! [`WebhookPayload`] deserialization.

use std::collections::{BTreeMap, HashMap};

use {
    parley_channels::InboundEvent,
    parley_common::MessageKind,
    serde::{Deserialize, de::DeserializeOwned},
    serde_json::{Value, json},
    tracing::debug,
};

use crate::types::{WebhookChange, WebhookPayload};

/// Content stored for voice notes, which carry no caption.
pub const AUDIO_PLACEHOLDER: &str = "voice message";

/// Map the channel-reported `type` to a [`MessageKind`].
///
/// Unknown kinds fall back to [`MessageKind::Text`] so that new channel
/// message types are not dropped. Their content comes from whichever text-bearing
/// body they carry.
pub fn kind_from_channel(kind: &str) -> MessageKind {
    match kind {
        "text" => MessageKind::Text,
        "image" => MessageKind::Image,
        "video" => MessageKind::Video,
        "audio" | "voice" => MessageKind::Audio,
        "document" => MessageKind::Document,
        "location" => MessageKind::Location,
        "contacts" => MessageKind::ContactCard,
        "sticker" => MessageKind::Sticker,
        _ => MessageKind::Text,
    }
}

// ── Per-kind wire shapes ────────────────────────────────────────────────────

#[derive(Deserialize)]
struct MessageHeader {
    /// Kept optional: a missing sender is rejected by the gateway, not skipped here.
    #[serde(default)]
    from: Option<String>,
    id: String,
    #[serde(rename = "type", default)]
    kind: String,
}

#[derive(Deserialize)]
struct TextShape {
    text: TextBody,
}

#[derive(Deserialize)]
struct TextBody {
    body: String,
}

#[derive(Deserialize)]
struct MediaBody {
    id: String,
    #[serde(default)]
    caption: Option<String>,
    #[serde(default)]
    mime_type: Option<String>,
    #[serde(default)]
    sha256: Option<String>,
    #[serde(default)]
    filename: Option<String>,
}

#[derive(Deserialize)]
struct ImageShape {
    image: MediaBody,
}

#[derive(Deserialize)]
struct VideoShape {
    video: MediaBody,
}

/// Voice notes arrive under `voice` instead of `audio`.
#[derive(Deserialize)]
struct AudioShape {
    #[serde(alias = "voice")]
    audio: MediaBody,
}

#[derive(Deserialize)]
struct DocumentShape {
    document: MediaBody,
}

#[derive(Deserialize)]
struct StickerShape {
    sticker: MediaBody,
}

/// Bodies that can carry user-visible text for kinds without a dedicated shape.
#[derive(Deserialize, Default)]
struct FallbackShape {
    #[serde(default)]
    text: Option<FallbackText>,
    #[serde(default)]
    button: Option<ButtonBody>,
    #[serde(default)]
    interactive: Option<InteractiveBody>,
    #[serde(default)]
    reaction: Option<ReactionBody>,
}

#[derive(Deserialize)]
struct ReactionBody {
    #[serde(default)]
    emoji: Option<String>,
}

#[derive(Deserialize)]
struct FallbackText {
    #[serde(default)]
    body: Option<String>,
}

#[derive(Deserialize)]
struct ButtonBody {
    #[serde(default)]
    text: Option<String>,
    #[serde(default)]
    payload: Option<String>,
}

#[derive(Deserialize)]
struct InteractiveBody {
    #[serde(default)]
    button_reply: Option<ReplyBody>,
    #[serde(default)]
    list_reply: Option<ReplyBody>,
}

#[derive(Deserialize)]
struct ReplyBody {
    #[serde(default)]
    id: Option<String>,
    #[serde(default)]
    title: Option<String>,
}

/// Coordinates arrive as numbers, occasionally as numeric strings.
#[derive(Deserialize)]
#[serde(untagged)]
enum Coordinate {
    Number(f64),
    Text(String),
}

impl Coordinate {
    fn value(&self) -> Option<f64> {
        match self {
            Self::Number(n) => Some(*n),
            Self::Text(s) => s.trim().parse().ok(),
        }
    }
}

#[derive(Deserialize)]
struct LocationShape {
    location: LocationBody,
}

#[derive(Deserialize)]
struct LocationBody {
    latitude: Coordinate,
    longitude: Coordinate,
    #[serde(default)]
    name: Option<String>,
    #[serde(default)]
    address: Option<String>,
}

#[derive(Deserialize)]
struct ContactsShape {
    contacts: Vec<ContactCard>,
}

#[derive(Deserialize)]
struct ContactCard {
    name: ContactName,
    #[serde(default)]
    phones: Vec<ContactPhone>,
}

#[derive(Deserialize)]
struct ContactName {
    formatted_name: String,
}

#[derive(Deserialize)]
struct ContactPhone {
    #[serde(default)]
    phone: Option<String>,
}

/// Kind-specific part of an event.
struct Decoded {
    content: String,
    media_id: Option<String>,
    metadata: BTreeMap<String, Value>,
}

fn shape<T: DeserializeOwned>(raw: &Value) -> Option<T> {
    T::deserialize(raw).ok()
}

fn media(body: MediaBody, content: Option<String>) -> Option<Decoded> {
    if body.id.is_empty() {
        return None;
    }
    let mut metadata = BTreeMap::new();
    metadata.insert(
        "mime_type".into(),
        json!(body.mime_type.unwrap_or_default()),
    );
    metadata.insert("sha256".into(), json!(body.sha256.unwrap_or_default()));
    if let Some(filename) = body.filename {
        metadata.insert("filename".into(), json!(filename));
    }
    Some(Decoded {
        content: content.or(body.caption).unwrap_or_default(),
        media_id: Some(body.id),
        metadata,
    })
}

/// Content for an unknown kind: `text.body`, then `button.text`, then the
/// title of an interactive reply, then a reaction emoji. Empty when none is
/// present, so message validation rejects it instead of it being dropped here.
fn fallback_text(raw: &Value, channel_kind: &str) -> Decoded {
    let body: FallbackShape = shape(raw).unwrap_or_default();
    let mut metadata = BTreeMap::new();
    metadata.insert("channel_kind".into(), json!(channel_kind));

    let text = body.text.and_then(|t| t.body);
    let button = body.button.and_then(|b| {
        if let Some(payload) = b.payload {
            metadata.insert("button_payload".into(), json!(payload));
        }
        b.text
    });
    let reply = body
        .interactive
        .and_then(|i| i.button_reply.or(i.list_reply))
        .and_then(|r| {
            if let Some(id) = r.id {
                metadata.insert("reply_id".into(), json!(id));
            }
            r.title
        });

    Decoded {
        content: text
            .or(button)
            .or(reply)
            .or(body.reaction.and_then(|r| r.emoji))
            .unwrap_or_default(),
        media_id: None,
        metadata,
    }
}

fn location(body: LocationBody) -> Option<Decoded> {
    let latitude = body.latitude.value()?;
    let longitude = body.longitude.value()?;
    let name = body.name.filter(|s| !s.is_empty());
    let address = body.address.filter(|s| !s.is_empty());

    let label = match (&name, &address) {
        (Some(n), Some(a)) => format!("{n}, {a} "),
        (Some(v), None) | (None, Some(v)) => format!("{v} "),
        (None, None) => String::new(),
    };
    let content = format!("Shared location: {label}({latitude:.6}, {longitude:.6})");

    let mut metadata = BTreeMap::new();
    metadata.insert("latitude".into(), json!(latitude));
    metadata.insert("longitude".into(), json!(longitude));
    if let Some(n) = name {
        metadata.insert("name".into(), json!(n));
    }
    if let Some(a) = address {
        metadata.insert("address".into(), json!(a));
    }
    Some(Decoded {
        content,
        media_id: None,
        metadata,
    })
}

fn contact_card(mut cards: Vec<ContactCard>) -> Option<Decoded> {
    if cards.is_empty() {
        return None;
    }
    let card = cards.swap_remove(0);
    let phones: Vec<String> = card.phones.into_iter().filter_map(|p| p.phone).collect();
    let content = if phones.is_empty() {
        format!("Shared contact: {}", card.name.formatted_name)
    } else {
        format!(
            "Shared contact: {} ({})",
            card.name.formatted_name,
            phones.join(", ")
        )
    };

    let mut metadata = BTreeMap::new();
    metadata.insert("contact_name".into(), json!(card.name.formatted_name));
    metadata.insert("phones".into(), json!(phones));
    Some(Decoded {
        content,
        media_id: None,
        metadata,
    })
}

/// Decode a single raw message. `None` when the message matches no known shape.
pub fn decode_message(raw: &Value, sender_name: Option<String>) -> Option<InboundEvent> {
    let header: MessageHeader = shape(raw)?;
    let kind = kind_from_channel(&header.kind);

    let decoded = match kind {
        MessageKind::Text if header.kind == "text" => shape::<TextShape>(raw).map(|s| Decoded {
            content: s.text.body,
            media_id: None,
            metadata: BTreeMap::new(),
        }),
        MessageKind::Text => Some(fallback_text(raw, &header.kind)),
        MessageKind::Image => shape::<ImageShape>(raw).and_then(|s| media(s.image, None)),
        MessageKind::Video => shape::<VideoShape>(raw).and_then(|s| media(s.video, None)),
        MessageKind::Document => {
            shape::<DocumentShape>(raw).and_then(|s| media(s.document, None))
        },
        MessageKind::Sticker => shape::<StickerShape>(raw).and_then(|s| media(s.sticker, None)),
        MessageKind::Audio => shape::<AudioShape>(raw)
            .and_then(|s| media(s.audio, Some(AUDIO_PLACEHOLDER.to_string()))),
        MessageKind::Location => shape::<LocationShape>(raw).and_then(|s| location(s.location)),
        MessageKind::ContactCard => {
            shape::<ContactsShape>(raw).and_then(|s| contact_card(s.contacts))
        },
    };

    let Some(decoded) = decoded else {
        debug!(
            message_id = %header.id,
            channel_kind = %header.kind,
            "skipping message that matches no known shape"
        );
        return None;
    };

    Some(InboundEvent {
        phone_number: header.from.unwrap_or_default(),
        channel_message_id: header.id,
        kind,
        content: decoded.content,
        media_id: decoded.media_id,
        sender_name,
        metadata: decoded.metadata,
    })
}

fn change_events(change: &WebhookChange) -> impl Iterator<Item = InboundEvent> + '_ {
    let profiles: HashMap<&str, &str> = change
        .value
        .contacts
        .iter()
        .filter_map(|c| c.profile.as_ref().map(|p| (c.wa_id.as_str(), p.name.as_str())))
        .collect();

    change.value.messages.iter().filter_map(move |raw| {
        let sender = raw.get("from").and_then(Value::as_str).unwrap_or_default();
        let sender_name = profiles
            .get(sender)
            .filter(|n| !n.is_empty())
            .map(|n| n.to_string());
        decode_message(raw, sender_name)
    })
}

impl WebhookPayload {
    /// Lazily decode every message in the delivery, in delivery order.
    ///
    /// Non-`messages` changes (status callbacks, account updates) are ignored.
    pub fn events(&self) -> impl Iterator<Item = InboundEvent> + '_ {
        self.entry
            .iter()
            .flat_map(|entry| entry.changes.iter())
            .filter(|change| {
                let keep = change.field == "messages";
                if !keep {
                    debug!(field = %change.field, "ignoring non-message webhook change");
                }
                keep
            })
            .flat_map(change_events)
    }
}
