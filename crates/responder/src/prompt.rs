//! Prompt assets and assembly.

use std::path::Path;

use {
    parley_common::{Error, MessageKind, Result},
    serde::Serialize,
    tracing::debug,
};

/// Used when no persona file is configured.
pub const DEFAULT_PERSONA: &str = "You are a friendly customer support assistant for a small \
business. Answer briefly and in the customer's language. If you do not know the answer, say so \
and offer to connect the customer with a human agent.";

/// Appended to every system prompt.
pub const MEDIA_GUIDANCE: &str = "When the customer shares an image, video, audio note, \
document or sticker you cannot see its contents. Acknowledge what was shared, do not invent \
details about it, and ask a short follow-up question if you need more information.";

/// Persona instructions and knowledge corpus, loaded once at startup.
#[derive(Debug, Clone, Default)]
pub struct PromptAssets {
    persona: String,
    knowledge: String,
}

impl PromptAssets {
    pub fn new(persona: impl Into<String>, knowledge: impl Into<String>) -> Self {
        Self {
            persona: persona.into(),
            knowledge: knowledge.into(),
        }
    }

    /// Read the persona and knowledge files. Missing paths fall back to the
    /// default persona and an empty corpus.
    pub async fn load(persona_path: Option<&Path>, knowledge_path: Option<&Path>) -> Result<Self> {
        let persona = match persona_path {
            Some(path) => read(path).await?,
            None => DEFAULT_PERSONA.to_string(),
        };
        let knowledge = match knowledge_path {
            Some(path) => read(path).await?,
            None => String::new(),
        };
        debug!(
            persona_len = persona.len(),
            knowledge_len = knowledge.len(),
            "loaded prompt assets"
        );
        Ok(Self::new(persona, knowledge))
    }

    pub fn system_prompt(&self) -> String {
        let persona = match self.persona.trim() {
            "" => DEFAULT_PERSONA,
            persona => persona,
        };
        let mut prompt = persona.to_string();
        let knowledge = self.knowledge.trim();
        if !knowledge.is_empty() {
            prompt.push_str("\n\n## Knowledge base\n\n");
            prompt.push_str(knowledge);
        }
        prompt.push_str("\n\n## Media\n\n");
        prompt.push_str(MEDIA_GUIDANCE);
        prompt
    }
}

async fn read(path: &Path) -> Result<String> {
    tokio::fs::read_to_string(path)
        .await
        .map_err(|e| Error::external(format!("reading prompt asset {}", path.display()), e))
}

/// Media the customer shared alongside (or instead of) text.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MediaContext<'a> {
    pub kind: MessageKind,
    /// Public URL of the re-uploaded media, when available.
    pub reference: Option<&'a str>,
}

/// Descriptive sentence for a media event.
pub fn media_prefix(media: &MediaContext<'_>) -> String {
    let what = match media.kind {
        MessageKind::Image => "an image",
        MessageKind::Video => "a video",
        MessageKind::Audio => "a voice message",
        MessageKind::Document => "a document",
        MessageKind::Sticker => "a sticker",
        MessageKind::Location => "a location",
        MessageKind::ContactCard => "a contact card",
        MessageKind::Text => "a message",
    };
    match media.reference.filter(|r| !r.is_empty()) {
        Some(url) => format!("[The user shared {what}: {url}]"),
        None => format!("[The user shared {what}]"),
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ChatMessage {
    pub role: &'static str,
    pub content: String,
}

impl ChatMessage {
    pub fn system(content: impl Into<String>) -> Self {
        Self {
            role: "system",
            content: content.into(),
        }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: "user",
            content: content.into(),
        }
    }
}

/// System prompt plus a single user turn. No history is carried.
pub fn build_messages(
    assets: &PromptAssets,
    content: &str,
    media: Option<&MediaContext<'_>>,
) -> Vec<ChatMessage> {
    let user = match media {
        Some(media) if content.trim().is_empty() => media_prefix(media),
        Some(media) => format!("{}\n\n{}", media_prefix(media), content.trim()),
        None => content.trim().to_string(),
    };
    vec![ChatMessage::system(assets.system_prompt()), ChatMessage::user(user)]
}
