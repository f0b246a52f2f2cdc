//! Validates a message event, resolves its conversation and persists it.

use std::sync::Arc;

use {
    parley_common::{ChannelType, Error, MessageKind, Result, now_ms},
    serde::Deserialize,
    tracing::debug,
};

use crate::{
    model::{
        Conversation, DeliveryStatus, Direction, IdentityTuple, LastMessage, Message, SenderType,
        new_id,
    },
    resolver::ConversationResolver,
    store::MessageStore,
};

/// Input of [`MessageNormalizer::create_message`].
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct CreateMessage {
    pub organization_id: String,
    /// Target conversation. When absent it is resolved from
    /// (`organization_id`, `user_id`, `contact_id`, `channel`).
    pub conversation_id: Option<String>,
    /// Assigned responder of the conversation.
    pub user_id: Option<String>,
    pub contact_id: Option<String>,
    pub channel: Option<ChannelType>,
    pub sender_type: SenderType,
    pub sender_id: Option<String>,
    pub sender_name: Option<String>,
    pub direction: Direction,
    pub kind: Option<MessageKind>,
    pub content: String,
    pub media_reference: Option<String>,
    pub channel_message_id: Option<String>,
    pub status: Option<DeliveryStatus>,
    pub ai_generated: bool,
    pub ai_confidence: Option<f64>,
}

pub struct MessageNormalizer {
    resolver: Arc<ConversationResolver>,
    messages: Arc<dyn MessageStore>,
}

impl MessageNormalizer {
    pub fn new(resolver: Arc<ConversationResolver>, messages: Arc<dyn MessageStore>) -> Self {
        Self { resolver, messages }
    }

    pub fn resolver(&self) -> &Arc<ConversationResolver> {
        &self.resolver
    }

    /// Persist one message.
    ///
    /// Every validation runs before the first write. The last-message
    /// snapshot is best-effort and never fails the call.
    pub async fn create_message(&self, input: CreateMessage) -> Result<Message> {
        let kind = validate(&input)?;
        let conversation = self.conversation_for(&input).await?;

        let now = now_ms();
        let message = Message {
            id: new_id(),
            organization_id: input.organization_id,
            conversation_id: conversation.id,
            sender_type: input.sender_type,
            sender_id: input.sender_id,
            direction: input.direction,
            kind,
            content: input.content,
            media_reference: input.media_reference.filter(|r| !r.trim().is_empty()),
            attachments: Vec::new(),
            ai_generated: input.ai_generated,
            ai_confidence: input.ai_confidence,
            status: input.status.unwrap_or_default(),
            failure_reason: None,
            channel_message_id: input.channel_message_id,
            created_at: now,
            updated_at: now,
        };
        self.messages.create_message(&message).await?;
        debug!(
            message_id = %message.id,
            conversation_id = %message.conversation_id,
            kind = %message.kind,
            "message persisted"
        );

        let snapshot = LastMessage {
            sender_id: message.sender_id.clone(),
            sender_type: message.sender_type,
            sender_name: input.sender_name,
            content: message.content.clone(),
            kind: message.kind,
            media_reference: message.media_reference.clone(),
            at: message.created_at,
        };
        let _ = self
            .resolver
            .record_last_message(&message.conversation_id, &snapshot)
            .await;

        Ok(message)
    }

    async fn conversation_for(&self, input: &CreateMessage) -> Result<Conversation> {
        if let Some(id) = input.conversation_id.as_deref() {
            let conversation = self
                .resolver
                .store()
                .find_conversation(id)
                .await?
                .ok_or_else(|| Error::not_found("conversation", id))?;
            if conversation.organization_id != input.organization_id {
                return Err(Error::forbidden(format!(
                    "conversation {id} belongs to another organization"
                )));
            }
            return Ok(conversation);
        }

        let user_id = required(input.user_id.as_deref(), "user_id")?;
        let contact_id = required(input.contact_id.as_deref(), "contact_id")?;
        let tuple = IdentityTuple::new(
            input.organization_id.as_str(),
            user_id,
            contact_id,
            input.channel.unwrap_or_default(),
        );
        self.resolver.resolve(&tuple).await
    }
}

fn required<'a>(value: Option<&'a str>, field: &str) -> Result<&'a str> {
    value
        .filter(|v| !v.trim().is_empty())
        .ok_or_else(|| Error::validation(format!("{field} is required")))
}

/// Field rules per kind. Location and contact cards are not stored.
fn validate(input: &CreateMessage) -> Result<MessageKind> {
    if input.organization_id.trim().is_empty() {
        return Err(Error::validation("organization_id is required"));
    }
    let kind = input
        .kind
        .ok_or_else(|| Error::validation("message kind is required"))?;
    match kind {
        MessageKind::Text if input.content.trim().is_empty() => {
            Err(Error::validation("text message content is required"))
        },
        MessageKind::Text => Ok(kind),
        k if k.is_media() => {
            required(input.media_reference.as_deref(), "media_reference")?;
            Ok(kind)
        },
        other => Err(Error::validation(format!(
            "unsupported message kind: {other}"
        ))),
    }
}
