//! Webhook orchestration: contacts, conversations, messages, media and replies.

use std::sync::Arc;

use {
    parley_channels::{ChannelClient, InboundEvent, OutboundMessage},
    parley_common::{ChannelType, Error, MessageKind, Result},
    parley_conversations::{
        Contact, ContactStore, ConversationResolver, ConversationStore, CreateMessage, Direction,
        LastMessage, Message, MessageNormalizer, MessageStore, SenderType,
    },
    parley_media::{InlineFile, MediaPipeline, MediaRequest, UploadResult},
    parley_responder::{AiResponder, MediaContext},
    parley_whatsapp_business::WebhookPayload,
    serde::Serialize,
    tokio_util::sync::CancellationToken,
    tracing::{debug, info, instrument, warn},
};

use crate::directory::{Integration, Organization, OrganizationDirectory};

/// Collaborators wired into a [`ChannelGateway`].
pub struct GatewayServices {
    pub directory: Arc<dyn OrganizationDirectory>,
    pub contacts: Arc<dyn ContactStore>,
    pub conversations: Arc<dyn ConversationStore>,
    pub messages: Arc<dyn MessageStore>,
    pub media: Arc<MediaPipeline>,
    pub responder: Arc<AiResponder>,
    pub channel: Arc<dyn ChannelClient>,
}

/// Summary of one webhook delivery.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct WebhookOutcome {
    pub received: usize,
    pub processed: usize,
    pub skipped: usize,
    /// Raw messages the decoder could not turn into events.
    pub dropped: usize,
    pub replies_sent: usize,
    /// The integration has automation turned off; nothing was written.
    pub automation_disabled: bool,
}

pub struct ChannelGateway {
    directory: Arc<dyn OrganizationDirectory>,
    contacts: Arc<dyn ContactStore>,
    conversations: Arc<dyn ConversationStore>,
    messages: Arc<dyn MessageStore>,
    normalizer: MessageNormalizer,
    media: Arc<MediaPipeline>,
    responder: Arc<AiResponder>,
    channel: Arc<dyn ChannelClient>,
}

/// Per-delivery context shared by every event in the batch.
struct Delivery<'a> {
    organization: &'a Organization,
    integration: &'a Integration,
    responder_id: &'a str,
    cancel: &'a CancellationToken,
}

enum EventResult {
    Processed { replied: bool },
    Skipped,
}

impl ChannelGateway {
    pub fn new(services: GatewayServices) -> Self {
        let resolver = Arc::new(ConversationResolver::new(Arc::clone(
            &services.conversations,
        )));
        let normalizer = MessageNormalizer::new(resolver, Arc::clone(&services.messages));
        Self {
            directory: services.directory,
            contacts: services.contacts,
            conversations: services.conversations,
            messages: services.messages,
            normalizer,
            media: services.media,
            responder: services.responder,
            channel: services.channel,
        }
    }

    pub fn directory(&self) -> &Arc<dyn OrganizationDirectory> {
        &self.directory
    }

    pub fn media(&self) -> &Arc<MediaPipeline> {
        &self.media
    }

    /// Process one raw webhook delivery for `organization_id`.
    pub async fn handle_webhook(
        &self,
        organization_id: &str,
        body: &[u8],
        cancel: &CancellationToken,
    ) -> Result<WebhookOutcome> {
        let payload = WebhookPayload::from_slice(body)?;
        self.handle_payload(organization_id, &payload, cancel).await
    }

    /// Events are handled one at a time in delivery order. The first failing
    /// event aborts the rest of the batch; earlier events stay committed.
    #[instrument(skip_all, fields(organization_id = %organization_id))]
    pub async fn handle_payload(
        &self,
        organization_id: &str,
        payload: &WebhookPayload,
        cancel: &CancellationToken,
    ) -> Result<WebhookOutcome> {
        if !payload.is_whatsapp_business() {
            return Err(Error::validation(format!(
                "unsupported webhook object: {:?}",
                payload.object
            )));
        }
        let integration = self
            .directory
            .integration(organization_id, ChannelType::Whatsapp)
            .await?;
        let mut outcome = WebhookOutcome {
            received: payload.message_count(),
            ..Default::default()
        };
        if !integration.automation_enabled() {
            debug!("automation disabled, dropping delivery");
            outcome.automation_disabled = true;
            return Ok(outcome);
        }

        let organization = self.directory.organization(organization_id).await?;
        for event in payload.events() {
            let contact = self
                .contacts
                .find_or_create_contact(
                    organization_id,
                    &event.phone_number,
                    event.sender_name.as_deref(),
                )
                .await?;
            let responder_id = self.directory.default_responder(organization_id).await?;
            let delivery = Delivery {
                organization: &organization,
                integration: &integration,
                responder_id: &responder_id,
                cancel,
            };
            match self.handle_event(&delivery, &contact, &event).await? {
                EventResult::Processed { replied } => {
                    outcome.processed += 1;
                    if replied {
                        outcome.replies_sent += 1;
                    }
                },
                EventResult::Skipped => outcome.skipped += 1,
            }
        }
        outcome.dropped = outcome
            .received
            .saturating_sub(outcome.processed + outcome.skipped);

        info!(
            received = outcome.received,
            processed = outcome.processed,
            skipped = outcome.skipped,
            dropped = outcome.dropped,
            replies_sent = outcome.replies_sent,
            "webhook delivery handled"
        );
        Ok(outcome)
    }

    async fn handle_event(
        &self,
        delivery: &Delivery<'_>,
        contact: &Contact,
        event: &InboundEvent,
    ) -> Result<EventResult> {
        match event.kind {
            MessageKind::Text => self.handle_text(delivery, contact, event).await,
            kind if kind.is_media() => self.handle_media(delivery, contact, event).await,
            kind => {
                debug!(kind = %kind, phone = %event.phone_number, "skipping unsupported event");
                Ok(EventResult::Skipped)
            },
        }
    }

    async fn handle_text(
        &self,
        delivery: &Delivery<'_>,
        contact: &Contact,
        event: &InboundEvent,
    ) -> Result<EventResult> {
        let message = self
            .normalizer
            .create_message(inbound(delivery, contact, event, None))
            .await?;
        self.mark_read(delivery, event).await;

        let reply = self
            .responder
            .reply(&message.content, None, delivery.cancel)
            .await?;
        self.send_reply(delivery, &event.phone_number, reply).await?;
        Ok(EventResult::Processed { replied: true })
    }

    async fn handle_media(
        &self,
        delivery: &Delivery<'_>,
        contact: &Contact,
        event: &InboundEvent,
    ) -> Result<EventResult> {
        let media_id = event
            .media_id
            .as_deref()
            .filter(|id| !id.trim().is_empty())
            .ok_or_else(|| Error::validation(format!("{} message without media id", event.kind)))?;
        let shell = self
            .normalizer
            .create_message(inbound(delivery, contact, event, Some(media_id)))
            .await?;
        self.mark_read(delivery, event).await;

        let request = MediaRequest {
            organization_code: &delivery.organization.code,
            conversation_id: &shell.conversation_id,
            media_id,
            kind: event.kind,
            filename: event.metadata_str("filename"),
        };
        let (upload, attachment) = self
            .media
            .ingest(
                self.channel.as_ref(),
                &delivery.integration.credentials,
                &request,
                delivery.cancel,
            )
            .await?;
        let message = self
            .messages
            .attach_media(&shell.id, &upload.url, &attachment)
            .await?;
        self.refresh_snapshot(&message, event).await;
        debug!(message_id = %message.id, url = %upload.url, "media enriched");

        if !delivery.integration.reply_to_media {
            return Ok(EventResult::Processed { replied: false });
        }
        let media = MediaContext {
            kind: event.kind,
            reference: Some(upload.url.as_str()),
        };
        let reply = self
            .responder
            .reply(&event.content, Some(&media), delivery.cancel)
            .await?;
        self.send_reply(delivery, &event.phone_number, reply).await?;
        Ok(EventResult::Processed { replied: true })
    }

    async fn send_reply(&self, delivery: &Delivery<'_>, to: &str, body: String) -> Result<()> {
        let receipt = self
            .channel
            .send(
                &delivery.integration.credentials,
                &OutboundMessage::text(to, body),
                delivery.cancel,
            )
            .await?;
        debug!(to, message_ids = ?receipt.message_ids, "reply sent");
        Ok(())
    }

    async fn mark_read(&self, delivery: &Delivery<'_>, event: &InboundEvent) {
        if !delivery.integration.send_read_receipts || event.channel_message_id.is_empty() {
            return;
        }
        let receipt = OutboundMessage::MarkRead {
            message_id: event.channel_message_id.clone(),
        };
        if let Err(e) = self
            .channel
            .send(&delivery.integration.credentials, &receipt, delivery.cancel)
            .await
        {
            warn!(message_id = %event.channel_message_id, error = %e, "read receipt failed");
        }
    }

    /// Point the conversation snapshot at the resolved media URL.
    async fn refresh_snapshot(&self, message: &Message, event: &InboundEvent) {
        let snapshot = LastMessage {
            sender_id: message.sender_id.clone(),
            sender_type: message.sender_type,
            sender_name: event.sender_name.clone(),
            content: message.content.clone(),
            kind: message.kind,
            media_reference: message.media_reference.clone(),
            at: message.updated_at,
        };
        let _ = self
            .normalizer
            .resolver()
            .record_last_message(&message.conversation_id, &snapshot)
            .await;
    }

    /// Persist an agent or system message on behalf of `organization_id`.
    pub async fn create_message(
        &self,
        organization_id: &str,
        mut input: CreateMessage,
    ) -> Result<Message> {
        input.organization_id = organization_id.to_string();
        self.normalizer.create_message(input).await
    }

    /// Upload a file into a conversation's bucket.
    pub async fn upload_to_conversation(
        &self,
        organization_id: &str,
        conversation_id: &str,
        file: InlineFile,
        cancel: &CancellationToken,
    ) -> Result<UploadResult> {
        let conversation = self
            .conversations
            .find_conversation(conversation_id)
            .await?
            .ok_or_else(|| Error::not_found("conversation", conversation_id))?;
        if conversation.organization_id != organization_id {
            return Err(Error::forbidden(format!(
                "conversation {conversation_id} belongs to another organization"
            )));
        }
        let organization = self.directory.organization(organization_id).await?;
        self.media
            .upload_inline(&organization.code, conversation_id, file, cancel)
            .await
    }
}

fn inbound(
    delivery: &Delivery<'_>,
    contact: &Contact,
    event: &InboundEvent,
    media_reference: Option<&str>,
) -> CreateMessage {
    CreateMessage {
        organization_id: delivery.organization.id.clone(),
        user_id: Some(delivery.responder_id.to_string()),
        contact_id: Some(contact.id.clone()),
        channel: Some(delivery.integration.channel),
        sender_type: SenderType::Customer,
        sender_id: Some(contact.id.clone()),
        sender_name: event.sender_name.clone().or_else(|| contact.name.clone()),
        direction: Direction::Inbound,
        kind: Some(event.kind),
        content: event.content.clone(),
        media_reference: media_reference.map(str::to_string),
        channel_message_id: Some(event.channel_message_id.clone()).filter(|id| !id.is_empty()),
        ..Default::default()
    }
}
