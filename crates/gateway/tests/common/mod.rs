#![allow(clippy::unwrap_used, clippy::expect_used, dead_code)]

use std::{
    collections::HashMap,
    sync::{Arc, Mutex},
    time::Duration,
};

use {
    async_trait::async_trait,
    bytes::Bytes,
    parley_channels::{
        ChannelClient, ChannelCredentials, MediaMetadata, OutboundMessage, SendReceipt,
    },
    parley_common::{ChannelType, Error, Result},
    parley_config::{IntegrationConfig, OrganizationConfig},
    parley_conversations::{
        ContactStore, ConversationStore, Message, MessageStore, SqliteStore, connect,
        run_migrations,
    },
    parley_gateway::{AppState, ChannelGateway, ConfigDirectory, GatewayServices, build_router},
    parley_media::{MediaPipeline, MemoryBlobStore},
    parley_responder::{AiResponder, ChatMessage, CompletionClient, PromptAssets},
    secrecy::Secret,
    serde_json::{Value, json},
    tokio_util::sync::CancellationToken,
};

pub const ORG: &str = "org-1";
pub const BOT: &str = "bot-1";
pub const BLOB_BASE: &str = "http://blobs.test";

/// Records every outbound message and serves media from a fixed table.
#[derive(Default)]
pub struct FakeChannel {
    pub sent: Mutex<Vec<OutboundMessage>>,
    media: Mutex<HashMap<String, (String, Bytes)>>,
    fail_sends: Mutex<bool>,
}

impl FakeChannel {
    pub fn with_media(&self, media_id: &str, mime_type: &str, bytes: &'static [u8]) {
        self.media.lock().unwrap().insert(
            media_id.to_string(),
            (mime_type.to_string(), Bytes::from_static(bytes)),
        );
    }

    pub fn fail_sends(&self) {
        *self.fail_sends.lock().unwrap() = true;
    }

    pub fn sent(&self) -> Vec<OutboundMessage> {
        self.sent.lock().unwrap().clone()
    }

    pub fn replies(&self) -> Vec<(String, String)> {
        self.sent()
            .into_iter()
            .filter_map(|m| match m {
                OutboundMessage::Text { to, body, .. } => Some((to, body)),
                _ => None,
            })
            .collect()
    }
}

#[async_trait]
impl ChannelClient for FakeChannel {
    fn channel_type(&self) -> ChannelType {
        ChannelType::Whatsapp
    }

    async fn send(
        &self,
        _credentials: &ChannelCredentials,
        message: &OutboundMessage,
        _cancel: &CancellationToken,
    ) -> Result<SendReceipt> {
        if *self.fail_sends.lock().unwrap() {
            return Err(Error::Upstream {
                service: "whatsapp",
                status: 400,
                body: "rejected".into(),
            });
        }
        self.sent.lock().unwrap().push(message.clone());
        Ok(SendReceipt {
            message_ids: vec!["wamid.out".into()],
        })
    }

    async fn fetch_media_metadata(
        &self,
        _credentials: &ChannelCredentials,
        media_id: &str,
        _cancel: &CancellationToken,
    ) -> Result<MediaMetadata> {
        let media = self.media.lock().unwrap();
        let (mime_type, bytes) = media.get(media_id).ok_or_else(|| Error::Upstream {
            service: "whatsapp",
            status: 404,
            body: "unknown media".into(),
        })?;
        Ok(MediaMetadata {
            id: media_id.to_string(),
            url: format!("https://lookaside.test/{media_id}"),
            mime_type: mime_type.clone(),
            sha256: String::new(),
            file_size: Some(bytes.len() as u64),
        })
    }

    async fn download_media(
        &self,
        _credentials: &ChannelCredentials,
        metadata: &MediaMetadata,
        _cancel: &CancellationToken,
    ) -> Result<Bytes> {
        let media = self.media.lock().unwrap();
        Ok(media
            .get(&metadata.id)
            .map(|(_, bytes)| bytes.clone())
            .unwrap_or_default())
    }
}

/// Answers every prompt with the same reply and records the prompts.
pub struct FakeCompletion {
    reply: String,
    pub prompts: Mutex<Vec<Vec<ChatMessage>>>,
}

impl FakeCompletion {
    pub fn calls(&self) -> usize {
        self.prompts.lock().unwrap().len()
    }

    pub fn last_user_turn(&self) -> String {
        let prompts = self.prompts.lock().unwrap();
        prompts.last().unwrap().last().unwrap().content.clone()
    }
}

#[async_trait]
impl CompletionClient for FakeCompletion {
    async fn complete(
        &self,
        messages: &[ChatMessage],
        _cancel: &CancellationToken,
    ) -> Result<String> {
        self.prompts.lock().unwrap().push(messages.to_vec());
        Ok(self.reply.clone())
    }
}

pub struct Harness {
    pub store: SqliteStore,
    pub blobs: Arc<MemoryBlobStore>,
    pub channel: Arc<FakeChannel>,
    pub completion: Arc<FakeCompletion>,
    pub gateway: Arc<ChannelGateway>,
}

pub fn integration() -> IntegrationConfig {
    IntegrationConfig {
        access_token: Secret::new("EAAG-test".into()),
        phone_number_id: "1055".into(),
        verify_token: "verify-me".into(),
        ..Default::default()
    }
}

pub fn organization(integration: IntegrationConfig) -> OrganizationConfig {
    let mut org = OrganizationConfig {
        id: ORG.into(),
        code: "acme".into(),
        name: "Acme Bikes".into(),
        default_responder: Some(BOT.into()),
        ..Default::default()
    };
    org.integrations.insert("whatsapp".into(), integration);
    org
}

pub async fn harness(integration: IntegrationConfig) -> Harness {
    harness_with(vec![organization(integration)]).await
}

pub async fn harness_with(organizations: Vec<OrganizationConfig>) -> Harness {
    let pool = connect("sqlite::memory:", 1).await.unwrap();
    run_migrations(&pool).await.unwrap();
    let store = SqliteStore::new(pool);
    let blobs = Arc::new(MemoryBlobStore::new(BLOB_BASE));
    let channel = Arc::new(FakeChannel::default());
    let completion = Arc::new(FakeCompletion {
        reply: "Thanks, we will get back to you shortly.".into(),
        prompts: Mutex::new(Vec::new()),
    });
    let assets = Arc::new(PromptAssets::new("You work at Acme Bikes.", "Open 9-5."));

    let gateway = Arc::new(ChannelGateway::new(GatewayServices {
        directory: Arc::new(ConfigDirectory::new(organizations)),
        contacts: Arc::new(store.clone()),
        conversations: Arc::new(store.clone()),
        messages: Arc::new(store.clone()),
        media: Arc::new(MediaPipeline::new(blobs.clone(), "parley")),
        responder: Arc::new(AiResponder::new(completion.clone(), assets)),
        channel: channel.clone(),
    }));
    Harness {
        store,
        blobs,
        channel,
        completion,
        gateway,
    }
}

impl Harness {
    pub fn router(&self) -> axum::Router {
        build_router(AppState::new(
            Arc::clone(&self.gateway),
            Duration::from_secs(5),
        ))
    }

    pub async fn counts(&self) -> (usize, usize, usize) {
        let contacts = self.store.list_contacts(ORG).await.unwrap().len();
        let conversations = self.store.list_conversations(ORG).await.unwrap();
        let mut messages = 0;
        for conversation in &conversations {
            messages += self.store.list_messages(&conversation.id).await.unwrap().len();
        }
        (contacts, conversations.len(), messages)
    }

    pub async fn all_messages(&self) -> Vec<Message> {
        let mut all = Vec::new();
        for conversation in self.store.list_conversations(ORG).await.unwrap() {
            all.extend(self.store.list_messages(&conversation.id).await.unwrap());
        }
        all
    }
}

// ── Webhook payload builders ────────────────────────────────────────────────

pub fn text(from: &str, id: &str, body: &str) -> Value {
    json!({ "from": from, "id": id, "type": "text", "text": { "body": body } })
}

pub fn image(from: &str, id: &str, media_id: &str, caption: Option<&str>) -> Value {
    let mut image = json!({ "id": media_id, "mime_type": "image/jpeg", "sha256": "abc" });
    if let Some(caption) = caption {
        image["caption"] = json!(caption);
    }
    json!({ "from": from, "id": id, "type": "image", "image": image })
}

pub fn document(from: &str, id: &str, media_id: &str, filename: &str) -> Value {
    json!({
        "from": from,
        "id": id,
        "type": "document",
        "document": { "id": media_id, "mime_type": "application/pdf", "filename": filename }
    })
}

pub fn location(from: &str, id: &str) -> Value {
    json!({
        "from": from,
        "id": id,
        "type": "location",
        "location": { "latitude": 52.37, "longitude": 4.89, "name": "Shop" }
    })
}

pub fn delivery(messages: Vec<Value>) -> Vec<u8> {
    delivery_value(messages).to_string().into_bytes()
}

pub fn delivery_value(messages: Vec<Value>) -> Value {
    json!({
        "object": "whatsapp_business_account",
        "entry": [{
            "id": "waba-1",
            "changes": [{
                "field": "messages",
                "value": {
                    "messaging_product": "whatsapp",
                    "metadata": { "display_phone_number": "15550001055", "phone_number_id": "1055" },
                    "contacts": [{ "wa_id": "15551234567", "profile": { "name": "Jane" } }],
                    "messages": messages
                }
            }]
        }]
    })
}
