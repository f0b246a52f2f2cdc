use std::collections::HashMap;

use {
    parley_common::RetryPolicy,
    secrecy::Secret,
    serde::Deserialize,
};

/// Root configuration.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct ParleyConfig {
    pub server: ServerConfig,
    pub database: DatabaseConfig,
    pub storage: StorageConfig,
    pub whatsapp: WhatsAppApiConfig,
    pub responder: ResponderConfig,
    /// Retry policy for every outbound HTTP hop.
    pub retry: RetryPolicy,
    pub organizations: Vec<OrganizationConfig>,
}

/// Gateway server configuration.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    /// Address to bind to. Defaults to "127.0.0.1".
    pub bind: String,
    pub port: u16,
    /// Upper bound on how long a single webhook delivery may run.
    pub request_timeout_secs: u64,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind: "127.0.0.1".into(),
            port: 8640,
            request_timeout_secs: 60,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct DatabaseConfig {
    /// sqlx connection URL.
    pub url: String,
    pub max_connections: u32,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            url: "sqlite://parley.db?mode=rwc".into(),
            max_connections: 5,
        }
    }
}

/// Blob storage for re-uploaded channel media.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    /// Directory backing the filesystem blob store.
    pub root_dir: String,
    /// Public URLs are `<public_base_url>/<bucket>/<object>`.
    pub public_base_url: String,
    /// Prefix for generated bucket names.
    pub bucket_prefix: String,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            root_dir: "data/blobs".into(),
            public_base_url: "http://127.0.0.1:8640/blobs".into(),
            bucket_prefix: "parley".into(),
        }
    }
}

/// WhatsApp Business Cloud API endpoints.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct WhatsAppApiConfig {
    pub base_url: String,
    pub api_version: String,
    pub timeout_secs: u64,
}

impl Default for WhatsAppApiConfig {
    fn default() -> Self {
        Self {
            base_url: "https://graph.facebook.com".into(),
            api_version: "v21.0".into(),
            timeout_secs: 30,
        }
    }
}

/// Completion backend used for automatic replies.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ResponderConfig {
    /// OpenAI-compatible base URL (the client appends `/chat/completions`).
    pub base_url: String,
    pub api_key: Option<Secret<String>>,
    pub model: String,
    pub temperature: f32,
    pub max_tokens: Option<u32>,
    /// Static persona / system instructions.
    pub persona_path: Option<String>,
    /// Knowledge corpus appended after the persona.
    pub knowledge_path: Option<String>,
    pub timeout_secs: u64,
}

impl Default for ResponderConfig {
    fn default() -> Self {
        Self {
            base_url: "https://api.openai.com/v1".into(),
            api_key: None,
            model: "gpt-4o-mini".into(),
            temperature: 0.7,
            max_tokens: None,
            persona_path: None,
            knowledge_path: None,
            timeout_secs: 60,
        }
    }
}

/// A tenant and its channel integrations.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct OrganizationConfig {
    pub id: String,
    /// Short code used to scope blob buckets.
    pub code: String,
    pub name: String,
    /// User id of the bot/agent that owns automatically created conversations.
    pub default_responder: Option<String>,
    /// Integrations keyed by channel type (`whatsapp`).
    pub integrations: HashMap<String, IntegrationConfig>,
}

/// Per-organization channel integration.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct IntegrationConfig {
    pub enabled: bool,
    /// AI/automation flag. When off, webhook deliveries are acknowledged and dropped.
    pub ai_enabled: bool,
    pub access_token: Secret<String>,
    pub phone_number_id: String,
    /// Token echoed during webhook subscription verification.
    pub verify_token: String,
    /// App secret for `X-Hub-Signature-256` verification. Unchecked when unset.
    pub app_secret: Option<Secret<String>>,
    pub send_read_receipts: bool,
    /// Also generate AI replies for media messages. Off by default.
    pub reply_to_media: bool,
}

impl Default for IntegrationConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            ai_enabled: true,
            access_token: Secret::new(String::new()),
            phone_number_id: String::new(),
            verify_token: String::new(),
            app_secret: None,
            send_read_receipts: false,
            reply_to_media: false,
        }
    }
}

impl ParleyConfig {
    pub fn organization(&self, id: &str) -> Option<&OrganizationConfig> {
        self.organizations.iter().find(|o| o.id == id)
    }
}
