//! Organization and channel-integration lookup.

use std::{collections::HashMap, str::FromStr};

use {
    async_trait::async_trait,
    parley_channels::ChannelCredentials,
    parley_common::{ChannelType, Error, Result},
    parley_config::{IntegrationConfig, OrganizationConfig, ParleyConfig},
    secrecy::{ExposeSecret, Secret},
    tracing::warn,
};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Organization {
    pub id: String,
    /// Short code used to scope blob buckets.
    pub code: String,
    pub name: String,
}

/// A tenant's configuration for one channel.
#[derive(Debug, Clone)]
pub struct Integration {
    pub organization_id: String,
    pub channel: ChannelType,
    pub enabled: bool,
    pub ai_enabled: bool,
    pub credentials: ChannelCredentials,
    pub verify_token: String,
    pub app_secret: Option<Secret<String>>,
    pub send_read_receipts: bool,
    pub reply_to_media: bool,
}

impl Integration {
    /// Deliveries for integrations without automation are acknowledged and dropped.
    pub fn automation_enabled(&self) -> bool {
        self.enabled && self.ai_enabled
    }

    /// App secret for signature checks, if one is configured and non-empty.
    pub fn signing_secret(&self) -> Option<&str> {
        self.app_secret
            .as_ref()
            .map(|s| s.expose_secret().as_str())
            .filter(|s| !s.is_empty())
    }
}

/// Tenant lookups consumed by the gateway. Missing entries are [`Error::NotFound`].
#[async_trait]
pub trait OrganizationDirectory: Send + Sync {
    async fn organization(&self, organization_id: &str) -> Result<Organization>;

    async fn integration(&self, organization_id: &str, channel: ChannelType)
    -> Result<Integration>;

    /// User id of the bot/agent that owns automatically created conversations.
    async fn default_responder(&self, organization_id: &str) -> Result<String>;
}

struct Entry {
    organization: Organization,
    default_responder: Option<String>,
    integrations: HashMap<ChannelType, Integration>,
}

/// Directory backed by the `organizations` section of the config file.
pub struct ConfigDirectory {
    entries: HashMap<String, Entry>,
}

impl ConfigDirectory {
    pub fn from_config(config: &ParleyConfig) -> Self {
        Self::new(config.organizations.clone())
    }

    pub fn new(organizations: Vec<OrganizationConfig>) -> Self {
        let entries = organizations
            .into_iter()
            .map(|org| (org.id.clone(), entry(org)))
            .collect();
        Self { entries }
    }

    fn entry(&self, organization_id: &str) -> Result<&Entry> {
        self.entries
            .get(organization_id)
            .ok_or_else(|| Error::not_found("organization", organization_id))
    }
}

fn entry(org: OrganizationConfig) -> Entry {
    let mut integrations = HashMap::new();
    for (key, cfg) in org.integrations {
        match ChannelType::from_str(&key) {
            Ok(channel) => {
                integrations.insert(channel, integration(&org.id, channel, cfg));
            },
            Err(e) => warn!(organization_id = %org.id, channel = %key, error = %e, "ignoring integration"),
        }
    }
    let code = if org.code.trim().is_empty() {
        org.id.clone()
    } else {
        org.code
    };
    Entry {
        organization: Organization {
            id: org.id,
            code,
            name: org.name,
        },
        default_responder: org.default_responder.filter(|r| !r.trim().is_empty()),
        integrations,
    }
}

fn integration(organization_id: &str, channel: ChannelType, cfg: IntegrationConfig) -> Integration {
    Integration {
        organization_id: organization_id.to_string(),
        channel,
        enabled: cfg.enabled,
        ai_enabled: cfg.ai_enabled,
        credentials: ChannelCredentials {
            access_token: cfg.access_token,
            phone_number_id: cfg.phone_number_id,
        },
        verify_token: cfg.verify_token,
        app_secret: cfg.app_secret,
        send_read_receipts: cfg.send_read_receipts,
        reply_to_media: cfg.reply_to_media,
    }
}

#[async_trait]
impl OrganizationDirectory for ConfigDirectory {
    async fn organization(&self, organization_id: &str) -> Result<Organization> {
        Ok(self.entry(organization_id)?.organization.clone())
    }

    async fn integration(
        &self,
        organization_id: &str,
        channel: ChannelType,
    ) -> Result<Integration> {
        self.entry(organization_id)?
            .integrations
            .get(&channel)
            .cloned()
            .ok_or_else(|| Error::not_found("integration", format!("{organization_id}/{channel}")))
    }

    async fn default_responder(&self, organization_id: &str) -> Result<String> {
        self.entry(organization_id)?
            .default_responder
            .clone()
            .ok_or_else(|| Error::not_found("default responder", organization_id))
    }
}

#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests {
    use super::*;

    fn acme() -> OrganizationConfig {
        let mut org = OrganizationConfig {
            id: "org-1".into(),
            code: "ACME".into(),
            name: "Acme".into(),
            default_responder: Some("bot-1".into()),
            ..Default::default()
        };
        org.integrations.insert("whatsapp".into(), IntegrationConfig {
            phone_number_id: "555".into(),
            app_secret: Some(Secret::new(String::new())),
            ..Default::default()
        });
        org.integrations
            .insert("carrier-pigeon".into(), IntegrationConfig::default());
        org
    }

    #[tokio::test]
    async fn resolves_organization_integration_and_responder() {
        let dir = ConfigDirectory::new(vec![acme()]);
        let org = dir.organization("org-1").await.unwrap();
        assert_eq!(org.code, "ACME");

        let integration = dir
            .integration("org-1", ChannelType::Whatsapp)
            .await
            .unwrap();
        assert_eq!(integration.credentials.phone_number_id, "555");
        assert!(integration.automation_enabled());
        assert!(integration.signing_secret().is_none(), "blank secret is unset");

        assert_eq!(dir.default_responder("org-1").await.unwrap(), "bot-1");
    }

    #[tokio::test]
    async fn missing_entries_are_not_found() {
        let mut org = acme();
        org.id = "org-2".into();
        org.code = String::new();
        org.default_responder = None;
        org.integrations.clear();
        let dir = ConfigDirectory::new(vec![org]);

        assert_eq!(dir.organization("nope").await.unwrap_err().status_code(), 404);
        assert_eq!(
            dir.integration("org-2", ChannelType::Whatsapp)
                .await
                .unwrap_err()
                .status_code(),
            404
        );
        assert_eq!(dir.default_responder("org-2").await.unwrap_err().status_code(), 404);
        assert_eq!(dir.organization("org-2").await.unwrap().code, "org-2");
    }

    #[test]
    fn automation_needs_both_flags() {
        let cfg = IntegrationConfig {
            ai_enabled: false,
            ..Default::default()
        };
        assert!(!integration("o", ChannelType::Whatsapp, cfg).automation_enabled());
        let cfg = IntegrationConfig {
            enabled: false,
            ..Default::default()
        };
        assert!(!integration("o", ChannelType::Whatsapp, cfg).automation_enabled());
    }
}
