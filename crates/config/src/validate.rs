//! Semantic validation of a loaded configuration.

use std::collections::HashSet;

use secrecy::ExposeSecret;

use crate::schema::ParleyConfig;

/// Severity level for a diagnostic.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum Severity {
    Error,
    Warning,
}

impl std::fmt::Display for Severity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Error => write!(f, "error"),
            Self::Warning => write!(f, "warning"),
        }
    }
}

/// A single validation diagnostic.
#[derive(Debug, Clone)]
pub struct Diagnostic {
    pub severity: Severity,
    /// Dotted path, e.g. "organizations[0].integrations.whatsapp.access_token"
    pub path: String,
    pub message: String,
}

#[derive(Debug, Clone, Default)]
pub struct ValidationResult {
    pub diagnostics: Vec<Diagnostic>,
}

impl ValidationResult {
    #[must_use]
    pub fn has_errors(&self) -> bool {
        self.diagnostics
            .iter()
            .any(|d| d.severity == Severity::Error)
    }

    #[must_use]
    pub fn count(&self, severity: Severity) -> usize {
        self.diagnostics
            .iter()
            .filter(|d| d.severity == severity)
            .count()
    }

    fn push(&mut self, severity: Severity, path: String, message: impl Into<String>) {
        self.diagnostics.push(Diagnostic {
            severity,
            path,
            message: message.into(),
        });
    }
}

/// Check cross-field rules that serde cannot express.
pub fn validate(config: &ParleyConfig) -> ValidationResult {
    let mut result = ValidationResult::default();
    let mut seen_ids = HashSet::new();

    for (i, org) in config.organizations.iter().enumerate() {
        let base = format!("organizations[{i}]");
        if org.id.trim().is_empty() {
            result.push(Severity::Error, format!("{base}.id"), "organization id is empty");
        } else if !seen_ids.insert(org.id.as_str()) {
            result.push(
                Severity::Error,
                format!("{base}.id"),
                format!("duplicate organization id '{}'", org.id),
            );
        }
        if org.code.trim().is_empty() {
            result.push(
                Severity::Error,
                format!("{base}.code"),
                "organization code is required to scope media buckets",
            );
        }
        if org.default_responder.is_none() {
            result.push(
                Severity::Warning,
                format!("{base}.default_responder"),
                "no default responder; inbound messages will fail with not-found",
            );
        }

        for (channel, integration) in &org.integrations {
            let path = format!("{base}.integrations.{channel}");
            if channel.parse::<parley_common::ChannelType>().is_err() {
                result.push(
                    Severity::Error,
                    path.clone(),
                    format!("unknown channel type '{channel}'"),
                );
            }
            if integration.enabled && integration.access_token.expose_secret().is_empty() {
                result.push(
                    Severity::Error,
                    format!("{path}.access_token"),
                    "enabled integration has no access token",
                );
            }
            if integration.enabled && integration.phone_number_id.is_empty() {
                result.push(
                    Severity::Error,
                    format!("{path}.phone_number_id"),
                    "enabled integration has no phone number id",
                );
            }
            if integration.app_secret.is_none() {
                result.push(
                    Severity::Warning,
                    format!("{path}.app_secret"),
                    "webhook signatures will not be verified",
                );
            }
        }
    }

    if config.responder.api_key.is_none()
        && config
            .organizations
            .iter()
            .flat_map(|o| o.integrations.values())
            .any(|i| i.ai_enabled)
    {
        result.push(
            Severity::Warning,
            "responder.api_key".into(),
            "AI replies are enabled but no completion API key is configured",
        );
    }

    if config.retry.max_attempts == 0 {
        result.push(
            Severity::Warning,
            "retry.max_attempts".into(),
            "0 is treated as a single attempt",
        );
    }

    result
}
