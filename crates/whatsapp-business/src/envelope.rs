//! Outbound request bodies for `POST /{phone_number_id}/messages`.
//!
//! Typed structs keep the three shapes from drifting.

use {parley_channels::OutboundMessage, serde::Serialize};

const MESSAGING_PRODUCT: &str = "whatsapp";

#[derive(Debug, Serialize)]
#[serde(untagged)]
pub enum Envelope<'a> {
    Template(TemplateEnvelope<'a>),
    Text(TextEnvelope<'a>),
    Status(StatusEnvelope<'a>),
}

#[derive(Debug, Serialize)]
pub struct TemplateEnvelope<'a> {
    messaging_product: &'static str,
    to: &'a str,
    #[serde(rename = "type")]
    kind: &'static str,
    template: Template<'a>,
}

#[derive(Debug, Serialize)]
pub struct Template<'a> {
    name: &'a str,
    language: Language<'a>,
}

#[derive(Debug, Serialize)]
pub struct Language<'a> {
    code: &'a str,
}

#[derive(Debug, Serialize)]
pub struct TextEnvelope<'a> {
    messaging_product: &'static str,
    recipient_type: &'static str,
    to: &'a str,
    #[serde(rename = "type")]
    kind: &'static str,
    text: TextBody<'a>,
}

#[derive(Debug, Serialize)]
pub struct TextBody<'a> {
    preview_url: bool,
    body: &'a str,
}

#[derive(Debug, Serialize)]
pub struct StatusEnvelope<'a> {
    messaging_product: &'static str,
    status: &'static str,
    message_id: &'a str,
}

impl<'a> From<&'a OutboundMessage> for Envelope<'a> {
    fn from(message: &'a OutboundMessage) -> Self {
        match message {
            OutboundMessage::Template { to, name, language } => Self::Template(TemplateEnvelope {
                messaging_product: MESSAGING_PRODUCT,
                to,
                kind: "template",
                template: Template {
                    name,
                    language: Language { code: language },
                },
            }),
            OutboundMessage::Text {
                to,
                body,
                preview_url,
            } => Self::Text(TextEnvelope {
                messaging_product: MESSAGING_PRODUCT,
                recipient_type: "individual",
                to,
                kind: "text",
                text: TextBody {
                    preview_url: *preview_url,
                    body,
                },
            }),
            OutboundMessage::MarkRead { message_id } => Self::Status(StatusEnvelope {
                messaging_product: MESSAGING_PRODUCT,
                status: "read",
                message_id,
            }),
        }
    }
}
