use std::sync::Arc;

use {
    async_trait::async_trait,
    parley_common::{Error, Result},
    tokio_util::sync::CancellationToken,
    tracing::debug,
};

use crate::prompt::{ChatMessage, MediaContext, PromptAssets, build_messages};

/// An external chat-completion backend.
#[async_trait]
pub trait CompletionClient: Send + Sync {
    /// Text of the first choice. No choices is [`Error::EmptyCompletion`].
    async fn complete(&self, messages: &[ChatMessage], cancel: &CancellationToken)
    -> Result<String>;
}

/// Builds the prompt for one inbound message and asks the backend for a reply.
pub struct AiResponder {
    client: Arc<dyn CompletionClient>,
    assets: Arc<PromptAssets>,
}

impl AiResponder {
    pub fn new(client: Arc<dyn CompletionClient>, assets: Arc<PromptAssets>) -> Self {
        Self { client, assets }
    }

    pub async fn reply(
        &self,
        content: &str,
        media: Option<&MediaContext<'_>>,
        cancel: &CancellationToken,
    ) -> Result<String> {
        let messages = build_messages(&self.assets, content, media);
        let reply = self.client.complete(&messages, cancel).await?;
        let reply = reply.trim();
        if reply.is_empty() {
            return Err(Error::EmptyCompletion);
        }
        debug!(reply_len = reply.len(), "generated reply");
        Ok(reply.to_string())
    }
}
