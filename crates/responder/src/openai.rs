//! OpenAI-compatible `/chat/completions` backend.

use std::time::Duration;

use {
    async_trait::async_trait,
    parley_common::{Error, Result, RetryPolicy},
    secrecy::{ExposeSecret, Secret},
    serde::{Deserialize, Serialize},
    tokio_util::sync::CancellationToken,
    tracing::{debug, instrument},
};

use crate::{prompt::ChatMessage, responder::CompletionClient};

const SERVICE: &str = "completion";

pub struct OpenAiCompletionClient {
    http: reqwest::Client,
    base_url: String,
    api_key: Option<Secret<String>>,
    model: String,
    temperature: f32,
    max_tokens: Option<u32>,
    retry: RetryPolicy,
}

#[derive(Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: &'a [ChatMessage],
    temperature: f32,
    #[serde(skip_serializing_if = "Option::is_none")]
    max_tokens: Option<u32>,
}

#[derive(Deserialize)]
struct ChatResponse {
    #[serde(default)]
    choices: Vec<Choice>,
}

#[derive(Deserialize)]
struct Choice {
    message: ChoiceMessage,
}

#[derive(Deserialize)]
struct ChoiceMessage {
    #[serde(default)]
    content: Option<String>,
}

impl OpenAiCompletionClient {
    pub fn new(
        base_url: impl Into<String>,
        api_key: Option<Secret<String>>,
        model: impl Into<String>,
        timeout: Duration,
        retry: RetryPolicy,
    ) -> Result<Self> {
        let http = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| Error::external("building completion http client", e))?;
        Ok(Self {
            http,
            base_url: base_url.into(),
            api_key,
            model: model.into(),
            temperature: 0.7,
            max_tokens: None,
            retry,
        })
    }

    #[must_use]
    pub fn with_sampling(mut self, temperature: f32, max_tokens: Option<u32>) -> Self {
        self.temperature = temperature;
        self.max_tokens = max_tokens;
        self
    }

    fn chat_completions_url(&self) -> String {
        let base = self.base_url.trim_end_matches('/');
        if base.ends_with("/chat/completions") {
            return base.to_string();
        }
        format!("{base}/chat/completions")
    }

    async fn post(&self, body: &ChatRequest<'_>) -> Result<String> {
        let mut request = self.http.post(self.chat_completions_url()).json(body);
        if let Some(key) = &self.api_key {
            request = request.bearer_auth(key.expose_secret());
        }
        let resp = request
            .send()
            .await
            .map_err(|e| Error::http("completion request", e))?;
        let status = resp.status();
        if !status.is_success() {
            let body = resp.text().await.unwrap_or_default();
            return Err(Error::Upstream {
                service: SERVICE,
                status: status.as_u16(),
                body,
            });
        }
        let parsed: ChatResponse = resp
            .json()
            .await
            .map_err(|e| Error::external("decoding completion response", e))?;
        parsed
            .choices
            .into_iter()
            .next()
            .map(|choice| choice.message.content.unwrap_or_default())
            .ok_or(Error::EmptyCompletion)
    }
}

#[async_trait]
impl CompletionClient for OpenAiCompletionClient {
    #[instrument(skip_all, fields(model = %self.model))]
    async fn complete(
        &self,
        messages: &[ChatMessage],
        cancel: &CancellationToken,
    ) -> Result<String> {
        let body = &ChatRequest {
            model: &self.model,
            messages,
            temperature: self.temperature,
            max_tokens: self.max_tokens,
        };
        let text = self
            .retry
            .run(cancel, "completion", || self.post(body))
            .await?;
        debug!(len = text.len(), "completion received");
        Ok(text)
    }
}
