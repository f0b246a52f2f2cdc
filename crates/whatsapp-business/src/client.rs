//! Graph API client for the WhatsApp Business Cloud API.

use std::time::Duration;

use {
    async_trait::async_trait,
    bytes::Bytes,
    secrecy::ExposeSecret,
    serde::Deserialize,
    tokio_util::sync::CancellationToken,
    tracing::{debug, instrument},
};

use {
    parley_channels::{ChannelClient, ChannelCredentials, MediaMetadata, OutboundMessage, SendReceipt},
    parley_common::{ChannelType, Error, Result, RetryPolicy},
};

use crate::envelope::Envelope;

const SERVICE: &str = "whatsapp";

pub struct GraphApiClient {
    http: reqwest::Client,
    base_url: String,
    api_version: String,
    retry: RetryPolicy,
}

#[derive(Debug, Default, Deserialize)]
struct SendResponse {
    #[serde(default)]
    messages: Vec<SentMessage>,
}

#[derive(Debug, Deserialize)]
struct SentMessage {
    id: String,
}

impl GraphApiClient {
    pub fn new(
        base_url: impl Into<String>,
        api_version: impl Into<String>,
        timeout: Duration,
        retry: RetryPolicy,
    ) -> Result<Self> {
        let http = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| Error::external("building whatsapp http client", e))?;
        Ok(Self::with_http(http, base_url, api_version, retry))
    }

    pub fn with_http(
        http: reqwest::Client,
        base_url: impl Into<String>,
        api_version: impl Into<String>,
        retry: RetryPolicy,
    ) -> Self {
        Self {
            http,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            api_version: api_version.into(),
            retry,
        }
    }

    fn endpoint(&self, path: &str) -> String {
        format!("{}/{}/{}", self.base_url, self.api_version, path)
    }

    async fn post_message(
        &self,
        credentials: &ChannelCredentials,
        message: &OutboundMessage,
    ) -> Result<SendReceipt> {
        let url = self.endpoint(&format!("{}/messages", credentials.phone_number_id));
        let resp = self
            .http
            .post(url)
            .bearer_auth(credentials.access_token.expose_secret())
            .json(&Envelope::from(message))
            .send()
            .await
            .map_err(|e| Error::http("whatsapp send", e))?;
        let resp = ensure_success(resp).await?;
        // Read receipts answer `{"success": true}`; only sends carry ids.
        let body: SendResponse = resp.json().await.unwrap_or_default();
        Ok(SendReceipt {
            message_ids: body.messages.into_iter().map(|m| m.id).collect(),
        })
    }

    async fn get_metadata(
        &self,
        credentials: &ChannelCredentials,
        media_id: &str,
    ) -> Result<MediaMetadata> {
        let resp = self
            .http
            .get(self.endpoint(media_id))
            .bearer_auth(credentials.access_token.expose_secret())
            .send()
            .await
            .map_err(|e| Error::http("whatsapp media lookup", e))?;
        ensure_success(resp)
            .await?
            .json::<MediaMetadata>()
            .await
            .map_err(|e| Error::external("decoding whatsapp media metadata", e))
    }

    async fn get_bytes(&self, credentials: &ChannelCredentials, url: &str) -> Result<Bytes> {
        let resp = self
            .http
            .get(url)
            .bearer_auth(credentials.access_token.expose_secret())
            .send()
            .await
            .map_err(|e| Error::http("whatsapp media download", e))?;
        ensure_success(resp)
            .await?
            .bytes()
            .await
            .map_err(|e| Error::http("reading whatsapp media body", e))
    }
}

async fn ensure_success(resp: reqwest::Response) -> Result<reqwest::Response> {
    let status = resp.status();
    if status.is_success() {
        return Ok(resp);
    }
    let body = resp.text().await.unwrap_or_default();
    Err(Error::Upstream {
        service: SERVICE,
        status: status.as_u16(),
        body,
    })
}

#[async_trait]
impl ChannelClient for GraphApiClient {
    fn channel_type(&self) -> ChannelType {
        ChannelType::Whatsapp
    }

    #[instrument(skip_all, fields(kind = message.kind(), phone_number_id = %credentials.phone_number_id))]
    async fn send(
        &self,
        credentials: &ChannelCredentials,
        message: &OutboundMessage,
        cancel: &CancellationToken,
    ) -> Result<SendReceipt> {
        let receipt = self
            .retry
            .run(cancel, "whatsapp.send", || self.post_message(credentials, message))
            .await?;
        debug!(ids = ?receipt.message_ids, "whatsapp message accepted");
        Ok(receipt)
    }

    #[instrument(skip_all, fields(media_id = %media_id))]
    async fn fetch_media_metadata(
        &self,
        credentials: &ChannelCredentials,
        media_id: &str,
        cancel: &CancellationToken,
    ) -> Result<MediaMetadata> {
        if media_id.is_empty() {
            return Err(Error::validation("media id is empty"));
        }
        self.retry
            .run(cancel, "whatsapp.media_metadata", || {
                self.get_metadata(credentials, media_id)
            })
            .await
    }

    #[instrument(skip_all, fields(media_id = %metadata.id))]
    async fn download_media(
        &self,
        credentials: &ChannelCredentials,
        metadata: &MediaMetadata,
        cancel: &CancellationToken,
    ) -> Result<Bytes> {
        let bytes = self
            .retry
            .run(cancel, "whatsapp.media_download", || {
                self.get_bytes(credentials, &metadata.url)
            })
            .await?;
        debug!(size = bytes.len(), "downloaded whatsapp media");
        Ok(bytes)
    }
}

#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests {
    use {mockito::Matcher, secrecy::Secret, serde_json::json};

    use super::*;

    fn creds() -> ChannelCredentials {
        ChannelCredentials {
            access_token: Secret::new("tok".into()),
            phone_number_id: "123".into(),
        }
    }

    fn client(server: &mockito::Server) -> GraphApiClient {
        GraphApiClient::with_http(
            reqwest::Client::new(),
            server.url(),
            "v21.0",
            RetryPolicy {
                max_attempts: 3,
                base_delay_ms: 1,
                max_delay_ms: 2,
            },
        )
    }

    #[tokio::test]
    async fn send_text_posts_envelope_with_bearer() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("POST", "/v21.0/123/messages")
            .match_header("authorization", "Bearer tok")
            .match_body(Matcher::PartialJson(json!({
                "messaging_product": "whatsapp",
                "to": "15550001111",
                "type": "text",
                "text": { "body": "hi there" }
            })))
            .with_status(200)
            .with_body(r#"{"messaging_product":"whatsapp","messages":[{"id":"wamid.OUT"}]}"#)
            .expect(1)
            .create_async()
            .await;

        let receipt = client(&server)
            .send(
                &creds(),
                &OutboundMessage::text("15550001111", "hi there"),
                &CancellationToken::new(),
            )
            .await
            .unwrap();

        assert_eq!(receipt.message_ids, vec!["wamid.OUT".to_string()]);
        mock.assert_async().await;
    }

    #[tokio::test]
    async fn server_errors_are_retried_up_to_the_limit() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("POST", "/v21.0/123/messages")
            .with_status(503)
            .with_body("unavailable")
            .expect(3)
            .create_async()
            .await;

        let err = client(&server)
            .send(
                &creds(),
                &OutboundMessage::text("1", "x"),
                &CancellationToken::new(),
            )
            .await
            .unwrap_err();

        assert!(matches!(err, Error::Upstream { status: 503, .. }));
        mock.assert_async().await;
    }

    #[tokio::test]
    async fn client_errors_are_not_retried() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("POST", "/v21.0/123/messages")
            .with_status(400)
            .with_body(r#"{"error":{"message":"bad recipient"}}"#)
            .expect(1)
            .create_async()
            .await;

        let err = client(&server)
            .send(
                &creds(),
                &OutboundMessage::text("1", "x"),
                &CancellationToken::new(),
            )
            .await
            .unwrap_err();

        assert_eq!(err.status_code(), 502);
        assert!(err.to_string().contains("bad recipient"));
        mock.assert_async().await;
    }

    #[tokio::test]
    async fn read_receipt_without_ids_succeeds() {
        let mut server = mockito::Server::new_async().await;
        let _mock = server
            .mock("POST", "/v21.0/123/messages")
            .match_body(Matcher::PartialJson(json!({ "status": "read", "message_id": "wamid.IN" })))
            .with_status(200)
            .with_body(r#"{"success":true}"#)
            .create_async()
            .await;

        let receipt = client(&server)
            .send(
                &creds(),
                &OutboundMessage::MarkRead {
                    message_id: "wamid.IN".into(),
                },
                &CancellationToken::new(),
            )
            .await
            .unwrap();
        assert!(receipt.message_ids.is_empty());
    }

    #[tokio::test]
    async fn media_download_takes_two_hops() {
        let mut server = mockito::Server::new_async().await;
        let download_url = format!("{}/files/abc", server.url());
        let meta = server
            .mock("GET", "/v21.0/media-1")
            .match_header("authorization", "Bearer tok")
            .with_status(200)
            .with_body(
                json!({
                    "id": "media-1",
                    "url": download_url,
                    "mime_type": "image/jpeg",
                    "sha256": "deadbeef",
                    "file_size": 4
                })
                .to_string(),
            )
            .create_async()
            .await;
        let file = server
            .mock("GET", "/files/abc")
            .match_header("authorization", "Bearer tok")
            .with_status(200)
            .with_body(b"\xff\xd8\xff\xe0")
            .create_async()
            .await;

        let client = client(&server);
        let cancel = CancellationToken::new();
        let metadata = client
            .fetch_media_metadata(&creds(), "media-1", &cancel)
            .await
            .unwrap();
        assert_eq!(metadata.mime_type, "image/jpeg");
        assert_eq!(metadata.file_size, Some(4));

        let bytes = client.download_media(&creds(), &metadata, &cancel).await.unwrap();
        assert_eq!(&bytes[..], b"\xff\xd8\xff\xe0");
        meta.assert_async().await;
        file.assert_async().await;
    }

    #[tokio::test]
    async fn cancelled_token_short_circuits() {
        let server = mockito::Server::new_async().await;
        let cancel = CancellationToken::new();
        cancel.cancel();
        let err = client(&server)
            .fetch_media_metadata(&creds(), "media-1", &cancel)
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Cancelled));
    }

    #[tokio::test]
    async fn empty_media_id_is_rejected() {
        let server = mockito::Server::new_async().await;
        let err = client(&server)
            .fetch_media_metadata(&creds(), "", &CancellationToken::new())
            .await
            .unwrap_err();
        assert_eq!(err.status_code(), 400);
    }
}
