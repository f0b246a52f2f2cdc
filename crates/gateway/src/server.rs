use std::{collections::HashMap, net::SocketAddr, sync::Arc, time::Duration};

use {
    axum::{
        Json, Router,
        body::Bytes,
        extract::{DefaultBodyLimit, Path, Query, State},
        http::{HeaderMap, HeaderName, StatusCode, header},
        response::{IntoResponse, Response},
        routing::{get, post},
    },
    parley_common::{ChannelType, Error},
    parley_conversations::{CreateMessage, Message},
    parley_media::{
        InlineFile, UploadResult,
        mime::{OCTET_STREAM, extension_for_content_type, sanitize_filename},
    },
    parley_whatsapp_business::{SIGNATURE_HEADER, verify_signature, verify_webhook_subscription},
    serde_json::json,
    tokio_util::sync::CancellationToken,
    tower_http::{sensitive_headers::SetSensitiveRequestHeadersLayer, trace::TraceLayer},
    tracing::{info, warn},
};

use crate::gateway::{ChannelGateway, WebhookOutcome};

/// Maximum upload size: 25 MB (also used as the route-level body limit).
pub const MAX_UPLOAD_SIZE: usize = 25 * 1024 * 1024;

#[derive(Clone)]
pub struct AppState {
    pub gateway: Arc<ChannelGateway>,
    /// Upper bound on a single webhook delivery.
    pub request_timeout: Duration,
}

impl AppState {
    pub fn new(gateway: Arc<ChannelGateway>, request_timeout: Duration) -> Self {
        Self {
            gateway,
            request_timeout,
        }
    }
}

/// Error rendered as `{ "ok": false, "error": ... }` with the mapped status.
#[derive(Debug)]
pub struct ApiError(pub Error);

impl From<Error> for ApiError {
    fn from(err: Error) -> Self {
        Self(err)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = StatusCode::from_u16(self.0.status_code())
            .unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
        if status.is_server_error() {
            warn!(status = status.as_u16(), error = %self.0, "request failed");
        }
        (
            status,
            Json(json!({ "ok": false, "error": self.0.to_string() })),
        )
            .into_response()
    }
}

type ApiResult<T> = Result<T, ApiError>;

/// Build the gateway router (shared between production startup and tests).
pub fn build_router(state: AppState) -> Router {
    let sensitive = [
        header::AUTHORIZATION,
        HeaderName::from_static(SIGNATURE_HEADER),
    ];
    Router::new()
        .route("/health", get(health_handler))
        .route(
            "/webhooks/whatsapp/{organization_id}",
            get(verify_subscription_handler).post(webhook_handler),
        )
        .route(
            "/api/organizations/{organization_id}/conversations/{conversation_id}/uploads",
            post(upload_handler).layer(DefaultBodyLimit::max(MAX_UPLOAD_SIZE)),
        )
        .route(
            "/api/organizations/{organization_id}/messages",
            post(create_message_handler),
        )
        .route("/blobs/{bucket}/{*object}", get(blob_handler))
        .layer(TraceLayer::new_for_http())
        .layer(SetSensitiveRequestHeadersLayer::new(sensitive))
        .with_state(state)
}

/// Bind and serve until Ctrl-C.
pub async fn serve(bind: &str, port: u16, app: Router) -> parley_common::Result<()> {
    let addr: SocketAddr = format!("{bind}:{port}")
        .parse()
        .map_err(|e| Error::external(format!("invalid bind address {bind}:{port}"), e))?;
    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .map_err(|e| Error::external(format!("binding {addr}"), e))?;
    info!(%addr, "gateway listening");
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .map_err(|e| Error::external("serving http", e))
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        warn!(error = %e, "failed to listen for ctrl-c");
        std::future::pending::<()>().await;
    }
    info!("shutting down");
}

// ── Handlers ─────────────────────────────────────────────────────────────────

async fn health_handler() -> impl IntoResponse {
    Json(json!({
        "status": "ok",
        "version": env!("CARGO_PKG_VERSION"),
    }))
}

/// `GET /webhooks/whatsapp/{organization_id}`: subscription handshake.
async fn verify_subscription_handler(
    State(state): State<AppState>,
    Path(organization_id): Path<String>,
    Query(params): Query<HashMap<String, String>>,
) -> ApiResult<String> {
    let integration = state
        .gateway
        .directory()
        .integration(&organization_id, ChannelType::Whatsapp)
        .await?;
    verify_webhook_subscription(
        params.get("hub.mode").map(String::as_str),
        params.get("hub.verify_token").map(String::as_str),
        params.get("hub.challenge").map(String::as_str),
        &integration.verify_token,
    )
    .ok_or_else(|| {
        warn!(organization_id = %organization_id, "webhook subscription rejected");
        ApiError(Error::forbidden("verify token mismatch"))
    })
}

/// `POST /webhooks/whatsapp/{organization_id}`
///
/// The body is checked against `X-Hub-Signature-256` when the integration
/// has an app secret. Processing is cancelled when the client disconnects or
/// the request timeout elapses.
async fn webhook_handler(
    State(state): State<AppState>,
    Path(organization_id): Path<String>,
    headers: HeaderMap,
    body: Bytes,
) -> ApiResult<Json<serde_json::Value>> {
    let integration = state
        .gateway
        .directory()
        .integration(&organization_id, ChannelType::Whatsapp)
        .await?;
    if let Some(secret) = integration.signing_secret() {
        let signature = headers
            .get(SIGNATURE_HEADER)
            .and_then(|v| v.to_str().ok())
            .unwrap_or_default();
        if !verify_signature(&body, signature, secret) {
            warn!(organization_id = %organization_id, "rejected webhook with bad signature");
            return Err(Error::forbidden("invalid webhook signature").into());
        }
    }

    let cancel = CancellationToken::new();
    let _guard = cancel.clone().drop_guard();
    let outcome: WebhookOutcome = match tokio::time::timeout(
        state.request_timeout,
        state.gateway.handle_webhook(&organization_id, &body, &cancel),
    )
    .await
    {
        Ok(result) => result?,
        Err(_) => {
            warn!(
                organization_id = %organization_id,
                timeout = ?state.request_timeout,
                "webhook timed out"
            );
            return Err(Error::Cancelled.into());
        },
    };
    Ok(Json(json!({ "ok": true, "outcome": outcome })))
}

/// `POST /api/organizations/{organization_id}/conversations/{conversation_id}/uploads`
///
/// Raw body. `Content-Type` selects the stored type, `X-Filename` the name.
async fn upload_handler(
    State(state): State<AppState>,
    Path((organization_id, conversation_id)): Path<(String, String)>,
    headers: HeaderMap,
    body: Bytes,
) -> ApiResult<Json<UploadResult>> {
    let content_type = headers
        .get(header::CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .unwrap_or(OCTET_STREAM)
        .to_string();
    let filename = headers
        .get("x-filename")
        .and_then(|v| v.to_str().ok())
        .map(sanitize_filename)
        .unwrap_or_else(|| format!("upload.{}", extension_for_content_type(&content_type)));

    let cancel = CancellationToken::new();
    let _guard = cancel.clone().drop_guard();
    let upload = state
        .gateway
        .upload_to_conversation(
            &organization_id,
            &conversation_id,
            InlineFile {
                filename,
                content_type,
                bytes: body,
            },
            &cancel,
        )
        .await?;
    Ok(Json(upload))
}

/// `POST /api/organizations/{organization_id}/messages`
async fn create_message_handler(
    State(state): State<AppState>,
    Path(organization_id): Path<String>,
    Json(input): Json<CreateMessage>,
) -> ApiResult<(StatusCode, Json<Message>)> {
    let message = state
        .gateway
        .create_message(&organization_id, input)
        .await?;
    Ok((StatusCode::CREATED, Json(message)))
}

/// `GET /blobs/{bucket}/{*object}`: public-read objects only.
async fn blob_handler(
    State(state): State<AppState>,
    Path((bucket, object)): Path<(String, String)>,
) -> ApiResult<Response> {
    let stored = state
        .gateway
        .media()
        .blobs()
        .get_public_object(&bucket, &object)
        .await?
        .ok_or_else(|| Error::not_found("object", format!("{bucket}/{object}")))?;
    Ok(([(header::CONTENT_TYPE, stored.content_type)], stored.bytes).into_response())
}
