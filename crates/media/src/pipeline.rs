//! Media pipeline: channel download, blob upload, attachment construction.

use std::sync::Arc;

use {
    bytes::Bytes,
    parley_channels::{ChannelClient, ChannelCredentials, MediaMetadata},
    parley_common::{Error, MessageKind, Result, cancellable, now_ms},
    parley_conversations::{Attachment, AttachmentKind},
    serde::Serialize,
    tokio_util::sync::CancellationToken,
    tracing::{debug, info},
};

use crate::{
    blob::BlobStore,
    mime::{OCTET_STREAM, base_content_type, extension_for_content_type},
    naming::{BucketScope, bucket_name, unique_object_name},
};

/// A file handed to the pipeline by a caller.
#[derive(Debug, Clone)]
pub struct InlineFile {
    pub filename: String,
    pub content_type: String,
    pub bytes: Bytes,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct UploadResult {
    pub url: String,
    pub object_name: String,
    pub bucket: String,
    pub size: u64,
    pub content_type: String,
    pub uploaded_at: i64,
}

/// Bytes fetched from a channel together with their metadata.
#[derive(Debug, Clone)]
pub struct DownloadedMedia {
    pub metadata: MediaMetadata,
    pub bytes: Bytes,
}

/// What to ingest for one media message.
#[derive(Debug, Clone)]
pub struct MediaRequest<'a> {
    pub organization_code: &'a str,
    pub conversation_id: &'a str,
    pub media_id: &'a str,
    pub kind: MessageKind,
    /// Original filename, when the channel reported one (documents).
    pub filename: Option<&'a str>,
}

pub struct MediaPipeline {
    blobs: Arc<dyn BlobStore>,
    bucket_prefix: String,
}

impl MediaPipeline {
    pub fn new(blobs: Arc<dyn BlobStore>, bucket_prefix: impl Into<String>) -> Self {
        Self {
            blobs,
            bucket_prefix: bucket_prefix.into(),
        }
    }

    pub fn blobs(&self) -> &Arc<dyn BlobStore> {
        &self.blobs
    }

    /// Upload a caller-supplied file into the conversation's bucket.
    pub async fn upload_inline(
        &self,
        organization_code: &str,
        conversation_id: &str,
        file: InlineFile,
        cancel: &CancellationToken,
    ) -> Result<UploadResult> {
        self.upload_from_bytes(
            organization_code,
            &BucketScope::Conversation(conversation_id.to_string()),
            &file.filename,
            &file.content_type,
            file.bytes,
            cancel,
        )
        .await
    }

    /// Ensure the bucket, store the bytes under a unique name and make them public.
    pub async fn upload_from_bytes(
        &self,
        organization_code: &str,
        scope: &BucketScope,
        filename: &str,
        content_type: &str,
        bytes: Bytes,
        cancel: &CancellationToken,
    ) -> Result<UploadResult> {
        if bytes.is_empty() {
            return Err(Error::validation("upload body is empty"));
        }
        if organization_code.trim().is_empty() {
            return Err(Error::validation("organization code is required"));
        }
        let bucket = bucket_name(&self.bucket_prefix, organization_code, scope);
        let content_type = match base_content_type(content_type) {
            "" => OCTET_STREAM.to_string(),
            ct => ct.to_string(),
        };
        let uploaded_at = now_ms();
        let object_name = unique_object_name(filename, uploaded_at);
        let size = bytes.len() as u64;

        cancellable(cancel, self.blobs.ensure_bucket(&bucket)).await?;
        cancellable(
            cancel,
            self.blobs
                .put_object(&bucket, &object_name, bytes, &content_type),
        )
        .await?;
        cancellable(cancel, self.blobs.set_public_read(&bucket, &object_name)).await?;

        let url = self.blobs.public_url(&bucket, &object_name);
        info!(bucket, object = %object_name, size, "uploaded media");
        Ok(UploadResult {
            url,
            object_name,
            bucket,
            size,
            content_type,
            uploaded_at,
        })
    }

    /// Two hops: resolve the media id to a signed URL, then fetch the bytes.
    /// Either hop failing aborts the download.
    pub async fn download_inline(
        &self,
        channel: &dyn ChannelClient,
        credentials: &ChannelCredentials,
        media_id: &str,
        cancel: &CancellationToken,
    ) -> Result<DownloadedMedia> {
        let metadata = channel
            .fetch_media_metadata(credentials, media_id, cancel)
            .await?;
        let bytes = channel.download_media(credentials, &metadata, cancel).await?;
        debug!(media_id, size = bytes.len(), mime_type = %metadata.mime_type, "fetched channel media");
        Ok(DownloadedMedia { metadata, bytes })
    }

    /// Download channel media, re-upload it to the conversation's bucket and
    /// describe it as an attachment.
    pub async fn ingest(
        &self,
        channel: &dyn ChannelClient,
        credentials: &ChannelCredentials,
        request: &MediaRequest<'_>,
        cancel: &CancellationToken,
    ) -> Result<(UploadResult, Attachment)> {
        let attachment_kind = AttachmentKind::for_message_kind(request.kind).ok_or_else(|| {
            Error::validation(format!("{} messages carry no media", request.kind))
        })?;
        let downloaded = self
            .download_inline(channel, credentials, request.media_id, cancel)
            .await?;

        let content_type = if downloaded.metadata.mime_type.is_empty() {
            OCTET_STREAM
        } else {
            downloaded.metadata.mime_type.as_str()
        };
        let filename = match request.filename.filter(|f| !f.trim().is_empty()) {
            Some(original) => original.to_string(),
            None => format!(
                "{}_{}.{}",
                request.kind,
                request.media_id,
                extension_for_content_type(content_type)
            ),
        };

        let upload = self
            .upload_from_bytes(
                request.organization_code,
                &BucketScope::Conversation(request.conversation_id.to_string()),
                &filename,
                content_type,
                downloaded.bytes,
                cancel,
            )
            .await?;
        let attachment = Attachment::new(
            attachment_kind,
            upload.url.clone(),
            filename,
            upload.size,
            upload.content_type.clone(),
        );
        Ok((upload, attachment))
    }
}
