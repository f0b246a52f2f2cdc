//! Media offload: channel media download, blob storage, public URLs.

pub mod blob;
pub mod mime;
pub mod naming;
pub mod pipeline;

pub use {
    blob::{BlobStore, FsBlobStore, MemoryBlobStore, StoredObject},
    naming::{BucketScope, bucket_name, unique_object_name},
    pipeline::{DownloadedMedia, InlineFile, MediaPipeline, MediaRequest, UploadResult},
};
