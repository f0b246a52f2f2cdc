//! Bucket and object naming.

use rand::{Rng, distr::Alphanumeric};

use crate::mime::sanitize_filename;

const SUFFIX_LEN: usize = 6;

/// Where an upload lands.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BucketScope {
    /// One bucket for the whole organization.
    Organization,
    /// A bucket per conversation.
    Conversation(String),
}

/// Bucket names are lowercase `[a-z0-9-]`.
pub fn bucket_name(prefix: &str, organization_code: &str, scope: &BucketScope) -> String {
    let raw = match scope {
        BucketScope::Organization => format!("{prefix}-{organization_code}"),
        BucketScope::Conversation(id) => format!("{prefix}-{organization_code}-{id}"),
    };
    let mut name = String::with_capacity(raw.len());
    for c in raw.chars() {
        let c = c.to_ascii_lowercase();
        if c.is_ascii_alphanumeric() {
            name.push(c);
        } else if !name.ends_with('-') {
            name.push('-');
        }
    }
    name.trim_matches('-').to_string()
}

/// `<stem>_<timestamp_ms>_<random>.<ext>`, unique per upload even for
/// identical filenames within the same millisecond.
pub fn unique_object_name(filename: &str, timestamp_ms: i64) -> String {
    let filename = sanitize_filename(filename);
    let (stem, ext) = match filename.rsplit_once('.') {
        Some((stem, ext)) if !stem.is_empty() && !ext.is_empty() => (stem, Some(ext)),
        _ => (filename.as_str(), None),
    };
    let suffix: String = rand::rng()
        .sample_iter(&Alphanumeric)
        .take(SUFFIX_LEN)
        .map(|b| char::from(b).to_ascii_lowercase())
        .collect();
    match ext {
        Some(ext) => format!("{stem}_{timestamp_ms}_{suffix}.{}", ext.to_ascii_lowercase()),
        None => format!("{stem}_{timestamp_ms}_{suffix}"),
    }
}
