//! Local asset representation, pre-upload validation, inline encoding,
//! and storage key derivation.

use std::sync::atomic::{AtomicU64, Ordering};

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine as _;
use bytes::Bytes;

use crate::error::CoreError;
use crate::types::UserId;

/// Maximum accepted asset payload (10 MiB).
pub const MAX_UPLOAD_BYTES: usize = 10 * 1024 * 1024;

/// Storage prefix for submitted originals.
pub const ORIGINALS_PREFIX: &str = "originals";

/// Fallback extension when the file name carries none.
const DEFAULT_EXTENSION: &str = "png";

/// Per-process sequence appended to storage keys so that items of one
/// batch uploaded within the same millisecond never collide.
static KEY_SEQUENCE: AtomicU64 = AtomicU64::new(0);

/// An image selected by the user but not yet uploaded.
#[derive(Debug, Clone)]
pub struct LocalAsset {
    pub file_name: String,
    /// MIME type as reported by the picker, e.g. `image/png`.
    pub content_type: String,
    pub bytes: Bytes,
}

impl LocalAsset {
    pub fn new(
        file_name: impl Into<String>,
        content_type: impl Into<String>,
        bytes: impl Into<Bytes>,
    ) -> Self {
        Self {
            file_name: file_name.into(),
            content_type: content_type.into(),
            bytes: bytes.into(),
        }
    }

    /// File extension from the name, lowercased; `png` when absent.
    pub fn extension(&self) -> String {
        self.file_name
            .rsplit_once('.')
            .map(|(_, ext)| ext.to_ascii_lowercase())
            .filter(|ext| !ext.is_empty())
            .unwrap_or_else(|| DEFAULT_EXTENSION.to_string())
    }
}

/// Validate an asset before any upload is attempted.
///
/// - The reported MIME type must be `image/*`.
/// - The payload must be non-empty and at most `max_bytes`.
/// - The payload header must sniff as a known image format (the picker
///   type is advisory only).
pub fn validate_asset(asset: &LocalAsset, max_bytes: usize) -> Result<(), CoreError> {
    if !asset.content_type.starts_with("image/") {
        return Err(CoreError::Validation(format!(
            "'{}' is not an image ({})",
            asset.file_name, asset.content_type
        )));
    }

    if asset.bytes.is_empty() {
        return Err(CoreError::Validation(format!(
            "'{}' is empty",
            asset.file_name
        )));
    }

    if asset.bytes.len() > max_bytes {
        return Err(CoreError::Validation(format!(
            "'{}' exceeds the {} MiB upload limit",
            asset.file_name,
            max_bytes / (1024 * 1024)
        )));
    }

    image::guess_format(&asset.bytes).map_err(|_| {
        CoreError::Validation(format!(
            "'{}' does not contain a recognizable image",
            asset.file_name
        ))
    })?;

    Ok(())
}

/// Encode an asset as a self-contained `data:` URI.
///
/// Used as the upload fallback when durable storage is unavailable; the
/// result is indistinguishable from a public URL to downstream
/// components.
pub fn data_uri(asset: &LocalAsset) -> Result<String, CoreError> {
    if asset.content_type.is_empty() {
        return Err(CoreError::Encoding(format!(
            "'{}' has no content type to embed",
            asset.file_name
        )));
    }
    if asset.bytes.is_empty() {
        return Err(CoreError::Encoding(format!(
            "'{}' has no payload to embed",
            asset.file_name
        )));
    }

    Ok(format!(
        "data:{};base64,{}",
        asset.content_type,
        BASE64.encode(&asset.bytes)
    ))
}

/// Derive a caller-unique storage key for an asset.
///
/// Namespaced by user id, with a millisecond timestamp plus a
/// monotonically increasing per-process sequence as the distinguishing
/// suffix: `originals/{user_id}/{millis}-{seq}.{ext}`.
pub fn storage_key(user_id: UserId, asset: &LocalAsset) -> String {
    let millis = chrono::Utc::now().timestamp_millis();
    let seq = KEY_SEQUENCE.fetch_add(1, Ordering::Relaxed);
    format!(
        "{ORIGINALS_PREFIX}/{user_id}/{millis}-{seq}.{}",
        asset.extension()
    )
}
