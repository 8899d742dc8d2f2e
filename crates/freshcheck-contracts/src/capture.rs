use std::collections::HashSet;
use std::sync::{Arc, Mutex};

use chrono::{DateTime, Utc};
use thiserror::Error;

/// Upload ceiling for user-selected files.
pub const MAX_MEDIA_BYTES: usize = 10 * 1024 * 1024;

/// JPEG quality used when snapshotting a camera frame.
pub const CAMERA_JPEG_QUALITY: u8 = 90;

const DISPLAY_URI_PREFIX: &str = "blob:freshcheck/";

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum MediaError {
    #[error("Camera access denied. Please allow camera access to capture images.")]
    PermissionDenied,
    #[error("Camera not available. Your device doesn't support camera access.")]
    DeviceUnavailable,
    #[error("Camera stream is not running.")]
    StreamNotStarted,
    #[error("Camera frame capture failed: {0}")]
    FrameCapture(String),
    #[error("Invalid file type. Please upload an image file.")]
    InvalidMediaType,
    #[error("File too large. Please upload an image smaller than 10MB.")]
    MediaTooLarge,
    #[error("The selected file is empty.")]
    EmptyMedia,
}

/// An acquired still image. Immutable once built; cloning shares the bytes.
#[derive(Debug, Clone, PartialEq)]
pub struct CapturedImage {
    bytes: Arc<[u8]>,
    mime_type: String,
    file_name: String,
    created_at: DateTime<Utc>,
    display_uri: String,
}

impl CapturedImage {
    pub fn new(
        bytes: Vec<u8>,
        mime_type: impl Into<String>,
        file_name: impl Into<String>,
        display_uri: impl Into<String>,
    ) -> Self {
        Self {
            bytes: Arc::from(bytes),
            mime_type: mime_type.into(),
            file_name: file_name.into(),
            created_at: Utc::now(),
            display_uri: display_uri.into(),
        }
    }

    pub fn bytes(&self) -> &[u8] {
        &self.bytes
    }

    pub fn len(&self) -> usize {
        self.bytes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }

    pub fn mime_type(&self) -> &str {
        &self.mime_type
    }

    pub fn file_name(&self) -> &str {
        &self.file_name
    }

    pub fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }

    pub fn display_uri(&self) -> &str {
        &self.display_uri
    }
}

/// Tracks which local display URIs are still live.
///
/// Every URI handed out by `mint` stays live until `revoke` is called, so a
/// leaked preview shows up as an extra entry in `live_count`.
#[derive(Debug, Clone, Default)]
pub struct DisplayUriRegistry {
    live: Arc<Mutex<HashSet<String>>>,
}

impl DisplayUriRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn mint(&self) -> String {
        let uri = format!("{DISPLAY_URI_PREFIX}{}", uuid::Uuid::new_v4());
        if let Ok(mut live) = self.live.lock() {
            live.insert(uri.clone());
        }
        uri
    }

    pub fn revoke(&self, uri: &str) -> bool {
        self.live
            .lock()
            .map(|mut live| live.remove(uri))
            .unwrap_or(false)
    }

    pub fn is_live(&self, uri: &str) -> bool {
        self.live
            .lock()
            .map(|live| live.contains(uri))
            .unwrap_or(false)
    }

    pub fn live_count(&self) -> usize {
        self.live.lock().map(|live| live.len()).unwrap_or(0)
    }
}

pub fn is_image_content_type(content_type: &str) -> bool {
    content_type
        .trim()
        .to_ascii_lowercase()
        .starts_with("image/")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn registry_tracks_minted_uris_until_revoked() {
        let registry = DisplayUriRegistry::new();
        let first = registry.mint();
        let second = registry.mint();
        assert!(first.starts_with("blob:freshcheck/"));
        assert_ne!(first, second);
        assert_eq!(registry.live_count(), 2);

        assert!(registry.revoke(&first));
        assert!(!registry.revoke(&first));
        assert!(!registry.is_live(&first));
        assert!(registry.is_live(&second));
        assert_eq!(registry.live_count(), 1);
    }

    #[test]
    fn content_type_check_requires_image_prefix() {
        assert!(is_image_content_type("image/png"));
        assert!(is_image_content_type(" IMAGE/HEIC"));
        assert!(!is_image_content_type("application/pdf"));
        assert!(!is_image_content_type(""));
    }

    #[test]
    fn captured_image_clone_shares_bytes() {
        let image = CapturedImage::new(vec![1, 2, 3], "image/png", "a.png", "blob:x");
        let copy = image.clone();
        assert_eq!(copy.bytes(), &[1, 2, 3]);
        assert_eq!(copy.len(), 3);
        assert_eq!(copy.display_uri(), "blob:x");
        assert_eq!(copy.created_at(), image.created_at());
    }
}
