use std::sync::Arc;

use nutribot_channels::FileSource;
use nutribot_common::{Attachments, DocumentAttachment};
use tracing::{debug, warn};

pub const UNREADABLE_IMAGE_GUIDANCE: &str = "I received an image document but couldn't process it. \
Please try sending the image again or send it as a photo.";

pub const NON_IMAGE_DOCUMENT_GUIDANCE: &str = "I can only analyze images of food. \
Please send me a photo or image file (JPEG, PNG, GIF, or WEBP) of the food you'd like me to analyze.";

const IMAGE_EXTENSIONS: &[&str] = &["jpg", "jpeg", "png", "gif", "webp"];

/// Outcome of resolving a turn's attachments.
///
/// `guidance` is only set when nothing usable (text or image) remains.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ResolvedMedia {
    pub images: Vec<Vec<u8>>,
    pub guidance: Option<String>,
}

pub fn is_image_document(document: &DocumentAttachment) -> bool {
    let by_mime = document
        .mime_type
        .as_deref()
        .is_some_and(|m| m.to_ascii_lowercase().starts_with("image/"));
    let by_extension = document
        .file_name
        .as_deref()
        .and_then(|name| name.rsplit_once('.'))
        .is_some_and(|(_, ext)| IMAGE_EXTENSIONS.contains(&ext.to_ascii_lowercase().as_str()));
    by_mime || by_extension
}

/// Picks eligible images out of a turn's attachments and fetches their bytes.
#[derive(Clone)]
pub struct MediaResolver {
    files: Option<Arc<dyn FileSource>>,
}

impl MediaResolver {
    pub fn new(files: Arc<dyn FileSource>) -> Self {
        Self { files: Some(files) }
    }

    /// A resolver that can only pass through inline images.
    pub fn inline_only() -> Self {
        Self { files: None }
    }

    pub async fn resolve(&self, attachments: &Attachments, text: Option<&str>) -> ResolvedMedia {
        let mut images = attachments.inline_images.clone();

        for photo in &attachments.photos {
            let Some(variant) = photo.largest() else {
                continue;
            };
            if let Some(bytes) = self.fetch(&variant.file_id).await {
                images.push(bytes);
            }
        }

        let mut guidance = None;
        for document in &attachments.documents {
            if !is_image_document(document) {
                debug!(mime = ?document.mime_type, name = ?document.file_name, "ignoring non-image document");
                guidance.get_or_insert(NON_IMAGE_DOCUMENT_GUIDANCE);
                continue;
            }
            match document.file_id.as_deref() {
                Some(file_id) => {
                    if let Some(bytes) = self.fetch(file_id).await {
                        images.push(bytes);
                    }
                }
                None => {
                    warn!(name = ?document.file_name, "image document has no file id");
                    guidance.get_or_insert(UNREADABLE_IMAGE_GUIDANCE);
                }
            }
        }

        let has_text = text.is_some_and(|t| !t.trim().is_empty());
        let guidance = if images.is_empty() && !has_text {
            guidance.map(str::to_string)
        } else {
            None
        };
        ResolvedMedia { images, guidance }
    }

    /// Fetch one file; any failure is logged and yields `None`.
    async fn fetch(&self, file_id: &str) -> Option<Vec<u8>> {
        let Some(files) = &self.files else {
            warn!(file_id, "no file source configured, skipping attachment");
            return None;
        };

        let location = match files.resolve_file(file_id).await {
            Ok(Some(location)) => location,
            Ok(None) => {
                warn!(file_id, "file has no download path");
                return None;
            }
            Err(e) => {
                warn!(file_id, "failed to resolve file: {e}");
                return None;
            }
        };

        match files.download_file(&location).await {
            Ok(bytes) if !bytes.is_empty() => Some(bytes),
            Ok(_) => {
                warn!(file_id, "downloaded file is empty");
                None
            }
            Err(e) => {
                warn!(file_id, "failed to download file: {e}");
                None
            }
        }
    }
}
