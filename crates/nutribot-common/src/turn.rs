//! Canonical inbound turn shared by every frontend.

use serde::{Deserialize, Serialize};

use crate::types::{ChatKind, ContentType, IdentityKey, MessageRole};

/// Who sent a turn, plus whatever profile hints the frontend knows.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SenderIdentity {
    pub key: IdentityKey,
    pub username: Option<String>,
    pub first_name: Option<String>,
    pub email: Option<String>,
}

impl SenderIdentity {
    pub fn new(key: IdentityKey) -> Self {
        Self {
            key,
            username: None,
            first_name: None,
            email: None,
        }
    }
}

/// Where a turn came from, and therefore where its reply goes.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum TurnOrigin {
    /// Delivered back over the chat transport to `chat_id`.
    Telegram {
        chat_id: i64,
        callback_id: Option<String>,
    },
    /// Returned to the HTTP caller.
    Api,
}

/// One size variant of a photo as reported by the transport.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PhotoVariant {
    pub file_id: String,
    pub width: u32,
    pub height: u32,
    pub file_size: Option<u64>,
}

/// A single photo. Variants are in the transport's ascending-size order.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PhotoAttachment {
    pub variants: Vec<PhotoVariant>,
}

impl PhotoAttachment {
    pub fn largest(&self) -> Option<&PhotoVariant> {
        self.variants.last()
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DocumentAttachment {
    pub file_id: Option<String>,
    pub mime_type: Option<String>,
    pub file_name: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Attachments {
    pub photos: Vec<PhotoAttachment>,
    pub documents: Vec<DocumentAttachment>,
    /// Image bytes supplied directly by an API caller.
    pub inline_images: Vec<Vec<u8>>,
}

impl Attachments {
    pub fn is_empty(&self) -> bool {
        self.photos.is_empty() && self.documents.is_empty() && self.inline_images.is_empty()
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IncomingTurn {
    pub sender: SenderIdentity,
    pub external_chat_id: String,
    pub chat_kind: ChatKind,
    pub text: Option<String>,
    pub attachments: Attachments,
    pub origin_message_id: Option<i64>,
    pub media_group_id: Option<String>,
    pub origin: TurnOrigin,
}

impl IncomingTurn {
    pub fn content_type(&self) -> ContentType {
        if !self.attachments.photos.is_empty() || !self.attachments.inline_images.is_empty() {
            ContentType::Photo
        } else if !self.attachments.documents.is_empty() {
            ContentType::Document
        } else {
            ContentType::Text
        }
    }

    pub fn has_text(&self) -> bool {
        self.text.as_deref().is_some_and(|t| !t.trim().is_empty())
    }

    /// The command token (without the leading `/` or any `@botname` suffix), lowercased.
    pub fn command(&self) -> Option<String> {
        let text = self.text.as_deref()?.trim_start();
        let token = text.strip_prefix('/')?.split_whitespace().next()?;
        let name = token.split('@').next().unwrap_or(token);
        if name.is_empty() {
            return None;
        }
        Some(name.to_ascii_lowercase())
    }

    /// Arguments following the command token.
    pub fn command_args(&self) -> Vec<String> {
        self.text
            .as_deref()
            .map(|t| t.split_whitespace().skip(1).map(str::to_string).collect())
            .unwrap_or_default()
    }

    /// Fold the fragments of one media group into a single turn.
    ///
    /// Identity, chat and origin come from the first fragment; the first non-empty
    /// text wins; attachments are concatenated.
    pub fn consolidate(fragments: Vec<IncomingTurn>) -> Option<IncomingTurn> {
        let mut iter = fragments.into_iter();
        let mut merged = iter.next()?;
        for fragment in iter {
            if !merged.has_text() && fragment.has_text() {
                merged.text = fragment.text;
            }
            merged.attachments.photos.extend(fragment.attachments.photos);
            merged
                .attachments
                .documents
                .extend(fragment.attachments.documents);
            merged
                .attachments
                .inline_images
                .extend(fragment.attachments.inline_images);
        }
        Some(merged)
    }
}

/// One prior turn as handed to the agent.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HistoryEntry {
    pub role: MessageRole,
    pub text: String,
}
