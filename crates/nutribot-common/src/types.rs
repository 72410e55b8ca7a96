use serde::{Deserialize, Serialize};
use std::fmt;

/// An external key under which a user can be found.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "kind", content = "value", rename_all = "snake_case")]
pub enum IdentityKey {
    Telegram(String),
    Web(String),
}

impl IdentityKey {
    pub fn value(&self) -> &str {
        match self {
            Self::Telegram(v) | Self::Web(v) => v,
        }
    }
}

impl fmt::Display for IdentityKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Telegram(v) => write!(f, "telegram:{v}"),
            Self::Web(v) => write!(f, "web:{v}"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChatKind {
    Private,
    Group,
    External,
}

impl ChatKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Private => "private",
            Self::Group => "group",
            Self::External => "external",
        }
    }

    /// Map a Telegram `chat.type` string. Supergroups and channels are treated as groups.
    pub fn from_transport(raw: &str) -> Self {
        match raw {
            "private" => Self::Private,
            "external" => Self::External,
            _ => Self::Group,
        }
    }

    /// Chats with exactly one human participant. Only these get an owner and command routing.
    pub fn is_single_party(&self) -> bool {
        matches!(self, Self::Private | Self::External)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MessageRole {
    User,
    Assistant,
}

impl MessageRole {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::User => "user",
            Self::Assistant => "assistant",
        }
    }

    pub fn parse(raw: &str) -> Option<Self> {
        match raw {
            "user" => Some(Self::User),
            "assistant" => Some(Self::Assistant),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ContentType {
    Text,
    Photo,
    Document,
}

impl ContentType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Text => "text",
            Self::Photo => "photo",
            Self::Document => "document",
        }
    }

    pub fn parse(raw: &str) -> Option<Self> {
        match raw {
            "text" => Some(Self::Text),
            "photo" => Some(Self::Photo),
            "document" => Some(Self::Document),
            _ => None,
        }
    }
}
