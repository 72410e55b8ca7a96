pub mod error;
pub mod turn;
pub mod types;

pub use error::{Error, Result};
pub use turn::{
    Attachments, DocumentAttachment, HistoryEntry, IncomingTurn, PhotoAttachment, PhotoVariant,
    SenderIdentity, TurnOrigin,
};
pub use types::{ChatKind, ContentType, IdentityKey, MessageRole};
