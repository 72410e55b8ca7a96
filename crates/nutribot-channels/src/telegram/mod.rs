//! Telegram Bot API integration.

pub mod markdown;
pub mod update;

#[cfg(feature = "telegram")]
mod transport;

#[cfg(feature = "telegram")]
pub use transport::TelegramTransport;

pub use update::{TgCallbackQuery, TgChat, TgDocument, TgMessage, TgPhotoSize, TgUser, Update};
