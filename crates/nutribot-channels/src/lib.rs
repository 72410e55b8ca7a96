pub mod delivery;
pub mod normalize;
pub mod telegram;
pub mod traits;

pub use delivery::deliver_reply;
pub use normalize::{
    CALLBACK_ORIGIN_OFFSET, ExternalTurnRequest, GENERAL_CHAT_SUFFIX, InboundEvent,
    general_chat_id, normalize,
};
pub use traits::{ChatTransport, FileSource, ReplyChoice, TextFormat};

#[cfg(feature = "telegram")]
pub use telegram::TelegramTransport;
