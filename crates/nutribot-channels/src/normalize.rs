//! Conversion of every inbound event shape into an [`IncomingTurn`].

use nutribot_common::{
    Attachments, ChatKind, DocumentAttachment, Error, IdentityKey, IncomingTurn, PhotoAttachment,
    PhotoVariant, Result, SenderIdentity, TurnOrigin,
};

use crate::telegram::{TgCallbackQuery, TgMessage, Update};

/// Added to the originating message id to form a callback turn's origin id.
/// Telegram message ids are 32-bit, so the shifted range never overlaps them.
pub const CALLBACK_ORIGIN_OFFSET: i64 = 1_000_000_000_000;

/// Suffix of the chat id synthesized for API callers that don't supply one.
pub const GENERAL_CHAT_SUFFIX: &str = "__general_chat";

/// A conversational request made through the HTTP API.
#[derive(Debug, Clone, Default)]
pub struct ExternalTurnRequest {
    pub external_user_id: String,
    pub external_chat_id: Option<String>,
    pub username: Option<String>,
    pub name: Option<String>,
    pub email: Option<String>,
    pub message_text: Option<String>,
    pub images: Vec<Vec<u8>>,
}

#[derive(Debug, Clone)]
pub enum InboundEvent {
    Message(TgMessage),
    Callback(TgCallbackQuery),
    External(ExternalTurnRequest),
}

impl InboundEvent {
    /// Pick the part of a webhook update we handle. Other update kinds yield `None`.
    pub fn from_update(update: Update) -> Option<Self> {
        if let Some(callback) = update.callback_query {
            return Some(Self::Callback(callback));
        }
        update.message.map(Self::Message)
    }
}

pub fn general_chat_id(external_user_id: &str) -> String {
    format!("{external_user_id}{GENERAL_CHAT_SUFFIX}")
}

pub fn normalize(event: InboundEvent) -> Result<IncomingTurn> {
    let turn = match event {
        InboundEvent::Message(message) => from_message(message)?,
        InboundEvent::Callback(callback) => from_callback(callback)?,
        InboundEvent::External(request) => from_external(request)?,
    };
    if !turn.has_text() && turn.attachments.is_empty() {
        return Err(Error::Validation(
            "turn has neither text nor attachments".into(),
        ));
    }
    Ok(turn)
}

fn from_message(message: TgMessage) -> Result<IncomingTurn> {
    let from = message
        .from
        .as_ref()
        .ok_or_else(|| Error::Validation("message has no sender".into()))?;
    if from.is_bot {
        return Err(Error::Validation("message sent by a bot".into()));
    }

    let mut sender = SenderIdentity::new(IdentityKey::Telegram(from.id.to_string()));
    sender.username = non_empty(from.username.clone());
    sender.first_name = non_empty(from.first_name.clone());

    let text = non_empty(message.text.clone()).or_else(|| non_empty(message.caption.clone()));

    let mut attachments = Attachments::default();
    if let Some(sizes) = message.photo.filter(|sizes| !sizes.is_empty()) {
        attachments.photos.push(PhotoAttachment {
            variants: sizes
                .into_iter()
                .map(|size| PhotoVariant {
                    file_id: size.file_id,
                    width: size.width,
                    height: size.height,
                    file_size: size.file_size,
                })
                .collect(),
        });
    }
    if let Some(document) = message.document {
        attachments.documents.push(DocumentAttachment {
            file_id: non_empty(document.file_id),
            mime_type: document.mime_type,
            file_name: document.file_name,
        });
    }

    Ok(IncomingTurn {
        sender,
        external_chat_id: message.chat.id.to_string(),
        chat_kind: ChatKind::from_transport(&message.chat.kind),
        text,
        attachments,
        origin_message_id: Some(message.message_id),
        media_group_id: message.media_group_id,
        origin: TurnOrigin::Telegram {
            chat_id: message.chat.id,
            callback_id: None,
        },
    })
}

/// A button press is replayed as if the presser had typed the button's payload
/// into the chat the button was shown in.
fn from_callback(callback: TgCallbackQuery) -> Result<IncomingTurn> {
    let original = callback
        .message
        .ok_or_else(|| Error::Validation("callback has no originating message".into()))?;
    let payload = non_empty(callback.data)
        .ok_or_else(|| Error::Validation("callback has no payload".into()))?;
    if callback.from.is_bot {
        return Err(Error::Validation("callback sent by a bot".into()));
    }

    let mut sender = SenderIdentity::new(IdentityKey::Telegram(callback.from.id.to_string()));
    sender.username = non_empty(callback.from.username);
    sender.first_name = non_empty(callback.from.first_name);

    Ok(IncomingTurn {
        sender,
        external_chat_id: original.chat.id.to_string(),
        chat_kind: ChatKind::from_transport(&original.chat.kind),
        text: Some(payload),
        attachments: Attachments::default(),
        origin_message_id: Some(original.message_id + CALLBACK_ORIGIN_OFFSET),
        media_group_id: None,
        origin: TurnOrigin::Telegram {
            chat_id: original.chat.id,
            callback_id: Some(callback.id),
        },
    })
}

fn from_external(request: ExternalTurnRequest) -> Result<IncomingTurn> {
    let user_id = request.external_user_id.trim().to_string();
    if user_id.is_empty() {
        return Err(Error::Validation("user id is required".into()));
    }
    let chat_id = non_empty(request.external_chat_id)
        .map(|c| c.trim().to_string())
        .unwrap_or_else(|| general_chat_id(&user_id));

    let mut sender = SenderIdentity::new(IdentityKey::Web(user_id));
    sender.username = non_empty(request.username.map(|u| u.trim().to_string()));
    sender.first_name = non_empty(request.name.map(|n| n.trim().to_string()));
    sender.email = non_empty(request.email.map(|e| e.trim().to_lowercase()));

    Ok(IncomingTurn {
        sender,
        external_chat_id: chat_id,
        chat_kind: ChatKind::External,
        text: non_empty(request.message_text),
        attachments: Attachments {
            inline_images: request.images.into_iter().filter(|i| !i.is_empty()).collect(),
            ..Default::default()
        },
        origin_message_id: None,
        media_group_id: None,
        origin: TurnOrigin::Api,
    })
}

fn non_empty(value: Option<String>) -> Option<String> {
    value.filter(|v| !v.trim().is_empty())
}
