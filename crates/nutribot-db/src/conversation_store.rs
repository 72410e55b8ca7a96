use std::path::Path;
use std::sync::Arc;

use chrono::{DateTime, SecondsFormat, Utc};
use nutribot_common::{ChatKind, ContentType, Error, IdentityKey, MessageRole, Result};
use rusqlite::{Connection, OptionalExtension, Row, params};
use tracing::{info, warn};

use crate::migrations;
use crate::reconcile::{UserProfile, reconcile};

/// Store handle shared between the async layers.
pub type SharedStore = Arc<tokio::sync::Mutex<ConversationStore>>;

#[derive(Debug, Clone, PartialEq)]
pub struct User {
    pub id: i64,
    pub telegram_user_id: Option<String>,
    pub web_user_id: Option<String>,
    pub username: Option<String>,
    pub first_name: Option<String>,
    pub email: Option<String>,
    pub email_verified_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
}

impl User {
    pub fn profile(&self) -> UserProfile {
        UserProfile {
            telegram_user_id: self.telegram_user_id.clone(),
            web_user_id: self.web_user_id.clone(),
            username: self.username.clone(),
            first_name: self.first_name.clone(),
            email: self.email.clone(),
            email_verified_at: self.email_verified_at,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Chat {
    pub id: i64,
    pub external_chat_id: String,
    pub owner_user_id: Option<i64>,
    pub kind: ChatKind,
    pub created_at: DateTime<Utc>,
    pub last_active_at: DateTime<Utc>,
}

/// Persisted message row.
#[derive(Debug, Clone, PartialEq)]
pub struct StoredMessage {
    pub id: i64,
    pub chat_id: i64,
    pub role: MessageRole,
    pub content_type: ContentType,
    pub text: Option<String>,
    pub origin_message_id: Option<i64>,
    pub sender_user_id: Option<i64>,
    pub created_at: DateTime<Utc>,
}

const USER_COLUMNS: &str = "id, telegram_user_id, web_user_id, username, first_name, email,
     email_verified_at, created_at";
const CHAT_COLUMNS: &str = "id, external_chat_id, owner_user_id, kind, created_at, last_active_at";
const MESSAGE_COLUMNS: &str =
    "id, chat_id, role, content_type, text, origin_message_id, sender_user_id, created_at";

/// Users, chats and messages, plus the account, nutrition and linking tables
/// implemented in sibling modules.
pub struct ConversationStore {
    pub(crate) conn: Connection,
}

impl ConversationStore {
    pub fn open(db_path: &Path) -> Result<Self> {
        info!("opening conversation store at {}", db_path.display());
        let conn = Connection::open(db_path)
            .map_err(|e| Error::Persistence(format!("failed to open database: {e}")))?;

        conn.execute_batch("PRAGMA journal_mode=WAL; PRAGMA foreign_keys=ON;")
            .map_err(|e| Error::Persistence(format!("failed to set pragmas: {e}")))?;

        let store = Self { conn };
        migrations::run(&store.conn)?;
        Ok(store)
    }

    pub fn in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory()
            .map_err(|e| Error::Persistence(format!("failed to open in-memory database: {e}")))?;
        conn.execute_batch("PRAGMA foreign_keys=ON;")
            .map_err(|e| Error::Persistence(format!("failed to set pragmas: {e}")))?;

        let store = Self { conn };
        migrations::run(&store.conn)?;
        Ok(store)
    }

    pub fn into_shared(self) -> SharedStore {
        Arc::new(tokio::sync::Mutex::new(self))
    }

    // ── users ────────────────────────────────────────────────────────

    pub fn user(&self, user_id: i64) -> Result<Option<User>> {
        self.conn
            .query_row(
                &format!("SELECT {USER_COLUMNS} FROM users WHERE id = ?1"),
                params![user_id],
                user_from_row,
            )
            .optional()
            .map_err(|e| Error::Persistence(format!("failed to load user {user_id}: {e}")))
    }

    pub(crate) fn require_user(&self, user_id: i64) -> Result<User> {
        self.user(user_id)?
            .ok_or_else(|| Error::Persistence(format!("user {user_id} does not exist")))
    }

    pub fn find_user_by_key(&self, key: &IdentityKey) -> Result<Option<User>> {
        let column = key_column(key);
        self.conn
            .query_row(
                &format!("SELECT {USER_COLUMNS} FROM users WHERE {column} = ?1"),
                params![key.value()],
                user_from_row,
            )
            .optional()
            .map_err(|e| Error::Persistence(format!("failed to look up user by {key}: {e}")))
    }

    /// Find a user by any of `keys` (in order), filling empty profile fields
    /// from `hints`; create one seeded with every key and hint when none match.
    pub fn resolve_or_create_user(&self, keys: &[IdentityKey], hints: &UserProfile) -> Result<User> {
        if keys.is_empty() {
            return Err(Error::Validation(
                "at least one identity key is required".into(),
            ));
        }

        let mut incoming = hints.clone();
        for key in keys {
            match key {
                IdentityKey::Telegram(v) => {
                    incoming.telegram_user_id.get_or_insert_with(|| v.clone());
                }
                IdentityKey::Web(v) => {
                    incoming.web_user_id.get_or_insert_with(|| v.clone());
                }
            }
        }

        for key in keys {
            if let Some(user) = self.find_user_by_key(key)? {
                return self.fill_profile(user, &incoming);
            }
        }
        self.insert_user(&incoming)
    }

    fn insert_user(&self, profile: &UserProfile) -> Result<User> {
        let now = now_timestamp();
        self.conn
            .execute(
                "INSERT INTO users (telegram_user_id, web_user_id, username, first_name, email,
                                    email_verified_at, created_at, updated_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?7)",
                params![
                    profile.telegram_user_id,
                    profile.web_user_id,
                    profile.username,
                    profile.first_name,
                    profile.email,
                    profile.email_verified_at.map(format_timestamp),
                    now,
                ],
            )
            .map_err(|e| Error::Persistence(format!("failed to insert user: {e}")))?;
        self.require_user(self.conn.last_insert_rowid())
    }

    fn fill_profile(&self, user: User, incoming: &UserProfile) -> Result<User> {
        let current = user.profile();
        let mut merged = reconcile(&current, incoming);

        // Identity keys already held by someone else stay where they are.
        if merged.telegram_user_id != current.telegram_user_id
            && let Some(value) = merged.telegram_user_id.clone()
            && self.key_held_by_other(&IdentityKey::Telegram(value), user.id)?
        {
            warn!(user_id = user.id, "telegram id already linked to another user, skipping");
            merged.telegram_user_id = current.telegram_user_id.clone();
        }
        if merged.web_user_id != current.web_user_id
            && let Some(value) = merged.web_user_id.clone()
            && self.key_held_by_other(&IdentityKey::Web(value), user.id)?
        {
            warn!(user_id = user.id, "web id already linked to another user, skipping");
            merged.web_user_id = current.web_user_id.clone();
        }

        if merged == current {
            return Ok(user);
        }
        self.write_profile(user.id, &merged)
    }

    fn key_held_by_other(&self, key: &IdentityKey, user_id: i64) -> Result<bool> {
        Ok(self
            .find_user_by_key(key)?
            .is_some_and(|owner| owner.id != user_id))
    }

    pub(crate) fn write_profile(&self, user_id: i64, profile: &UserProfile) -> Result<User> {
        self.conn
            .execute(
                "UPDATE users SET telegram_user_id = ?1, web_user_id = ?2, username = ?3,
                        first_name = ?4, email = ?5, email_verified_at = ?6, updated_at = ?7
                 WHERE id = ?8",
                params![
                    profile.telegram_user_id,
                    profile.web_user_id,
                    profile.username,
                    profile.first_name,
                    profile.email,
                    profile.email_verified_at.map(format_timestamp),
                    now_timestamp(),
                    user_id,
                ],
            )
            .map_err(|e| Error::Persistence(format!("failed to update user {user_id}: {e}")))?;
        self.require_user(user_id)
    }

    // ── chats ────────────────────────────────────────────────────────

    pub fn find_chat(&self, external_chat_id: &str) -> Result<Option<Chat>> {
        self.conn
            .query_row(
                &format!("SELECT {CHAT_COLUMNS} FROM chats WHERE external_chat_id = ?1"),
                params![external_chat_id],
                chat_from_row,
            )
            .optional()
            .map_err(|e| Error::Persistence(format!("failed to look up chat: {e}")))
    }

    /// Look up a chat by its external id, touching `last_active_at`, or create it.
    pub fn resolve_or_create_chat(
        &self,
        external_chat_id: &str,
        owner_user_id: Option<i64>,
        kind: ChatKind,
    ) -> Result<Chat> {
        let now = now_timestamp();
        if let Some(chat) = self.find_chat(external_chat_id)? {
            self.conn
                .execute(
                    "UPDATE chats SET last_active_at = ?1 WHERE id = ?2",
                    params![now, chat.id],
                )
                .map_err(|e| Error::Persistence(format!("failed to touch chat: {e}")))?;
            return Ok(Chat {
                last_active_at: parse_timestamp(&now),
                ..chat
            });
        }

        self.conn
            .execute(
                "INSERT INTO chats (external_chat_id, owner_user_id, kind, created_at, last_active_at)
                 VALUES (?1, ?2, ?3, ?4, ?4)",
                params![external_chat_id, owner_user_id, kind.as_str(), now],
            )
            .map_err(|e| Error::Persistence(format!("failed to insert chat: {e}")))?;

        let id = self.conn.last_insert_rowid();
        Ok(Chat {
            id,
            external_chat_id: external_chat_id.to_string(),
            owner_user_id,
            kind,
            created_at: parse_timestamp(&now),
            last_active_at: parse_timestamp(&now),
        })
    }

    // ── messages ─────────────────────────────────────────────────────

    pub fn append_message(
        &self,
        chat_id: i64,
        role: MessageRole,
        content_type: ContentType,
        text: Option<&str>,
        origin_message_id: Option<i64>,
        sender_user_id: Option<i64>,
    ) -> Result<StoredMessage> {
        let chat_exists: bool = self
            .conn
            .query_row(
                "SELECT EXISTS(SELECT 1 FROM chats WHERE id = ?1)",
                params![chat_id],
                |row| row.get(0),
            )
            .map_err(|e| Error::Persistence(format!("failed to check chat: {e}")))?;
        if !chat_exists {
            return Err(Error::Persistence(format!("chat {chat_id} does not exist")));
        }

        let now = now_timestamp();
        self.conn
            .execute(
                "INSERT INTO messages (chat_id, role, content_type, text, origin_message_id,
                                       sender_user_id, created_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
                params![
                    chat_id,
                    role.as_str(),
                    content_type.as_str(),
                    text,
                    origin_message_id,
                    sender_user_id,
                    now
                ],
            )
            .map_err(|e| Error::Persistence(format!("failed to append message: {e}")))?;

        Ok(StoredMessage {
            id: self.conn.last_insert_rowid(),
            chat_id,
            role,
            content_type,
            text: text.map(str::to_string),
            origin_message_id,
            sender_user_id,
            created_at: parse_timestamp(&now),
        })
    }

    /// Up to `limit` most recent messages of a chat, oldest first.
    pub fn recent_messages(&self, chat_id: i64, limit: usize) -> Result<Vec<StoredMessage>> {
        let mut stmt = self
            .conn
            .prepare(&format!(
                "SELECT {MESSAGE_COLUMNS} FROM messages
                 WHERE chat_id = ?1
                 ORDER BY created_at DESC, id DESC
                 LIMIT ?2"
            ))
            .map_err(|e| Error::Persistence(format!("failed to prepare message query: {e}")))?;

        let rows = stmt
            .query_map(params![chat_id, limit as i64], message_from_row)
            .map_err(|e| Error::Persistence(format!("failed to load messages: {e}")))?;

        let mut messages = Vec::new();
        for row in rows {
            messages.push(
                row.map_err(|e| Error::Persistence(format!("failed to read message row: {e}")))?,
            );
        }
        // Query is DESC for efficient tail fetch; return in chronological order.
        messages.reverse();
        Ok(messages)
    }
}

fn key_column(key: &IdentityKey) -> &'static str {
    match key {
        IdentityKey::Telegram(_) => "telegram_user_id",
        IdentityKey::Web(_) => "web_user_id",
    }
}

fn user_from_row(row: &Row<'_>) -> rusqlite::Result<User> {
    let verified: Option<String> = row.get(6)?;
    let created: String = row.get(7)?;
    Ok(User {
        id: row.get(0)?,
        telegram_user_id: row.get(1)?,
        web_user_id: row.get(2)?,
        username: row.get(3)?,
        first_name: row.get(4)?,
        email: row.get(5)?,
        email_verified_at: verified.as_deref().map(parse_timestamp),
        created_at: parse_timestamp(&created),
    })
}

fn chat_from_row(row: &Row<'_>) -> rusqlite::Result<Chat> {
    let kind: String = row.get(3)?;
    let created: String = row.get(4)?;
    let last_active: String = row.get(5)?;
    Ok(Chat {
        id: row.get(0)?,
        external_chat_id: row.get(1)?,
        owner_user_id: row.get(2)?,
        kind: ChatKind::from_transport(&kind),
        created_at: parse_timestamp(&created),
        last_active_at: parse_timestamp(&last_active),
    })
}

fn message_from_row(row: &Row<'_>) -> rusqlite::Result<StoredMessage> {
    let role: String = row.get(2)?;
    let content_type: String = row.get(3)?;
    let created: String = row.get(7)?;
    Ok(StoredMessage {
        id: row.get(0)?,
        chat_id: row.get(1)?,
        role: MessageRole::parse(&role).unwrap_or(MessageRole::User),
        content_type: ContentType::parse(&content_type).unwrap_or(ContentType::Text),
        text: row.get(4)?,
        origin_message_id: row.get(5)?,
        sender_user_id: row.get(6)?,
        created_at: parse_timestamp(&created),
    })
}

/// Fixed-width RFC 3339 so stored timestamps sort lexicographically.
pub(crate) fn format_timestamp(value: DateTime<Utc>) -> String {
    value.to_rfc3339_opts(SecondsFormat::Micros, true)
}

pub(crate) fn now_timestamp() -> String {
    format_timestamp(Utc::now())
}

pub(crate) fn parse_timestamp(value: &str) -> DateTime<Utc> {
    DateTime::parse_from_rfc3339(value)
        .map(|dt| dt.with_timezone(&Utc))
        .unwrap_or_else(|e| {
            warn!("failed to parse timestamp '{}': {e}, falling back to now", value);
            Utc::now()
        })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn telegram(id: &str) -> Vec<IdentityKey> {
        vec![IdentityKey::Telegram(id.to_string())]
    }

    #[test]
    fn resolve_user_is_idempotent_and_fills_missing_fields() {
        let store = ConversationStore::in_memory().expect("in-memory store");

        let first = store
            .resolve_or_create_user(
                &telegram("100"),
                &UserProfile {
                    username: Some("ana".into()),
                    ..Default::default()
                },
            )
            .unwrap();
        let second = store
            .resolve_or_create_user(
                &telegram("100"),
                &UserProfile {
                    username: Some("someone_else".into()),
                    first_name: Some("Ana".into()),
                    ..Default::default()
                },
            )
            .unwrap();

        assert_eq!(first.id, second.id);
        assert_eq!(second.username.as_deref(), Some("ana"));
        assert_eq!(second.first_name.as_deref(), Some("Ana"));
        assert_eq!(second.telegram_user_id.as_deref(), Some("100"));
    }

    #[test]
    fn resolve_user_requires_a_key() {
        let store = ConversationStore::in_memory().expect("in-memory store");
        let err = store
            .resolve_or_create_user(&[], &UserProfile::default())
            .unwrap_err();
        assert!(matches!(err, Error::Validation(_)));
    }

    #[test]
    fn resolve_user_searches_keys_in_order_and_attaches_new_keys() {
        let store = ConversationStore::in_memory().expect("in-memory store");
        let web = store
            .resolve_or_create_user(&[IdentityKey::Web("w-1".into())], &UserProfile::default())
            .unwrap();

        let resolved = store
            .resolve_or_create_user(
                &[
                    IdentityKey::Telegram("555".into()),
                    IdentityKey::Web("w-1".into()),
                ],
                &UserProfile::default(),
            )
            .unwrap();
        assert_eq!(resolved.id, web.id);
        assert_eq!(resolved.telegram_user_id.as_deref(), Some("555"));
    }

    #[test]
    fn keys_owned_by_other_users_are_not_stolen() {
        let store = ConversationStore::in_memory().expect("in-memory store");
        let owner = store
            .resolve_or_create_user(&telegram("1"), &UserProfile::default())
            .unwrap();
        let web = store
            .resolve_or_create_user(&[IdentityKey::Web("w-2".into())], &UserProfile::default())
            .unwrap();

        let resolved = store
            .resolve_or_create_user(
                &[IdentityKey::Web("w-2".into()), IdentityKey::Telegram("1".into())],
                &UserProfile::default(),
            )
            .unwrap();
        assert_eq!(resolved.id, web.id);
        assert!(resolved.telegram_user_id.is_none());
        assert_eq!(
            store.user(owner.id).unwrap().unwrap().telegram_user_id.as_deref(),
            Some("1")
        );
    }

    #[test]
    fn chat_resolution_touches_last_active() {
        let store = ConversationStore::in_memory().expect("in-memory store");
        let user = store
            .resolve_or_create_user(&telegram("7"), &UserProfile::default())
            .unwrap();

        let created = store
            .resolve_or_create_chat("7", Some(user.id), ChatKind::Private)
            .unwrap();
        let again = store
            .resolve_or_create_chat("7", Some(user.id), ChatKind::Private)
            .unwrap();

        assert_eq!(created.id, again.id);
        assert_eq!(again.owner_user_id, Some(user.id));
        assert!(again.last_active_at >= created.last_active_at);
        assert_eq!(again.created_at, created.created_at);
    }

    #[test]
    fn group_chat_has_no_owner() {
        let store = ConversationStore::in_memory().expect("in-memory store");
        let chat = store
            .resolve_or_create_chat("-100", None, ChatKind::Group)
            .unwrap();
        let loaded = store.find_chat("-100").unwrap().unwrap();
        assert_eq!(loaded.id, chat.id);
        assert_eq!(loaded.owner_user_id, None);
        assert_eq!(loaded.kind, ChatKind::Group);
    }

    #[test]
    fn append_to_missing_chat_is_persistence_error() {
        let store = ConversationStore::in_memory().expect("in-memory store");
        let err = store
            .append_message(999, MessageRole::User, ContentType::Text, Some("hi"), None, None)
            .unwrap_err();
        assert!(matches!(err, Error::Persistence(_)));
    }

    #[test]
    fn recent_messages_returns_tail_oldest_first() {
        let store = ConversationStore::in_memory().expect("in-memory store");
        let chat = store
            .resolve_or_create_chat("c1", None, ChatKind::Group)
            .unwrap();
        for i in 0..7 {
            store
                .append_message(
                    chat.id,
                    MessageRole::User,
                    ContentType::Text,
                    Some(&format!("m{i}")),
                    Some(i),
                    None,
                )
                .unwrap();
        }

        let recent = store.recent_messages(chat.id, 3).unwrap();
        let texts: Vec<_> = recent.iter().filter_map(|m| m.text.clone()).collect();
        assert_eq!(texts, vec!["m4", "m5", "m6"]);
        assert!(recent.windows(2).all(|w| w[0].id < w[1].id));

        let all = store.recent_messages(chat.id, 50).unwrap();
        assert_eq!(all.len(), 7);
        assert_eq!(all[0].text.as_deref(), Some("m0"));
    }

    #[test]
    fn file_backed_store_persists_across_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nutribot.db");
        {
            let store = ConversationStore::open(&path).unwrap();
            store
                .resolve_or_create_user(&telegram("9"), &UserProfile::default())
                .unwrap();
        }
        let store = ConversationStore::open(&path).unwrap();
        assert!(
            store
                .find_user_by_key(&IdentityKey::Telegram("9".into()))
                .unwrap()
                .is_some()
        );
    }
}
