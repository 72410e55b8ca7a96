//! Account-level maintenance: reset, deletion and merging of user data.
//!
//! Each step is a single statement that is a no-op when re-run, so a partially
//! completed reset can simply be repeated.

use nutribot_common::{Error, Result};
use rusqlite::params;
use serde::Serialize;
use tracing::info;

use crate::conversation_store::ConversationStore;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct ResetCounts {
    pub messages: usize,
    pub chats: usize,
    pub spreadsheet_configs: usize,
    pub nutrition_records: usize,
}

impl ResetCounts {
    pub fn is_empty(&self) -> bool {
        *self == Self::default()
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct MergeCounts {
    pub chats: usize,
    pub messages: usize,
    pub nutrition_records: usize,
    pub spreadsheet_config_copied: bool,
}

impl ConversationStore {
    /// Remove everything a user has produced while keeping the user row.
    pub fn reset_account(&self, user_id: i64) -> Result<ResetCounts> {
        let messages = self
            .conn
            .execute(
                "DELETE FROM messages
                 WHERE chat_id IN (SELECT id FROM chats WHERE owner_user_id = ?1)
                    OR sender_user_id = ?1",
                params![user_id],
            )
            .map_err(|e| Error::Persistence(format!("failed to delete messages: {e}")))?;

        let chats = self
            .conn
            .execute("DELETE FROM chats WHERE owner_user_id = ?1", params![user_id])
            .map_err(|e| Error::Persistence(format!("failed to delete chats: {e}")))?;

        let spreadsheet_configs = self
            .conn
            .execute(
                "DELETE FROM spreadsheet_configs WHERE user_id = ?1",
                params![user_id],
            )
            .map_err(|e| Error::Persistence(format!("failed to delete spreadsheet config: {e}")))?;

        let nutrition_records = self
            .conn
            .execute(
                "DELETE FROM nutrition_records WHERE user_id = ?1",
                params![user_id],
            )
            .map_err(|e| Error::Persistence(format!("failed to delete nutrition records: {e}")))?;

        let counts = ResetCounts {
            messages,
            chats,
            spreadsheet_configs,
            nutrition_records,
        };
        info!(user_id, ?counts, "account reset");
        Ok(counts)
    }

    /// Reset the account and remove the user row. Returns false if the user did not exist.
    pub fn delete_user(&self, user_id: i64) -> Result<bool> {
        if self.user(user_id)?.is_none() {
            return Ok(false);
        }
        self.reset_account(user_id)?;
        let deleted = self
            .conn
            .execute("DELETE FROM users WHERE id = ?1", params![user_id])
            .map_err(|e| Error::Persistence(format!("failed to delete user {user_id}: {e}")))?;
        Ok(deleted > 0)
    }

    /// Move chats, authored messages and nutrition records from `source_id` to
    /// `target_id`. The spreadsheet config moves only when the target has none.
    /// The emptied source user is left for the caller to delete.
    pub fn merge_user_data(&self, source_id: i64, target_id: i64) -> Result<MergeCounts> {
        if source_id == target_id {
            return Err(Error::Validation("cannot merge a user into itself".into()));
        }
        self.require_user(source_id)?;
        self.require_user(target_id)?;

        let chats = self
            .conn
            .execute(
                "UPDATE chats SET owner_user_id = ?2 WHERE owner_user_id = ?1",
                params![source_id, target_id],
            )
            .map_err(|e| Error::Persistence(format!("failed to move chats: {e}")))?;

        let messages = self
            .conn
            .execute(
                "UPDATE messages SET sender_user_id = ?2 WHERE sender_user_id = ?1",
                params![source_id, target_id],
            )
            .map_err(|e| Error::Persistence(format!("failed to move messages: {e}")))?;

        let nutrition_records = self
            .conn
            .execute(
                "UPDATE nutrition_records SET user_id = ?2 WHERE user_id = ?1",
                params![source_id, target_id],
            )
            .map_err(|e| Error::Persistence(format!("failed to move nutrition records: {e}")))?;

        let spreadsheet_config_copied = if self.spreadsheet_config(target_id)?.is_none() {
            self.conn
                .execute(
                    "UPDATE spreadsheet_configs SET user_id = ?2 WHERE user_id = ?1",
                    params![source_id, target_id],
                )
                .map_err(|e| Error::Persistence(format!("failed to move spreadsheet config: {e}")))?
                > 0
        } else {
            false
        };

        let counts = MergeCounts {
            chats,
            messages,
            nutrition_records,
            spreadsheet_config_copied,
        };
        info!(source_id, target_id, ?counts, "merged user data");
        Ok(counts)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::nutrition::{MealType, NewNutritionRecord};
    use crate::reconcile::UserProfile;
    use nutribot_common::{ChatKind, ContentType, IdentityKey, MessageRole};

    fn user(store: &ConversationStore, key: IdentityKey) -> i64 {
        store
            .resolve_or_create_user(&[key], &UserProfile::default())
            .unwrap()
            .id
    }

    fn snack() -> NewNutritionRecord {
        NewNutritionRecord {
            calories: 150.0,
            proteins: 3.0,
            carbs: 20.0,
            fats: 7.0,
            meal_type: MealType::Snack,
            extra_details: None,
        }
    }

    /// One owned chat with a user and an assistant message, plus one record.
    fn seed(store: &ConversationStore, user_id: i64, chat: &str) {
        let chat = store
            .resolve_or_create_chat(chat, Some(user_id), ChatKind::Private)
            .unwrap();
        store
            .append_message(chat.id, MessageRole::User, ContentType::Text, Some("hi"), Some(1), Some(user_id))
            .unwrap();
        store
            .append_message(chat.id, MessageRole::Assistant, ContentType::Text, Some("hello"), None, None)
            .unwrap();
        store.save_nutrition_record(user_id, &snack()).unwrap();
    }

    fn owned_counts(store: &ConversationStore, user_id: i64) -> (i64, i64, i64) {
        let count = |sql: &str| -> i64 {
            store
                .conn
                .query_row(sql, params![user_id], |row| row.get(0))
                .unwrap()
        };
        (
            count("SELECT COUNT(*) FROM chats WHERE owner_user_id = ?1"),
            count("SELECT COUNT(*) FROM messages WHERE sender_user_id = ?1"),
            count("SELECT COUNT(*) FROM nutrition_records WHERE user_id = ?1"),
        )
    }

    #[test]
    fn reset_removes_data_and_is_idempotent() {
        let store = ConversationStore::in_memory().expect("in-memory store");
        let ana = user(&store, IdentityKey::Telegram("1".into()));
        seed(&store, ana, "1");
        store.save_spreadsheet_config(ana, "a", "r", None).unwrap();

        // A message the user sent in a shared group chat goes too.
        let group = store
            .resolve_or_create_chat("-500", None, ChatKind::Group)
            .unwrap();
        store
            .append_message(group.id, MessageRole::User, ContentType::Text, Some("yo"), Some(2), Some(ana))
            .unwrap();

        let first = store.reset_account(ana).unwrap();
        assert_eq!(
            first,
            ResetCounts {
                messages: 3,
                chats: 1,
                spreadsheet_configs: 1,
                nutrition_records: 1,
            }
        );

        let second = store.reset_account(ana).unwrap();
        assert!(second.is_empty());
        assert!(store.user(ana).unwrap().is_some());
        assert!(store.find_chat("-500").unwrap().is_some());
    }

    #[test]
    fn delete_user_cascades_and_reports_missing() {
        let store = ConversationStore::in_memory().expect("in-memory store");
        let ana = user(&store, IdentityKey::Telegram("1".into()));
        seed(&store, ana, "1");

        assert!(store.delete_user(ana).unwrap());
        assert!(store.user(ana).unwrap().is_none());
        assert!(store.find_chat("1").unwrap().is_none());
        assert!(!store.delete_user(ana).unwrap());
    }

    #[test]
    fn merge_conserves_owned_rows() {
        let store = ConversationStore::in_memory().expect("in-memory store");
        let web = user(&store, IdentityKey::Web("w-1".into()));
        let tg = user(&store, IdentityKey::Telegram("2".into()));
        seed(&store, web, "w-1__general_chat");
        seed(&store, tg, "2");
        store.save_spreadsheet_config(web, "a", "r", Some("sheet")).unwrap();

        let (wc, wm, wn) = owned_counts(&store, web);
        let (tc, tm, tn) = owned_counts(&store, tg);

        let counts = store.merge_user_data(web, tg).unwrap();
        assert_eq!(counts.chats, 1);
        assert_eq!(counts.messages, 1);
        assert_eq!(counts.nutrition_records, 1);
        assert!(counts.spreadsheet_config_copied);

        assert_eq!(owned_counts(&store, web), (0, 0, 0));
        assert_eq!(owned_counts(&store, tg), (wc + tc, wm + tm, wn + tn));
        assert_eq!(
            store.spreadsheet_config(tg).unwrap().unwrap().spreadsheet_id.as_deref(),
            Some("sheet")
        );

        assert!(store.delete_user(web).unwrap());
    }

    #[test]
    fn merge_keeps_target_spreadsheet_config() {
        let store = ConversationStore::in_memory().expect("in-memory store");
        let web = user(&store, IdentityKey::Web("w-1".into()));
        let tg = user(&store, IdentityKey::Telegram("2".into()));
        store.save_spreadsheet_config(web, "wa", "wr", Some("web-sheet")).unwrap();
        store.save_spreadsheet_config(tg, "ta", "tr", Some("tg-sheet")).unwrap();

        let counts = store.merge_user_data(web, tg).unwrap();
        assert!(!counts.spreadsheet_config_copied);
        assert_eq!(
            store.spreadsheet_config(tg).unwrap().unwrap().spreadsheet_id.as_deref(),
            Some("tg-sheet")
        );
    }

    #[test]
    fn merge_into_self_is_rejected() {
        let store = ConversationStore::in_memory().expect("in-memory store");
        let ana = user(&store, IdentityKey::Telegram("1".into()));
        assert!(matches!(
            store.merge_user_data(ana, ana),
            Err(Error::Validation(_))
        ));
    }
}
