//! Slash commands available in private chats.

use nutribot_channels::ReplyChoice;
use nutribot_common::{IdentityKey, IncomingTurn, Result};
use nutribot_db::{ClaimOutcome, ConversationStore, LinkingCode, MergeCounts, SharedStore, User};
use tracing::{error, info, warn};

use crate::orchestrator::sender_profile;

pub const COMMAND_FAILURE_TEXT: &str =
    "❌ An error occurred while processing your command. Please try again later.";

const WELCOME_TEXT: &str = "Welcome to NutriAgentBot! 👋\n\n\
I'm here to help you analyze your food and provide nutritional insights.\n\n\
Please select your preferred language:";

const RESET_FAILURE_TEXT: &str = "❌ An error occurred while resetting your account. \
Please try again later or contact support.";

const LINK_FAILURE_TEXT: &str = "❌ An error occurred while linking your account. Please try again.";

const LINKWEB_USAGE_TEXT: &str = "🔗 **Link Web Account**\n\n\
To link your Telegram account with your web account:\n\n\
1. Go to your account settings on the web\n\
2. Click 'Link Telegram'\n\
3. Copy the code shown\n\
4. Send: `/linkweb YOUR_CODE`\n\n\
Example: `/linkweb A7K9M2X4`";

/// Commands registered in the bot menu, as `(command, description)`.
pub const BOT_COMMANDS: &[(&str, &str)] = &[
    ("start", "Start chatting with the bot"),
    ("linkweb", "Link your Telegram to your web account"),
    ("reset_account", "Reset your account data"),
];

/// What to send back for a command.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandReply {
    pub text: String,
    pub choices: Vec<ReplyChoice>,
}

impl CommandReply {
    fn text(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            choices: Vec::new(),
        }
    }
}

pub struct CommandHandler {
    store: SharedStore,
}

impl CommandHandler {
    pub fn new(store: SharedStore) -> Self {
        Self { store }
    }

    /// Execute the command carried by `turn`. Failures are turned into a
    /// generic error reply; this never returns an error.
    pub async fn handle(&self, command: &str, turn: &IncomingTurn) -> CommandReply {
        let result = match command {
            "start" => Ok(welcome()),
            "reset_account" => Ok(self.reset_account(turn).await),
            "linkweb" => self.link_web(turn).await,
            other => Ok(unknown_command(other)),
        };

        result.unwrap_or_else(|e| {
            error!(command, sender = %turn.sender.key, "command failed: {e}");
            CommandReply::text(COMMAND_FAILURE_TEXT)
        })
    }

    async fn reset_account(&self, turn: &IncomingTurn) -> CommandReply {
        let store = self.store.lock().await;
        let outcome = store
            .find_user_by_key(&turn.sender.key)
            .and_then(|user| match user {
                Some(user) => store.reset_account(user.id),
                None => Ok(Default::default()),
            });

        match outcome {
            Ok(counts) => {
                info!(sender = %turn.sender.key, ?counts, "account reset");
                CommandReply::text(format!(
                    "✅ Account reset completed successfully!\n\n\
                     • Messages deleted: {}\n\
                     • Chats deleted: {}\n\
                     • Configuration deleted: {}\n\
                     • Nutritional records deleted: {}\n\n\
                     You can now start fresh and configure your account again.",
                    counts.messages,
                    counts.chats,
                    counts.spreadsheet_configs,
                    counts.nutrition_records
                ))
            }
            Err(e) => {
                error!(sender = %turn.sender.key, "account reset failed: {e}");
                CommandReply::text(RESET_FAILURE_TEXT)
            }
        }
    }

    async fn link_web(&self, turn: &IncomingTurn) -> Result<CommandReply> {
        let Some(code) = turn.command_args().into_iter().next() else {
            return Ok(CommandReply::text(LINKWEB_USAGE_TEXT));
        };
        let code = code.to_ascii_uppercase();

        let store = self.store.lock().await;
        let user = store.resolve_or_create_user(
            std::slice::from_ref(&turn.sender.key),
            &sender_profile(&turn.sender),
        )?;

        let claimed = match store.claim_linking_code(&code, user.id)? {
            ClaimOutcome::Claimed(claimed) => claimed,
            ClaimOutcome::NotFound => {
                return Ok(CommandReply::text(
                    "❌ Invalid linking code. Please check the code and try again.",
                ));
            }
            ClaimOutcome::AlreadyUsed => {
                return Ok(CommandReply::text(
                    "❌ This code has already been used. Please generate a new one.",
                ));
            }
            ClaimOutcome::Expired => {
                return Ok(CommandReply::text(
                    "❌ This code has expired. Please generate a new one.",
                ));
            }
        };

        let linked = link_identity(&store, user.id, &claimed);

        match linked {
            Ok((linked, merged)) => {
                info!(
                    user_id = linked.id,
                    web_user_id = %claimed.web_user_id,
                    "linked web account"
                );
                Ok(CommandReply::text(link_success_text(
                    linked.email.as_deref().unwrap_or("unknown"),
                    merged.as_ref(),
                )))
            }
            Err(e) => {
                warn!(user_id = user.id, "linking failed after claiming code: {e}");
                Ok(CommandReply::text(LINK_FAILURE_TEXT))
            }
        }
    }
}

/// Fold a distinct web-only user into `user_id`, then attach the web identity.
fn link_identity(
    store: &ConversationStore,
    user_id: i64,
    claimed: &LinkingCode,
) -> Result<(User, Option<MergeCounts>)> {
    let web_key = IdentityKey::Web(claimed.web_user_id.clone());
    let mut merged = None;
    if let Some(web_user) = store.find_user_by_key(&web_key)?
        && web_user.id != user_id
    {
        merged = Some(store.merge_user_data(web_user.id, user_id)?);
        store.delete_user(web_user.id)?;
    }
    let linked = store.attach_web_identity(user_id, &claimed.web_user_id, claimed.email.as_deref())?;
    Ok((linked, merged))
}

fn welcome() -> CommandReply {
    CommandReply {
        text: WELCOME_TEXT.to_string(),
        choices: vec![
            ReplyChoice::new("English", "Welcome me in English, explain me how it works"),
            ReplyChoice::new("Español", "Dame la bienvenida en español, explicame como funciona"),
        ],
    }
}

fn unknown_command(command: &str) -> CommandReply {
    let listing = BOT_COMMANDS
        .iter()
        .map(|(name, description)| format!("• /{name} - {description}"))
        .collect::<Vec<_>>()
        .join("\n");
    CommandReply::text(format!(
        "Unknown command: /{command}\n\nAvailable commands:\n{listing}"
    ))
}

fn link_success_text(email: &str, merged: Option<&MergeCounts>) -> String {
    let mut text = format!("✅ **Account Linked Successfully!**\n\nEmail: `{email}`\n\n");

    if let Some(counts) = merged {
        let mut transferred = Vec::new();
        if counts.chats > 0 {
            transferred.push(format!("{} chats", counts.chats));
        }
        if counts.messages > 0 {
            transferred.push(format!("{} messages", counts.messages));
        }
        if counts.nutrition_records > 0 {
            transferred.push(format!("{} nutrition records", counts.nutrition_records));
        }
        if counts.spreadsheet_config_copied {
            transferred.push("Google Sheets configuration".to_string());
        }
        if !transferred.is_empty() {
            text.push_str(&format!(
                "I also transferred the following data from your web account:\n• {}\n\n",
                transferred.join("\n• ")
            ));
        }
    }

    text.push_str("Your Telegram and Web accounts are now unified! 🎉");
    text
}
