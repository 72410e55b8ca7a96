use chrono::{DateTime, Duration, Utc};
use nutribot_common::{Error, Result};
use rand::Rng;
use rusqlite::{OptionalExtension, Row, params};
use serde::Serialize;
use tracing::{info, warn};

use crate::conversation_store::{
    ConversationStore, User, format_timestamp, now_timestamp, parse_timestamp,
};

/// Uppercase letters and digits without the easily confused `I`, `O`, `0`, `1`.
pub const LINKING_CODE_ALPHABET: &[u8] = b"ABCDEFGHJKLMNPQRSTUVWXYZ23456789";
pub const LINKING_CODE_LEN: usize = 8;

const MAX_ISSUE_ATTEMPTS: usize = 5;

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct LinkingCode {
    pub code: String,
    pub web_user_id: String,
    pub email: Option<String>,
    pub created_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
    pub used: bool,
}

#[derive(Debug, Clone, PartialEq)]
pub enum ClaimOutcome {
    Claimed(LinkingCode),
    NotFound,
    AlreadyUsed,
    Expired,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct LinkStatus {
    pub linked: bool,
    pub telegram_user_id: Option<String>,
}

pub fn generate_code() -> String {
    let mut rng = rand::rng();
    (0..LINKING_CODE_LEN)
        .map(|_| LINKING_CODE_ALPHABET[rng.random_range(0..LINKING_CODE_ALPHABET.len())] as char)
        .collect()
}

impl ConversationStore {
    /// Return the web identity's active code, or mint a new one valid for `ttl`.
    pub fn issue_linking_code(
        &self,
        web_user_id: &str,
        email: Option<&str>,
        ttl: Duration,
    ) -> Result<LinkingCode> {
        if web_user_id.trim().is_empty() {
            return Err(Error::Validation("web user id is required".into()));
        }
        if let Some(active) = self.active_linking_code(web_user_id)? {
            return Ok(active);
        }

        let now = Utc::now();
        let created = format_timestamp(now);
        let expires = format_timestamp(now + ttl);
        for _ in 0..MAX_ISSUE_ATTEMPTS {
            let code = generate_code();
            let inserted = self
                .conn
                .execute(
                    "INSERT OR IGNORE INTO linking_codes (code, web_user_id, email, created_at, expires_at)
                     VALUES (?1, ?2, ?3, ?4, ?5)",
                    params![code, web_user_id, email, created, expires],
                )
                .map_err(|e| Error::Persistence(format!("failed to store linking code: {e}")))?;
            if inserted == 1 {
                info!(web_user_id, "issued linking code");
                return Ok(LinkingCode {
                    code,
                    web_user_id: web_user_id.to_string(),
                    email: email.map(str::to_string),
                    created_at: parse_timestamp(&created),
                    expires_at: parse_timestamp(&expires),
                    used: false,
                });
            }
            warn!("linking code collision, retrying");
        }
        Err(Error::Persistence(
            "could not allocate a unique linking code".into(),
        ))
    }

    fn active_linking_code(&self, web_user_id: &str) -> Result<Option<LinkingCode>> {
        self.conn
            .query_row(
                "SELECT code, web_user_id, email, created_at, expires_at, used
                 FROM linking_codes
                 WHERE web_user_id = ?1 AND used = 0 AND expires_at > ?2
                 ORDER BY created_at DESC
                 LIMIT 1",
                params![web_user_id, now_timestamp()],
                code_from_row,
            )
            .optional()
            .map_err(|e| Error::Persistence(format!("failed to load active linking code: {e}")))
    }

    fn linking_code(&self, code: &str) -> Result<Option<LinkingCode>> {
        self.conn
            .query_row(
                "SELECT code, web_user_id, email, created_at, expires_at, used
                 FROM linking_codes WHERE code = ?1",
                params![code],
                code_from_row,
            )
            .optional()
            .map_err(|e| Error::Persistence(format!("failed to load linking code: {e}")))
    }

    /// Mark `code` used by `claimant_user_id`. The transition happens in a single
    /// conditional update, so a code can be claimed at most once.
    pub fn claim_linking_code(&self, code: &str, claimant_user_id: i64) -> Result<ClaimOutcome> {
        let code = code.trim().to_ascii_uppercase();
        let now = now_timestamp();
        let claimed = self
            .conn
            .execute(
                "UPDATE linking_codes SET used = 1, used_at = ?1, claimed_by_user_id = ?2
                 WHERE code = ?3 AND used = 0 AND expires_at > ?1",
                params![now, claimant_user_id, code],
            )
            .map_err(|e| Error::Persistence(format!("failed to claim linking code: {e}")))?;

        let Some(row) = self.linking_code(&code)? else {
            return Ok(ClaimOutcome::NotFound);
        };
        if claimed == 1 {
            return Ok(ClaimOutcome::Claimed(row));
        }
        if row.used {
            Ok(ClaimOutcome::AlreadyUsed)
        } else {
            Ok(ClaimOutcome::Expired)
        }
    }

    pub fn link_status(&self, web_user_id: &str) -> Result<LinkStatus> {
        let telegram_user_id = self
            .find_user_by_key(&nutribot_common::IdentityKey::Web(web_user_id.to_string()))?
            .and_then(|user| user.telegram_user_id);
        Ok(LinkStatus {
            linked: telegram_user_id.is_some(),
            telegram_user_id,
        })
    }

    /// Attach a verified web identity to `user_id`.
    pub fn attach_web_identity(
        &self,
        user_id: i64,
        web_user_id: &str,
        email: Option<&str>,
    ) -> Result<User> {
        let mut profile = self.require_user(user_id)?.profile();
        profile.web_user_id = Some(web_user_id.to_string());
        if let Some(email) = email.filter(|e| !e.is_empty()) {
            profile.email = Some(email.to_string());
            profile.email_verified_at = Some(Utc::now());
        }
        self.write_profile(user_id, &profile)
    }

    /// Detach the Telegram identity from the user holding `web_user_id`.
    pub fn unlink_telegram(&self, web_user_id: &str) -> Result<bool> {
        let updated = self
            .conn
            .execute(
                "UPDATE users SET telegram_user_id = NULL, updated_at = ?1
                 WHERE web_user_id = ?2 AND telegram_user_id IS NOT NULL",
                params![now_timestamp(), web_user_id],
            )
            .map_err(|e| Error::Persistence(format!("failed to unlink account: {e}")))?;
        Ok(updated > 0)
    }
}

fn code_from_row(row: &Row<'_>) -> rusqlite::Result<LinkingCode> {
    let created: String = row.get(3)?;
    let expires: String = row.get(4)?;
    Ok(LinkingCode {
        code: row.get(0)?,
        web_user_id: row.get(1)?,
        email: row.get(2)?,
        created_at: parse_timestamp(&created),
        expires_at: parse_timestamp(&expires),
        used: row.get::<_, i64>(5)? != 0,
    })
}
