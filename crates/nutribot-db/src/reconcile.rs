use chrono::{DateTime, Utc};

/// The mutable profile of a user: identity keys plus display fields.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct UserProfile {
    pub telegram_user_id: Option<String>,
    pub web_user_id: Option<String>,
    pub username: Option<String>,
    pub first_name: Option<String>,
    pub email: Option<String>,
    pub email_verified_at: Option<DateTime<Utc>>,
}

/// Fill every empty field of `existing` from `incoming`. Populated fields are never overwritten.
pub fn reconcile(existing: &UserProfile, incoming: &UserProfile) -> UserProfile {
    UserProfile {
        telegram_user_id: fill(&existing.telegram_user_id, &incoming.telegram_user_id),
        web_user_id: fill(&existing.web_user_id, &incoming.web_user_id),
        username: fill(&existing.username, &incoming.username),
        first_name: fill(&existing.first_name, &incoming.first_name),
        email: fill(&existing.email, &incoming.email),
        email_verified_at: existing.email_verified_at.or(incoming.email_verified_at),
    }
}

fn fill(current: &Option<String>, candidate: &Option<String>) -> Option<String> {
    match current {
        Some(value) if !value.is_empty() => Some(value.clone()),
        _ => candidate.clone().filter(|v| !v.is_empty()).or_else(|| current.clone()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fills_only_missing_fields() {
        let existing = UserProfile {
            telegram_user_id: Some("42".into()),
            username: Some("ana".into()),
            ..Default::default()
        };
        let incoming = UserProfile {
            telegram_user_id: Some("99".into()),
            username: Some("ana_new".into()),
            first_name: Some("Ana".into()),
            email: Some("ana@example.com".into()),
            ..Default::default()
        };

        let merged = reconcile(&existing, &incoming);
        assert_eq!(merged.telegram_user_id.as_deref(), Some("42"));
        assert_eq!(merged.username.as_deref(), Some("ana"));
        assert_eq!(merged.first_name.as_deref(), Some("Ana"));
        assert_eq!(merged.email.as_deref(), Some("ana@example.com"));
    }

    #[test]
    fn empty_strings_count_as_absent() {
        let existing = UserProfile {
            first_name: Some(String::new()),
            ..Default::default()
        };
        let incoming = UserProfile {
            first_name: Some("Bo".into()),
            username: Some(String::new()),
            ..Default::default()
        };
        let merged = reconcile(&existing, &incoming);
        assert_eq!(merged.first_name.as_deref(), Some("Bo"));
        assert_eq!(merged.username, None);
    }

    #[test]
    fn reconcile_with_empty_incoming_is_identity() {
        let existing = UserProfile {
            web_user_id: Some("w-1".into()),
            email_verified_at: Some(Utc::now()),
            ..Default::default()
        };
        assert_eq!(reconcile(&existing, &UserProfile::default()), existing);
    }
}
