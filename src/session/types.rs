use std::collections::HashMap;

use chrono::{DateTime, Duration, TimeZone, Utc};

pub const FIELD_ACCESS_TOKEN: &str = "access_token";
pub const FIELD_ACCESS_TOKEN_EXPIRY: &str = "access_token_expiry";
pub const FIELD_REFRESH_TOKEN: &str = "refresh_token";
pub const FIELD_USER_EMAIL: &str = "user_email";

/// One logical user session as persisted in the carrier.
///
/// Invariant: a non-empty `access_token` always has `access_token_expires_at`
/// set. The refresh token, once issued, is only dropped by an explicit
/// `clear()`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Session {
    pub user_email: String,
    pub access_token: String,
    pub access_token_expires_at: Option<DateTime<Utc>>,
    pub refresh_token: String,
}

impl Session {
    /// True when the access token will still be valid `margin_secs` from
    /// `now`. An empty token or missing expiry is never fresh.
    pub fn access_token_fresh_at(&self, now: DateTime<Utc>, margin_secs: i64) -> bool {
        if self.access_token.is_empty() {
            return false;
        }
        match self.access_token_expires_at {
            Some(expires_at) => expires_at - Duration::seconds(margin_secs.max(0)) > now,
            None => false,
        }
    }

    /// Decode a session from carrier fields. Returns `None` when no refresh
    /// token is present: without one there is no session to speak of, only
    /// leftovers.
    pub fn from_fields(fields: &HashMap<String, String>) -> Option<Self> {
        let refresh_token = fields.get(FIELD_REFRESH_TOKEN)?.clone();
        if refresh_token.is_empty() {
            return None;
        }

        let access_token = fields
            .get(FIELD_ACCESS_TOKEN)
            .cloned()
            .unwrap_or_default();
        let access_token_expires_at = fields
            .get(FIELD_ACCESS_TOKEN_EXPIRY)
            .and_then(|raw| raw.parse::<i64>().ok())
            .and_then(|secs| Utc.timestamp_opt(secs, 0).single());

        Some(Self {
            user_email: fields.get(FIELD_USER_EMAIL).cloned().unwrap_or_default(),
            access_token,
            access_token_expires_at,
            refresh_token,
        })
    }

    pub fn to_fields(&self) -> HashMap<String, String> {
        let mut fields = HashMap::new();
        fields.insert(FIELD_ACCESS_TOKEN.into(), self.access_token.clone());
        fields.insert(
            FIELD_ACCESS_TOKEN_EXPIRY.into(),
            self.access_token_expires_at
                .map(|at| at.timestamp().to_string())
                .unwrap_or_default(),
        );
        fields.insert(FIELD_REFRESH_TOKEN.into(), self.refresh_token.clone());
        fields.insert(FIELD_USER_EMAIL.into(), self.user_email.clone());
        fields
    }

    /// Field map that zeroes every session field, for the logout write.
    pub fn cleared_fields() -> HashMap<String, String> {
        [
            FIELD_ACCESS_TOKEN,
            FIELD_ACCESS_TOKEN_EXPIRY,
            FIELD_REFRESH_TOKEN,
            FIELD_USER_EMAIL,
        ]
        .into_iter()
        .map(|name| (name.to_string(), String::new()))
        .collect()
    }
}
