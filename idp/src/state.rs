//! Profile identity and token lifecycle state.

use crate::models::IdpToken;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

// ═══════════════════════════════════════════════════════════════════════
// ID Types
// ═══════════════════════════════════════════════════════════════════════

/// Unique identifier for a user profile.
///
/// Every profile owns its own token, certificate and key identifier slots.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ProfileId(pub uuid::Uuid);

impl ProfileId {
    /// Generate a new random `ProfileId`.
    #[must_use]
    pub fn new() -> Self {
        Self(uuid::Uuid::new_v4())
    }
}

impl Default for ProfileId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for ProfileId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        self.0.fmt(f)
    }
}

// ═══════════════════════════════════════════════════════════════════════
// Token lifecycle
// ═══════════════════════════════════════════════════════════════════════

/// Observable state of the single token a profile owns.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TokenState {
    /// Nothing stored; the user must log in.
    NoToken,
    /// Token present and not expired.
    Valid,
    /// Token present but `expires <= now`; the next read refreshes it.
    Expired,
    /// An invalidation is in progress.
    Invalidating,
}

impl TokenState {
    /// Classify a stored token at `now`.
    #[must_use]
    pub fn of(token: Option<&IdpToken>, now: DateTime<Utc>) -> Self {
        match token {
            None => Self::NoToken,
            Some(token) if token.is_expired_at(now) => Self::Expired,
            Some(_) => Self::Valid,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    #[test]
    fn test_token_state_classification() {
        let now = Utc::now();
        let mut token = IdpToken {
            access_token: "a".to_string(),
            id_token: "i".to_string(),
            sso_token: None,
            token_type: "Bearer".to_string(),
            expires: now,
            redirect: String::new(),
            is_pairing_token: false,
            is_pkv_fast_track: false,
        };
        assert_eq!(TokenState::of(None, now), TokenState::NoToken);
        assert_eq!(TokenState::of(Some(&token), now), TokenState::Expired);
        token.expires = now + Duration::seconds(1);
        assert_eq!(TokenState::of(Some(&token), now), TokenState::Valid);
    }

    #[test]
    fn test_profile_ids_are_unique() {
        assert_ne!(ProfileId::new(), ProfileId::new());
    }
}
