//! Token bundle models.

use crate::crypto::Jwe;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// The token the lifecycle manager owns for one profile.
///
/// `access_token` and `id_token` are decrypted compact JWTs. The ID token
/// was signature-checked against the discovery signing certificate and
/// nonce-checked before this value was built.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IdpToken {
    /// Access token for the e-prescription service.
    pub access_token: String,

    /// ID token describing the authenticated insurant.
    pub id_token: String,

    /// SSO token for silent re-authentication.
    #[serde(default)]
    pub sso_token: Option<String>,

    /// Token type, `Bearer`.
    pub token_type: String,

    /// Access token expiry.
    pub expires: DateTime<Utc>,

    /// Redirect URI the token was issued for.
    pub redirect: String,

    /// Token authorizes a device pairing.
    #[serde(default)]
    pub is_pairing_token: bool,

    /// Token was obtained via an insurance app of a private insurer.
    #[serde(default)]
    pub is_pkv_fast_track: bool,
}

impl IdpToken {
    /// `true` once `expires <= now`.
    ///
    /// A token expiring exactly now is already expired.
    #[must_use]
    pub fn is_expired_at(&self, now: DateTime<Utc>) -> bool {
        self.expires <= now
    }

    /// [`IdpToken::is_expired_at`] for the current time.
    #[must_use]
    pub fn is_expired(&self) -> bool {
        self.is_expired_at(Utc::now())
    }
}

impl std::fmt::Debug for IdpToken {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("IdpToken")
            .field("token_type", &self.token_type)
            .field("expires", &self.expires)
            .field("redirect", &self.redirect)
            .field("has_sso_token", &self.sso_token.is_some())
            .field("is_pairing_token", &self.is_pairing_token)
            .field("is_pkv_fast_track", &self.is_pkv_fast_track)
            .finish_non_exhaustive()
    }
}

/// Body of a successful token endpoint response.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenResponse {
    /// Access token, `dir` encrypted with the session key.
    pub access_token: Jwe,

    /// ID token, `dir` encrypted with the session key.
    pub id_token: Jwe,

    /// Access token lifetime in seconds.
    pub expires_in: i64,

    /// Token type.
    #[serde(default = "default_token_type")]
    pub token_type: String,
}

fn default_token_type() -> String {
    "Bearer".to_string()
}

/// Claims of a decrypted ID token.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IdTokenPayload {
    /// Nonce echoed from the challenge request.
    #[serde(default)]
    pub nonce: Option<String>,

    /// Issuer.
    #[serde(default)]
    pub iss: Option<String>,

    /// Subject.
    #[serde(default)]
    pub sub: Option<String>,

    /// Expires at (seconds since epoch).
    #[serde(default)]
    pub exp: Option<i64>,

    /// Issued at (seconds since epoch).
    #[serde(default)]
    pub iat: Option<i64>,

    /// Insurant given name.
    #[serde(default)]
    pub given_name: Option<String>,

    /// Insurant family name.
    #[serde(default)]
    pub family_name: Option<String>,

    /// Insurance number (KVNR).
    #[serde(default, rename = "idNummer")]
    pub id_number: Option<String>,

    /// Insurance name.
    #[serde(default, rename = "organizationName")]
    pub organization_name: Option<String>,

    /// Any other claim.
    #[serde(flatten)]
    pub extra: HashMap<String, serde_json::Value>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    fn token(expires: DateTime<Utc>) -> IdpToken {
        IdpToken {
            access_token: "access".to_string(),
            id_token: "id".to_string(),
            sso_token: Some("sso".to_string()),
            token_type: "Bearer".to_string(),
            expires,
            redirect: "https://redirect.example".to_string(),
            is_pairing_token: false,
            is_pkv_fast_track: false,
        }
    }

    #[test]
    fn test_expiry_boundary() {
        let now = Utc::now();
        assert!(token(now).is_expired_at(now));
        assert!(!token(now + Duration::seconds(1)).is_expired_at(now));
    }

    #[test]
    fn test_debug_hides_token_material() {
        let rendered = format!("{:?}", token(Utc::now()));
        assert!(!rendered.contains("access\""));
        assert!(!rendered.contains("\"sso\""));
    }

    #[test]
    fn test_id_token_payload_keeps_unknown_claims() {
        let payload: IdTokenPayload =
            serde_json::from_str(r#"{"nonce":"n","idNummer":"X123","acr":"gematik-ehealth-loa-high"}"#)
                .unwrap();
        assert_eq!(payload.nonce.as_deref(), Some("n"));
        assert_eq!(payload.id_number.as_deref(), Some("X123"));
        assert!(payload.extra.contains_key("acr"));
    }
}
