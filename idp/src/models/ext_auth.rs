//! External (insurance app) authentication models.

use super::ChallengeContext;
use serde::{Deserialize, Serialize};

/// An insurance app supporting external authentication.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct KkAppEntry {
    /// Display name.
    pub kk_app_name: String,

    /// Identifier sent to the IDP.
    pub kk_app_id: String,

    /// Entry is reached through a federated identity provider (GID)
    /// instead of the fast-track endpoint.
    #[serde(default)]
    pub kk_app_gid: bool,

    /// Entry belongs to a private insurer.
    #[serde(default)]
    pub kk_app_pkv: bool,
}

/// Signed directory of insurance apps.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct KkAppDirectory {
    /// Available apps.
    #[serde(default)]
    pub kk_app_list: Vec<KkAppEntry>,
}

/// Authorization request sent to an external authentication endpoint.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExtAuthRequest {
    /// Selected app.
    pub kk_app_id: String,

    /// Client `state`.
    pub state: String,

    /// PKCE code challenge.
    pub code_challenge: String,

    /// PKCE method (`S256`).
    pub code_challenge_method: String,

    /// Client `nonce`.
    pub nonce: String,

    /// Client identifier.
    pub client_id: String,

    /// Redirect URI of this client.
    pub redirect_uri: String,

    /// Requested scope.
    pub scope: String,
}

/// Pending external authentication, looked up by `state` on callback.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExtAuthChallengeSession {
    /// PKCE code verifier.
    pub verifier_code: String,

    /// Client `nonce`.
    pub nonce: String,

    /// Client `state` the final redirect must echo.
    pub state: String,

    /// Redirect URI of the request.
    pub redirect: String,

    /// App the user picked.
    pub entry: KkAppEntry,
}

impl ChallengeContext for ExtAuthChallengeSession {
    fn verifier_code(&self) -> &str {
        &self.verifier_code
    }

    fn state(&self) -> &str {
        &self.state
    }

    fn nonce(&self) -> &str {
        &self.nonce
    }

    fn redirect(&self) -> &str {
        &self.redirect
    }
}

/// Insurance app callback forwarded to the IDP.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExtAuthVerify {
    /// Code issued by the insurance app.
    pub code: String,

    /// State from the callback.
    pub state: String,

    /// Redirect URI the insurance app returned to.
    pub kk_app_redirect_uri: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_directory_flags_default_to_false() {
        let directory: KkAppDirectory = serde_json::from_str(
            r#"{"kk_app_list":[{"kk_app_name":"Gematik KK","kk_app_id":"kk1"}]}"#,
        )
        .unwrap();
        let entry = &directory.kk_app_list[0];
        assert_eq!(entry.kk_app_id, "kk1");
        assert!(!entry.kk_app_gid);
        assert!(!entry.kk_app_pkv);
    }
}
