//! IDP client configuration.
//!
//! Configuration values should be provided by the application, not hardcoded.
//! The defaults point at a local reference IDP and are only useful for tests.

use std::time::Duration;

/// Default client identifier registered with the IDP.
pub const DEFAULT_CLIENT_ID: &str = "eRezeptApp";

/// Default upper bound for automatic challenge re-requests.
pub const DEFAULT_MAX_CHALLENGE_REFRESHES: usize = 5;

/// IDP client configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IdpConfig {
    /// Client identifier sent with every authorization request.
    pub client_id: String,

    /// Redirect URI used for a regular login.
    pub redirect_uri: String,

    /// Redirect URI used when the login authorizes a device pairing.
    ///
    /// Tokens obtained through a challenge requested for this redirect carry
    /// the pairing-flow flag.
    pub pairing_redirect_uri: String,

    /// Redirect URI the insurance app returns to after external authentication.
    pub ext_auth_redirect_uri: String,

    /// URL of the signed discovery document.
    pub discovery_url: String,

    /// Scopes requested for a regular login.
    pub scopes: Vec<String>,

    /// Scopes requested for a pairing login.
    pub pairing_scopes: Vec<String>,

    /// Maximum number of times an expiring challenge is re-requested
    /// automatically before the stream ends.
    ///
    /// Default: 5
    pub max_challenge_refreshes: usize,

    /// Timeout for a single IDP request.
    ///
    /// Default: 30 seconds
    pub request_timeout: Duration,

    /// Prefix of the hardware key tag derived from a key identifier.
    pub biometric_key_tag_prefix: String,
}

impl IdpConfig {
    /// Create new IDP configuration.
    ///
    /// # Arguments
    ///
    /// * `discovery_url` - URL of the IDP discovery document
    /// * `redirect_uri` - Redirect URI registered for this client
    #[must_use]
    pub fn new(discovery_url: String, redirect_uri: String) -> Self {
        Self {
            discovery_url,
            redirect_uri,
            ..Self::default()
        }
    }

    /// Set client identifier.
    #[must_use]
    pub fn with_client_id(mut self, client_id: String) -> Self {
        self.client_id = client_id;
        self
    }

    /// Set pairing redirect URI.
    #[must_use]
    pub fn with_pairing_redirect_uri(mut self, uri: String) -> Self {
        self.pairing_redirect_uri = uri;
        self
    }

    /// Set external authentication redirect URI.
    #[must_use]
    pub fn with_ext_auth_redirect_uri(mut self, uri: String) -> Self {
        self.ext_auth_redirect_uri = uri;
        self
    }

    /// Set login scopes.
    #[must_use]
    pub fn with_scopes(mut self, scopes: Vec<String>) -> Self {
        self.scopes = scopes;
        self
    }

    /// Set the automatic challenge refresh cap.
    #[must_use]
    pub const fn with_max_challenge_refreshes(mut self, max: usize) -> Self {
        self.max_challenge_refreshes = max;
        self
    }

    /// Set request timeout.
    #[must_use]
    pub const fn with_request_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout = timeout;
        self
    }

    /// Build configuration from `ERX_IDP_*` environment variables.
    ///
    /// Unset variables keep their default. Recognised variables:
    /// `ERX_IDP_DISCOVERY_URL`, `ERX_IDP_CLIENT_ID`, `ERX_IDP_REDIRECT_URI`,
    /// `ERX_IDP_PAIRING_REDIRECT_URI`, `ERX_IDP_EXT_AUTH_REDIRECT_URI`,
    /// `ERX_IDP_MAX_CHALLENGE_REFRESHES`, `ERX_IDP_REQUEST_TIMEOUT_SECS`.
    #[must_use]
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let mut config = Self::default();
        if let Some(value) = lookup("ERX_IDP_DISCOVERY_URL") {
            config.discovery_url = value;
        }
        if let Some(value) = lookup("ERX_IDP_CLIENT_ID") {
            config.client_id = value;
        }
        if let Some(value) = lookup("ERX_IDP_REDIRECT_URI") {
            config.redirect_uri = value;
        }
        if let Some(value) = lookup("ERX_IDP_PAIRING_REDIRECT_URI") {
            config.pairing_redirect_uri = value;
        }
        if let Some(value) = lookup("ERX_IDP_EXT_AUTH_REDIRECT_URI") {
            config.ext_auth_redirect_uri = value;
        }
        if let Some(max) = lookup("ERX_IDP_MAX_CHALLENGE_REFRESHES").and_then(|v| v.parse().ok()) {
            config.max_challenge_refreshes = max;
        }
        if let Some(secs) = lookup("ERX_IDP_REQUEST_TIMEOUT_SECS").and_then(|v| v.parse().ok()) {
            config.request_timeout = Duration::from_secs(secs);
        }
        config
    }

    /// Space separated scope string for a login or pairing challenge.
    #[must_use]
    pub fn scope_for(&self, pairing: bool) -> String {
        if pairing {
            self.pairing_scopes.join(" ")
        } else {
            self.scopes.join(" ")
        }
    }
}

impl Default for IdpConfig {
    fn default() -> Self {
        Self {
            client_id: DEFAULT_CLIENT_ID.to_string(),
            redirect_uri: "https://redirect.gematik.de/erezept".to_string(),
            pairing_redirect_uri: "https://redirect.gematik.de/erezept/pairing".to_string(),
            ext_auth_redirect_uri: "https://das-e-rezept-fuer-deutschland.de/extauth".to_string(),
            discovery_url: "http://localhost:8571/.well-known/openid-configuration".to_string(),
            scopes: vec!["e-rezept".to_string(), "openid".to_string()],
            pairing_scopes: vec!["pairing".to_string(), "openid".to_string()],
            max_challenge_refreshes: DEFAULT_MAX_CHALLENGE_REFRESHES,
            request_timeout: Duration::from_secs(30),
            biometric_key_tag_prefix: "de.gematik.erezept.idp.biometric".to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    #[test]
    fn test_config_builder() {
        let config = IdpConfig::new(
            "https://idp.example.com/discovery".to_string(),
            "https://app.example.com/cb".to_string(),
        )
        .with_client_id("client".to_string())
        .with_max_challenge_refreshes(2)
        .with_request_timeout(Duration::from_secs(5));

        assert_eq!(config.discovery_url, "https://idp.example.com/discovery");
        assert_eq!(config.redirect_uri, "https://app.example.com/cb");
        assert_eq!(config.client_id, "client");
        assert_eq!(config.max_challenge_refreshes, 2);
        assert_eq!(config.request_timeout, Duration::from_secs(5));
    }

    #[test]
    fn test_scope_for() {
        let config = IdpConfig::default();
        assert_eq!(config.scope_for(false), "e-rezept openid");
        assert_eq!(config.scope_for(true), "pairing openid");
    }

    #[test]
    fn test_from_lookup_overrides_and_ignores_garbage() {
        let vars: HashMap<&str, &str> = [
            ("ERX_IDP_CLIENT_ID", "other"),
            ("ERX_IDP_MAX_CHALLENGE_REFRESHES", "not-a-number"),
            ("ERX_IDP_REQUEST_TIMEOUT_SECS", "7"),
        ]
        .into_iter()
        .collect();

        let config = IdpConfig::from_lookup(|key| vars.get(key).map(ToString::to_string));
        assert_eq!(config.client_id, "other");
        assert_eq!(config.max_challenge_refreshes, DEFAULT_MAX_CHALLENGE_REFRESHES);
        assert_eq!(config.request_timeout, Duration::from_secs(7));
    }
}
