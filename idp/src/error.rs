//! Error types for IDP authentication operations.

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Result type alias for IDP operations.
pub type Result<T> = std::result::Result<T, IdpError>;

/// Transport-level failure while talking to the IDP.
///
/// Never retried inside this crate; callers decide on a retry policy.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum NetworkError {
    /// Connection could not be established or broke down mid-request.
    #[error("transport failure: {0}")]
    Transport(String),

    /// Request did not complete within the configured timeout.
    #[error("request timed out")]
    Timeout,

    /// Server answered with an unexpected HTTP status and no structured body.
    #[error("unexpected HTTP status {status}")]
    HttpStatus {
        /// HTTP status code.
        status: u16,
    },

    /// Response was missing a mandatory part (e.g. `Location` header).
    #[error("malformed response: {0}")]
    MalformedResponse(String),
}

/// Structured business error returned by the IDP.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServerErrorResponse {
    /// HTTP status code of the response.
    #[serde(default)]
    pub status: u16,

    /// OAuth2 error identifier (e.g. `invalid_request`).
    #[serde(default)]
    pub error: String,

    /// Machine readable code callers branch on (e.g. `pairingAuthorizationFailed`).
    #[serde(default, alias = "gematik_code", alias = "error_code")]
    pub code: Option<String>,

    /// Human readable description.
    #[serde(default, alias = "error_description", alias = "gematik_error_text")]
    pub description: Option<String>,
}

impl std::fmt::Display for ServerErrorResponse {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} ({})", self.error, self.status)?;
        if let Some(code) = &self.code {
            write!(f, " code={code}")?;
        }
        Ok(())
    }
}

/// Coarse error classification used by callers to pick a UI message or
/// recovery path.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorCategory {
    /// Transport failure, retryable by caller policy.
    Network,
    /// Signature, expiry, state or nonce mismatch. Fatal to the attempt.
    Validation,
    /// Building an encrypted payload failed.
    Encryption,
    /// Decrypting an IDP response failed.
    Decryption,
    /// IDP returned a structured business error.
    Server,
    /// Chain-of-trust failure.
    TrustStore,
    /// Caller-visible precondition not met (no token, missing request, ...).
    State,
    /// Programmer-invariant violation; a bug signal.
    Internal,
}

/// Error taxonomy of the IDP core.
///
/// Every validation and crypto failure aborts the current operation. Nothing
/// in this crate downgrades one of these to success.
#[derive(Debug, Error, Clone, PartialEq)]
pub enum IdpError {
    // ═══════════════════════════════════════════════════════════
    // Transport
    // ═══════════════════════════════════════════════════════════

    /// Transport failure.
    #[error("Network error: {0}")]
    Network(#[from] NetworkError),

    /// IDP answered with a structured business error.
    #[error("IDP server error: {0}")]
    ServerError(ServerErrorResponse),

    // ═══════════════════════════════════════════════════════════
    // Validation
    // ═══════════════════════════════════════════════════════════

    /// Discovery document failed signature or time validation.
    #[error("Invalid discovery document: {0}")]
    InvalidDiscoveryDocument(String),

    /// A JWT signature did not verify.
    #[error("Invalid signature: {0}")]
    InvalidSignature(String),

    /// Key material uses a curve this client refuses to verify with.
    #[error("Unsupported curve: {0}")]
    UnsupportedCurve(String),

    /// The IDP challenge is past its `exp` claim.
    #[error("Challenge has expired")]
    ChallengeExpired,

    /// Echoed `state` does not match the originating challenge.
    #[error("Invalid state parameter")]
    InvalidStateParameter,

    /// ID token `nonce` claim does not match the challenge nonce.
    #[error("Invalid nonce")]
    InvalidNonce,

    /// Caller-supplied ID token validation rejected the token.
    #[error("ID token rejected: {0}")]
    Unspecified(String),

    // ═══════════════════════════════════════════════════════════
    // Crypto
    // ═══════════════════════════════════════════════════════════

    /// Building a JWE or signature failed.
    #[error("Encryption failed: {0}")]
    Encryption(String),

    /// Decrypting an IDP response failed.
    #[error("Decryption failed: {0}")]
    Decryption(String),

    /// Payload could not be decoded (malformed JWT/JSON/base64).
    #[error("Decoding failed: {0}")]
    Decoding(String),

    /// Certificate chain rejected or trust store unavailable.
    #[error("Trust store error: {0}")]
    TrustStore(String),

    /// Hardware key container failed.
    #[error("Key container error: {0}")]
    KeyContainer(String),

    // ═══════════════════════════════════════════════════════════
    // State
    // ═══════════════════════════════════════════════════════════

    /// Operation requires a token (or SSO token) that is not present.
    #[error("Token unavailable")]
    TokenUnavailable,

    /// No pairing certificate/key identifier is stored.
    #[error("No certificate found")]
    NoCertificateFound,

    /// Callback `state` has no pending external-auth request.
    #[error("External authentication: original request missing")]
    ExtAuthOriginalRequestMissing,

    /// Callback URL lacks a mandatory parameter.
    #[error("External authentication: missing parameter `{0}`")]
    ExtAuthMissingParameter(String),

    /// Persistence collaborator failed.
    #[error("Storage error: {0}")]
    Storage(String),

    /// Operation was cancelled by the caller.
    #[error("Operation cancelled")]
    Cancelled,

    /// Programmer-invariant violation (should not be exposed to users).
    #[error("Internal error: {0}")]
    Internal(String),
}

impl IdpError {
    /// Classify this error.
    ///
    /// # Examples
    ///
    /// ```
    /// # use erezept_idp::error::{ErrorCategory, IdpError};
    /// assert_eq!(IdpError::InvalidNonce.category(), ErrorCategory::Validation);
    /// assert_eq!(IdpError::TokenUnavailable.category(), ErrorCategory::State);
    /// ```
    #[must_use]
    pub const fn category(&self) -> ErrorCategory {
        match self {
            Self::Network(_) => ErrorCategory::Network,
            Self::ServerError(_) => ErrorCategory::Server,
            Self::InvalidDiscoveryDocument(_)
            | Self::InvalidSignature(_)
            | Self::UnsupportedCurve(_)
            | Self::ChallengeExpired
            | Self::InvalidStateParameter
            | Self::InvalidNonce
            | Self::Unspecified(_)
            | Self::Decoding(_) => ErrorCategory::Validation,
            Self::Encryption(_) | Self::KeyContainer(_) => ErrorCategory::Encryption,
            Self::Decryption(_) => ErrorCategory::Decryption,
            Self::TrustStore(_) => ErrorCategory::TrustStore,
            Self::TokenUnavailable
            | Self::NoCertificateFound
            | Self::ExtAuthOriginalRequestMissing
            | Self::ExtAuthMissingParameter(_)
            | Self::Cancelled => ErrorCategory::State,
            Self::Storage(_) | Self::Internal(_) => ErrorCategory::Internal,
        }
    }

    /// Returns `true` for transport failures.
    ///
    /// Callers use this to tell "temporarily offline" from "log in again".
    #[must_use]
    pub const fn is_network(&self) -> bool {
        matches!(self, Self::Network(_))
    }

    /// Returns `true` if this error is a validation failure.
    #[must_use]
    pub const fn is_validation(&self) -> bool {
        matches!(self.category(), ErrorCategory::Validation)
    }

    /// Returns `true` if observing this error must clear the stored token.
    ///
    /// The IDP rejected the credential: a structured server error, or a bare
    /// 4xx. A 403 is a pairing or consent verdict on a still valid session,
    /// and 408 and 429 are transient. Transport failures never invalidate.
    ///
    /// # Examples
    ///
    /// ```
    /// # use erezept_idp::error::{IdpError, NetworkError};
    /// assert!(!IdpError::Network(NetworkError::Timeout).should_invalidate_token());
    /// assert!(IdpError::Network(NetworkError::HttpStatus { status: 401 }).should_invalidate_token());
    /// assert!(!IdpError::Network(NetworkError::HttpStatus { status: 503 }).should_invalidate_token());
    /// ```
    #[must_use]
    pub const fn should_invalidate_token(&self) -> bool {
        match self {
            Self::ServerError(response) => response.status != 403,
            Self::Network(NetworkError::HttpStatus { status }) => {
                matches!(*status, 400..=499) && !matches!(*status, 403 | 408 | 429)
            }
            _ => false,
        }
    }

    /// Machine readable server code, if this is a [`IdpError::ServerError`].
    #[must_use]
    pub fn server_code(&self) -> Option<&str> {
        match self {
            Self::ServerError(response) => response.code.as_deref(),
            _ => None,
        }
    }
}

impl From<serde_json::Error> for IdpError {
    fn from(error: serde_json::Error) -> Self {
        Self::Decoding(error.to_string())
    }
}

impl From<base64::DecodeError> for IdpError {
    fn from(error: base64::DecodeError) -> Self {
        Self::Decoding(error.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_network_errors_are_not_validation() {
        let error = IdpError::Network(NetworkError::Transport("reset".to_string()));
        assert!(error.is_network());
        assert!(!error.is_validation());
    }

    #[test]
    fn test_validation_errors() {
        for error in [
            IdpError::InvalidStateParameter,
            IdpError::InvalidNonce,
            IdpError::ChallengeExpired,
            IdpError::InvalidSignature("bad".to_string()),
        ] {
            assert!(error.is_validation(), "{error} should be a validation error");
        }
    }

    #[test]
    fn test_server_code() {
        let error = IdpError::ServerError(ServerErrorResponse {
            status: 403,
            error: "access_denied".to_string(),
            code: Some("pairingAuthorizationFailed".to_string()),
            description: None,
        });
        assert_eq!(error.server_code(), Some("pairingAuthorizationFailed"));
        // pairing verdicts leave the session alone
        assert!(!error.should_invalidate_token());
        assert_eq!(error.category(), ErrorCategory::Server);
    }

    #[test]
    fn test_rejected_credentials_invalidate_token() {
        let rejected = IdpError::ServerError(ServerErrorResponse {
            status: 400,
            error: "invalid_grant".to_string(),
            code: Some("2020".to_string()),
            description: None,
        });
        assert!(rejected.should_invalidate_token());

        for status in [400, 401, 404] {
            assert!(
                IdpError::Network(NetworkError::HttpStatus { status }).should_invalidate_token(),
                "{status} should invalidate"
            );
        }
        for status in [403, 408, 429, 500, 502] {
            assert!(
                !IdpError::Network(NetworkError::HttpStatus { status }).should_invalidate_token(),
                "{status} should not invalidate"
            );
        }
        assert!(!IdpError::Network(NetworkError::Transport("reset".to_string())).should_invalidate_token());
        assert!(!IdpError::InvalidNonce.should_invalidate_token());
    }

    #[test]
    fn test_server_error_body_aliases() {
        let body = r#"{"error":"invalid_request","gematik_code":"2020","gematik_error_text":"expired"}"#;
        let response: ServerErrorResponse = serde_json::from_str(body).unwrap();
        assert_eq!(response.code.as_deref(), Some("2020"));
        assert_eq!(response.description.as_deref(), Some("expired"));
    }
}
