//! IDP wire protocol trait.
//!
//! Every endpoint comes from the verified discovery document; the client
//! only knows where the document itself lives. Implementations map
//! transport failures to [`IdpError::Network`](crate::error::IdpError::Network)
//! and structured error bodies to
//! [`IdpError::ServerError`](crate::error::IdpError::ServerError).

use crate::crypto::{Jwe, Jwt};
use crate::error::Result;
use crate::models::{
    DiscoveryDocumentResponse, ExchangeToken, ExtAuthRequest, ExtAuthVerify, IdpChallenge,
    PairingEntries, PairingEntry, TokenResponse,
};
use serde::{Deserialize, Serialize};
use std::future::Future;
use url::Url;

/// Query of a challenge request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChallengeRequest {
    /// Client identifier.
    pub client_id: String,

    /// Client `state`.
    pub state: String,

    /// Redirect URI.
    pub redirect_uri: String,

    /// PKCE code challenge.
    pub code_challenge: String,

    /// PKCE method (`S256`).
    pub code_challenge_method: String,

    /// Always `code`.
    pub response_type: String,

    /// Client `nonce`.
    pub nonce: String,

    /// Space separated scopes.
    pub scope: String,
}

/// Form of a token request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenRequest {
    /// Always `authorization_code`.
    pub grant_type: String,

    /// Authorization code.
    pub code: String,

    /// Encrypted [`KeyVerifier`].
    pub key_verifier: Jwe,

    /// Client identifier.
    pub client_id: String,

    /// Redirect URI of the originating request.
    pub redirect_uri: String,
}

/// Binds the session AES key to the PKCE verifier; sent encrypted.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct KeyVerifier {
    /// Session AES key (base64url) the token bundle is encrypted with.
    pub token_key: String,

    /// PKCE code verifier.
    pub code_verifier: String,
}

impl std::fmt::Debug for KeyVerifier {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("KeyVerifier(..)")
    }
}

/// The IDP's HTTP interface.
pub trait IdpClient: Send + Sync {
    /// Fetch the signed discovery document together with the encryption
    /// and signing keys it references.
    ///
    /// # Errors
    ///
    /// Returns a network or server error if any of the fetches fail.
    fn load_discovery_document(
        &self,
        url: &Url,
    ) -> impl Future<Output = Result<DiscoveryDocumentResponse>> + Send;

    /// Request a signed challenge.
    ///
    /// # Errors
    ///
    /// Returns a network or server error.
    fn request_challenge(
        &self,
        endpoint: &Url,
        request: &ChallengeRequest,
    ) -> impl Future<Output = Result<IdpChallenge>> + Send;

    /// Submit an encrypted card-signed challenge.
    ///
    /// # Errors
    ///
    /// Returns a network or server error.
    fn verify(
        &self,
        endpoint: &Url,
        signed_challenge: &Jwe,
    ) -> impl Future<Output = Result<ExchangeToken>> + Send;

    /// Submit encrypted biometric authentication data.
    ///
    /// # Errors
    ///
    /// Returns a network or server error.
    fn alt_verify(
        &self,
        endpoint: &Url,
        authentication_data: &Jwe,
    ) -> impl Future<Output = Result<ExchangeToken>> + Send;

    /// Re-authenticate with an SSO token against an unsigned challenge.
    ///
    /// # Errors
    ///
    /// Returns a network or server error.
    fn sso_refresh(
        &self,
        endpoint: &Url,
        challenge: &Jwt,
        sso_token: &str,
    ) -> impl Future<Output = Result<ExchangeToken>> + Send;

    /// Trade an authorization code for the encrypted token bundle.
    ///
    /// # Errors
    ///
    /// Returns a network or server error.
    fn exchange(
        &self,
        endpoint: &Url,
        request: &TokenRequest,
    ) -> impl Future<Output = Result<TokenResponse>> + Send;

    /// Register a device key.
    ///
    /// # Errors
    ///
    /// Returns a network or server error (`pairingAuthorizationFailed` and
    /// friends arrive as server errors).
    fn register_device(
        &self,
        endpoint: &Url,
        registration_data: &Jwe,
        access_token: &Jwe,
    ) -> impl Future<Output = Result<PairingEntry>> + Send;

    /// Delete a device registration.
    ///
    /// # Errors
    ///
    /// Returns a network or server error.
    fn unregister_device(
        &self,
        endpoint: &Url,
        key_identifier: &str,
        access_token: &Jwe,
    ) -> impl Future<Output = Result<()>> + Send;

    /// List device registrations.
    ///
    /// # Errors
    ///
    /// Returns a network or server error.
    fn list_devices(
        &self,
        endpoint: &Url,
        access_token: &Jwe,
    ) -> impl Future<Output = Result<PairingEntries>> + Send;

    /// Fetch the signed insurance app directory.
    ///
    /// # Errors
    ///
    /// Returns a network or server error.
    fn load_directory_kk_apps(&self, endpoint: &Url) -> impl Future<Output = Result<Jwt>> + Send;

    /// Start external authentication; returns the URL to open.
    ///
    /// # Errors
    ///
    /// Returns a network or server error.
    fn start_ext_auth(
        &self,
        endpoint: &Url,
        request: &ExtAuthRequest,
    ) -> impl Future<Output = Result<Url>> + Send;

    /// Forward the insurance app callback to the IDP.
    ///
    /// # Errors
    ///
    /// Returns a network or server error.
    fn ext_auth_verify(
        &self,
        endpoint: &Url,
        verify: &ExtAuthVerify,
    ) -> impl Future<Output = Result<ExchangeToken>> + Send;
}
