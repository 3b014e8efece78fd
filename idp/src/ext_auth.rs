//! External authentication engine (login through an insurance app).
//!
//! ```text
//! start_ext_auth ──► IDP ──302──► insurance app ──callback──►
//!     ext_auth_verify_and_exchange ──► IDP ──302──► exchange ──► IdpToken
//! ```
//!
//! Between the two halves the request is parked in the
//! [`ExtAuthRequestStorage`] under the state the callback will carry: the
//! client's own state for GID entries, the IDP-issued state from the
//! redirect URL for fast-track entries. A parked request is consumed by the
//! first callback carrying its state, whether that callback succeeds or not.

use crate::crypto::{CODE_CHALLENGE_METHOD, CryptoBox, code_challenge};
use crate::discovery::DiscoveryValidator;
use crate::environment::IdpEnvironment;
use crate::error::{IdpError, Result};
use crate::exchange::ExchangeEngine;
use crate::models::{
    ExtAuthChallengeSession, ExtAuthRequest, ExtAuthVerify, IdTokenPayload, IdpToken,
    KkAppDirectory, KkAppEntry,
};
use crate::providers::{
    CryptoPrimitives, ExtAuthRequestStorage, IdpClient, IdpStorage, TrustStore,
};
use std::fmt::Display;
use tracing::{debug, info};
use url::Url;

/// Directory lookup and external authentication.
pub struct ExtAuthEngine<'a, C, P, T, S, K, E, D> {
    env: &'a IdpEnvironment<C, P, T, S, K, E, D>,
}

impl<'a, C, P, T, S, K, E, D> ExtAuthEngine<'a, C, P, T, S, K, E, D>
where
    C: IdpClient,
    P: CryptoPrimitives,
    T: TrustStore,
    S: IdpStorage,
    E: ExtAuthRequestStorage,
{
    /// Create an engine over `env`.
    #[must_use]
    pub const fn new(env: &'a IdpEnvironment<C, P, T, S, K, E, D>) -> Self {
        Self { env }
    }

    /// Insurance apps supporting external authentication.
    ///
    /// The directory must be signed by the discovery document's discovery
    /// key.
    ///
    /// # Errors
    ///
    /// - [`IdpError::InvalidSignature`] if the directory signature fails
    /// - discovery, network and decoding errors
    pub async fn load_directory_kk_apps(&self) -> Result<KkAppDirectory> {
        let document = DiscoveryValidator::new(self.env).load().await?;
        let directory = self
            .env
            .client
            .load_directory_kk_apps(document.directory_endpoint()?)
            .await?;
        directory
            .verify(&document.discovery_key.public_key, &self.env.crypto)
            .map_err(|error| match error {
                IdpError::UnsupportedCurve(curve) => IdpError::UnsupportedCurve(curve),
                other => IdpError::InvalidSignature(format!("app directory: {other}")),
            })?;
        directory.claims()
    }

    /// Start external authentication with `entry`.
    ///
    /// Returns the URL to open (the insurance app or its web login). The
    /// pending request is registered before this returns.
    ///
    /// # Errors
    ///
    /// - [`IdpError::ExtAuthMissingParameter`] if a fast-track redirect
    ///   carries no `state`
    /// - discovery, network, server and storage errors
    pub async fn start_ext_auth(&self, entry: &KkAppEntry) -> Result<Url> {
        let config = &self.env.config;
        let document = DiscoveryValidator::new(self.env).load().await?;

        let crypto_box = CryptoBox::new();
        let verifier_code = crypto_box.generate_verifier_code();
        let state = crypto_box.generate_state();
        let nonce = crypto_box.generate_nonce();

        let request = ExtAuthRequest {
            kk_app_id: entry.kk_app_id.clone(),
            state: state.clone(),
            code_challenge: code_challenge(&verifier_code),
            code_challenge_method: CODE_CHALLENGE_METHOD.to_string(),
            nonce: nonce.clone(),
            client_id: config.client_id.clone(),
            redirect_uri: config.redirect_uri.clone(),
            scope: config.scope_for(false),
        };
        let location = self
            .env
            .client
            .start_ext_auth(document.ext_auth_endpoint(entry.kk_app_gid)?, &request)
            .await?;

        let lookup_state = if entry.kk_app_gid {
            state.clone()
        } else {
            query_value(&location, "state")
                .ok_or_else(|| IdpError::ExtAuthMissingParameter("state".to_string()))?
        };

        self.env
            .ext_auth_requests
            .insert(
                lookup_state,
                ExtAuthChallengeSession {
                    verifier_code,
                    nonce,
                    state,
                    redirect: config.redirect_uri.clone(),
                    entry: entry.clone(),
                },
            )
            .await?;

        info!(app = %entry.kk_app_id, gid = entry.kk_app_gid, "External authentication started");
        Ok(location)
    }

    /// Complete external authentication from the insurance app callback.
    ///
    /// The token carries the PKV flag of the originating directory entry and
    /// is persisted.
    ///
    /// # Errors
    ///
    /// - [`IdpError::ExtAuthMissingParameter`] if `code` or `state` is absent
    /// - [`IdpError::ExtAuthOriginalRequestMissing`] if no request is
    ///   pending for the state (never started or already consumed)
    /// - [`IdpError::InvalidStateParameter`] if the IDP echoes another state
    /// - exchange, network and server errors
    pub async fn ext_auth_verify_and_exchange<F, V>(
        &self,
        callback: &Url,
        validator: F,
    ) -> Result<IdpToken>
    where
        F: FnOnce(&IdTokenPayload) -> std::result::Result<(), V>,
        V: Display,
    {
        let code = query_value(callback, "code")
            .ok_or_else(|| IdpError::ExtAuthMissingParameter("code".to_string()))?;
        let state = query_value(callback, "state")
            .ok_or_else(|| IdpError::ExtAuthMissingParameter("state".to_string()))?;

        let session = self
            .env
            .ext_auth_requests
            .take(&state)
            .await?
            .ok_or(IdpError::ExtAuthOriginalRequestMissing)?;
        debug!(app = %session.entry.kk_app_id, "Pending external authentication found");

        let document = DiscoveryValidator::new(self.env).load().await?;
        let mut kk_app_redirect_uri = callback.clone();
        kk_app_redirect_uri.set_query(None);
        let verify = ExtAuthVerify {
            code,
            state,
            kk_app_redirect_uri: kk_app_redirect_uri.to_string(),
        };

        let exchange_token = self
            .env
            .client
            .ext_auth_verify(document.ext_auth_endpoint(session.entry.kk_app_gid)?, &verify)
            .await?;
        exchange_token.validate_state(&session)?;

        let mut token = ExchangeEngine::new(self.env)
            .exchange_unpersisted(&exchange_token, &session, validator)
            .await?;
        token.is_pkv_fast_track = session.entry.kk_app_pkv;
        {
            let _guard = self.env.profile_locks.lock(self.env.profile).await;
            self.env.storage.set_token(Some(token.clone())).await?;
        }

        info!(app = %session.entry.kk_app_id, pkv = token.is_pkv_fast_track, "External authentication completed");
        Ok(token)
    }
}

fn query_value(url: &Url, name: &str) -> Option<String> {
    url.query_pairs()
        .find(|(key, _)| key == name)
        .map(|(_, value)| value.into_owned())
}
