//! Token lifecycle manager.
//!
//! Owns the single token of a profile:
//!
//! ```text
//!            exchange                      expires <= now
//! NoToken ──────────────► Valid ─────────────────────────► Expired
//!    ▲                      ▲                                 │
//!    │   invalidate / 401   │           SSO refresh           │
//!    └──── Invalidating ◄───┴─────────────────────────────────┘
//! ```
//!
//! Reads go through [`TokenLifecycle::auto_refreshed_token`], which renews
//! an expired token with its SSO token. Network failures during renewal
//! propagate so callers can tell "offline" from "logged out"; a rejected
//! SSO token clears the stored token.

use crate::challenge::ChallengeEngine;
use crate::discovery::DiscoveryValidator;
use crate::environment::IdpEnvironment;
use crate::error::{IdpError, Result};
use crate::exchange::{ExchangeEngine, accept_any_id_token};
use crate::models::IdpToken;
use crate::providers::{CryptoPrimitives, IdpClient, IdpStorage, TrustStore};
use crate::state::TokenState;
use chrono::Utc;
use std::sync::atomic::Ordering;
use tokio::sync::watch;
use tracing::{info, warn};

/// Token lifecycle of one profile.
pub struct TokenLifecycle<'a, C, P, T, S, K, E, D> {
    env: &'a IdpEnvironment<C, P, T, S, K, E, D>,
}

impl<'a, C, P, T, S, K, E, D> TokenLifecycle<'a, C, P, T, S, K, E, D>
where
    C: IdpClient,
    P: CryptoPrimitives,
    T: TrustStore,
    S: IdpStorage,
{
    /// Create a lifecycle manager over `env`.
    #[must_use]
    pub const fn new(env: &'a IdpEnvironment<C, P, T, S, K, E, D>) -> Self {
        Self { env }
    }

    /// `true` if a token (expired or not) is stored.
    ///
    /// # Errors
    ///
    /// Returns [`IdpError::Storage`] if the token cannot be read.
    pub async fn is_logged_in(&self) -> Result<bool> {
        Ok(self.env.storage.token().await?.is_some())
    }

    /// Current lifecycle state.
    ///
    /// # Errors
    ///
    /// Returns [`IdpError::Storage`] if the token cannot be read.
    pub async fn state(&self) -> Result<TokenState> {
        if self.env.invalidating.load(Ordering::Acquire) {
            return Ok(TokenState::Invalidating);
        }
        let token = self.env.storage.token().await?;
        Ok(TokenState::of(token.as_ref(), Utc::now()))
    }

    /// Stored token as is, without refreshing.
    ///
    /// # Errors
    ///
    /// Returns [`IdpError::Storage`] if the token cannot be read.
    pub async fn token(&self) -> Result<Option<IdpToken>> {
        self.env.storage.token().await
    }

    /// Change stream of the stored token.
    #[must_use]
    pub fn token_changes(&self) -> watch::Receiver<Option<IdpToken>> {
        self.env.storage.token_changes()
    }

    /// Current token, renewed via SSO if it has expired.
    ///
    /// - no token: `None`
    /// - valid token: returned unchanged
    /// - expired token without SSO token: `None`
    /// - expired token: refreshed token, or `None` if the refresh failed
    ///   for a non-network reason (a rejected SSO token, see
    ///   [`IdpError::should_invalidate_token`], also clears the stored token)
    ///
    /// # Errors
    ///
    /// Returns [`IdpError::Network`] if the refresh failed in transport, and
    /// storage errors.
    pub async fn auto_refreshed_token(&self) -> Result<Option<IdpToken>> {
        let _guard = self.env.profile_locks.lock(self.env.profile).await;

        let Some(token) = self.env.storage.token().await? else {
            return Ok(None);
        };
        if !token.is_expired_at(Utc::now()) {
            return Ok(Some(token));
        }
        if token.sso_token.is_none() {
            info!(profile = %self.env.profile, "Token expired and no SSO token available");
            return Ok(None);
        }

        match self.refresh_locked(&token).await {
            Ok(refreshed) => Ok(Some(refreshed)),
            Err(error) if error.should_invalidate_token() => {
                warn!(
                    profile = %self.env.profile,
                    error = %error,
                    "SSO token rejected, logging out"
                );
                self.env.storage.set_token(None).await?;
                Ok(None)
            }
            Err(error) if error.is_network() => Err(error),
            Err(error) => {
                warn!(profile = %self.env.profile, error = %error, "Token refresh failed");
                Ok(None)
            }
        }
    }

    /// Renew `token` with its SSO token and persist the result.
    ///
    /// The refreshed token keeps the previous SSO token if the IDP does not
    /// issue a new one.
    ///
    /// # Errors
    ///
    /// - [`IdpError::TokenUnavailable`] if `token` carries no SSO token; no
    ///   request is made in that case
    /// - challenge, exchange, network and server errors
    pub async fn refresh(&self, token: &IdpToken) -> Result<IdpToken> {
        if token.sso_token.is_none() {
            return Err(IdpError::TokenUnavailable);
        }
        let _guard = self.env.profile_locks.lock(self.env.profile).await;
        self.refresh_locked(token).await
    }

    /// Clear the stored token (logout, or an authorized request got a 401).
    ///
    /// # Errors
    ///
    /// Returns [`IdpError::Storage`] if the token cannot be cleared.
    pub async fn invalidate_access_token(&self) -> Result<()> {
        self.env.invalidating.store(true, Ordering::Release);
        let result = {
            let _guard = self.env.profile_locks.lock(self.env.profile).await;
            self.env.storage.set_token(None).await
        };
        self.env.invalidating.store(false, Ordering::Release);

        info!(profile = %self.env.profile, "Access token invalidated");
        result
    }

    async fn refresh_locked(&self, token: &IdpToken) -> Result<IdpToken> {
        let sso_token = token.sso_token.as_deref().ok_or(IdpError::TokenUnavailable)?;

        let session = ChallengeEngine::new(self.env)
            .request_challenge(Some(&token.redirect))
            .await?;
        let document = DiscoveryValidator::new(self.env).load().await?;
        let exchange_token = self
            .env
            .client
            .sso_refresh(
                &document.payload.sso_endpoint,
                &session.challenge.challenge,
                sso_token,
            )
            .await?;
        exchange_token.validate_state(&session)?;

        let mut refreshed = ExchangeEngine::new(self.env)
            .exchange_unpersisted(&exchange_token, &session, accept_any_id_token)
            .await?;
        if refreshed.sso_token.is_none() {
            refreshed.sso_token.clone_from(&token.sso_token);
        }
        refreshed.is_pkv_fast_track = token.is_pkv_fast_track;

        self.env.storage.set_token(Some(refreshed.clone())).await?;
        info!(profile = %self.env.profile, expires = %refreshed.expires, "Token refreshed via SSO");
        Ok(refreshed)
    }
}
