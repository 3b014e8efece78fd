//! Per-profile facade over all engines.
//!
//! The engines are cheap borrowed views over an [`IdpEnvironment`];
//! [`IdpSession`] owns the environment and hands them out.
//!
//! # Example
//!
//! ```
//! use erezept_idp::exchange::accept_any_id_token;
//! use erezept_idp::mocks::{MockIdp, MockSigner};
//! use erezept_idp::session::IdpSession;
//!
//! # tokio_test_block_on(async {
//! let idp = MockIdp::new();
//! let session = IdpSession::new(idp.environment());
//! let card = MockSigner::brainpool();
//!
//! let token = session
//!     .login_with_card(&card, &card.certificate(), accept_any_id_token)
//!     .await?;
//! assert!(session.is_logged_in().await?);
//! assert!(!token.is_pairing_token);
//! # Ok::<(), erezept_idp::error::IdpError>(())
//! # });
//! # fn tokio_test_block_on<F: std::future::Future>(f: F) -> F::Output {
//! #     tokio::runtime::Builder::new_current_thread().enable_all().build().unwrap().block_on(f)
//! # }
//! ```

use crate::challenge::ChallengeEngine;
use crate::crypto::X509Certificate;
use crate::discovery::DiscoveryValidator;
use crate::environment::IdpEnvironment;
use crate::error::Result;
use crate::exchange::ExchangeEngine;
use crate::ext_auth::ExtAuthEngine;
use crate::interceptor::BearerInterceptor;
use crate::lifecycle::TokenLifecycle;
use crate::models::{IdTokenPayload, IdpToken};
use crate::pairing::PairingEngine;
use crate::providers::{
    CryptoPrimitives, DeviceInfoProvider, ExtAuthRequestStorage, IdpClient, IdpStorage,
    JwtSigner, KeyContainer, TrustStore,
};
use crate::state::ProfileId;
use std::fmt::Display;
use tracing::info;

/// IDP session of one profile.
#[derive(Clone)]
pub struct IdpSession<C, P, T, S, K, E, D> {
    env: IdpEnvironment<C, P, T, S, K, E, D>,
}

impl<C, P, T, S, K, E, D> IdpSession<C, P, T, S, K, E, D> {
    /// Wrap an environment.
    #[must_use]
    pub const fn new(env: IdpEnvironment<C, P, T, S, K, E, D>) -> Self {
        Self { env }
    }

    /// Profile this session belongs to.
    #[must_use]
    pub const fn profile(&self) -> ProfileId {
        self.env.profile
    }

    /// The underlying environment.
    #[must_use]
    pub const fn environment(&self) -> &IdpEnvironment<C, P, T, S, K, E, D> {
        &self.env
    }
}

impl<C, P, T, S, K, E, D> IdpSession<C, P, T, S, K, E, D>
where
    C: IdpClient,
    P: CryptoPrimitives,
    T: TrustStore,
    S: IdpStorage,
    K: KeyContainer,
    E: ExtAuthRequestStorage,
    D: DeviceInfoProvider,
{
    /// Discovery document validator.
    #[must_use]
    pub const fn discovery(&self) -> DiscoveryValidator<'_, C, P, T, S, K, E, D> {
        DiscoveryValidator::new(&self.env)
    }

    /// Challenge engine.
    #[must_use]
    pub const fn challenges(&self) -> ChallengeEngine<'_, C, P, T, S, K, E, D> {
        ChallengeEngine::new(&self.env)
    }

    /// Token exchange engine.
    #[must_use]
    pub const fn exchange(&self) -> ExchangeEngine<'_, C, P, T, S, K, E, D> {
        ExchangeEngine::new(&self.env)
    }

    /// Token lifecycle manager.
    #[must_use]
    pub const fn lifecycle(&self) -> TokenLifecycle<'_, C, P, T, S, K, E, D> {
        TokenLifecycle::new(&self.env)
    }

    /// Device pairing engine.
    #[must_use]
    pub const fn pairing(&self) -> PairingEngine<'_, C, P, T, S, K, E, D> {
        PairingEngine::new(&self.env)
    }

    /// External authentication engine.
    #[must_use]
    pub const fn ext_auth(&self) -> ExtAuthEngine<'_, C, P, T, S, K, E, D> {
        ExtAuthEngine::new(&self.env)
    }

    /// Bearer interceptor for authorized requests.
    #[must_use]
    pub const fn interceptor(&self) -> BearerInterceptor<'_, C, P, T, S, K, E, D> {
        BearerInterceptor::new(&self.env)
    }

    /// `true` if a token is stored.
    ///
    /// # Errors
    ///
    /// Returns storage errors.
    pub async fn is_logged_in(&self) -> Result<bool> {
        self.lifecycle().is_logged_in().await
    }

    /// Full health card login: challenge, card signature, verify, exchange.
    ///
    /// # Errors
    ///
    /// Any error of the individual steps.
    pub async fn login_with_card<G, F, V>(
        &self,
        card: &G,
        certificate: &X509Certificate,
        validator: F,
    ) -> Result<IdpToken>
    where
        G: JwtSigner + ?Sized,
        F: FnOnce(&IdTokenPayload) -> std::result::Result<(), V>,
        V: Display,
    {
        let challenge = self.challenges().request_challenge(None).await?;
        let signed = challenge.sign(card, certificate).await?;
        let token = self.exchange().verify_and_exchange(&signed, validator).await?;
        info!(profile = %self.env.profile, "Logged in with health card");
        Ok(token)
    }

    /// Log out: clear the token. Pairing material stays.
    ///
    /// # Errors
    ///
    /// Returns storage errors.
    pub async fn logout(&self) -> Result<()> {
        self.lifecycle().invalidate_access_token().await
    }
}
