//! # e-Rezept IDP Core
//!
//! Client side of the IDP authentication protocol of the e-prescription
//! app: challenge/response login with a health card, token exchange and
//! lifecycle, biometric device pairing and login through an insurance app.
//!
//! ## Architecture
//!
//! Every engine is a borrowed view over an [`IdpEnvironment`] that bundles
//! the collaborators of one profile (IDP client, crypto primitives, trust
//! store, storage, key container):
//!
//! ```text
//! DiscoveryValidator ─► ChallengeEngine ─► ExchangeEngine ─► TokenLifecycle
//!                                  │              ▲
//!                                  └─► PairingEngine (biometric login)
//! ExtAuthEngine ──────────────────────────────────┘
//! ```
//!
//! [`IdpSession`] owns an environment and hands out all engines.
//!
//! ## Guarantees
//!
//! - Every IDP signature is checked against brainpoolP256r1 keys only
//! - Nothing the IDP returns is used before `state`, `nonce` and signature
//!   checks pass; failures abort the operation
//! - Token refresh, invalidation and pairing changes of one profile are
//!   serialized
//! - A pending external authentication is consumed at most once
//!
//! ## Example: card login against the mock IDP
//!
//! ```
//! use erezept_idp::challenge::ChallengeEngine;
//! use erezept_idp::exchange::{ExchangeEngine, accept_any_id_token};
//! use erezept_idp::mocks::{MockIdp, MockSigner};
//!
//! # let runtime = tokio::runtime::Builder::new_current_thread().enable_all().build().unwrap();
//! # runtime.block_on(async {
//! let idp = MockIdp::new();
//! let env = idp.environment();
//! let card = MockSigner::brainpool();
//!
//! let challenge = ChallengeEngine::new(&env).request_challenge(None).await?;
//! let signed = challenge.sign(&card, &card.certificate()).await?;
//! let token = ExchangeEngine::new(&env)
//!     .verify_and_exchange(&signed, accept_any_id_token)
//!     .await?;
//! assert!(!token.is_expired());
//! # Ok::<(), erezept_idp::error::IdpError>(())
//! # }).unwrap();
//! ```

#![deny(missing_docs)]
#![deny(clippy::unwrap_used)]
#![deny(clippy::expect_used)]
#![deny(clippy::panic)]
#![deny(clippy::todo)]
#![deny(clippy::unimplemented)]
#![cfg_attr(test, allow(clippy::unwrap_used, clippy::expect_used, clippy::panic))]

// Public modules
pub mod challenge;
pub mod config;
pub mod crypto;
pub mod discovery;
pub mod environment;
pub mod error;
pub mod exchange;
pub mod ext_auth;
pub mod interceptor;
pub mod lifecycle;
pub mod models;
pub mod pairing;
pub mod providers;
pub mod session;
pub mod state;
pub mod stores;

// Mock implementations for testing
#[cfg(any(test, feature = "test-utils"))]
pub mod mocks;

// Re-export main types for convenience
pub use config::IdpConfig;
pub use environment::IdpEnvironment;
pub use error::{IdpError, Result};
pub use models::{ChallengeSession, DiscoveryDocument, IdpToken, PairingSession};
pub use session::IdpSession;
pub use state::{ProfileId, TokenState};
