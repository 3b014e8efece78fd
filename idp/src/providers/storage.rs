//! Persistence traits.
//!
//! # Implementation
//!
//! **Production**: keychain / encrypted preferences behind the host app
//! **Testing**: [`MemoryIdpStorage`](crate::stores::MemoryIdpStorage)
//!
//! One [`IdpStorage`] instance belongs to exactly one profile.

use crate::crypto::X509Certificate;
use crate::error::Result;
use crate::models::{DiscoveryDocument, ExtAuthChallengeSession, IdpToken};
use std::future::Future;
use tokio::sync::watch;

/// Token, discovery document and pairing material of one profile.
///
/// Setters overwrite; there is no merge. `None` clears a slot.
pub trait IdpStorage: Send + Sync {
    /// Currently stored token.
    ///
    /// # Errors
    ///
    /// Returns [`IdpError::Storage`](crate::error::IdpError::Storage) if the
    /// backing store fails.
    fn token(&self) -> impl Future<Output = Result<Option<IdpToken>>> + Send;

    /// Replace (or clear) the stored token.
    ///
    /// # Errors
    ///
    /// Returns [`IdpError::Storage`](crate::error::IdpError::Storage) if the
    /// backing store fails.
    fn set_token(&self, token: Option<IdpToken>) -> impl Future<Output = Result<()>> + Send;

    /// Change stream of the token slot.
    fn token_changes(&self) -> watch::Receiver<Option<IdpToken>>;

    /// Cached discovery document.
    ///
    /// # Errors
    ///
    /// Returns [`IdpError::Storage`](crate::error::IdpError::Storage) if the
    /// backing store fails.
    fn discovery_document(&self) -> impl Future<Output = Result<Option<DiscoveryDocument>>> + Send;

    /// Replace (or clear) the cached discovery document.
    ///
    /// # Errors
    ///
    /// Returns [`IdpError::Storage`](crate::error::IdpError::Storage) if the
    /// backing store fails.
    fn set_discovery_document(
        &self,
        document: Option<DiscoveryDocument>,
    ) -> impl Future<Output = Result<()>> + Send;

    /// Health card certificate of the current pairing.
    ///
    /// # Errors
    ///
    /// Returns [`IdpError::Storage`](crate::error::IdpError::Storage) if the
    /// backing store fails.
    fn certificate(&self) -> impl Future<Output = Result<Option<X509Certificate>>> + Send;

    /// Replace (or clear) the pairing certificate.
    ///
    /// # Errors
    ///
    /// Returns [`IdpError::Storage`](crate::error::IdpError::Storage) if the
    /// backing store fails.
    fn set_certificate(
        &self,
        certificate: Option<X509Certificate>,
    ) -> impl Future<Output = Result<()>> + Send;

    /// Change stream of the certificate slot.
    fn certificate_changes(&self) -> watch::Receiver<Option<X509Certificate>>;

    /// Key identifier of the current pairing.
    ///
    /// # Errors
    ///
    /// Returns [`IdpError::Storage`](crate::error::IdpError::Storage) if the
    /// backing store fails.
    fn key_identifier(&self) -> impl Future<Output = Result<Option<Vec<u8>>>> + Send;

    /// Replace (or clear) the pairing key identifier.
    ///
    /// # Errors
    ///
    /// Returns [`IdpError::Storage`](crate::error::IdpError::Storage) if the
    /// backing store fails.
    fn set_key_identifier(
        &self,
        key_identifier: Option<Vec<u8>>,
    ) -> impl Future<Output = Result<()>> + Send;
}

/// Pending external authentication requests keyed by `state`.
///
/// # Security Properties
///
/// 1. **Single-use**: [`ExtAuthRequestStorage::take`] removes atomically
/// 2. **Isolation**: inserts and removals for different states never
///    interfere
pub trait ExtAuthRequestStorage: Send + Sync {
    /// Register a pending request under `state`, replacing any previous one.
    ///
    /// # Errors
    ///
    /// Returns [`IdpError::Storage`](crate::error::IdpError::Storage) if the
    /// backing store fails.
    fn insert(
        &self,
        state: String,
        session: ExtAuthChallengeSession,
    ) -> impl Future<Output = Result<()>> + Send;

    /// Remove and return the request registered under `state`.
    ///
    /// Concurrent calls for the same state yield the session at most once.
    ///
    /// # Errors
    ///
    /// Returns [`IdpError::Storage`](crate::error::IdpError::Storage) if the
    /// backing store fails.
    fn take(
        &self,
        state: &str,
    ) -> impl Future<Output = Result<Option<ExtAuthChallengeSession>>> + Send;

    /// Number of pending requests.
    ///
    /// # Errors
    ///
    /// Returns [`IdpError::Storage`](crate::error::IdpError::Storage) if the
    /// backing store fails.
    fn pending(&self) -> impl Future<Output = Result<usize>> + Send;
}
