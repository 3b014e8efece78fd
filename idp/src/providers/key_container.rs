//! Hardware-backed key storage.
//!
//! Biometric logins are signed with a P-256 key that never leaves the
//! device's secure element. Keys are addressed by a tag derived from the
//! pairing key identifier.

use super::JwtSigner;
use crate::crypto::EcPublicKey;
use crate::error::Result;
use std::future::Future;

/// Public handle of a hardware key.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SecureKey {
    /// Tag the key is stored under.
    pub tag: String,

    /// Public key.
    pub public_key: EcPublicKey,

    /// DER encoded `SubjectPublicKeyInfo` of the public key.
    pub subject_public_key_info: Vec<u8>,
}

/// Secure element key container.
pub trait KeyContainer: Send + Sync {
    /// Look up the key stored under `tag`.
    ///
    /// # Errors
    ///
    /// Returns [`IdpError::KeyContainer`](crate::error::IdpError::KeyContainer)
    /// if the container cannot be queried.
    fn find(&self, tag: &str) -> impl Future<Output = Result<Option<SecureKey>>> + Send;

    /// Create a new P-256 key under `tag`, protected by user presence.
    ///
    /// # Errors
    ///
    /// Returns [`IdpError::KeyContainer`](crate::error::IdpError::KeyContainer)
    /// if key generation fails.
    fn create(&self, tag: &str) -> impl Future<Output = Result<SecureKey>> + Send;

    /// Delete the key under `tag`. Returns `false` if there was none.
    ///
    /// # Errors
    ///
    /// Returns [`IdpError::KeyContainer`](crate::error::IdpError::KeyContainer)
    /// if deletion fails.
    fn delete(&self, tag: &str) -> impl Future<Output = Result<bool>> + Send;

    /// Sign `message` with the key under `tag`. May prompt for biometrics.
    ///
    /// # Errors
    ///
    /// Returns [`IdpError::KeyContainer`](crate::error::IdpError::KeyContainer)
    /// if the key is missing or the user declines.
    fn sign(&self, tag: &str, message: &[u8]) -> impl Future<Output = Result<Vec<u8>>> + Send;
}

/// [`JwtSigner`] over a hardware key (`ES256`).
#[derive(Debug)]
pub struct EnclaveSigner<'a, K> {
    container: &'a K,
    tag: String,
}

impl<'a, K: KeyContainer> EnclaveSigner<'a, K> {
    /// Sign with the key stored under `tag`.
    #[must_use]
    pub const fn new(container: &'a K, tag: String) -> Self {
        Self { container, tag }
    }
}

impl<K: KeyContainer> JwtSigner for EnclaveSigner<'_, K> {
    fn algorithm(&self) -> &str {
        "ES256"
    }

    async fn sign(&self, message: &[u8]) -> Result<Vec<u8>> {
        self.container.sign(&self.tag, message).await
    }
}
