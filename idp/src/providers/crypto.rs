//! Raw cryptographic primitives.
//!
//! The crate composes JWT/JWE, the Concat KDF and AES-GCM itself. What it
//! does not do is elliptic curve math and ASN.1: those are supplied by the
//! platform (a brainpool-capable crypto library, an HSM binding) through
//! this trait.

use crate::crypto::{EcPublicKey, X509Certificate};
use crate::error::Result;
use zeroize::Zeroizing;

/// Result of an ephemeral-static ECDH key agreement.
pub struct KeyAgreement {
    /// Public half of the freshly generated ephemeral key (the JWE `epk`).
    pub ephemeral_public_key: EcPublicKey,

    /// Raw shared secret `Z`, wiped on drop.
    pub shared_secret: Zeroizing<Vec<u8>>,
}

impl std::fmt::Debug for KeyAgreement {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("KeyAgreement")
            .field("ephemeral_public_key", &self.ephemeral_public_key)
            .finish_non_exhaustive()
    }
}

/// Elliptic curve and certificate primitives.
///
/// Calls are synchronous; none of them waits on a user.
pub trait CryptoPrimitives: Send + Sync {
    /// Decode a DER X.509 certificate.
    ///
    /// # Errors
    ///
    /// Returns [`IdpError::Decoding`](crate::error::IdpError::Decoding) if the
    /// certificate cannot be parsed or carries no EC key.
    fn parse_certificate(&self, der: &[u8]) -> Result<X509Certificate>;

    /// Verify a raw `r || s` ECDSA signature over `message`.
    ///
    /// Returns `Ok(false)` for a well-formed but wrong signature.
    ///
    /// # Errors
    ///
    /// Returns an error if the key or signature is malformed.
    fn verify(&self, key: &EcPublicKey, message: &[u8], signature: &[u8]) -> Result<bool>;

    /// Generate an ephemeral key on `recipient`'s curve and agree on a shared
    /// secret with it.
    ///
    /// # Errors
    ///
    /// Returns an error if the curve is unsupported or the point is invalid.
    fn agree(&self, recipient: &EcPublicKey) -> Result<KeyAgreement>;
}
