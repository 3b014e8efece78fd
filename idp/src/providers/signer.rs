//! Token signer trait.

use crate::error::Result;
use std::future::Future;

/// Signs JWT signing input.
///
/// Health cards sign with `BP256R1`, hardware-backed device keys with
/// `ES256`. Signing may suspend indefinitely (card PIN entry, biometric
/// prompt); there is no timeout at this layer.
pub trait JwtSigner: Send + Sync {
    /// JWS `alg` header value.
    fn algorithm(&self) -> &str;

    /// Sign `message`, returning the raw `r || s` signature.
    ///
    /// # Errors
    ///
    /// Returns [`IdpError::Encryption`](crate::error::IdpError::Encryption)
    /// (or [`IdpError::KeyContainer`](crate::error::IdpError::KeyContainer)
    /// for hardware keys) if signing fails or the user declines.
    fn sign(&self, message: &[u8]) -> impl Future<Output = Result<Vec<u8>>> + Send;
}
