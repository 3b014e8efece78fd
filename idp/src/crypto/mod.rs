//! Session-scoped key material and token formats.
//!
//! [`CryptoBox`] owns the ephemeral AES key of one login attempt and the
//! random generators for verifier, `state` and `nonce`. It never talks to the
//! network. The [`jwt`] and [`jwe`] modules compose compact tokens on top of
//! the raw primitives supplied by a
//! [`CryptoPrimitives`](crate::providers::CryptoPrimitives) implementation.

pub mod jwe;
pub mod jwt;
pub mod keys;

pub use jwe::{Jwe, JweHeader};
pub use jwt::{Jwt, JwtHeader};
pub use keys::{EcCurve, EcPublicKey, Jwk, X509Certificate};

use crate::error::{IdpError, Result};
use base64::Engine;
use base64::engine::general_purpose::{STANDARD, URL_SAFE_NO_PAD};
use sha2::{Digest, Sha256};
use zeroize::{Zeroize, ZeroizeOnDrop};

/// PKCE code challenge method sent with every challenge request.
pub const CODE_CHALLENGE_METHOD: &str = "S256";

/// Number of random bytes behind verifier, `state` and `nonce` values.
const RANDOM_BYTES: usize = 32;

/// Encode bytes as unpadded base64url.
#[must_use]
pub fn base64url_encode(bytes: &[u8]) -> String {
    URL_SAFE_NO_PAD.encode(bytes)
}

/// Decode unpadded base64url.
///
/// # Errors
///
/// Returns [`IdpError::Decoding`] if the input is not valid base64url.
pub fn base64url_decode(input: &str) -> Result<Vec<u8>> {
    Ok(URL_SAFE_NO_PAD.decode(input.trim_end_matches('='))?)
}

/// Encode bytes as padded standard base64 (certificates on the wire).
#[must_use]
pub fn base64_encode(bytes: &[u8]) -> String {
    STANDARD.encode(bytes)
}

/// Decode padded standard base64.
///
/// # Errors
///
/// Returns [`IdpError::Decoding`] if the input is not valid base64.
pub fn base64_decode(input: &str) -> Result<Vec<u8>> {
    Ok(STANDARD.decode(input)?)
}

/// Derive the PKCE `S256` code challenge: `base64url(SHA-256(verifier))`.
///
/// # Examples
///
/// ```
/// use erezept_idp::crypto::code_challenge;
///
/// // RFC 7636 appendix B
/// assert_eq!(
///     code_challenge("dBjftJeZ4CVP-mB92K27uhbUJU1p1r_wW1gFWFOEjXk"),
///     "E9Melhoa2OwvFrEMTJguCHaoeK1t8URWbuGJSstw-cM"
/// );
/// ```
#[must_use]
pub fn code_challenge(verifier: &str) -> String {
    base64url_encode(&Sha256::digest(verifier.as_bytes()))
}

fn random_token() -> String {
    let bytes: [u8; RANDOM_BYTES] = rand::random();
    base64url_encode(&bytes)
}

/// 256-bit AES key, wiped on drop.
#[derive(Clone, Zeroize, ZeroizeOnDrop)]
pub struct AesKey([u8; 32]);

impl AesKey {
    /// Generate a fresh random key.
    #[must_use]
    pub fn generate() -> Self {
        Self(rand::random())
    }

    /// Wrap existing key bytes.
    ///
    /// # Errors
    ///
    /// Returns [`IdpError::Decryption`] unless exactly 32 bytes are given.
    pub fn from_slice(bytes: &[u8]) -> Result<Self> {
        let key: [u8; 32] = bytes
            .try_into()
            .map_err(|_| IdpError::Decryption(format!("AES key must be 32 bytes, got {}", bytes.len())))?;
        Ok(Self(key))
    }

    /// Raw key bytes.
    #[must_use]
    pub const fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }
}

impl std::fmt::Debug for AesKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("AesKey(..)")
    }
}

/// Key material and random values for one login attempt.
///
/// A box is created per attempt and dropped afterwards; nothing in it is
/// persisted, so cancelling an attempt leaves no trace.
#[derive(Debug, Clone)]
pub struct CryptoBox {
    aes_key: AesKey,
}

impl CryptoBox {
    /// Create a box holding a fresh AES session key.
    #[must_use]
    pub fn new() -> Self {
        Self {
            aes_key: AesKey::generate(),
        }
    }

    /// The AES key the IDP encrypts the token bundle with.
    #[must_use]
    pub const fn aes_key(&self) -> &AesKey {
        &self.aes_key
    }

    /// Generate a PKCE code verifier (43 base64url characters).
    #[must_use]
    pub fn generate_verifier_code(&self) -> String {
        random_token()
    }

    /// Generate an opaque `state` value.
    #[must_use]
    pub fn generate_state(&self) -> String {
        random_token()
    }

    /// Generate an opaque `nonce` value.
    #[must_use]
    pub fn generate_nonce(&self) -> String {
        random_token()
    }

    /// Generate a 32 byte key identifier for a pairing session.
    #[must_use]
    pub fn generate_key_identifier(&self) -> [u8; 32] {
        rand::random()
    }
}

impl Default for CryptoBox {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_verifier_is_43_base64url_chars() {
        let verifier = CryptoBox::new().generate_verifier_code();
        assert_eq!(verifier.len(), 43);
        assert!(verifier
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_'));
    }

    #[test]
    fn test_random_values_are_unique() {
        let crypto_box = CryptoBox::new();
        assert_ne!(crypto_box.generate_state(), crypto_box.generate_state());
        assert_ne!(crypto_box.generate_nonce(), crypto_box.generate_nonce());
        assert_ne!(
            crypto_box.generate_key_identifier(),
            crypto_box.generate_key_identifier()
        );
    }

    #[test]
    fn test_boxes_hold_distinct_keys() {
        assert_ne!(CryptoBox::new().aes_key().as_bytes(), CryptoBox::new().aes_key().as_bytes());
    }

    #[test]
    fn test_aes_key_length_is_checked() {
        assert!(AesKey::from_slice(&[0u8; 16]).is_err());
        assert!(AesKey::from_slice(&[0u8; 32]).is_ok());
    }

    #[test]
    fn test_base64url_round_trip_tolerates_padding() {
        let encoded = base64url_encode(b"ab");
        assert_eq!(encoded, "YWI");
        assert_eq!(base64url_decode("YWI=").unwrap(), b"ab");
    }
}
