//! Mock crypto primitives.

use crate::crypto::{EcCurve, EcPublicKey, Jwk, X509Certificate};
use crate::error::{IdpError, Result};
use crate::providers::{CryptoPrimitives, KeyAgreement};
use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use zeroize::Zeroizing;

/// "DER" of a mock certificate: a small JSON document.
#[derive(Debug, Serialize, Deserialize)]
struct MockCertificate {
    serial: String,
    issuer: String,
    not_after: i64,
    key: Jwk,
}

/// Hash based stand-in for elliptic curve crypto.
///
/// - signature over `m` with key `k`: `SHA-256(k.x || k.y || m)`
/// - shared secret of recipient `r` and ephemeral `e`:
///   `SHA-256(r.x || r.y || e.x || e.y)`
#[derive(Debug, Clone, Copy, Default)]
pub struct MockCrypto;

impl MockCrypto {
    /// Create mock primitives.
    #[must_use]
    pub const fn new() -> Self {
        Self
    }

    /// Random public key on `curve`.
    #[must_use]
    pub fn generate_key(&self, curve: EcCurve) -> EcPublicKey {
        let x: [u8; 32] = rand::random();
        let y: [u8; 32] = rand::random();
        EcPublicKey {
            curve,
            x: x.to_vec(),
            y: y.to_vec(),
        }
    }

    /// Random brainpoolP256r1 public key.
    #[must_use]
    pub fn generate_brainpool_key(&self) -> EcPublicKey {
        self.generate_key(EcCurve::BrainpoolP256r1)
    }

    /// Mock signature of `message` under `key`.
    #[must_use]
    pub fn signature(key: &EcPublicKey, message: &[u8]) -> Vec<u8> {
        let mut hasher = Sha256::new();
        hasher.update(&key.x);
        hasher.update(&key.y);
        hasher.update(message);
        hasher.finalize().to_vec()
    }

    /// Shared secret the holder of `recipient` derives for `ephemeral`.
    #[must_use]
    pub fn shared_secret(recipient: &EcPublicKey, ephemeral: &EcPublicKey) -> Vec<u8> {
        let mut hasher = Sha256::new();
        hasher.update(&recipient.x);
        hasher.update(&recipient.y);
        hasher.update(&ephemeral.x);
        hasher.update(&ephemeral.y);
        hasher.finalize().to_vec()
    }

    /// Mock `SubjectPublicKeyInfo` of `key`.
    #[must_use]
    pub fn subject_public_key_info(key: &EcPublicKey) -> Vec<u8> {
        serde_json::to_vec(&key.to_jwk()).unwrap_or_default()
    }

    /// Inverse of [`subject_public_key_info`](Self::subject_public_key_info).
    ///
    /// # Errors
    ///
    /// Returns [`IdpError::Decoding`] for anything not produced by it.
    pub fn public_key_from_spki(spki: &[u8]) -> Result<EcPublicKey> {
        let jwk: Jwk = serde_json::from_slice(spki)?;
        EcPublicKey::from_jwk(&jwk)
    }

    /// Issue a mock certificate for `key`, valid for a year.
    #[must_use]
    pub fn issue_certificate(&self, key: &EcPublicKey, serial: &str) -> X509Certificate {
        let certificate = MockCertificate {
            serial: serial.to_string(),
            issuer: "CN=Mock CA".to_string(),
            not_after: (Utc::now() + Duration::days(365)).timestamp(),
            key: key.to_jwk(),
        };
        let der = serde_json::to_vec(&certificate).expect("mock certificate serializes");
        self.parse_certificate(&der)
            .expect("freshly issued mock certificate parses")
    }
}

impl CryptoPrimitives for MockCrypto {
    fn parse_certificate(&self, der: &[u8]) -> Result<X509Certificate> {
        let certificate: MockCertificate = serde_json::from_slice(der)
            .map_err(|e| IdpError::Decoding(format!("not a mock certificate: {e}")))?;
        let public_key = EcPublicKey::from_jwk(&certificate.key)?;
        let not_after = DateTime::from_timestamp(certificate.not_after, 0)
            .ok_or_else(|| IdpError::Decoding("notAfter out of range".to_string()))?;
        Ok(X509Certificate {
            der: der.to_vec(),
            subject_public_key_info: Self::subject_public_key_info(&public_key),
            public_key,
            serial_number: certificate.serial,
            issuer: certificate.issuer.into_bytes(),
            not_after,
        })
    }

    fn verify(&self, key: &EcPublicKey, message: &[u8], signature: &[u8]) -> Result<bool> {
        Ok(Self::signature(key, message) == signature)
    }

    fn agree(&self, recipient: &EcPublicKey) -> Result<KeyAgreement> {
        let ephemeral_public_key = self.generate_key(recipient.curve.clone());
        let shared_secret = Zeroizing::new(Self::shared_secret(recipient, &ephemeral_public_key));
        Ok(KeyAgreement {
            ephemeral_public_key,
            shared_secret,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_certificate_round_trip() {
        let crypto = MockCrypto::new();
        let key = crypto.generate_brainpool_key();
        let certificate = crypto.issue_certificate(&key, "42");

        assert_eq!(certificate.public_key, key);
        assert_eq!(certificate.serial_number, "42");
        assert_eq!(
            MockCrypto::public_key_from_spki(&certificate.subject_public_key_info).unwrap(),
            key
        );
        assert_eq!(crypto.parse_certificate(&certificate.der).unwrap(), certificate);
    }

    #[test]
    fn test_agreement_matches_recipient_side() {
        let crypto = MockCrypto::new();
        let recipient = crypto.generate_brainpool_key();
        let agreement = crypto.agree(&recipient).unwrap();

        assert_eq!(
            *agreement.shared_secret,
            MockCrypto::shared_secret(&recipient, &agreement.ephemeral_public_key)
        );
    }
}
