//! Mock health card / key signer.

use super::MockCrypto;
use crate::crypto::{EcCurve, EcPublicKey, Jwt, JwtHeader, X509Certificate, base64url_encode};
use crate::error::{IdpError, Result};
use crate::providers::JwtSigner;
use serde::Serialize;

/// Signer holding a mock key and a certificate for it.
#[derive(Debug, Clone)]
pub struct MockSigner {
    public_key: EcPublicKey,
    certificate: X509Certificate,
}

impl MockSigner {
    /// A brainpoolP256r1 signer (health card, IDP).
    #[must_use]
    pub fn brainpool() -> Self {
        Self::on_curve(EcCurve::BrainpoolP256r1)
    }

    /// A P-256 signer.
    #[must_use]
    pub fn p256() -> Self {
        Self::on_curve(EcCurve::P256)
    }

    fn on_curve(curve: EcCurve) -> Self {
        let crypto = MockCrypto::new();
        let public_key = crypto.generate_key(curve);
        let serial = u64::from(rand::random::<u32>()).to_string();
        let certificate = crypto.issue_certificate(&public_key, &serial);
        Self {
            public_key,
            certificate,
        }
    }

    /// Public key.
    #[must_use]
    pub const fn public_key(&self) -> &EcPublicKey {
        &self.public_key
    }

    /// Certificate of the public key.
    #[must_use]
    pub fn certificate(&self) -> X509Certificate {
        self.certificate.clone()
    }

    /// Sign without suspending.
    ///
    /// # Errors
    ///
    /// Returns [`IdpError::Encryption`] if `claims` cannot be serialized.
    pub fn sign_sync<C: Serialize>(&self, header: &JwtHeader, claims: &C) -> Result<Jwt> {
        let header = serde_json::to_vec(header).map_err(|e| IdpError::Encryption(e.to_string()))?;
        let payload = serde_json::to_vec(claims).map_err(|e| IdpError::Encryption(e.to_string()))?;
        let signing_input = format!("{}.{}", base64url_encode(&header), base64url_encode(&payload));
        let signature = MockCrypto::signature(&self.public_key, signing_input.as_bytes());
        Jwt::parse(&format!("{signing_input}.{}", base64url_encode(&signature)))
    }
}

impl JwtSigner for MockSigner {
    fn algorithm(&self) -> &str {
        self.public_key.curve.jws_algorithm()
    }

    async fn sign(&self, message: &[u8]) -> Result<Vec<u8>> {
        Ok(MockCrypto::signature(&self.public_key, message))
    }
}
