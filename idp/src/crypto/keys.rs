//! Public key and certificate models.

use super::{base64_decode, base64url_decode, base64url_encode};
use crate::error::{IdpError, Result};
use crate::providers::CryptoPrimitives;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Elliptic curve of a public key.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum EcCurve {
    /// brainpoolP256r1, used by the IDP and health cards.
    BrainpoolP256r1,
    /// NIST P-256, used by hardware-backed device keys.
    P256,
    /// Anything else; never accepted for signature checks.
    Other(String),
}

impl EcCurve {
    /// Parse a JWK `crv` value.
    #[must_use]
    pub fn from_jwk_name(name: &str) -> Self {
        match name {
            "BP-256" | "brainpoolP256r1" | "BP256R1" => Self::BrainpoolP256r1,
            "P-256" => Self::P256,
            other => Self::Other(other.to_string()),
        }
    }

    /// JWK `crv` value.
    #[must_use]
    pub fn jwk_name(&self) -> &str {
        match self {
            Self::BrainpoolP256r1 => "BP-256",
            Self::P256 => "P-256",
            Self::Other(name) => name,
        }
    }

    /// JWS `alg` value for ECDSA over this curve.
    #[must_use]
    pub fn jws_algorithm(&self) -> &str {
        match self {
            Self::BrainpoolP256r1 => "BP256R1",
            Self::P256 => "ES256",
            Self::Other(name) => name,
        }
    }
}

/// JSON Web Key as published by the IDP.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Jwk {
    /// Key type, always `EC` here.
    pub kty: String,

    /// Curve name.
    pub crv: String,

    /// X coordinate (base64url).
    pub x: String,

    /// Y coordinate (base64url).
    pub y: String,

    /// Key identifier.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub kid: Option<String>,

    /// Intended use (`sig`/`enc`).
    #[serde(default, rename = "use", skip_serializing_if = "Option::is_none")]
    pub key_use: Option<String>,

    /// Certificate chain (standard base64 DER), leaf first.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub x5c: Option<Vec<String>>,
}

/// Elliptic curve public key in affine coordinates.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct EcPublicKey {
    /// Curve the point lies on.
    pub curve: EcCurve,
    /// X coordinate, big endian.
    pub x: Vec<u8>,
    /// Y coordinate, big endian.
    pub y: Vec<u8>,
}

impl EcPublicKey {
    /// Decode the key carried by a JWK.
    ///
    /// # Errors
    ///
    /// Returns [`IdpError::Decoding`] for a non-EC key or bad coordinates.
    pub fn from_jwk(jwk: &Jwk) -> Result<Self> {
        if jwk.kty != "EC" {
            return Err(IdpError::Decoding(format!("expected EC key, got {}", jwk.kty)));
        }
        Ok(Self {
            curve: EcCurve::from_jwk_name(&jwk.crv),
            x: base64url_decode(&jwk.x)?,
            y: base64url_decode(&jwk.y)?,
        })
    }

    /// Encode as JWK (used as `epk` in JWE headers).
    #[must_use]
    pub fn to_jwk(&self) -> Jwk {
        Jwk {
            kty: "EC".to_string(),
            crv: self.curve.jwk_name().to_string(),
            x: base64url_encode(&self.x),
            y: base64url_encode(&self.y),
            kid: None,
            key_use: None,
            x5c: None,
        }
    }

    /// Reject anything but brainpoolP256r1.
    ///
    /// # Errors
    ///
    /// Returns [`IdpError::UnsupportedCurve`] for any other curve.
    pub fn require_brainpool(&self) -> Result<&Self> {
        match self.curve {
            EcCurve::BrainpoolP256r1 => Ok(self),
            ref other => Err(IdpError::UnsupportedCurve(other.jwk_name().to_string())),
        }
    }
}

/// Decoded X.509 certificate.
///
/// Parsing is delegated to [`CryptoPrimitives::parse_certificate`]; this type
/// only carries the fields the protocol needs.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct X509Certificate {
    /// DER encoding.
    pub der: Vec<u8>,

    /// Subject public key.
    pub public_key: EcPublicKey,

    /// DER encoded `SubjectPublicKeyInfo`.
    pub subject_public_key_info: Vec<u8>,

    /// Serial number (decimal string).
    pub serial_number: String,

    /// DER encoded issuer name.
    pub issuer: Vec<u8>,

    /// End of the validity period.
    pub not_after: DateTime<Utc>,
}

impl X509Certificate {
    /// Decode a standard-base64 DER certificate (an `x5c` entry).
    ///
    /// # Errors
    ///
    /// Returns [`IdpError::Decoding`] if the entry is not base64 or the
    /// certificate cannot be parsed.
    pub fn from_base64<C: CryptoPrimitives + ?Sized>(entry: &str, crypto: &C) -> Result<Self> {
        crypto.parse_certificate(&base64_decode(entry)?)
    }

    /// Decode the leaf certificate of a JWK `x5c` chain.
    ///
    /// # Errors
    ///
    /// Returns [`IdpError::Decoding`] if the chain is absent or unparsable.
    pub fn from_jwk<C: CryptoPrimitives + ?Sized>(jwk: &Jwk, crypto: &C) -> Result<Self> {
        let leaf = jwk
            .x5c
            .as_ref()
            .and_then(|chain| chain.first())
            .ok_or_else(|| IdpError::Decoding("JWK carries no x5c certificate".to_string()))?;
        Self::from_base64(leaf, crypto)
    }

    /// Standard base64 DER, as sent in `x5c` headers and registration data.
    #[must_use]
    pub fn to_base64(&self) -> String {
        super::base64_encode(&self.der)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_curve_names() {
        assert_eq!(EcCurve::from_jwk_name("BP-256"), EcCurve::BrainpoolP256r1);
        assert_eq!(EcCurve::from_jwk_name("P-256"), EcCurve::P256);
        assert_eq!(EcCurve::BrainpoolP256r1.jws_algorithm(), "BP256R1");
        assert_eq!(EcCurve::P256.jws_algorithm(), "ES256");
    }

    #[test]
    fn test_jwk_round_trip_keeps_coordinates() {
        let key = EcPublicKey {
            curve: EcCurve::BrainpoolP256r1,
            x: vec![1; 32],
            y: vec![2; 32],
        };
        assert_eq!(EcPublicKey::from_jwk(&key.to_jwk()).unwrap(), key);
    }

    #[test]
    fn test_only_brainpool_is_accepted() {
        let key = EcPublicKey {
            curve: EcCurve::P256,
            x: vec![1; 32],
            y: vec![2; 32],
        };
        assert!(matches!(
            key.require_brainpool(),
            Err(IdpError::UnsupportedCurve(name)) if name == "P-256"
        ));
    }

    #[test]
    fn test_rsa_jwk_is_rejected() {
        let jwk = Jwk {
            kty: "RSA".to_string(),
            crv: String::new(),
            x: String::new(),
            y: String::new(),
            kid: None,
            key_use: None,
            x5c: None,
        };
        assert!(EcPublicKey::from_jwk(&jwk).is_err());
    }
}
