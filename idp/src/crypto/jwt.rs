//! Compact JWS/JWT handling.

use super::{EcPublicKey, base64url_decode, base64url_encode};
use crate::error::{IdpError, Result};
use crate::providers::{CryptoPrimitives, JwtSigner};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

/// JOSE header of a signed token.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct JwtHeader {
    /// Signature algorithm (`BP256R1`, `ES256`).
    pub alg: String,

    /// Token type, usually `JWT`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub typ: Option<String>,

    /// Content type; `NJWT` for a nested token.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cty: Option<String>,

    /// Key identifier.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub kid: Option<String>,

    /// Signer certificate chain (standard base64 DER).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub x5c: Option<Vec<String>>,
}

impl JwtHeader {
    /// Header for a plain JWT signed with `alg`.
    #[must_use]
    pub fn new(alg: &str) -> Self {
        Self {
            alg: alg.to_string(),
            typ: Some("JWT".to_string()),
            ..Self::default()
        }
    }

    /// Attach the signer certificate.
    #[must_use]
    pub fn with_certificate(mut self, certificate_base64: String) -> Self {
        self.x5c = Some(vec![certificate_base64]);
        self
    }

    /// Set the content type.
    #[must_use]
    pub fn with_content_type(mut self, cty: &str) -> Self {
        self.cty = Some(cty.to_string());
        self
    }
}

/// Claims wrapper for a nested JWT (`{"njwt": "<jwt>"}`).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NestedJwt {
    /// The nested compact token.
    pub njwt: String,
}

/// A compact serialized JWT: `header.payload.signature`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Jwt {
    header: String,
    payload: String,
    signature: String,
}

impl Jwt {
    /// Parse a compact token. The signature part may be empty.
    ///
    /// # Errors
    ///
    /// Returns [`IdpError::Decoding`] unless there are exactly three parts
    /// with non-empty header and payload.
    pub fn parse(raw: &str) -> Result<Self> {
        let mut parts = raw.trim().split('.');
        match (parts.next(), parts.next(), parts.next(), parts.next()) {
            (Some(header), Some(payload), Some(signature), None)
                if !header.is_empty() && !payload.is_empty() =>
            {
                Ok(Self {
                    header: header.to_string(),
                    payload: payload.to_string(),
                    signature: signature.to_string(),
                })
            }
            _ => Err(IdpError::Decoding("JWT must have three parts".to_string())),
        }
    }

    /// Sign `claims` with `signer`.
    ///
    /// The signer may suspend (a biometric prompt or card interaction).
    ///
    /// # Errors
    ///
    /// Returns [`IdpError::Encryption`] if serialization or signing fails.
    pub async fn sign<C, S>(header: &JwtHeader, claims: &C, signer: &S) -> Result<Self>
    where
        C: Serialize + Sync,
        S: JwtSigner + ?Sized,
    {
        let header_json =
            serde_json::to_vec(header).map_err(|e| IdpError::Encryption(e.to_string()))?;
        let payload_json =
            serde_json::to_vec(claims).map_err(|e| IdpError::Encryption(e.to_string()))?;
        let header = base64url_encode(&header_json);
        let payload = base64url_encode(&payload_json);

        let signing_input = format!("{header}.{payload}");
        let signature = signer.sign(signing_input.as_bytes()).await?;

        Ok(Self {
            header,
            payload,
            signature: base64url_encode(&signature),
        })
    }

    /// Decode the JOSE header.
    ///
    /// # Errors
    ///
    /// Returns [`IdpError::Decoding`] for malformed base64 or JSON.
    pub fn header(&self) -> Result<JwtHeader> {
        Ok(serde_json::from_slice(&base64url_decode(&self.header)?)?)
    }

    /// Decode the payload into `T` without checking the signature.
    ///
    /// # Errors
    ///
    /// Returns [`IdpError::Decoding`] for malformed base64 or JSON.
    pub fn claims<T: DeserializeOwned>(&self) -> Result<T> {
        Ok(serde_json::from_slice(&base64url_decode(&self.payload)?)?)
    }

    /// `header.payload`, the bytes covered by the signature.
    #[must_use]
    pub fn signing_input(&self) -> String {
        format!("{}.{}", self.header, self.payload)
    }

    /// Raw signature bytes (`r || s`).
    ///
    /// # Errors
    ///
    /// Returns [`IdpError::Decoding`] for malformed base64.
    pub fn signature(&self) -> Result<Vec<u8>> {
        base64url_decode(&self.signature)
    }

    /// Verify the signature against `key`.
    ///
    /// Only brainpoolP256r1 keys with a matching `BP256R1` header are
    /// accepted.
    ///
    /// # Errors
    ///
    /// - [`IdpError::UnsupportedCurve`] for non-brainpool keys
    /// - [`IdpError::InvalidSignature`] if the header algorithm does not match
    ///   or the signature does not verify
    pub fn verify<C: CryptoPrimitives + ?Sized>(&self, key: &EcPublicKey, crypto: &C) -> Result<()> {
        let key = key.require_brainpool()?;
        let header = self.header()?;
        if header.alg != key.curve.jws_algorithm() {
            return Err(IdpError::InvalidSignature(format!(
                "unexpected algorithm {}",
                header.alg
            )));
        }
        let signature = self.signature()?;
        if signature.is_empty() {
            return Err(IdpError::InvalidSignature("token is unsigned".to_string()));
        }
        if crypto.verify(key, self.signing_input().as_bytes(), &signature)? {
            Ok(())
        } else {
            Err(IdpError::InvalidSignature("signature mismatch".to_string()))
        }
    }

    /// Compact serialization.
    #[must_use]
    pub fn serialize(&self) -> String {
        format!("{}.{}.{}", self.header, self.payload, self.signature)
    }
}

impl std::fmt::Display for Jwt {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}.{}.{}", self.header, self.payload, self.signature)
    }
}

impl std::str::FromStr for Jwt {
    type Err = IdpError;

    fn from_str(s: &str) -> Result<Self> {
        Self::parse(s)
    }
}

impl TryFrom<String> for Jwt {
    type Error = IdpError;

    fn try_from(value: String) -> Result<Self> {
        Self::parse(&value)
    }
}

impl From<Jwt> for String {
    fn from(jwt: Jwt) -> Self {
        jwt.serialize()
    }
}
