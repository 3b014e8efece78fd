//! Signed IDP discovery document.

use crate::crypto::{EcPublicKey, Jwk, Jwt, X509Certificate};
use crate::error::{IdpError, Result};
use crate::providers::CryptoPrimitives;
use chrono::{DateTime, TimeZone, Utc};
use serde::{Deserialize, Serialize};
use url::Url;

/// Raw discovery material as fetched from the IDP.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DiscoveryDocumentResponse {
    /// Signed discovery JWT.
    pub document: String,

    /// Key the client encrypts everything it sends with (`puk_idp_enc`).
    pub encryption_key: Jwk,

    /// Key (with certificate) the IDP signs challenges and tokens with
    /// (`puk_idp_sig`).
    pub signing_key: Jwk,
}

/// Claims of the discovery JWT.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DiscoveryDocumentPayload {
    /// Issuer identifier.
    pub issuer: String,

    /// Issued at (seconds since epoch).
    pub iat: i64,

    /// Expires at (seconds since epoch).
    pub exp: i64,

    /// Challenge request and signed-challenge submission.
    pub authorization_endpoint: Url,

    /// SSO token re-authentication.
    pub sso_endpoint: Url,

    /// Code for token exchange.
    pub token_endpoint: Url,

    /// Biometric (alternative) authentication.
    #[serde(default)]
    pub auth_pair_endpoint: Option<Url>,

    /// Device registration, listing and deletion.
    #[serde(default)]
    pub uri_pair: Option<Url>,

    /// Encryption key location.
    #[serde(default)]
    pub uri_puk_idp_enc: Option<Url>,

    /// Signing key location.
    #[serde(default)]
    pub uri_puk_idp_sig: Option<Url>,

    /// Signed directory of insurance apps supporting external authentication.
    #[serde(default)]
    pub kk_app_list_uri: Option<Url>,

    /// External authentication via insurance app (fast track).
    #[serde(default)]
    pub third_party_authorization_endpoint: Option<Url>,

    /// External authentication via a federated identity provider (GID).
    #[serde(default)]
    pub federation_authorization_endpoint: Option<Url>,
}

/// A decoded discovery document.
///
/// Usable only after [`DiscoveryDocument::verify_signature`] succeeded, the
/// trust store accepted both certificates and the validity window covers the
/// current time; the [`DiscoveryValidator`](crate::discovery::DiscoveryValidator)
/// enforces all three. Documents are replaced wholesale on refetch, never
/// mutated.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DiscoveryDocument {
    /// The signed document as received.
    pub jwt: Jwt,

    /// Decoded claims.
    pub payload: DiscoveryDocumentPayload,

    /// Certificate the document is signed with (JWT header `x5c`).
    pub discovery_key: X509Certificate,

    /// Certificate the IDP signs challenges and ID tokens with.
    pub signing_certificate: X509Certificate,

    /// Key for JWE payloads sent to the IDP.
    pub encryption_key: EcPublicKey,
}

impl DiscoveryDocument {
    /// Decode fetched discovery material. No signature or trust checks
    /// happen here.
    ///
    /// # Errors
    ///
    /// Returns [`IdpError::InvalidDiscoveryDocument`] if any part is malformed.
    pub fn decode<C: CryptoPrimitives + ?Sized>(
        response: &DiscoveryDocumentResponse,
        crypto: &C,
    ) -> Result<Self> {
        let invalid = |e: IdpError| IdpError::InvalidDiscoveryDocument(e.to_string());

        let jwt = Jwt::parse(&response.document).map_err(invalid)?;
        let payload = jwt.claims::<DiscoveryDocumentPayload>().map_err(invalid)?;
        let discovery_entry = jwt
            .header()
            .map_err(invalid)?
            .x5c
            .and_then(|chain| chain.into_iter().next())
            .ok_or_else(|| {
                IdpError::InvalidDiscoveryDocument("missing discovery key certificate".to_string())
            })?;
        let discovery_key = X509Certificate::from_base64(&discovery_entry, crypto).map_err(invalid)?;
        let signing_certificate =
            X509Certificate::from_jwk(&response.signing_key, crypto).map_err(invalid)?;
        let encryption_key = EcPublicKey::from_jwk(&response.encryption_key).map_err(invalid)?;

        Ok(Self {
            jwt,
            payload,
            discovery_key,
            signing_certificate,
            encryption_key,
        })
    }

    /// Verify the document JWT against its own discovery key.
    ///
    /// # Errors
    ///
    /// - [`IdpError::UnsupportedCurve`] if the discovery key is not brainpoolP256r1
    /// - [`IdpError::InvalidDiscoveryDocument`] if the signature does not verify
    pub fn verify_signature<C: CryptoPrimitives + ?Sized>(&self, crypto: &C) -> Result<()> {
        self.jwt
            .verify(&self.discovery_key.public_key, crypto)
            .map_err(|e| match e {
                IdpError::UnsupportedCurve(curve) => IdpError::UnsupportedCurve(curve),
                other => IdpError::InvalidDiscoveryDocument(other.to_string()),
            })
    }

    /// Issued-at instant.
    #[must_use]
    pub fn issued_at(&self) -> DateTime<Utc> {
        Utc.timestamp_opt(self.payload.iat, 0)
            .single()
            .unwrap_or(DateTime::<Utc>::MAX_UTC)
    }

    /// Expiry instant.
    #[must_use]
    pub fn expires_at(&self) -> DateTime<Utc> {
        Utc.timestamp_opt(self.payload.exp, 0)
            .single()
            .unwrap_or(DateTime::<Utc>::MIN_UTC)
    }

    /// `true` if `now` lies within `[iat, exp)`.
    #[must_use]
    pub fn is_valid(&self, now: DateTime<Utc>) -> bool {
        self.issued_at() <= now && now < self.expires_at()
    }

    /// Pairing endpoint.
    ///
    /// # Errors
    ///
    /// Returns [`IdpError::InvalidDiscoveryDocument`] if the IDP does not
    /// advertise it.
    pub fn pairing_endpoint(&self) -> Result<&Url> {
        required(self.payload.uri_pair.as_ref(), "uri_pair")
    }

    /// Biometric authentication endpoint.
    ///
    /// # Errors
    ///
    /// Returns [`IdpError::InvalidDiscoveryDocument`] if not advertised.
    pub fn auth_pair_endpoint(&self) -> Result<&Url> {
        required(self.payload.auth_pair_endpoint.as_ref(), "auth_pair_endpoint")
    }

    /// Insurance app directory endpoint.
    ///
    /// # Errors
    ///
    /// Returns [`IdpError::InvalidDiscoveryDocument`] if not advertised.
    pub fn directory_endpoint(&self) -> Result<&Url> {
        required(self.payload.kk_app_list_uri.as_ref(), "kk_app_list_uri")
    }

    /// External authentication endpoint for the given variant.
    ///
    /// # Errors
    ///
    /// Returns [`IdpError::InvalidDiscoveryDocument`] if not advertised.
    pub fn ext_auth_endpoint(&self, gid: bool) -> Result<&Url> {
        if gid {
            required(
                self.payload.federation_authorization_endpoint.as_ref(),
                "federation_authorization_endpoint",
            )
        } else {
            required(
                self.payload.third_party_authorization_endpoint.as_ref(),
                "third_party_authorization_endpoint",
            )
        }
    }
}

fn required<'a>(url: Option<&'a Url>, name: &str) -> Result<&'a Url> {
    url.ok_or_else(|| IdpError::InvalidDiscoveryDocument(format!("missing endpoint {name}")))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mocks::MockIdp;
    use chrono::Duration;

    #[test]
    fn test_decode_and_verify() {
        let idp = MockIdp::new();
        let crypto = idp.crypto();
        let document = DiscoveryDocument::decode(&idp.discovery_response(), &crypto).unwrap();

        document.verify_signature(&crypto).unwrap();
        assert!(document.is_valid(Utc::now()));
        assert!(document.pairing_endpoint().is_ok());
    }

    #[test]
    fn test_validity_window_is_half_open() {
        let idp = MockIdp::new();
        let document =
            DiscoveryDocument::decode(&idp.discovery_response(), &idp.crypto()).unwrap();

        assert!(document.is_valid(document.issued_at()));
        assert!(!document.is_valid(document.expires_at()));
        assert!(!document.is_valid(document.issued_at() - Duration::seconds(1)));
    }

    #[test]
    fn test_decode_rejects_garbage() {
        let idp = MockIdp::new();
        let response = DiscoveryDocumentResponse {
            document: "not-a-jwt".to_string(),
            encryption_key: idp.encryption_jwk(),
            signing_key: idp.signing_jwk(),
        };
        assert!(matches!(
            DiscoveryDocument::decode(&response, &idp.crypto()),
            Err(IdpError::InvalidDiscoveryDocument(_))
        ));
    }
}
