//! Challenges, challenge sessions and exchange tokens.

use crate::crypto::{Jwt, JwtHeader, X509Certificate};
use crate::error::{IdpError, Result};
use crate::providers::JwtSigner;
use chrono::{DateTime, TimeZone, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use url::Url;

/// Consent information the IDP attaches to a challenge.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct UserConsent {
    /// Scope name to human readable description.
    #[serde(default)]
    pub requested_scopes: HashMap<String, String>,

    /// Claim name to human readable description.
    #[serde(default)]
    pub requested_claims: HashMap<String, String>,
}

/// Challenge as returned by the authorization endpoint.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IdpChallenge {
    /// Signed challenge token.
    pub challenge: Jwt,

    /// Consent the user is asked to give.
    #[serde(default)]
    pub user_consent: Option<UserConsent>,
}

/// Claims of a challenge token.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChallengeClaims {
    /// Expires at (seconds since epoch).
    pub exp: i64,

    /// Issued at (seconds since epoch).
    #[serde(default)]
    pub iat: Option<i64>,

    /// Issuer.
    #[serde(default)]
    pub iss: Option<String>,

    /// Echoed PKCE code challenge.
    #[serde(default)]
    pub code_challenge: Option<String>,

    /// Echoed client `state`.
    #[serde(default)]
    pub state: Option<String>,

    /// Echoed client `nonce`.
    #[serde(default)]
    pub nonce: Option<String>,

    /// Requested scope.
    #[serde(default)]
    pub scope: Option<String>,
}

impl IdpChallenge {
    /// Decode the challenge claims.
    ///
    /// # Errors
    ///
    /// Returns [`IdpError::Decoding`] if the payload is malformed.
    pub fn claims(&self) -> Result<ChallengeClaims> {
        self.challenge.claims()
    }

    /// Expiry of the challenge.
    ///
    /// # Errors
    ///
    /// Returns [`IdpError::Decoding`] if `exp` is missing or out of range.
    pub fn expires_at(&self) -> Result<DateTime<Utc>> {
        let exp = self.claims()?.exp;
        Utc.timestamp_opt(exp, 0)
            .single()
            .ok_or_else(|| IdpError::Decoding(format!("challenge exp {exp} out of range")))
    }
}

/// Values binding a later verify/exchange to the request that started it.
///
/// Implemented by [`ChallengeSession`] (card and biometric login) and by
/// [`ExtAuthChallengeSession`](super::ExtAuthChallengeSession) (insurance app
/// login), which carries no IDP challenge.
pub trait ChallengeContext: Send + Sync {
    /// PKCE code verifier.
    fn verifier_code(&self) -> &str;

    /// Expected `state` echo.
    fn state(&self) -> &str;

    /// Expected ID token `nonce`.
    fn nonce(&self) -> &str;

    /// Redirect URI used for the request.
    fn redirect(&self) -> &str;

    /// Whether the resulting token authorizes a device pairing.
    fn is_pairing_flow(&self) -> bool {
        false
    }
}

/// A verified challenge plus the client values bound to it.
///
/// Created once per login attempt and consumed by exactly one
/// verify/exchange. Nothing in a session is ever persisted.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChallengeSession {
    /// Challenge as received and verified.
    pub challenge: IdpChallenge,

    /// PKCE code verifier.
    pub verifier_code: String,

    /// Client `state`.
    pub state: String,

    /// Client `nonce`.
    pub nonce: String,

    /// Redirect URI the challenge was requested for.
    pub redirect: String,

    /// Challenge was requested with the pairing redirect/scope.
    pub pairing_flow: bool,

    /// Expiry of the challenge.
    pub expires_at: DateTime<Utc>,
}

impl ChallengeSession {
    /// `true` once `exp <= now`.
    #[must_use]
    pub fn is_expired_at(&self, now: DateTime<Utc>) -> bool {
        self.expires_at <= now
    }

    /// Sign the challenge with a health card.
    ///
    /// Produces a `BP256R1` token with content type `NJWT` whose payload
    /// nests the challenge token and whose `x5c` carries the card
    /// certificate.
    ///
    /// # Errors
    ///
    /// Returns [`IdpError::Encryption`] if the signer fails.
    pub async fn sign<S: JwtSigner + ?Sized>(
        &self,
        signer: &S,
        certificate: &X509Certificate,
    ) -> Result<SignedChallenge> {
        let header = JwtHeader::new(signer.algorithm())
            .with_content_type("NJWT")
            .with_certificate(certificate.to_base64());
        let claims = crate::crypto::jwt::NestedJwt {
            njwt: self.challenge.challenge.serialize(),
        };
        let signed = Jwt::sign(&header, &claims, signer).await?;
        Ok(SignedChallenge {
            original_challenge: self.clone(),
            signed_challenge: signed,
        })
    }
}

impl ChallengeContext for ChallengeSession {
    fn verifier_code(&self) -> &str {
        &self.verifier_code
    }

    fn state(&self) -> &str {
        &self.state
    }

    fn nonce(&self) -> &str {
        &self.nonce
    }

    fn redirect(&self) -> &str {
        &self.redirect
    }

    fn is_pairing_flow(&self) -> bool {
        self.pairing_flow
    }
}

/// A card-signed challenge together with the session it answers.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SignedChallenge {
    /// The session the signature answers.
    pub original_challenge: ChallengeSession,

    /// Card-signed nested token.
    pub signed_challenge: Jwt,
}

/// Single-use authorization code returned by a verify step.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExchangeToken {
    /// Authorization code.
    pub code: String,

    /// SSO token, if the IDP issued one.
    #[serde(default)]
    pub sso_token: Option<String>,

    /// Echoed `state`. Must be checked before the code is used.
    pub state: String,

    /// Redirect the IDP sent the code to.
    pub redirect: String,
}

impl ExchangeToken {
    /// Extract code, SSO token and state from the IDP's redirect location.
    ///
    /// # Errors
    ///
    /// Returns [`IdpError::Decoding`] if `code` or `state` is missing.
    pub fn from_redirect(location: &Url) -> Result<Self> {
        let mut code = None;
        let mut sso_token = None;
        let mut state = None;
        for (key, value) in location.query_pairs() {
            match key.as_ref() {
                "code" => code = Some(value.into_owned()),
                "ssotoken" => sso_token = Some(value.into_owned()),
                "state" => state = Some(value.into_owned()),
                _ => {}
            }
        }
        let mut redirect = location.clone();
        redirect.set_query(None);

        Ok(Self {
            code: code.ok_or_else(|| IdpError::Decoding("redirect without code".to_string()))?,
            sso_token,
            state: state.ok_or_else(|| IdpError::Decoding("redirect without state".to_string()))?,
            redirect: redirect.to_string(),
        })
    }

    /// Fail with [`IdpError::InvalidStateParameter`] unless the echoed state
    /// matches `context`.
    ///
    /// # Errors
    ///
    /// Returns [`IdpError::InvalidStateParameter`] on mismatch.
    pub fn validate_state<C: ChallengeContext + ?Sized>(&self, context: &C) -> Result<()> {
        if self.state == context.state() {
            Ok(())
        } else {
            Err(IdpError::InvalidStateParameter)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_exchange_token_from_redirect() {
        let url = Url::parse("https://redirect.example/cb?code=abc&ssotoken=sso&state=xyz").unwrap();
        let token = ExchangeToken::from_redirect(&url).unwrap();
        assert_eq!(token.code, "abc");
        assert_eq!(token.sso_token.as_deref(), Some("sso"));
        assert_eq!(token.state, "xyz");
        assert_eq!(token.redirect, "https://redirect.example/cb");
    }

    #[test]
    fn test_exchange_token_requires_code_and_state() {
        let url = Url::parse("https://redirect.example/cb?state=xyz").unwrap();
        assert!(ExchangeToken::from_redirect(&url).is_err());
        let url = Url::parse("https://redirect.example/cb?code=abc").unwrap();
        assert!(ExchangeToken::from_redirect(&url).is_err());
    }
}
