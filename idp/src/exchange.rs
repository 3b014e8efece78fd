//! Token exchange engine.
//!
//! ```text
//! SignedChallenge ──verify──► ExchangeToken ──exchange──► IdpToken
//! SignedAuthenticationData ──alt_verify──┘
//! ```
//!
//! Everything sent to the IDP is `ECDH-ES` encrypted to the discovery
//! document's encryption key. The token bundle comes back `dir` encrypted
//! with a per-exchange AES key the client hands over inside the key
//! verifier.

use crate::crypto::jwt::NestedJwt;
use crate::crypto::{AesKey, CryptoBox, Jwe, Jwt, base64url_encode};
use crate::discovery::DiscoveryValidator;
use crate::environment::IdpEnvironment;
use crate::error::{IdpError, Result};
use crate::models::{
    ChallengeContext, DiscoveryDocument, ExchangeToken, IdTokenPayload, IdpToken,
    SignedAuthenticationData, SignedChallenge,
};
use crate::providers::{
    CryptoPrimitives, IdpClient, IdpStorage, KeyVerifier, TokenRequest, TrustStore,
};
use chrono::{TimeDelta, Utc};
use std::convert::Infallible;
use std::fmt::Display;
use tracing::{debug, info};
use zeroize::Zeroizing;

/// JWE content type of a nested token.
pub const CONTENT_TYPE_NJWT: &str = "NJWT";
/// JWE content type of a JSON document.
pub const CONTENT_TYPE_JSON: &str = "JSON";

/// ID token validator accepting every token.
///
/// # Errors
///
/// Never fails.
pub const fn accept_any_id_token(_: &IdTokenPayload) -> std::result::Result<(), Infallible> {
    Ok(())
}

/// Verifies signed challenges and exchanges codes for tokens.
pub struct ExchangeEngine<'a, C, P, T, S, K, E, D> {
    env: &'a IdpEnvironment<C, P, T, S, K, E, D>,
}

impl<'a, C, P, T, S, K, E, D> ExchangeEngine<'a, C, P, T, S, K, E, D>
where
    C: IdpClient,
    P: CryptoPrimitives,
    T: TrustStore,
    S: IdpStorage,
{
    /// Create an engine over `env`.
    #[must_use]
    pub const fn new(env: &'a IdpEnvironment<C, P, T, S, K, E, D>) -> Self {
        Self { env }
    }

    /// Submit a card-signed challenge.
    ///
    /// # Errors
    ///
    /// - [`IdpError::ChallengeExpired`] if the challenge expired meanwhile
    /// - [`IdpError::Encryption`] if the payload cannot be encrypted
    /// - [`IdpError::InvalidStateParameter`] if the IDP echoes another state
    /// - discovery, network and server errors
    pub async fn verify(&self, signed: &SignedChallenge) -> Result<ExchangeToken> {
        let session = &signed.original_challenge;
        if session.is_expired_at(Utc::now()) {
            return Err(IdpError::ChallengeExpired);
        }
        let document = self.discovery().load().await?;
        let encrypted = self.encrypt_nested(
            &signed.signed_challenge,
            &document,
            Some(session.expires_at.timestamp()),
        )?;

        let token = self
            .env
            .client
            .verify(&document.payload.authorization_endpoint, &encrypted)
            .await?;
        token.validate_state(session)?;

        debug!("Signed challenge accepted");
        Ok(token)
    }

    /// Submit hardware-signed authentication data (biometric login).
    ///
    /// # Errors
    ///
    /// Same as [`verify`](Self::verify); additionally
    /// [`IdpError::InvalidDiscoveryDocument`] if the IDP offers no
    /// biometric endpoint.
    pub async fn alt_verify(&self, signed: &SignedAuthenticationData) -> Result<ExchangeToken> {
        let session = &signed.original_challenge;
        if session.is_expired_at(Utc::now()) {
            return Err(IdpError::ChallengeExpired);
        }
        let document = self.discovery().load().await?;
        let encrypted = self.encrypt_nested(
            &signed.signed_authentication_data,
            &document,
            Some(session.expires_at.timestamp()),
        )?;

        let token = self
            .env
            .client
            .alt_verify(document.auth_pair_endpoint()?, &encrypted)
            .await?;
        token.validate_state(session)?;

        debug!("Authentication data accepted");
        Ok(token)
    }

    /// Exchange an authorization code for a token and persist it.
    ///
    /// `validator` runs over the decrypted, signature- and nonce-checked ID
    /// token; a rejection surfaces as [`IdpError::Unspecified`].
    ///
    /// # Errors
    ///
    /// - [`IdpError::Decryption`] if the token bundle does not decrypt
    /// - [`IdpError::InvalidNonce`] if the ID token nonce does not match
    /// - [`IdpError::InvalidSignature`] if the ID token is not signed by the
    ///   discovery signing certificate
    /// - [`IdpError::Unspecified`] if `validator` rejects the ID token
    /// - discovery, network, server and storage errors
    pub async fn exchange<X, F, V>(
        &self,
        token: &ExchangeToken,
        context: &X,
        validator: F,
    ) -> Result<IdpToken>
    where
        X: ChallengeContext + ?Sized,
        F: FnOnce(&IdTokenPayload) -> std::result::Result<(), V>,
        V: Display,
    {
        let idp_token = self.exchange_unpersisted(token, context, validator).await?;
        let _guard = self.env.profile_locks.lock(self.env.profile).await;
        self.env.storage.set_token(Some(idp_token.clone())).await?;
        Ok(idp_token)
    }

    /// [`verify`](Self::verify) followed by [`exchange`](Self::exchange).
    ///
    /// # Errors
    ///
    /// Any error of the two steps.
    pub async fn verify_and_exchange<F, V>(
        &self,
        signed: &SignedChallenge,
        validator: F,
    ) -> Result<IdpToken>
    where
        F: FnOnce(&IdTokenPayload) -> std::result::Result<(), V>,
        V: Display,
    {
        let token = self.verify(signed).await?;
        self.exchange(&token, &signed.original_challenge, validator).await
    }

    /// [`alt_verify`](Self::alt_verify) followed by
    /// [`exchange`](Self::exchange).
    ///
    /// # Errors
    ///
    /// Any error of the two steps.
    pub async fn alt_verify_and_exchange<F, V>(
        &self,
        signed: &SignedAuthenticationData,
        validator: F,
    ) -> Result<IdpToken>
    where
        F: FnOnce(&IdTokenPayload) -> std::result::Result<(), V>,
        V: Display,
    {
        let token = self.alt_verify(signed).await?;
        self.exchange(&token, &signed.original_challenge, validator).await
    }

    /// The exchange pipeline without the final persist.
    pub(crate) async fn exchange_unpersisted<X, F, V>(
        &self,
        token: &ExchangeToken,
        context: &X,
        validator: F,
    ) -> Result<IdpToken>
    where
        X: ChallengeContext + ?Sized,
        F: FnOnce(&IdTokenPayload) -> std::result::Result<(), V>,
        V: Display,
    {
        let document = self.discovery().load().await?;
        let crypto_box = CryptoBox::new();
        let key_verifier = self.key_verifier(crypto_box.aes_key(), context, &document)?;

        let request = TokenRequest {
            grant_type: "authorization_code".to_string(),
            code: token.code.clone(),
            key_verifier,
            client_id: self.env.config.client_id.clone(),
            redirect_uri: context.redirect().to_string(),
        };
        let response = self
            .env
            .client
            .exchange(&document.payload.token_endpoint, &request)
            .await?;

        let access_token = decrypt_nested(&response.access_token, crypto_box.aes_key())?;
        let id_token = decrypt_nested(&response.id_token, crypto_box.aes_key())?;

        let id_token_jwt = Jwt::parse(&id_token)?;
        let payload: IdTokenPayload = id_token_jwt.claims()?;
        if payload.nonce.as_deref() != Some(context.nonce()) {
            return Err(IdpError::InvalidNonce);
        }
        id_token_jwt
            .verify(&document.signing_certificate.public_key, &self.env.crypto)
            .map_err(|error| match error {
                IdpError::UnsupportedCurve(curve) => IdpError::UnsupportedCurve(curve),
                other => IdpError::InvalidSignature(format!("ID token: {other}")),
            })?;
        validator(&payload).map_err(|e| IdpError::Unspecified(e.to_string()))?;

        let expires = TimeDelta::try_seconds(response.expires_in)
            .filter(|lifetime| *lifetime > TimeDelta::zero())
            .and_then(|lifetime| Utc::now().checked_add_signed(lifetime))
            .ok_or_else(|| {
                IdpError::Decoding(format!("expires_in {} out of range", response.expires_in))
            })?;
        info!(%expires, pairing = context.is_pairing_flow(), "Token exchanged");

        Ok(IdpToken {
            access_token,
            id_token,
            sso_token: token.sso_token.clone(),
            token_type: response.token_type,
            expires,
            redirect: context.redirect().to_string(),
            is_pairing_token: context.is_pairing_flow(),
            is_pkv_fast_track: false,
        })
    }

    fn discovery(&self) -> DiscoveryValidator<'a, C, P, T, S, K, E, D> {
        DiscoveryValidator::new(self.env)
    }

    fn key_verifier<X: ChallengeContext + ?Sized>(
        &self,
        key: &AesKey,
        context: &X,
        document: &DiscoveryDocument,
    ) -> Result<Jwe> {
        let verifier = KeyVerifier {
            token_key: base64url_encode(key.as_bytes()),
            code_verifier: context.verifier_code().to_string(),
        };
        let plaintext = Zeroizing::new(
            serde_json::to_vec(&verifier).map_err(|e| IdpError::Encryption(e.to_string()))?,
        );
        Jwe::encrypt_for(
            &plaintext,
            &document.encryption_key,
            CONTENT_TYPE_JSON,
            None,
            &self.env.crypto,
        )
    }

    fn encrypt_nested(
        &self,
        jwt: &Jwt,
        document: &DiscoveryDocument,
        exp: Option<i64>,
    ) -> Result<Jwe> {
        encrypt_nested(jwt.serialize(), document, exp, &self.env.crypto)
    }
}

/// Encrypt `{"njwt": jwt}` to the IDP.
pub(crate) fn encrypt_nested<P: CryptoPrimitives + ?Sized>(
    jwt: String,
    document: &DiscoveryDocument,
    exp: Option<i64>,
    crypto: &P,
) -> Result<Jwe> {
    let plaintext = serde_json::to_vec(&NestedJwt { njwt: jwt })
        .map_err(|e| IdpError::Encryption(e.to_string()))?;
    Jwe::encrypt_for(
        &plaintext,
        &document.encryption_key,
        CONTENT_TYPE_NJWT,
        exp,
        crypto,
    )
}

/// Decrypt a `dir` token and unwrap `{"njwt": ...}`.
fn decrypt_nested(jwe: &Jwe, key: &AesKey) -> Result<String> {
    let plaintext = jwe.decrypt_direct(key)?;
    let nested: NestedJwt = serde_json::from_slice(&plaintext)
        .map_err(|e| IdpError::Decryption(format!("unexpected token payload: {e}")))?;
    Ok(nested.njwt)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::challenge::ChallengeEngine;
    use crate::mocks::{MockIdp, MockSigner};

    #[tokio::test]
    async fn test_tampered_state_is_rejected() {
        let idp = MockIdp::new();
        let env = idp.environment();
        let signer = MockSigner::brainpool();
        let session = ChallengeEngine::new(&env).request_challenge(None).await.unwrap();
        let signed = session.sign(&signer, &signer.certificate()).await.unwrap();

        idp.set_tamper_state(true);
        let result = ExchangeEngine::new(&env).verify(&signed).await;

        assert!(matches!(result, Err(IdpError::InvalidStateParameter)));
    }

    #[tokio::test]
    async fn test_out_of_range_expires_in_is_rejected() {
        let idp = MockIdp::new();
        let env = idp.environment();
        let signer = MockSigner::brainpool();

        for expires_in in [100_000_000_000_000, i64::MAX, 0, -300] {
            idp.set_reported_expires_in(Some(expires_in));
            let session = ChallengeEngine::new(&env).request_challenge(None).await.unwrap();
            let signed = session.sign(&signer, &signer.certificate()).await.unwrap();

            let result = ExchangeEngine::new(&env)
                .verify_and_exchange(&signed, accept_any_id_token)
                .await;

            assert!(
                matches!(result, Err(IdpError::Decoding(ref message)) if message.contains("expires_in")),
                "expires_in {expires_in}: {result:?}"
            );
            assert!(env.storage.token().await.unwrap().is_none());
        }
    }

    #[tokio::test]
    async fn test_validator_rejection_is_unspecified() {
        let idp = MockIdp::new();
        let env = idp.environment();
        let signer = MockSigner::brainpool();
        let session = ChallengeEngine::new(&env).request_challenge(None).await.unwrap();
        let signed = session.sign(&signer, &signer.certificate()).await.unwrap();

        let result = ExchangeEngine::new(&env)
            .verify_and_exchange(&signed, |_| Err("insurant not allowed"))
            .await;

        assert!(matches!(result, Err(IdpError::Unspecified(message)) if message == "insurant not allowed"));
        assert!(env.storage.token().await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_expired_session_is_not_submitted() {
        let idp = MockIdp::new();
        let env = idp.environment();
        let signer = MockSigner::brainpool();
        let mut session = ChallengeEngine::new(&env).request_challenge(None).await.unwrap();
        session.expires_at = Utc::now();
        let signed = session.sign(&signer, &signer.certificate()).await.unwrap();

        let result = ExchangeEngine::new(&env).verify(&signed).await;

        assert!(matches!(result, Err(IdpError::ChallengeExpired)));
        assert_eq!(idp.call_count("verify"), 0);
    }
}
