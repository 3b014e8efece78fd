//! Device pairing engine.
//!
//! Binds a hardware-backed P-256 key to a health card identity so later
//! logins need only a biometric confirmation:
//!
//! 1. [`PairingEngine::create_pairing_session`] picks a key identifier
//! 2. the user logs in with the pairing redirect (pairing token)
//! 3. [`PairingEngine::sign_pairing_session`] creates the hardware key and
//!    the card-signed [`RegistrationData`]
//! 4. [`PairingEngine::pair_device`] registers it with the IDP, or
//!    [`PairingEngine::abort`] rolls everything back
//!
//! Afterwards [`PairingEngine::authentication_data`] produces the signed
//! payload for a biometric login.
//!
//! Sign, abort and authentication run inside the profile lock; they share
//! the certificate and key identifier slots with token refresh.

use crate::crypto::{CryptoBox, Jwe, Jwt, JwtHeader, X509Certificate, base64url_encode};
use crate::discovery::DiscoveryValidator;
use crate::environment::IdpEnvironment;
use crate::error::{IdpError, Result};
use crate::exchange::{CONTENT_TYPE_JSON, encrypt_nested};
use crate::models::pairing::{BIOMETRIC_AMR, PAYLOAD_VERSION, key_tag};
use crate::models::{
    AuthenticationData, ChallengeSession, DiscoveryDocument, IdpToken, PairingData,
    PairingEntries, PairingEntry, PairingSession, RegistrationData, SignedAuthenticationData,
};
use crate::providers::{
    CryptoPrimitives, DeviceInfoProvider, EnclaveSigner, IdpClient, IdpStorage, JwtSigner,
    KeyContainer, TrustStore,
};
use tracing::{debug, info, warn};

/// Creates, signs and aborts device pairings.
pub struct PairingEngine<'a, C, P, T, S, K, E, D> {
    env: &'a IdpEnvironment<C, P, T, S, K, E, D>,
}

impl<'a, C, P, T, S, K, E, D> PairingEngine<'a, C, P, T, S, K, E, D>
where
    C: IdpClient,
    P: CryptoPrimitives,
    T: TrustStore,
    S: IdpStorage,
    K: KeyContainer,
    D: DeviceInfoProvider,
{
    /// Create an engine over `env`.
    #[must_use]
    pub const fn new(env: &'a IdpEnvironment<C, P, T, S, K, E, D>) -> Self {
        Self { env }
    }

    /// Start a pairing: fresh key identifier plus device metadata. Hardware
    /// key storage is not touched yet.
    #[must_use]
    pub fn create_pairing_session(&self) -> PairingSession {
        PairingSession {
            key_identifier: CryptoBox::new().generate_key_identifier().to_vec(),
            device_information: self.env.device_info.device_information(),
            certificate: None,
        }
    }

    /// Create the hardware key and the card-signed registration payload.
    ///
    /// Stores `certificate` and the session's key identifier first; if a
    /// later step fails the caller must [`abort`](Self::abort) the session.
    ///
    /// # Errors
    ///
    /// - [`IdpError::KeyContainer`] if the hardware key cannot be created
    /// - [`IdpError::Encryption`] if the card signer fails
    /// - storage errors
    pub async fn sign_pairing_session<G: JwtSigner + ?Sized>(
        &self,
        session: &mut PairingSession,
        signer: &G,
        certificate: &X509Certificate,
    ) -> Result<RegistrationData> {
        let _guard = self.env.profile_locks.lock(self.env.profile).await;

        self.env
            .storage
            .set_certificate(Some(certificate.clone()))
            .await?;
        self.env
            .storage
            .set_key_identifier(Some(session.key_identifier.clone()))
            .await?;
        session.certificate = Some(certificate.clone());

        let tag = session.key_tag(&self.env.config.biometric_key_tag_prefix);
        let key = match self.env.key_container.find(&tag).await? {
            Some(key) => key,
            None => self.env.key_container.create(&tag).await?,
        };

        let pairing_data = PairingData {
            pairing_data_version: PAYLOAD_VERSION.to_string(),
            se_subject_public_key_info: base64url_encode(&key.subject_public_key_info),
            key_identifier: base64url_encode(&session.key_identifier),
            product: session.device_information.device_type.product.clone(),
            serialnumber: certificate.serial_number.clone(),
            issuer: base64url_encode(&certificate.issuer),
            not_after: certificate.not_after.timestamp(),
            auth_cert_subject_public_key_info: base64url_encode(
                &certificate.subject_public_key_info,
            ),
        };
        let header = JwtHeader::new(signer.algorithm()).with_certificate(certificate.to_base64());
        let signed_pairing_data = Jwt::sign(&header, &pairing_data, signer).await?;

        info!(profile = %self.env.profile, key_tag = %tag, "Pairing session signed");

        Ok(RegistrationData {
            auth_cert: certificate.to_base64(),
            signed_pairing_data,
            device_information: session.device_information.clone(),
        })
    }

    /// Roll back a pairing.
    ///
    /// Clears the stored certificate and key identifier first, then deletes
    /// the hardware key. A failing key deletion is logged and otherwise
    /// ignored: the stored slots are already empty, so the half-created key
    /// can never be used as a pairing. Calling this again is a no-op.
    ///
    /// # Errors
    ///
    /// Returns storage errors; the hardware key is left alone in that case.
    pub async fn abort(&self, session: &PairingSession) -> Result<()> {
        let _guard = self.env.profile_locks.lock(self.env.profile).await;

        self.env.storage.set_certificate(None).await?;
        self.env.storage.set_key_identifier(None).await?;

        let tag = session.key_tag(&self.env.config.biometric_key_tag_prefix);
        match self.env.key_container.delete(&tag).await {
            Ok(deleted) => debug!(key_tag = %tag, deleted, "Pairing aborted"),
            Err(error) => warn!(
                key_tag = %tag,
                error = %error,
                "Pairing aborted but hardware key could not be deleted"
            ),
        }
        Ok(())
    }

    /// Build and hardware-sign the authentication data answering `challenge`.
    ///
    /// # Errors
    ///
    /// - [`IdpError::NoCertificateFound`] if the device is not paired
    /// - [`IdpError::KeyContainer`] if the hardware key is gone or the user
    ///   declines
    pub async fn authentication_data(
        &self,
        challenge: &ChallengeSession,
    ) -> Result<SignedAuthenticationData> {
        let _guard = self.env.profile_locks.lock(self.env.profile).await;

        let certificate = self
            .env
            .storage
            .certificate()
            .await?
            .ok_or(IdpError::NoCertificateFound)?;
        let key_identifier = self
            .env
            .storage
            .key_identifier()
            .await?
            .ok_or(IdpError::NoCertificateFound)?;

        let tag = key_tag(&self.env.config.biometric_key_tag_prefix, &key_identifier);
        if self.env.key_container.find(&tag).await?.is_none() {
            return Err(IdpError::KeyContainer(format!("no hardware key under {tag}")));
        }

        let data = AuthenticationData {
            authentication_data_version: PAYLOAD_VERSION.to_string(),
            auth_cert: certificate.to_base64(),
            challenge_token: challenge.challenge.challenge.serialize(),
            device_information: self.env.device_info.device_information(),
            amr: BIOMETRIC_AMR.iter().map(ToString::to_string).collect(),
            key_identifier: base64url_encode(&key_identifier),
            exp: challenge.expires_at.timestamp(),
        };
        let signer = EnclaveSigner::new(&self.env.key_container, tag);
        let header = JwtHeader::new(signer.algorithm());
        let signed_authentication_data = Jwt::sign(&header, &data, &signer).await?;

        Ok(SignedAuthenticationData {
            original_challenge: challenge.clone(),
            signed_authentication_data,
        })
    }

    /// Register signed registration data with the IDP.
    ///
    /// `token` must come from a pairing login.
    ///
    /// # Errors
    ///
    /// - [`IdpError::ServerError`] with code `pairingAuthorizationFailed`
    ///   (and others) if the IDP refuses
    /// - discovery, encryption and network errors
    pub async fn pair_device(
        &self,
        registration_data: &RegistrationData,
        token: &IdpToken,
    ) -> Result<PairingEntry> {
        let document = DiscoveryValidator::new(self.env).load().await?;
        let plaintext = serde_json::to_vec(registration_data)
            .map_err(|e| IdpError::Encryption(e.to_string()))?;
        let encrypted = Jwe::encrypt_for(
            &plaintext,
            &document.encryption_key,
            CONTENT_TYPE_JSON,
            None,
            &self.env.crypto,
        )?;
        let access_token = self.encrypted_access_token(token, &document)?;

        let entry = self
            .env
            .client
            .register_device(document.pairing_endpoint()?, &encrypted, &access_token)
            .await?;
        info!(profile = %self.env.profile, device = %entry.name, "Device registered");
        Ok(entry)
    }

    /// Delete the registration of `key_identifier` (base64url).
    ///
    /// # Errors
    ///
    /// Discovery, encryption, network and server errors.
    pub async fn unregister_device(&self, key_identifier: &str, token: &IdpToken) -> Result<()> {
        let document = DiscoveryValidator::new(self.env).load().await?;
        let access_token = self.encrypted_access_token(token, &document)?;
        self.env
            .client
            .unregister_device(document.pairing_endpoint()?, key_identifier, &access_token)
            .await?;
        info!(profile = %self.env.profile, "Device unregistered");
        Ok(())
    }

    /// Registered devices of the insurant `token` belongs to.
    ///
    /// # Errors
    ///
    /// Discovery, encryption, network and server errors.
    pub async fn list_devices(&self, token: &IdpToken) -> Result<PairingEntries> {
        let document = DiscoveryValidator::new(self.env).load().await?;
        let access_token = self.encrypted_access_token(token, &document)?;
        self.env
            .client
            .list_devices(document.pairing_endpoint()?, &access_token)
            .await
    }

    fn encrypted_access_token(&self, token: &IdpToken, document: &DiscoveryDocument) -> Result<Jwe> {
        encrypt_nested(
            token.access_token.clone(),
            document,
            Some(token.expires.timestamp()),
            &self.env.crypto,
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::challenge::ChallengeEngine;
    use crate::mocks::{MockCrypto, MockIdp, MockSigner, mock_device_information};

    #[test]
    fn test_new_session_has_fresh_identifier_and_no_key() {
        let idp = MockIdp::new();
        let env = idp.environment();
        let engine = PairingEngine::new(&env);

        let first = engine.create_pairing_session();
        let second = engine.create_pairing_session();

        assert_eq!(first.key_identifier.len(), 32);
        assert_ne!(first.key_identifier, second.key_identifier);
        assert_eq!(first.device_information, mock_device_information());
        assert!(first.certificate.is_none());
        assert_eq!(env.key_container.key_count(), 0);
    }

    #[tokio::test]
    async fn test_pairing_data_binds_card_and_hardware_key() {
        let idp = MockIdp::new();
        let env = idp.environment();
        let card = MockSigner::brainpool();
        let engine = PairingEngine::new(&env);
        let mut session = engine.create_pairing_session();

        let registration = engine
            .sign_pairing_session(&mut session, &card, &card.certificate())
            .await
            .unwrap();

        let tag = session.key_tag(&env.config.biometric_key_tag_prefix);
        let key = env.key_container.find(&tag).await.unwrap().unwrap();
        let data: PairingData = registration.signed_pairing_data.claims().unwrap();
        assert_eq!(data.se_subject_public_key_info, base64url_encode(&key.subject_public_key_info));
        assert_eq!(
            data.auth_cert_subject_public_key_info,
            base64url_encode(&MockCrypto::subject_public_key_info(card.public_key()))
        );
        assert_eq!(data.key_identifier, base64url_encode(&session.key_identifier));
        assert_eq!(registration.auth_cert, card.certificate().to_base64());

        registration
            .signed_pairing_data
            .verify(card.public_key(), &MockCrypto::new())
            .unwrap();
    }

    #[tokio::test]
    async fn test_signing_twice_reuses_hardware_key() {
        let idp = MockIdp::new();
        let env = idp.environment();
        let card = MockSigner::brainpool();
        let engine = PairingEngine::new(&env);
        let mut session = engine.create_pairing_session();

        engine
            .sign_pairing_session(&mut session, &card, &card.certificate())
            .await
            .unwrap();
        engine
            .sign_pairing_session(&mut session, &card, &card.certificate())
            .await
            .unwrap();

        assert_eq!(env.key_container.key_count(), 1);
    }

    #[tokio::test]
    async fn test_authentication_data_embeds_challenge() {
        let idp = MockIdp::new();
        let env = idp.environment();
        let card = MockSigner::brainpool();
        let engine = PairingEngine::new(&env);
        let mut session = engine.create_pairing_session();
        engine
            .sign_pairing_session(&mut session, &card, &card.certificate())
            .await
            .unwrap();
        let challenge = ChallengeEngine::new(&env).request_challenge(None).await.unwrap();

        let signed = engine.authentication_data(&challenge).await.unwrap();

        let data: AuthenticationData = signed.signed_authentication_data.claims().unwrap();
        assert_eq!(data.challenge_token, challenge.challenge.challenge.serialize());
        assert_eq!(data.key_identifier, base64url_encode(&session.key_identifier));
        assert_eq!(data.exp, challenge.expires_at.timestamp());
        assert_eq!(data.amr, BIOMETRIC_AMR.iter().map(ToString::to_string).collect::<Vec<_>>());
        assert_eq!(signed.original_challenge, challenge);
    }

    #[tokio::test]
    async fn test_missing_hardware_key_fails_authentication() {
        let idp = MockIdp::new();
        let env = idp.environment();
        let card = MockSigner::brainpool();
        let engine = PairingEngine::new(&env);
        let mut session = engine.create_pairing_session();
        engine
            .sign_pairing_session(&mut session, &card, &card.certificate())
            .await
            .unwrap();
        let tag = session.key_tag(&env.config.biometric_key_tag_prefix);
        env.key_container.delete(&tag).await.unwrap();
        let challenge = ChallengeEngine::new(&env).request_challenge(None).await.unwrap();

        let result = engine.authentication_data(&challenge).await;

        assert!(matches!(result, Err(IdpError::KeyContainer(_))));
    }
}
