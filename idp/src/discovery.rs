//! Discovery document cache and validator.
//!
//! Every other engine starts by asking [`DiscoveryValidator::load`] for the
//! current document. A document is handed out only if
//!
//! 1. its JWT verifies against its own discovery key (brainpoolP256r1 only),
//! 2. `iat <= now < exp`, and
//! 3. the trust store accepts both the discovery key and the signing
//!    certificate.
//!
//! A cached document failing (2) or (3) is dropped and refetched. Fetches
//! are single-flight: concurrent cold-start callers wait for the first
//! fetch and then read its result from the cache.

use crate::environment::IdpEnvironment;
use crate::error::{IdpError, Result};
use crate::models::DiscoveryDocument;
use crate::providers::{CryptoPrimitives, IdpClient, IdpStorage, TrustStore};
use chrono::Utc;
use tracing::{debug, info, warn};
use url::Url;

/// Loads and validates the discovery document of one profile.
pub struct DiscoveryValidator<'a, C, P, T, S, K, E, D> {
    env: &'a IdpEnvironment<C, P, T, S, K, E, D>,
}

impl<'a, C, P, T, S, K, E, D> DiscoveryValidator<'a, C, P, T, S, K, E, D>
where
    C: IdpClient,
    P: CryptoPrimitives,
    T: TrustStore,
    S: IdpStorage,
{
    /// Create a validator over `env`.
    #[must_use]
    pub const fn new(env: &'a IdpEnvironment<C, P, T, S, K, E, D>) -> Self {
        Self { env }
    }

    /// Return a fully validated discovery document, fetching a fresh one if
    /// the cached copy is missing, expired or no longer trusted.
    ///
    /// # Errors
    ///
    /// - [`IdpError::InvalidDiscoveryDocument`] if the fetched document is
    ///   malformed, badly signed or outside its validity window
    /// - [`IdpError::UnsupportedCurve`] if it is signed with anything but
    ///   brainpoolP256r1
    /// - [`IdpError::TrustStore`] if a certificate is not trusted
    /// - [`IdpError::Network`] if the fetch fails
    pub async fn load(&self) -> Result<DiscoveryDocument> {
        if let Some(document) = self.usable_cached().await? {
            return Ok(document);
        }

        let _fetch = self.env.discovery_fetch.lock().await;

        // Another caller may have fetched while we waited
        if let Some(document) = self.usable_cached().await? {
            return Ok(document);
        }

        self.env.storage.set_discovery_document(None).await?;
        let document = self.fetch_and_validate().await?;
        self.env
            .storage
            .set_discovery_document(Some(document.clone()))
            .await?;

        info!(
            issuer = %document.payload.issuer,
            expires_at = %document.expires_at(),
            "Discovery document loaded"
        );
        Ok(document)
    }

    /// Drop the cached document; the next [`load`](Self::load) refetches.
    ///
    /// # Errors
    ///
    /// Returns [`IdpError::Storage`] if the cache cannot be cleared.
    pub async fn clear(&self) -> Result<()> {
        self.env.storage.set_discovery_document(None).await
    }

    async fn usable_cached(&self) -> Result<Option<DiscoveryDocument>> {
        let Some(document) = self.env.storage.discovery_document().await? else {
            return Ok(None);
        };
        if !document.is_valid(Utc::now()) {
            debug!(expires_at = %document.expires_at(), "Cached discovery document expired");
            return Ok(None);
        }
        match self.check_trust(&document).await {
            Ok(()) => Ok(Some(document)),
            Err(error) => {
                warn!(error = %error, "Cached discovery document no longer trusted");
                Ok(None)
            }
        }
    }

    async fn fetch_and_validate(&self) -> Result<DiscoveryDocument> {
        let url = Url::parse(&self.env.config.discovery_url)
            .map_err(|e| IdpError::Internal(format!("Invalid discovery URL: {e}")))?;

        let response = self
            .env
            .client
            .load_discovery_document(&url)
            .await
            .map_err(|error| match error {
                IdpError::Decoding(message) => IdpError::InvalidDiscoveryDocument(message),
                other => other,
            })?;

        let document = DiscoveryDocument::decode(&response, &self.env.crypto)?;
        document.verify_signature(&self.env.crypto)?;
        if !document.is_valid(Utc::now()) {
            return Err(IdpError::InvalidDiscoveryDocument(format!(
                "outside validity window [{}, {})",
                document.issued_at(),
                document.expires_at()
            )));
        }
        self.check_trust(&document).await?;
        Ok(document)
    }

    async fn check_trust(&self, document: &DiscoveryDocument) -> Result<()> {
        for (name, certificate) in [
            ("discovery key", &document.discovery_key),
            ("signing certificate", &document.signing_certificate),
        ] {
            let trusted = self
                .env
                .trust_store
                .validate(certificate)
                .await
                .map_err(|error| match error {
                    IdpError::TrustStore(message) => IdpError::TrustStore(message),
                    other => IdpError::TrustStore(other.to_string()),
                })?;
            if !trusted {
                return Err(IdpError::TrustStore(format!(
                    "{name} {} is not trusted",
                    certificate.serial_number
                )));
            }
        }
        Ok(())
    }
}
