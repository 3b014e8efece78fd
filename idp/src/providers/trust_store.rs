//! Trust anchor validation.

use crate::crypto::X509Certificate;
use crate::error::Result;
use std::future::Future;

/// Validates IDP certificates against the telematics infrastructure trust
/// anchors.
///
/// Implementations typically check the chain, validity period and OCSP
/// status; all of that is opaque here.
pub trait TrustStore: Send + Sync {
    /// `Ok(true)` if `certificate` chains to a trust anchor.
    ///
    /// # Errors
    ///
    /// Returns [`IdpError::TrustStore`](crate::error::IdpError::TrustStore) if
    /// the store itself is unavailable.
    fn validate(
        &self,
        certificate: &X509Certificate,
    ) -> impl Future<Output = Result<bool>> + Send;
}
