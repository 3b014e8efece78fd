//! Biometric device pairing models.

use super::ChallengeSession;
use crate::crypto::{Jwt, X509Certificate, base64url_encode};
use crate::error::Result;
use serde::{Deserialize, Serialize};

/// Version tag of pairing and authentication payloads.
pub const PAYLOAD_VERSION: &str = "1.0";

/// Authentication methods claimed by a biometric login.
pub const BIOMETRIC_AMR: [&str; 3] = ["mfa", "hwk", "generic-biometric"];

/// Hardware and OS description of a device.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeviceType {
    /// Product name.
    pub product: String,

    /// Model identifier.
    pub model: String,

    /// Operating system name.
    pub os: String,

    /// Operating system version.
    pub os_version: String,

    /// Manufacturer.
    pub manufacturer: String,
}

/// Device metadata attached to registrations and biometric logins.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeviceInformation {
    /// User-visible device name.
    pub name: String,

    /// Hardware and OS description.
    pub device_type: DeviceType,
}

/// A device pairing in progress.
///
/// Created by
/// [`PairingEngine::create_pairing_session`](crate::pairing::PairingEngine::create_pairing_session)
/// without touching hardware key storage. It ends either in
/// [`RegistrationData`] or in an abort; there is no third outcome.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PairingSession {
    /// Random 32 byte key identifier.
    pub key_identifier: Vec<u8>,

    /// Metadata of this device.
    pub device_information: DeviceInformation,

    /// Health card certificate, set once the session is signed.
    pub certificate: Option<X509Certificate>,
}

impl PairingSession {
    /// Tag of the hardware key bound to this session.
    #[must_use]
    pub fn key_tag(&self, prefix: &str) -> String {
        key_tag(prefix, &self.key_identifier)
    }
}

/// Stable hardware key tag for a key identifier.
#[must_use]
pub fn key_tag(prefix: &str, key_identifier: &[u8]) -> String {
    format!("{prefix}.{}", base64url_encode(key_identifier))
}

/// Claims binding a hardware key to a health card identity.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PairingData {
    /// Payload version.
    pub pairing_data_version: String,

    /// `SubjectPublicKeyInfo` of the hardware key (base64url DER).
    pub se_subject_public_key_info: String,

    /// Key identifier (base64url).
    pub key_identifier: String,

    /// Device product name.
    pub product: String,

    /// Health card certificate serial number.
    pub serialnumber: String,

    /// Health card certificate issuer (base64url DER).
    pub issuer: String,

    /// Health card certificate expiry (seconds since epoch).
    pub not_after: i64,

    /// `SubjectPublicKeyInfo` of the health card certificate (base64url DER).
    pub auth_cert_subject_public_key_info: String,
}

/// Signed registration payload submitted once to the pairing endpoint.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RegistrationData {
    /// Health card certificate (standard base64 DER).
    pub auth_cert: String,

    /// Card-signed [`PairingData`].
    pub signed_pairing_data: Jwt,

    /// Metadata of the registering device.
    pub device_information: DeviceInformation,
}

/// Per-login biometric payload, signed with the hardware key.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuthenticationData {
    /// Payload version.
    pub authentication_data_version: String,

    /// Health card certificate used at pairing time (standard base64 DER).
    pub auth_cert: String,

    /// The challenge token this login answers.
    pub challenge_token: String,

    /// Metadata of this device.
    pub device_information: DeviceInformation,

    /// Authentication methods.
    pub amr: Vec<String>,

    /// Key identifier (base64url).
    pub key_identifier: String,

    /// Expiry, copied from the challenge (seconds since epoch).
    pub exp: i64,
}

/// Hardware-signed authentication data bound to one challenge session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SignedAuthenticationData {
    /// The session the signature answers.
    pub original_challenge: ChallengeSession,

    /// `ES256` token over [`AuthenticationData`].
    pub signed_authentication_data: Jwt,
}

/// A registered device as listed by the pairing endpoint.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PairingEntry {
    /// Device name.
    pub name: String,

    /// Registration time (seconds since epoch).
    pub creation_time: i64,

    /// Card-signed pairing data submitted at registration.
    pub signed_pairing_data: Jwt,

    /// Entry version.
    #[serde(default)]
    pub pairing_entry_version: Option<String>,
}

impl PairingEntry {
    /// Decode the registered pairing data.
    ///
    /// # Errors
    ///
    /// Returns [`IdpError::Decoding`](crate::error::IdpError::Decoding) if the
    /// payload is malformed.
    pub fn pairing_data(&self) -> Result<PairingData> {
        self.signed_pairing_data.claims()
    }
}

/// Registered devices of an insurant.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct PairingEntries {
    /// The entries.
    #[serde(default)]
    pub pairing_entries: Vec<PairingEntry>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_key_tag_is_stable() {
        let a = key_tag("prefix", &[1, 2, 3]);
        assert_eq!(a, "prefix.AQID");
        assert_eq!(a, key_tag("prefix", &[1, 2, 3]));
        assert_ne!(a, key_tag("prefix", &[1, 2, 4]));
    }
}
