//! Protocol data model.
//!
//! Wire shapes follow the IDP's JSON claim names; Rust field names are
//! snake case with serde renames where the two differ.

pub mod challenge;
pub mod discovery;
pub mod ext_auth;
pub mod pairing;
pub mod token;

pub use challenge::{
    ChallengeClaims, ChallengeContext, ChallengeSession, ExchangeToken, IdpChallenge,
    SignedChallenge, UserConsent,
};
pub use discovery::{DiscoveryDocument, DiscoveryDocumentPayload, DiscoveryDocumentResponse};
pub use ext_auth::{ExtAuthChallengeSession, ExtAuthRequest, ExtAuthVerify, KkAppDirectory, KkAppEntry};
pub use pairing::{
    AuthenticationData, DeviceInformation, DeviceType, PairingData, PairingEntries, PairingEntry,
    PairingSession, RegistrationData, SignedAuthenticationData,
};
pub use token::{IdTokenPayload, IdpToken, TokenResponse};
