//! Collaborator interfaces.
//!
//! This module defines traits for every external dependency of the IDP
//! core: the IDP itself, crypto primitives, the trust store, the secure
//! element, persistence and device metadata. The engines depend only on
//! these traits.
//!
//! This enables:
//! - **Testing**: use [`crate::mocks`] (in-memory, deterministic)
//! - **Production**: use [`HttpIdpClient`] and platform crypto/keychain
//!   bindings

pub mod crypto;
pub mod device_info;
pub mod http;
pub mod idp_client;
pub mod key_container;
pub mod signer;
pub mod storage;
pub mod trust_store;

pub use crypto::{CryptoPrimitives, KeyAgreement};
pub use device_info::{DeviceInfoProvider, StaticDeviceInfo};
pub use http::HttpIdpClient;
pub use idp_client::{ChallengeRequest, IdpClient, KeyVerifier, TokenRequest};
pub use key_container::{EnclaveSigner, KeyContainer, SecureKey};
pub use signer::JwtSigner;
pub use storage::{ExtAuthRequestStorage, IdpStorage};
pub use trust_store::TrustStore;
