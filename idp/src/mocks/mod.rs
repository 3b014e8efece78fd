//! Mock provider implementations for testing.
//!
//! This module provides deterministic, in-memory implementations of every
//! provider trait plus [`MockIdp`], a complete in-process IDP. None of them
//! does real elliptic curve math: "signatures" and "shared secrets" are
//! hashes over the public key, so they are only meaningful between mocks.

#![allow(clippy::expect_used)]

pub mod crypto;
pub mod idp;
pub mod key_container;
pub mod signer;
pub mod trust_store;

pub use crypto::MockCrypto;
pub use idp::{MockEnvironment, MockIdp, mock_device_information};
pub use key_container::MockKeyContainer;
pub use signer::MockSigner;
pub use trust_store::MockTrustStore;
