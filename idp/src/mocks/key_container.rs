//! Mock secure element.

use super::MockCrypto;
use crate::crypto::EcCurve;
use crate::error::{IdpError, Result};
use crate::providers::{KeyContainer, SecureKey};
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError};

/// In-memory key container creating P-256 mock keys.
#[derive(Debug, Clone, Default)]
pub struct MockKeyContainer {
    keys: Arc<Mutex<HashMap<String, SecureKey>>>,
    fail_deletes: Arc<AtomicBool>,
    decline_signing: Arc<AtomicBool>,
}

impl MockKeyContainer {
    /// Create an empty container.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// `true` if a key is stored under `tag`.
    #[must_use]
    pub fn contains(&self, tag: &str) -> bool {
        self.keys
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .contains_key(tag)
    }

    /// Number of stored keys.
    #[must_use]
    pub fn key_count(&self) -> usize {
        self.keys.lock().unwrap_or_else(PoisonError::into_inner).len()
    }

    /// Make every deletion fail (keys stay in place).
    pub fn set_fail_deletes(&self, fail: bool) {
        self.fail_deletes.store(fail, Ordering::SeqCst);
    }

    /// Simulate the user declining the biometric prompt.
    pub fn set_decline_signing(&self, decline: bool) {
        self.decline_signing.store(decline, Ordering::SeqCst);
    }
}

impl KeyContainer for MockKeyContainer {
    async fn find(&self, tag: &str) -> Result<Option<SecureKey>> {
        Ok(self
            .keys
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(tag)
            .cloned())
    }

    async fn create(&self, tag: &str) -> Result<SecureKey> {
        let public_key = MockCrypto::new().generate_key(EcCurve::P256);
        let key = SecureKey {
            tag: tag.to_string(),
            subject_public_key_info: MockCrypto::subject_public_key_info(&public_key),
            public_key,
        };
        self.keys
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(tag.to_string(), key.clone());
        Ok(key)
    }

    async fn delete(&self, tag: &str) -> Result<bool> {
        if self.fail_deletes.load(Ordering::SeqCst) {
            return Err(IdpError::KeyContainer(format!("cannot delete {tag}")));
        }
        Ok(self
            .keys
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(tag)
            .is_some())
    }

    async fn sign(&self, tag: &str, message: &[u8]) -> Result<Vec<u8>> {
        if self.decline_signing.load(Ordering::SeqCst) {
            return Err(IdpError::KeyContainer("user declined".to_string()));
        }
        let key = self
            .keys
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(tag)
            .cloned()
            .ok_or_else(|| IdpError::KeyContainer(format!("no key under {tag}")))?;
        Ok(MockCrypto::signature(&key.public_key, message))
    }
}
