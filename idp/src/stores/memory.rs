//! In-memory stores.
//!
//! Suitable for tests and for hosts that persist snapshots themselves by
//! observing the change streams.

use crate::crypto::X509Certificate;
use crate::error::Result;
use crate::models::{DiscoveryDocument, ExtAuthChallengeSession, IdpToken};
use crate::providers::{ExtAuthRequestStorage, IdpStorage};
use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError};
use tokio::sync::watch;

/// In-memory [`IdpStorage`] for one profile.
///
/// Every slot is a `watch` channel, so readers of the change streams see
/// every overwrite and clear. Clones share the same slots.
#[derive(Clone, Debug)]
pub struct MemoryIdpStorage {
    token: Arc<watch::Sender<Option<IdpToken>>>,
    discovery_document: Arc<watch::Sender<Option<DiscoveryDocument>>>,
    certificate: Arc<watch::Sender<Option<X509Certificate>>>,
    key_identifier: Arc<watch::Sender<Option<Vec<u8>>>>,
}

impl MemoryIdpStorage {
    /// Create empty storage.
    #[must_use]
    pub fn new() -> Self {
        Self {
            token: Arc::new(watch::channel(None).0),
            discovery_document: Arc::new(watch::channel(None).0),
            certificate: Arc::new(watch::channel(None).0),
            key_identifier: Arc::new(watch::channel(None).0),
        }
    }
}

impl Default for MemoryIdpStorage {
    fn default() -> Self {
        Self::new()
    }
}

impl IdpStorage for MemoryIdpStorage {
    async fn token(&self) -> Result<Option<IdpToken>> {
        Ok(self.token.borrow().clone())
    }

    async fn set_token(&self, token: Option<IdpToken>) -> Result<()> {
        self.token.send_replace(token);
        Ok(())
    }

    fn token_changes(&self) -> watch::Receiver<Option<IdpToken>> {
        self.token.subscribe()
    }

    async fn discovery_document(&self) -> Result<Option<DiscoveryDocument>> {
        Ok(self.discovery_document.borrow().clone())
    }

    async fn set_discovery_document(&self, document: Option<DiscoveryDocument>) -> Result<()> {
        self.discovery_document.send_replace(document);
        Ok(())
    }

    async fn certificate(&self) -> Result<Option<X509Certificate>> {
        Ok(self.certificate.borrow().clone())
    }

    async fn set_certificate(&self, certificate: Option<X509Certificate>) -> Result<()> {
        self.certificate.send_replace(certificate);
        Ok(())
    }

    fn certificate_changes(&self) -> watch::Receiver<Option<X509Certificate>> {
        self.certificate.subscribe()
    }

    async fn key_identifier(&self) -> Result<Option<Vec<u8>>> {
        Ok(self.key_identifier.borrow().clone())
    }

    async fn set_key_identifier(&self, key_identifier: Option<Vec<u8>>) -> Result<()> {
        self.key_identifier.send_replace(key_identifier);
        Ok(())
    }
}

/// In-memory [`ExtAuthRequestStorage`].
#[derive(Clone, Debug, Default)]
pub struct MemoryExtAuthRequestStorage {
    requests: Arc<Mutex<HashMap<String, ExtAuthChallengeSession>>>,
}

impl MemoryExtAuthRequestStorage {
    /// Create an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

impl ExtAuthRequestStorage for MemoryExtAuthRequestStorage {
    async fn insert(&self, state: String, session: ExtAuthChallengeSession) -> Result<()> {
        self.requests
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(state, session);
        Ok(())
    }

    async fn take(&self, state: &str) -> Result<Option<ExtAuthChallengeSession>> {
        // Atomic get-and-remove
        Ok(self
            .requests
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(state))
    }

    async fn pending(&self) -> Result<usize> {
        Ok(self.requests.lock().unwrap_or_else(PoisonError::into_inner).len())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::KkAppEntry;

    fn session(state: &str) -> ExtAuthChallengeSession {
        ExtAuthChallengeSession {
            verifier_code: "verifier".to_string(),
            nonce: "nonce".to_string(),
            state: state.to_string(),
            redirect: "https://redirect.example".to_string(),
            entry: KkAppEntry {
                kk_app_name: "KK".to_string(),
                kk_app_id: "kk".to_string(),
                kk_app_gid: false,
                kk_app_pkv: false,
            },
        }
    }

    #[tokio::test]
    async fn test_take_consumes_once() {
        let store = MemoryExtAuthRequestStorage::new();
        store.insert("s1".to_string(), session("s1")).await.unwrap();

        assert_eq!(store.take("s1").await.unwrap(), Some(session("s1")));
        assert_eq!(store.take("s1").await.unwrap(), None);
        assert_eq!(store.pending().await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_concurrent_take_yields_single_winner() {
        let store = MemoryExtAuthRequestStorage::new();
        store.insert("s1".to_string(), session("s1")).await.unwrap();

        let handles: Vec<_> = (0..8)
            .map(|_| {
                let store = store.clone();
                tokio::spawn(async move { store.take("s1").await.unwrap() })
            })
            .collect();
        let mut winners = 0;
        for handle in handles {
            if handle.await.unwrap().is_some() {
                winners += 1;
            }
        }
        assert_eq!(winners, 1);
    }

    #[tokio::test]
    async fn test_token_changes_are_observable() {
        let storage = MemoryIdpStorage::new();
        let mut changes = storage.token_changes();
        storage.set_key_identifier(Some(vec![1, 2])).await.unwrap();
        assert_eq!(storage.key_identifier().await.unwrap(), Some(vec![1, 2]));

        storage.set_token(None).await.unwrap();
        assert!(changes.has_changed().unwrap());
        assert!(changes.borrow_and_update().is_none());
    }
}
