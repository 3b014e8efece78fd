//! Mock trust store.

use crate::crypto::X509Certificate;
use crate::error::Result;
use crate::providers::TrustStore;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

/// Trust store that accepts or rejects everything; clones share the switch.
#[derive(Debug, Clone)]
pub struct MockTrustStore {
    accepting: Arc<AtomicBool>,
}

impl MockTrustStore {
    /// Trust every certificate.
    #[must_use]
    pub fn accepting() -> Self {
        Self {
            accepting: Arc::new(AtomicBool::new(true)),
        }
    }

    /// Trust no certificate.
    #[must_use]
    pub fn rejecting() -> Self {
        Self {
            accepting: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Flip the switch for this store and all its clones.
    pub fn set_accepting(&self, accepting: bool) {
        self.accepting.store(accepting, Ordering::SeqCst);
    }
}

impl Default for MockTrustStore {
    fn default() -> Self {
        Self::accepting()
    }
}

impl TrustStore for MockTrustStore {
    async fn validate(&self, _certificate: &X509Certificate) -> Result<bool> {
        Ok(self.accepting.load(Ordering::SeqCst))
    }
}
