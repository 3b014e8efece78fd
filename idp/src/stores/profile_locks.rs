//! Per-profile critical sections.

use crate::state::ProfileId;
use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError};
use tokio::sync::OwnedMutexGuard;

/// One async mutex per profile.
///
/// Token refresh/invalidation and pairing sign/abort/authentication all
/// read or write the same certificate and key identifier slots. Each of
/// those operations holds the profile's guard for its whole duration, so a
/// refresh never interleaves with a pairing abort on the same profile.
/// Different profiles never contend.
#[derive(Clone, Debug, Default)]
pub struct ProfileLocks {
    locks: Arc<Mutex<HashMap<ProfileId, Arc<tokio::sync::Mutex<()>>>>>,
}

impl ProfileLocks {
    /// Create an empty lock table.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Wait for exclusive access to `profile`.
    pub async fn lock(&self, profile: ProfileId) -> OwnedMutexGuard<()> {
        let mutex = {
            let mut locks = self.locks.lock().unwrap_or_else(PoisonError::into_inner);
            Arc::clone(locks.entry(profile).or_default())
        };
        mutex.lock_owned().await
    }

    /// Try to take the profile lock without waiting.
    #[must_use]
    pub fn try_lock(&self, profile: ProfileId) -> Option<OwnedMutexGuard<()>> {
        let mutex = {
            let mut locks = self.locks.lock().unwrap_or_else(PoisonError::into_inner);
            Arc::clone(locks.entry(profile).or_default())
        };
        mutex.try_lock_owned().ok()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_same_profile_is_exclusive() {
        let locks = ProfileLocks::new();
        let profile = ProfileId::new();

        let guard = locks.lock(profile).await;
        assert!(locks.try_lock(profile).is_none());
        drop(guard);
        assert!(locks.try_lock(profile).is_some());
    }

    #[tokio::test]
    async fn test_profiles_do_not_contend() {
        let locks = ProfileLocks::new();
        let _first = locks.lock(ProfileId::new()).await;
        assert!(locks.try_lock(ProfileId::new()).is_some());
    }
}
