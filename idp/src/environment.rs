//! IDP environment.
//!
//! This module defines the environment type for dependency injection into
//! the engines. One environment serves exactly one profile.

use crate::config::IdpConfig;
use crate::providers::{
    CryptoPrimitives, DeviceInfoProvider, ExtAuthRequestStorage, IdpClient, IdpStorage,
    KeyContainer, TrustStore,
};
use crate::state::ProfileId;
use crate::stores::ProfileLocks;
use std::sync::Arc;
use std::sync::atomic::AtomicBool;

/// IDP environment.
///
/// Contains all collaborators the engines need.
///
/// # Type Parameters
///
/// - `C`: IDP client
/// - `P`: Crypto primitives
/// - `T`: Trust store
/// - `S`: Token/document/pairing storage of this profile
/// - `K`: Hardware key container
/// - `E`: External authentication request storage
/// - `D`: Device metadata provider
#[derive(Clone)]
pub struct IdpEnvironment<C, P, T, S, K, E, D> {
    /// Client configuration.
    pub config: IdpConfig,

    /// Profile this environment belongs to.
    pub profile: ProfileId,

    /// IDP client.
    pub client: C,

    /// Crypto primitives.
    pub crypto: P,

    /// Trust store.
    pub trust_store: T,

    /// Storage of this profile.
    pub storage: S,

    /// Hardware key container.
    pub key_container: K,

    /// Pending external authentication requests.
    pub ext_auth_requests: E,

    /// Device metadata.
    pub device_info: D,

    /// Per-profile exclusive sections, shared across environments.
    pub profile_locks: ProfileLocks,

    /// Serializes discovery document fetches.
    pub(crate) discovery_fetch: Arc<tokio::sync::Mutex<()>>,

    /// Set while the token is being invalidated.
    pub(crate) invalidating: Arc<AtomicBool>,
}

impl<C, P, T, S, K, E, D> IdpEnvironment<C, P, T, S, K, E, D>
where
    C: IdpClient + Clone,
    P: CryptoPrimitives + Clone,
    T: TrustStore + Clone,
    S: IdpStorage + Clone,
    K: KeyContainer + Clone,
    E: ExtAuthRequestStorage + Clone,
    D: DeviceInfoProvider + Clone,
{
    /// Create a new IDP environment with its own lock table.
    #[must_use]
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        config: IdpConfig,
        profile: ProfileId,
        client: C,
        crypto: P,
        trust_store: T,
        storage: S,
        key_container: K,
        ext_auth_requests: E,
        device_info: D,
    ) -> Self {
        Self {
            config,
            profile,
            client,
            crypto,
            trust_store,
            storage,
            key_container,
            ext_auth_requests,
            device_info,
            profile_locks: ProfileLocks::new(),
            discovery_fetch: Arc::new(tokio::sync::Mutex::new(())),
            invalidating: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Share a lock table with other environments (other sessions of the
    /// same profile must use the same table).
    #[must_use]
    pub fn with_profile_locks(mut self, profile_locks: ProfileLocks) -> Self {
        self.profile_locks = profile_locks;
        self
    }
}
