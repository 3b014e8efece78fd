//! Storage implementations.
//!
//! - **Memory stores** - token/document/pairing slots with change streams,
//!   pending external authentication requests with atomic consumption
//! - **Profile locks** - per-profile exclusive sections

pub mod memory;
pub mod profile_locks;

// Re-exports
pub use memory::{MemoryExtAuthRequestStorage, MemoryIdpStorage};
pub use profile_locks::ProfileLocks;
