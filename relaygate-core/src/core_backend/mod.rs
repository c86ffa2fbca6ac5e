//! Backend delegate module
//!
//! Access decisions delegated to a remote HTTP authority, cached per
//! identity for a fixed TTL.

pub mod authority;
pub mod cache;

pub use authority::{BackendError, HttpRemoteAuthority, RemoteAuthority};
pub use cache::{BackendDecision, BackendDelegateCache, DEFAULT_TTL};
