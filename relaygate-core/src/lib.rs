//! relaygate-core
//!
//! Access control for a Nostr relay: an ordered chain of authorization
//! providers backed by a static whitelist, a claim store, a remote
//! authority and an encrypted roster kept in sync from gift-wrapped
//! events.

pub mod config;
pub mod core_acl;
pub mod core_backend;
pub mod core_claims;
pub mod core_crypto;
pub mod core_envelope;
pub mod core_event;
pub mod core_identity;
pub mod core_keys;
pub mod core_roster;
pub mod logging;
pub mod metrics;
pub mod shutdown;
pub mod test_utils;

pub use config::Config;
pub use core_acl::{AccessControl, AccessPolicy, AuthorizationChain, Rejection};
pub use core_identity::{Identity, Keys};
pub use logging::{init_logging, init_logging_with_config, LogConfig, LogLevel};
