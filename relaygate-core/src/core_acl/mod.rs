//! Access control module
//!
//! The authorization chain and the relay-facing policy hooks built on it.

pub mod chain;
pub mod control;
pub mod error;
pub mod provider;

pub use chain::AuthorizationChain;
pub use control::{AccessControl, AccessPolicy, IncomingOutcome, Rejection};
pub use error::AclError;
pub use provider::{AccessProvider, Whitelist};
