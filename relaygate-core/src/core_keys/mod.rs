//! Shared key module

pub mod registry;

pub use registry::{SharedKeyRegistry, PRIVKEY_TAG};
