//! Test utilities and helpers
//!
//! Fixtures for building real key-share, roster-update and join events,
//! plus scripted stand-ins for the remote authority and event sources.

pub mod fixtures;
pub mod mocks;

pub use fixtures::*;
pub use mocks::*;
