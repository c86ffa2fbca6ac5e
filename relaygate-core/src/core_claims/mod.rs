//! Claim module
//!
//! Persistent eligibility claims and single-use invite codes.

pub mod error;
pub mod migrations;
pub mod store;

pub use error::{ClaimError, ClaimResult};
pub use store::{ClaimPolicy, ClaimStore, ClaimType, Invite, StoredClaim, INVITE_ALPHABET};
