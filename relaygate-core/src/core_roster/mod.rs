//! Roster module
//!
//! The live membership roster and the synchronizer that keeps it current
//! from encrypted roster-update envelopes.

pub mod roster;
pub mod synchronizer;
pub mod task;

pub use roster::{Roster, RosterOp, RosterState, RosterUpdate, OP_TAG};
pub use synchronizer::{IngestOutcome, RosterSynchronizer, SyncReport};
pub use task::spawn_sync_loop;
