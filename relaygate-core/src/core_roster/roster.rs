/*
    roster.rs - Live membership roster

    RosterState is the plain data: the member set plus the watermark, the
    timestamp of the newest roster update already incorporated. Roster wraps
    it in a read/write lock and is what the authorization path reads.

    Updates are applied only when strictly newer than the watermark, and
    applying one moves the watermark to its timestamp. `observe` lets the
    synchronizer advance the watermark past events it could not decrypt; the
    watermark never moves backward.
*/

use crate::core_event::{kinds, Event, Timestamp};
use crate::core_identity::Identity;
use std::collections::BTreeSet;
use std::sync::{PoisonError, RwLock};

/// Tag carrying the operation of a roster update
pub const OP_TAG: &str = "op";

/// Roster operation carried by an update rumor
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RosterOp {
    /// Replace the roster with the listed identities
    Set,
    /// Grant membership to the listed identities
    Add,
    /// Revoke membership from the listed identities
    Remove,
}

impl RosterOp {
    /// Parse an `op` tag value; anything unrecognized (or absent) means add
    pub fn parse(value: Option<&str>) -> Self {
        match value {
            Some("set") => RosterOp::Set,
            Some("remove") => RosterOp::Remove,
            _ => RosterOp::Add,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            RosterOp::Set => "set",
            RosterOp::Add => "add",
            RosterOp::Remove => "remove",
        }
    }
}

/// A decoded roster-update rumor
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RosterUpdate {
    pub op: RosterOp,
    pub targets: Vec<Identity>,
    pub created_at: Timestamp,
}

impl RosterUpdate {
    pub fn new(op: RosterOp, targets: Vec<Identity>, created_at: Timestamp) -> Self {
        Self { op, targets, created_at }
    }

    /// Decode a roster-update rumor; other kinds yield `None`
    pub fn from_rumor(rumor: &Event) -> Option<Self> {
        if rumor.kind != kinds::ROSTER_UPDATE {
            return None;
        }

        Some(Self {
            op: RosterOp::parse(rumor.first_tag_value(OP_TAG)),
            targets: rumor.recipients().collect(),
            created_at: rumor.created_at,
        })
    }
}

/// Member set and watermark
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RosterState {
    members: BTreeSet<Identity>,
    watermark: Timestamp,
}

impl RosterState {
    pub fn new() -> Self {
        Self::default()
    }

    /// Apply `update` if it is newer than the watermark
    pub fn apply(&mut self, update: &RosterUpdate) -> bool {
        if update.created_at <= self.watermark {
            return false;
        }

        match update.op {
            RosterOp::Set => {
                self.members = update.targets.iter().cloned().collect();
            }
            RosterOp::Add => {
                self.members.extend(update.targets.iter().cloned());
            }
            RosterOp::Remove => {
                for target in &update.targets {
                    self.members.remove(target);
                }
            }
        }

        self.watermark = update.created_at;
        true
    }

    /// Move the watermark forward to `seen`, never backward
    pub fn observe(&mut self, seen: Timestamp) {
        self.watermark = self.watermark.max(seen);
    }

    pub fn is_member(&self, identity: &Identity) -> bool {
        self.members.contains(identity)
    }

    pub fn members(&self) -> impl Iterator<Item = &Identity> {
        self.members.iter()
    }

    pub fn len(&self) -> usize {
        self.members.len()
    }

    pub fn is_empty(&self) -> bool {
        self.members.is_empty()
    }

    pub fn watermark(&self) -> Timestamp {
        self.watermark
    }
}

/// Shared, lock-guarded roster
#[derive(Debug, Default)]
pub struct Roster {
    state: RwLock<RosterState>,
}

impl Roster {
    pub fn new() -> Self {
        Self::default()
    }

    /// Whether `identity` is currently a member
    pub fn is_member(&self, identity: &Identity) -> bool {
        self.state.read().unwrap_or_else(PoisonError::into_inner).is_member(identity)
    }

    /// Current members in canonical order
    pub fn members(&self) -> Vec<Identity> {
        self.state.read().unwrap_or_else(PoisonError::into_inner).members().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.state.read().unwrap_or_else(PoisonError::into_inner).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn watermark(&self) -> Timestamp {
        self.state.read().unwrap_or_else(PoisonError::into_inner).watermark()
    }

    /// Copy of the current state
    pub fn snapshot(&self) -> RosterState {
        self.state.read().unwrap_or_else(PoisonError::into_inner).clone()
    }

    /// Mutate the state under the write lock
    pub fn update<R>(&self, f: impl FnOnce(&mut RosterState) -> R) -> R {
        let mut state = self.state.write().unwrap_or_else(PoisonError::into_inner);
        let result = f(&mut state);
        metrics::gauge!("roster.members").set(state.len() as f64);
        result
    }

    /// Swap in a rebuilt state; the watermark is kept if it was further ahead
    pub fn replace(&self, mut rebuilt: RosterState) {
        self.update(|state| {
            rebuilt.observe(state.watermark);
            *state = rebuilt;
        });
    }
}
