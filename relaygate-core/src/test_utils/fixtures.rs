//! Test fixtures for creating common test objects
//!
//! Every builder produces real events: rumors are hashed, joins are
//! signed, and wrappers go through the actual sealing path.

use crate::core_crypto::Scheme;
use crate::core_envelope::wrap;
use crate::core_event::{kinds, Event, EventBuilder, Timestamp};
use crate::core_identity::{Identity, Keys};
use crate::core_keys::PRIVKEY_TAG;
use crate::core_roster::{RosterOp, OP_TAG};
use std::path::{Path, PathBuf};

/// Generate `n` fresh keypairs
pub fn test_keys(n: usize) -> Vec<Keys> {
    (0..n).map(|_| Keys::generate()).collect()
}

/// Key-share rumor from `author` handing out `shared`
pub fn key_share_rumor(author: &Keys, shared: &Keys, created_at: u64) -> Event {
    EventBuilder::new(kinds::KEY_SHARE, "")
        .tag(PRIVKEY_TAG, &shared.secret_hex())
        .created_at(Timestamp::from_secs(created_at))
        .into_rumor(author.identity())
        .expect("key-share rumor")
}

/// Builder for roster-update rumors
pub struct TestRosterUpdateBuilder {
    op: Option<String>,
    targets: Vec<Identity>,
    created_at: u64,
}

impl TestRosterUpdateBuilder {
    pub fn new(op: RosterOp) -> Self {
        Self { op: Some(op.as_str().to_string()), targets: Vec::new(), created_at: 1 }
    }

    /// Use a raw `op` tag value, or none at all
    pub fn raw_op(mut self, op: Option<&str>) -> Self {
        self.op = op.map(str::to_string);
        self
    }

    pub fn target(mut self, identity: &Identity) -> Self {
        self.targets.push(identity.clone());
        self
    }

    pub fn targets<'a>(mut self, identities: impl IntoIterator<Item = &'a Identity>) -> Self {
        self.targets.extend(identities.into_iter().cloned());
        self
    }

    pub fn created_at(mut self, secs: u64) -> Self {
        self.created_at = secs;
        self
    }

    pub fn build(self, author: &Keys) -> Event {
        let mut builder = EventBuilder::new(kinds::ROSTER_UPDATE, "")
            .created_at(Timestamp::from_secs(self.created_at));
        if let Some(op) = &self.op {
            builder = builder.tag(OP_TAG, op);
        }
        for target in &self.targets {
            builder = builder.tag("p", target.as_str());
        }
        builder.into_rumor(author.identity()).expect("roster rumor")
    }
}

/// Roster-update rumor with `op` over `targets`
pub fn roster_rumor(author: &Keys, op: RosterOp, targets: &[&Identity], created_at: u64) -> Event {
    TestRosterUpdateBuilder::new(op)
        .targets(targets.iter().copied())
        .created_at(created_at)
        .build(author)
}

/// Signed join request of `kind` carrying `claim`
pub fn join_event(author: &Keys, kind: u16, claim: &str) -> Event {
    EventBuilder::new(kind, "").tag("claim", claim).sign(author).expect("join event")
}

/// Seal and wrap `rumor` for `recipient` with the current scheme
pub fn wrap_for(author: &Keys, rumor: &Event, recipient: &Identity) -> Event {
    wrap_with(author, rumor, recipient, Scheme::Current)
}

/// Seal and wrap `rumor` for `recipient` with `scheme`
pub fn wrap_with(author: &Keys, rumor: &Event, recipient: &Identity, scheme: Scheme) -> Event {
    wrap(author, rumor, recipient, scheme).expect("wrap rumor")
}

/// Write `events` as a JSON-lines file under `dir`
pub fn write_jsonl(dir: &Path, name: &str, events: &[Event]) -> PathBuf {
    let path = dir.join(name);
    let lines: Vec<String> = events.iter().map(|e| e.to_json().expect("event json")).collect();
    std::fs::write(&path, lines.join("\n") + "\n").expect("write jsonl");
    path
}
