/*
    event.rs - Signed events, rumors and tags

    Defines:
    - Timestamps (unix seconds)
    - Event kinds understood by the access engine
    - Event / Tag types with canonical id computation
    - BIP-340 signing and verification

    A rumor is an Event without a signature; seals and wrappers are signed.
*/

use crate::core_identity::{Identity, Keys};
use secp256k1::{schnorr, Keypair, Message, XOnlyPublicKey, SECP256K1};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::fmt;
use std::time::{SystemTime, UNIX_EPOCH};
use thiserror::Error;

/// Event kinds recognized by the engine
pub mod kinds {
    /// Seal: middle layer of a wrapped envelope
    pub const SEAL: u16 = 13;
    /// Key-share rumor carrying a `privkey` tag
    pub const KEY_SHARE: u16 = 24;
    /// Roster-update rumor carrying `op` and `p` tags
    pub const ROSTER_UPDATE: u16 = 27;
    /// Wrapper using the current (NIP-44) scheme
    pub const WRAP_CURRENT: u16 = 1059;
    /// Wrapper using the legacy (NIP-04) scheme
    pub const WRAP_LEGACY: u16 = 1060;
    /// Group join request
    pub const GROUP_JOIN: u16 = 9021;
    /// Relay join request
    pub const RELAY_JOIN: u16 = 28934;
    /// Invite issued by the relay
    pub const RELAY_INVITE: u16 = 28935;

    /// All recognized wrapper kinds
    pub const WRAPPERS: [u16; 2] = [WRAP_CURRENT, WRAP_LEGACY];

    /// All join-request kinds
    pub const JOINS: [u16; 2] = [RELAY_JOIN, GROUP_JOIN];

    /// Whether `kind` is a wrapper kind
    pub fn is_wrapper(kind: u16) -> bool {
        WRAPPERS.contains(&kind)
    }

    /// Whether `kind` is a join-request kind
    pub fn is_join(kind: u16) -> bool {
        JOINS.contains(&kind)
    }
}

/// Event errors
#[derive(Debug, Error)]
pub enum EventError {
    #[error("Invalid event JSON: {0}")]
    Json(String),

    #[error("Event id does not match its content")]
    IdMismatch,

    #[error("Event is not signed")]
    MissingSignature,

    #[error("Invalid signature: {0}")]
    InvalidSignature(String),
}

impl From<serde_json::Error> for EventError {
    fn from(e: serde_json::Error) -> Self {
        EventError::Json(e.to_string())
    }
}

/// Unix timestamp in seconds
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
#[serde(transparent)]
pub struct Timestamp(pub u64);

impl Timestamp {
    /// Current wall-clock time
    pub fn now() -> Self {
        let secs = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_secs())
            .unwrap_or_default();
        Timestamp(secs)
    }

    /// Create a timestamp from seconds since epoch
    pub fn from_secs(secs: u64) -> Self {
        Timestamp(secs)
    }

    /// Seconds since epoch
    pub fn as_secs(&self) -> u64 {
        self.0
    }
}

impl fmt::Display for Timestamp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// A single tag: `[name, value, ...]`
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Tag(pub Vec<String>);

impl Tag {
    /// Build a two-element tag
    pub fn new(name: &str, value: &str) -> Self {
        Tag(vec![name.to_string(), value.to_string()])
    }

    /// Tag name (first element)
    pub fn name(&self) -> Option<&str> {
        self.0.first().map(String::as_str)
    }

    /// Tag value (second element)
    pub fn value(&self) -> Option<&str> {
        self.0.get(1).map(String::as_str)
    }
}

/// A Nostr-style event: wrapper, seal or rumor
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Event {
    /// Hex SHA-256 of the canonical serialization
    #[serde(default)]
    pub id: String,

    /// Author identity
    pub pubkey: Identity,

    /// Creation time
    pub created_at: Timestamp,

    /// Event kind
    pub kind: u16,

    #[serde(default)]
    pub tags: Vec<Tag>,

    #[serde(default)]
    pub content: String,

    /// Schnorr signature; absent on rumors
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sig: Option<String>,
}

impl Event {
    /// Parse an event from JSON
    pub fn from_json(json: &str) -> Result<Self, EventError> {
        Ok(serde_json::from_str(json)?)
    }

    /// Parse an event from JSON bytes
    pub fn from_slice(bytes: &[u8]) -> Result<Self, EventError> {
        Ok(serde_json::from_slice(bytes)?)
    }

    /// Serialize to compact JSON
    pub fn to_json(&self) -> Result<String, EventError> {
        Ok(serde_json::to_string(self)?)
    }

    /// Value of the first tag named `name`
    pub fn first_tag_value(&self, name: &str) -> Option<&str> {
        self.tags.iter().find(|t| t.name() == Some(name)).and_then(Tag::value)
    }

    /// Values of every tag named `name`
    pub fn tag_values<'a>(&'a self, name: &'a str) -> impl Iterator<Item = &'a str> + 'a {
        self.tags.iter().filter(move |t| t.name() == Some(name)).filter_map(Tag::value)
    }

    /// Identities listed in `p` tags; malformed entries are skipped
    pub fn recipients(&self) -> impl Iterator<Item = Identity> + '_ {
        self.tag_values("p").filter_map(|v| Identity::parse(v).ok())
    }

    /// Recompute the id from the event fields
    pub fn compute_id(&self) -> Result<[u8; 32], EventError> {
        compute_id(&self.pubkey, self.created_at, self.kind, &self.tags, &self.content)
    }

    /// Check that the id matches and the signature verifies
    pub fn verify(&self) -> Result<(), EventError> {
        let id = self.compute_id()?;
        if hex::encode(id) != self.id.to_ascii_lowercase() {
            return Err(EventError::IdMismatch);
        }

        let sig_hex = self.sig.as_deref().ok_or(EventError::MissingSignature)?;
        let sig_bytes =
            hex::decode(sig_hex).map_err(|e| EventError::InvalidSignature(e.to_string()))?;
        let sig = schnorr::Signature::from_slice(&sig_bytes)
            .map_err(|e| EventError::InvalidSignature(e.to_string()))?;
        let xonly = XOnlyPublicKey::from_slice(&self.pubkey.to_bytes())
            .map_err(|e| EventError::InvalidSignature(e.to_string()))?;

        SECP256K1
            .verify_schnorr(&sig, &Message::from_digest(id), &xonly)
            .map_err(|e| EventError::InvalidSignature(e.to_string()))
    }
}

/// Builder for rumors and signed events
#[derive(Debug, Clone)]
pub struct EventBuilder {
    kind: u16,
    content: String,
    tags: Vec<Tag>,
    created_at: Option<Timestamp>,
}

impl EventBuilder {
    /// Start a new event of `kind`
    pub fn new(kind: u16, content: impl Into<String>) -> Self {
        Self { kind, content: content.into(), tags: Vec::new(), created_at: None }
    }

    /// Append a `[name, value]` tag
    pub fn tag(mut self, name: &str, value: &str) -> Self {
        self.tags.push(Tag::new(name, value));
        self
    }

    /// Append several tags
    pub fn tags(mut self, tags: impl IntoIterator<Item = Tag>) -> Self {
        self.tags.extend(tags);
        self
    }

    /// Override the creation time (defaults to now)
    pub fn created_at(mut self, created_at: Timestamp) -> Self {
        self.created_at = Some(created_at);
        self
    }

    /// Build an unsigned rumor authored by `author`
    pub fn into_rumor(self, author: &Identity) -> Result<Event, EventError> {
        let created_at = self.created_at.unwrap_or_else(Timestamp::now);
        let id = compute_id(author, created_at, self.kind, &self.tags, &self.content)?;

        Ok(Event {
            id: hex::encode(id),
            pubkey: author.clone(),
            created_at,
            kind: self.kind,
            tags: self.tags,
            content: self.content,
            sig: None,
        })
    }

    /// Build and sign with `keys`
    pub fn sign(self, keys: &Keys) -> Result<Event, EventError> {
        let mut event = self.into_rumor(keys.identity())?;
        let id = event.compute_id()?;
        let keypair = Keypair::from_secret_key(SECP256K1, keys.secret_key());
        let sig = SECP256K1.sign_schnorr_no_aux_rand(&Message::from_digest(id), &keypair);
        event.sig = Some(hex::encode(sig.serialize()));
        Ok(event)
    }
}

fn compute_id(
    pubkey: &Identity,
    created_at: Timestamp,
    kind: u16,
    tags: &[Tag],
    content: &str,
) -> Result<[u8; 32], EventError> {
    let canonical = serde_json::to_string(&serde_json::json!([
        0,
        pubkey.as_str(),
        created_at.as_secs(),
        kind,
        tags,
        content
    ]))?;

    Ok(Sha256::digest(canonical.as_bytes()).into())
}
