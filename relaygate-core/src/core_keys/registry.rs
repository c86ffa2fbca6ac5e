/*
    registry.rs - Shared key registry

    Group and session secret keys distributed through key-share rumors.
    Keys are indexed by the identity they control; once learned they are
    never evicted, and a later share for the same identity replaces the
    earlier secret.

    Readers (roster sync, live ingestion) take the read lock for a map
    lookup only. Ingestion takes the write lock for the single insert.
*/

use crate::core_event::{kinds, Event};
use crate::core_identity::{Identity, Keys};
use std::collections::HashMap;
use std::sync::{PoisonError, RwLock};
use tracing::{debug, trace};

/// Tag carrying the shared secret key on a key-share rumor
pub const PRIVKEY_TAG: &str = "privkey";

/// Secret keys learned from key-share rumors
#[derive(Debug, Default)]
pub struct SharedKeyRegistry {
    keys: RwLock<HashMap<Identity, Keys>>,
}

impl SharedKeyRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Learn the key carried by a key-share rumor
    ///
    /// Returns the identity the key controls. Rumors of other kinds, and
    /// shares without a usable secret, are ignored.
    pub fn ingest(&self, rumor: &Event) -> Option<Identity> {
        if rumor.kind != kinds::KEY_SHARE {
            return None;
        }

        let secret = rumor.first_tag_value(PRIVKEY_TAG)?;
        let keys = match Keys::parse(secret) {
            Ok(keys) => keys,
            Err(e) => {
                trace!(author = %rumor.pubkey, error = %e, "Dropping malformed key share");
                return None;
            }
        };

        let identity = keys.identity().clone();
        let total = {
            let mut map = self.keys.write().unwrap_or_else(PoisonError::into_inner);
            map.insert(identity.clone(), keys);
            map.len()
        };

        metrics::gauge!("keys.shared").set(total as f64);
        debug!(identity = %identity, author = %rumor.pubkey, "Learned shared key");
        Some(identity)
    }

    /// Secret key controlling `identity`, if known
    pub fn lookup(&self, identity: &Identity) -> Option<Keys> {
        self.keys.read().unwrap_or_else(PoisonError::into_inner).get(identity).cloned()
    }

    /// Every identity with a known key
    pub fn identities(&self) -> Vec<Identity> {
        let mut identities: Vec<_> =
            self.keys.read().unwrap_or_else(PoisonError::into_inner).keys().cloned().collect();
        identities.sort();
        identities
    }

    pub fn len(&self) -> usize {
        self.keys.read().unwrap_or_else(PoisonError::into_inner).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
