//! Access providers
//!
//! Each provider answers one question: does this identity have access by
//! my criterion? Providers never fail; internal errors are logged and
//! treated as "no".

use crate::core_backend::BackendDelegateCache;
use crate::core_claims::ClaimStore;
use crate::core_identity::Identity;
use crate::core_roster::Roster;
use async_trait::async_trait;
use std::collections::HashSet;
use tracing::warn;

/// One strategy in the authorization chain
#[async_trait]
pub trait AccessProvider: Send + Sync {
    /// Short name used in logs and metrics
    fn name(&self) -> &'static str;

    /// Whether this provider grants `identity` access
    async fn try_authorize(&self, identity: &Identity) -> bool;
}

/// Static allow-list of identities
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Whitelist {
    identities: HashSet<Identity>,
}

impl Whitelist {
    pub fn new(identities: impl IntoIterator<Item = Identity>) -> Self {
        Self { identities: identities.into_iter().collect() }
    }

    pub fn contains(&self, identity: &Identity) -> bool {
        self.identities.contains(identity)
    }

    pub fn len(&self) -> usize {
        self.identities.len()
    }

    pub fn is_empty(&self) -> bool {
        self.identities.is_empty()
    }
}

#[async_trait]
impl AccessProvider for Whitelist {
    fn name(&self) -> &'static str {
        "whitelist"
    }

    async fn try_authorize(&self, identity: &Identity) -> bool {
        self.contains(identity)
    }
}

#[async_trait]
impl AccessProvider for ClaimStore {
    fn name(&self) -> &'static str {
        "claims"
    }

    async fn try_authorize(&self, identity: &Identity) -> bool {
        let lookup = identity.clone();
        match self.run_blocking(move |store| store.has_valid_claim(&lookup)).await {
            Ok(found) => found,
            Err(e) => {
                warn!(identity = %identity, error = %e, "Claim lookup failed");
                false
            }
        }
    }
}

#[async_trait]
impl AccessProvider for BackendDelegateCache {
    fn name(&self) -> &'static str {
        "backend"
    }

    async fn try_authorize(&self, identity: &Identity) -> bool {
        self.check_access(identity).await
    }
}

#[async_trait]
impl AccessProvider for Roster {
    fn name(&self) -> &'static str {
        "roster"
    }

    async fn try_authorize(&self, identity: &Identity) -> bool {
        self.is_member(identity)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core_claims::{ClaimPolicy, ClaimType};
    use crate::core_event::Timestamp;
    use crate::core_identity::Keys;
    use crate::core_roster::{RosterOp, RosterUpdate};

    #[tokio::test]
    async fn test_whitelist() {
        let alice = Keys::generate().identity().clone();
        let list = Whitelist::new([alice.clone()]);
        assert!(list.try_authorize(&alice).await);
        assert!(!list.try_authorize(Keys::generate().identity()).await);
    }

    #[tokio::test]
    async fn test_claim_store_provider() {
        let store = ClaimStore::memory(ClaimPolicy::new(["ok".to_string()], Vec::new())).unwrap();
        let alice = Keys::generate().identity().clone();
        assert!(!store.try_authorize(&alice).await);
        store.add_claim(&alice, "ok", ClaimType::Relay).unwrap();
        assert!(store.try_authorize(&alice).await);
    }

    #[tokio::test]
    async fn test_roster_provider() {
        let roster = Roster::new();
        let alice = Keys::generate().identity().clone();
        assert!(!roster.try_authorize(&alice).await);
        roster.update(|s| {
            s.apply(&RosterUpdate::new(RosterOp::Add, vec![alice.clone()], Timestamp::from_secs(1)))
        });
        assert!(roster.try_authorize(&alice).await);
    }
}
