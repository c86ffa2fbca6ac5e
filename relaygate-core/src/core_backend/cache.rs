/*
    cache.rs - TTL cache in front of the remote authority

    Every HTTP answer is cached for the TTL (granted iff status 200).
    Transport failures are never cached: the caller gets the last known
    answer, even if expired, or false when there is none, and the next call
    tries again.

    Each identity has its own async slot. Callers for the same identity
    queue on the slot so only one remote call is in flight per identity;
    callers for different identities never wait on each other. A slot is
    only kept once the authority has answered for its identity.
*/

use super::authority::RemoteAuthority;
use crate::core_identity::Identity;
use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;
use tokio::time::Instant;
use tracing::{debug, warn};

/// Default lifetime of a cached decision
pub const DEFAULT_TTL: Duration = Duration::from_secs(60);

/// A cached remote answer
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BackendDecision {
    pub granted: bool,
    pub expires_at: Instant,
}

impl BackendDecision {
    pub fn is_fresh(&self, now: Instant) -> bool {
        now < self.expires_at
    }
}

type Slot = Arc<tokio::sync::Mutex<Option<BackendDecision>>>;

/// TTL-bounded delegate to a remote authority
pub struct BackendDelegateCache {
    authority: Option<Arc<dyn RemoteAuthority>>,
    ttl: Duration,
    slots: Mutex<HashMap<Identity, Slot>>,
}

impl BackendDelegateCache {
    pub fn new(authority: Option<Arc<dyn RemoteAuthority>>, ttl: Duration) -> Self {
        Self { authority, ttl, slots: Mutex::new(HashMap::new()) }
    }

    /// A cache with no authority; every check is denied
    pub fn disabled() -> Self {
        Self::new(None, DEFAULT_TTL)
    }

    pub fn is_enabled(&self) -> bool {
        self.authority.is_some()
    }

    fn slot(&self, identity: &Identity) -> Slot {
        let mut slots = self.slots.lock().unwrap_or_else(PoisonError::into_inner);
        Arc::clone(slots.entry(identity.clone()).or_default())
    }

    /// Drop `slot` if it never got an answer and nobody else holds it
    fn release_unanswered(&self, identity: &Identity, slot: Slot) {
        let mut slots = self.slots.lock().unwrap_or_else(PoisonError::into_inner);
        // The map and `slot` itself
        if Arc::strong_count(&slot) == 2 && slot.try_lock().is_ok_and(|d| d.is_none()) {
            slots.remove(identity);
        }
    }

    /// Whether the remote authority grants `identity` access
    pub async fn check_access(&self, identity: &Identity) -> bool {
        let Some(authority) = &self.authority else {
            return false;
        };

        let slot = self.slot(identity);
        let mut cached = slot.lock().await;

        if let Some(decision) = cached.as_ref().filter(|d| d.is_fresh(Instant::now())) {
            metrics::counter!("backend.cache_hits").increment(1);
            return decision.granted;
        }

        metrics::counter!("backend.requests").increment(1);
        match authority.check(identity).await {
            Ok(status) => {
                let granted = status == 200;
                *cached = Some(BackendDecision { granted, expires_at: Instant::now() + self.ttl });
                debug!(identity = %identity, status, granted, "Backend decision cached");
                granted
            }
            Err(e) => {
                metrics::counter!("backend.failures").increment(1);
                warn!(identity = %identity, error = %e, "Backend check failed");
                let last_known = cached.map(|d| d.granted);
                drop(cached);
                if last_known.is_none() {
                    self.release_unanswered(identity, slot);
                }
                last_known.unwrap_or(false)
            }
        }
    }

    /// Cached decision for `identity`, fresh or not
    pub async fn cached(&self, identity: &Identity) -> Option<BackendDecision> {
        let slot = {
            let slots = self.slots.lock().unwrap_or_else(PoisonError::into_inner);
            slots.get(identity).cloned()
        }?;
        let decision = *slot.lock().await;
        decision
    }
}

impl std::fmt::Debug for BackendDelegateCache {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BackendDelegateCache")
            .field("enabled", &self.is_enabled())
            .field("ttl", &self.ttl)
            .finish_non_exhaustive()
    }
}
