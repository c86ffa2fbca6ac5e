//! Metric descriptions
//!
//! Components record through the `metrics` facade directly. Nothing is
//! exported unless the embedding process installs a recorder.

use metrics::{describe_counter, describe_gauge, Unit};

/// Register descriptions for every metric the engine records
pub fn init_metrics() {
    // Authorization
    describe_counter!("acl.decisions.granted", "Access decisions granted, labelled by provider");
    describe_counter!("acl.decisions.denied", "Access decisions denied by every provider");

    // Roster sync
    describe_counter!("roster.sync.cycles", "Completed roster sync cycles");
    describe_counter!("roster.sync.events", "Wrapper events fetched for roster sync");
    describe_counter!("roster.sync.applied", "Roster updates applied");
    describe_counter!("roster.sync.decrypt_failures", "Wrappers that failed to unwrap");
    describe_counter!("roster.sync.source_failures", "Failed event source queries");
    describe_gauge!("roster.members", Unit::Count, "Current roster size");
    describe_gauge!("keys.shared", Unit::Count, "Shared keys known to the registry");

    // Backend delegate
    describe_counter!("backend.requests", "Requests sent to the remote authority");
    describe_counter!("backend.cache_hits", "Backend checks answered from cache");
    describe_counter!("backend.failures", "Remote authority transport failures");

    // Claims
    describe_counter!("claims.granted", "Claims recorded, labelled by type");
    describe_counter!("invites.issued", "Invite codes issued");
    describe_counter!("invites.redeemed", "Invite codes redeemed");
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_metrics_init_without_recorder() {
        // Descriptions are no-ops without a recorder and may be repeated
        init_metrics();
        init_metrics();
    }
}
