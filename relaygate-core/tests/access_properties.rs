/*
    access_properties.rs - Cross-component access guarantees

    Each test drives real components end to end: events are signed and
    wrapped through the envelope code, claims go through SQLite, and the
    roster is fed by the synchronizer.
*/

use relaygate_core::core_acl::{AccessProvider, AuthorizationChain, Whitelist};
use relaygate_core::core_backend::{BackendDelegateCache, RemoteAuthority};
use relaygate_core::core_claims::{ClaimPolicy, ClaimStore, ClaimType};
use relaygate_core::core_crypto::{ConversationKeyCache, Scheme};
use relaygate_core::core_envelope::EnvelopeUnwrapper;
use relaygate_core::core_event::{EventSource, MemoryEventSource, Timestamp};
use relaygate_core::core_identity::Keys;
use relaygate_core::core_keys::SharedKeyRegistry;
use relaygate_core::core_roster::{Roster, RosterOp, RosterSynchronizer};
use relaygate_core::test_utils::{
    key_share_rumor, roster_rumor, wrap_for, wrap_with, MockAuthority, TestRosterUpdateBuilder,
};
use std::sync::Arc;
use std::time::Duration;

struct Network {
    relay: Keys,
    admin: Keys,
    group: Keys,
    source: Arc<MemoryEventSource>,
    sync: RosterSynchronizer,
}

impl Network {
    fn new() -> Self {
        let relay = Keys::generate();
        let admin = Keys::generate();
        let group = Keys::generate();
        let source = Arc::new(MemoryEventSource::new("relay"));

        source.publish(wrap_for(&admin, &key_share_rumor(&admin, &group, 1), relay.identity()));

        let sync = RosterSynchronizer::new(
            vec![source.clone() as Arc<dyn EventSource>],
            vec![relay.clone()],
            Arc::new(SharedKeyRegistry::new()),
            Arc::new(Roster::new()),
            EnvelopeUnwrapper::default(),
        );
        Self { relay, admin, group, source, sync }
    }

    fn publish_update(&self, op: RosterOp, targets: &[&Keys], created_at: u64) {
        let targets: Vec<_> = targets.iter().map(|k| k.identity()).collect();
        let rumor = roster_rumor(&self.admin, op, &targets, created_at);
        self.source.publish(wrap_for(&self.admin, &rumor, self.group.identity()));
    }
}

#[tokio::test]
async fn test_unknown_identity_is_denied_by_every_provider() {
    let claims = Arc::new(ClaimStore::memory(ClaimPolicy::new(["c".to_string()], Vec::new())).unwrap());
    let mock = Arc::new(MockAuthority::with_status(403));
    let backend = Arc::new(BackendDelegateCache::new(
        Some(mock.clone() as Arc<dyn RemoteAuthority>),
        Duration::from_secs(60),
    ));
    let roster = Arc::new(Roster::new());

    let known = Keys::generate();
    claims.add_claim(known.identity(), "c", ClaimType::Relay).unwrap();

    let chain = AuthorizationChain::new()
        .with(Arc::new(Whitelist::new([Keys::generate().identity().clone()])))
        .with(claims)
        .with(backend)
        .with(roster);

    for _ in 0..8 {
        assert!(!chain.decide(Keys::generate().identity()).await);
    }
    assert!(chain.decide(known.identity()).await);
    assert_eq!(chain.granted_by(known.identity()).await, Some("claims"));
}

#[test]
fn test_invite_redeems_exactly_once() {
    let store = ClaimStore::memory(ClaimPolicy::default()).unwrap();
    let issuer = Keys::generate();
    let code = store.issue_invite(issuer.identity()).unwrap();

    assert_eq!(store.redeem_invite(&code).unwrap(), Some(issuer.identity().clone()));
    for _ in 0..3 {
        assert_eq!(store.redeem_invite(&code).unwrap(), None);
    }
}

#[test]
fn test_duplicate_claims_store_one_record() {
    let store = ClaimStore::memory(ClaimPolicy::new(["x".to_string()], Vec::new())).unwrap();
    let id = Keys::generate();

    assert!(store.add_claim(id.identity(), "x", ClaimType::Relay).unwrap());
    assert!(!store.add_claim(id.identity(), "x", ClaimType::Relay).unwrap());
    assert_eq!(store.claims_for(id.identity()).unwrap().len(), 1);
}

#[tokio::test]
async fn test_roster_batch_is_independent_of_arrival_order() {
    let [a, b, c] = [Keys::generate(), Keys::generate(), Keys::generate()];

    let in_order = Network::new();
    in_order.publish_update(RosterOp::Set, &[&a, &b], 1_000);
    in_order.publish_update(RosterOp::Remove, &[&a], 1_001);
    in_order.publish_update(RosterOp::Add, &[&c], 1_002);

    let reversed = Network::new();
    reversed.publish_update(RosterOp::Add, &[&c], 1_002);
    reversed.publish_update(RosterOp::Remove, &[&a], 1_001);
    reversed.publish_update(RosterOp::Set, &[&a, &b], 1_000);

    for network in [&in_order, &reversed] {
        let report = network.sync.run_cycle().await.unwrap();
        assert_eq!(report.updates_applied, 3);

        let roster = network.sync.roster();
        assert!(!roster.is_member(a.identity()));
        assert!(roster.is_member(b.identity()));
        assert!(roster.is_member(c.identity()));
        assert_eq!(roster.watermark(), Timestamp::from_secs(1_002));
    }
}

#[tokio::test]
async fn test_missing_or_unknown_op_adds_members() {
    let network = Network::new();
    let [a, b] = [Keys::generate(), Keys::generate()];

    for (op, target, ts) in [(None, &a, 10), (Some("promote"), &b, 11)] {
        let rumor = TestRosterUpdateBuilder::new(RosterOp::Set)
            .raw_op(op)
            .target(target.identity())
            .created_at(ts)
            .build(&network.admin);
        network.source.publish(wrap_for(&network.admin, &rumor, network.group.identity()));
    }

    let report = network.sync.run_cycle().await.unwrap();
    assert_eq!(report.updates_applied, 2);
    assert!(network.sync.roster().is_member(a.identity()));
    assert!(network.sync.roster().is_member(b.identity()));
}

#[tokio::test]
async fn test_old_events_never_move_the_watermark_back() {
    let network = Network::new();
    let [a, b] = [Keys::generate(), Keys::generate()];

    network.publish_update(RosterOp::Add, &[&a], 500);
    network.sync.run_cycle().await.unwrap();
    assert_eq!(network.sync.roster().watermark(), Timestamp::from_secs(500));

    // Same timestamp as the watermark: fetched again, never re-applied
    network.publish_update(RosterOp::Remove, &[&a], 500);
    network.publish_update(RosterOp::Add, &[&b], 700);
    let report = network.sync.run_cycle().await.unwrap();

    assert_eq!(report.updates_applied, 1);
    assert!(network.sync.roster().is_member(a.identity()));
    assert!(network.sync.roster().is_member(b.identity()));
    assert_eq!(report.watermark, Timestamp::from_secs(700));

    let report = network.sync.run_cycle().await.unwrap();
    assert_eq!(report.updates_applied, 0);
    assert_eq!(report.watermark, Timestamp::from_secs(700));
}

#[test]
fn test_conversation_key_is_derived_once() {
    let cache = ConversationKeyCache::new();
    let ours = Keys::generate();
    let theirs = Keys::generate();

    let first = cache.get_or_derive(ours.secret_key(), theirs.identity(), Scheme::Current).unwrap();
    let second = cache.get_or_derive(ours.secret_key(), theirs.identity(), Scheme::Current).unwrap();

    assert_eq!(first.as_bytes(), second.as_bytes());
    assert_eq!(cache.derivation_count(), 1);
}

#[tokio::test(start_paused = true)]
async fn test_backend_grant_is_reused_until_ttl() {
    let mock = Arc::new(MockAuthority::with_status(200));
    let backend = BackendDelegateCache::new(
        Some(mock.clone() as Arc<dyn RemoteAuthority>),
        Duration::from_secs(60),
    );
    let id = Keys::generate();

    assert!(backend.try_authorize(id.identity()).await);
    for _ in 0..5 {
        assert!(backend.try_authorize(id.identity()).await);
    }
    assert_eq!(mock.calls(), 1);

    tokio::time::advance(Duration::from_secs(61)).await;
    assert!(backend.try_authorize(id.identity()).await);
    assert_eq!(mock.calls(), 2);
}

#[test]
fn test_legacy_seal_is_unsupported() {
    let relay = Keys::generate();
    let admin = Keys::generate();
    let rumor = key_share_rumor(&admin, &Keys::generate(), 1);
    let wrapper = wrap_with(&admin, &rumor, relay.identity(), Scheme::Legacy);

    let err = EnvelopeUnwrapper::default().unwrap(relay.secret_key(), &wrapper).unwrap_err();
    assert!(err.is_unsupported(), "unexpected error: {err}");
}

#[tokio::test]
async fn test_key_share_over_legacy_wrapper_is_not_learned() {
    let network = Network::new();
    let other_group = Keys::generate();
    let rumor = key_share_rumor(&network.admin, &other_group, 2);
    network
        .source
        .publish(wrap_with(&network.admin, &rumor, network.relay.identity(), Scheme::Legacy));

    let report = network.sync.run_cycle().await.unwrap();
    assert_eq!(report.keys_ingested, 1);
    assert_eq!(report.decrypt_failures, 1);
    assert!(network.sync.registry().lookup(other_group.identity()).is_none());
}
