//! Roster sync over file-backed and failing sources

use relaygate_core::config::Config;
use relaygate_core::core_acl::{AccessControl, IncomingOutcome};
use relaygate_core::core_envelope::EnvelopeUnwrapper;
use relaygate_core::core_event::{kinds, EventSource, JsonlEventSource, MemoryEventSource};
use relaygate_core::core_identity::Keys;
use relaygate_core::core_keys::SharedKeyRegistry;
use relaygate_core::core_roster::{IngestOutcome, Roster, RosterOp, RosterSynchronizer};
use relaygate_core::test_utils::{
    join_event, key_share_rumor, roster_rumor, wrap_for, write_jsonl, CountingSource,
};
use std::io::Write;
use std::sync::Arc;

#[tokio::test]
async fn test_jsonl_source_skips_garbage_lines() {
    let dir = tempfile::tempdir().unwrap();
    let relay = Keys::generate();
    let admin = Keys::generate();
    let group = Keys::generate();
    let member = Keys::generate();

    let share = wrap_for(&admin, &key_share_rumor(&admin, &group, 1), relay.identity());
    let add = wrap_for(&admin, &roster_rumor(&admin, RosterOp::Add, &[member.identity()], 10), group.identity());
    let path = write_jsonl(dir.path(), "events.jsonl", &[share, add.clone()]);

    // Append a blank line, broken JSON and an event with a forged id
    let mut forged = add;
    forged.content.push('x');
    let mut file = std::fs::OpenOptions::new().append(true).open(&path).unwrap();
    writeln!(file).unwrap();
    writeln!(file, "{{not json").unwrap();
    writeln!(file, "{}", forged.to_json().unwrap()).unwrap();
    drop(file);

    let source = JsonlEventSource::new(&path);
    assert_eq!(source.load().await.unwrap().len(), 2);

    let sync = RosterSynchronizer::new(
        vec![Arc::new(source) as Arc<dyn EventSource>],
        vec![relay],
        Arc::new(SharedKeyRegistry::new()),
        Arc::new(Roster::new()),
        EnvelopeUnwrapper::default(),
    );
    let report = sync.run_cycle().await.unwrap();

    assert_eq!(report.keys_ingested, 1);
    assert_eq!(report.updates_applied, 1);
    assert_eq!(report.decrypt_failures, 0);
    assert!(sync.roster().is_member(member.identity()));
}

#[tokio::test]
async fn test_sources_are_merged_and_failures_isolated() {
    let relay = Keys::generate();
    let admin = Keys::generate();
    let group = Keys::generate();
    let member = Keys::generate();

    let share = wrap_for(&admin, &key_share_rumor(&admin, &group, 1), relay.identity());
    let add = wrap_for(&admin, &roster_rumor(&admin, RosterOp::Add, &[member.identity()], 10), group.identity());

    let primary = Arc::new(MemoryEventSource::new("primary"));
    primary.publish(share.clone());
    primary.publish(add.clone());

    let mirror = Arc::new(CountingSource::named("mirror"));
    mirror.publish(share);
    mirror.publish(add);
    mirror.fail_next(1);

    let sync = RosterSynchronizer::new(
        vec![primary as Arc<dyn EventSource>, mirror.clone() as Arc<dyn EventSource>],
        vec![relay],
        Arc::new(SharedKeyRegistry::new()),
        Arc::new(Roster::new()),
        EnvelopeUnwrapper::default(),
    );

    let report = sync.run_cycle().await.unwrap();
    assert_eq!(report.source_failures, 1);
    assert_eq!(report.events_fetched, 1);
    assert_eq!(report.updates_applied, 1);
    assert_eq!(mirror.queries(), 2);

    // The roster query names the group identity and starts from zero
    let roster_filter = &mirror.filters()[1];
    assert!(roster_filter.names_kind(kinds::WRAP_CURRENT));
    assert!(roster_filter.recipients.as_ref().unwrap().contains(group.identity()));
}

#[tokio::test]
async fn test_full_resync_recovers_skipped_update() {
    let relay = Keys::generate();
    let admin = Keys::generate();
    let group = Keys::generate();
    let [early, late] = [Keys::generate(), Keys::generate()];

    let source = Arc::new(MemoryEventSource::new("relay"));
    source.publish(wrap_for(&admin, &key_share_rumor(&admin, &group, 1), relay.identity()));
    source.publish(wrap_for(&admin, &roster_rumor(&admin, RosterOp::Add, &[late.identity()], 20), group.identity()));

    let sync = RosterSynchronizer::new(
        vec![source.clone() as Arc<dyn EventSource>],
        vec![relay],
        Arc::new(SharedKeyRegistry::new()),
        Arc::new(Roster::new()),
        EnvelopeUnwrapper::default(),
    )
    .with_full_resync_every(Some(2));

    let first = sync.run_cycle().await.unwrap();
    assert!(!first.full_resync);

    // Arrives late with an older timestamp: the incremental rule skips it
    source.publish(wrap_for(&admin, &roster_rumor(&admin, RosterOp::Add, &[early.identity()], 15), group.identity()));

    let second = sync.run_cycle().await.unwrap();
    assert!(second.full_resync);
    assert!(sync.roster().is_member(early.identity()));
    assert!(sync.roster().is_member(late.identity()));
    assert_eq!(second.watermark.as_secs(), 20);
}

#[tokio::test]
async fn test_access_control_from_config_end_to_end() {
    let dir = tempfile::tempdir().unwrap();
    let relay = Keys::generate();
    let admin = Keys::generate();
    let group = Keys::generate();
    let member = Keys::generate();

    let path = write_jsonl(
        dir.path(),
        "events.jsonl",
        &[
            wrap_for(&admin, &key_share_rumor(&admin, &group, 1), relay.identity()),
            wrap_for(&admin, &roster_rumor(&admin, RosterOp::Set, &[member.identity()], 10), group.identity()),
        ],
    );

    let mut config = Config::default();
    config.relay.secret_key = Some(relay.secret_hex().as_str().to_string());
    config.auth.relay_claims = vec!["letmein".to_string()];
    config.store.data_dir = dir.path().join("data");

    let control = AccessControl::from_config(
        &config,
        vec![Arc::new(JsonlEventSource::new(&path)) as Arc<dyn EventSource>],
    )
    .unwrap();
    assert_eq!(control.relay_identity(), relay.identity());

    assert!(!control.decide(member.identity()).await);
    control.synchronizer().run_cycle().await.unwrap();
    assert!(control.decide(member.identity()).await);

    // Live removal through the write path
    let removal = wrap_for(&admin, &roster_rumor(&admin, RosterOp::Remove, &[member.identity()], 11), group.identity());
    assert_eq!(
        control.on_incoming_event(&removal).await,
        IncomingOutcome::Wrapper(IngestOutcome::RosterUpdated { applied: true })
    );
    assert!(!control.decide(member.identity()).await);

    // Claims persist across restarts
    let joiner = Keys::generate();
    let join = join_event(&joiner, kinds::RELAY_JOIN, "letmein");
    assert_eq!(control.reject_event(None, &join).await, None);
    drop(control);

    let reopened = AccessControl::from_config(&config, Vec::new()).unwrap();
    assert!(reopened.decide(joiner.identity()).await);
}
