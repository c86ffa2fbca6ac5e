/*
    synchronizer.rs - Encrypted roster synchronization

    Each cycle runs two steps:

    1. Key sync: fetch every wrapper addressed to a trusted recipient (the
       relay key and any configured trusted keys), unwrap it and feed
       key-share rumors into the SharedKeyRegistry. Always a full fetch.
    2. Roster sync: fetch wrappers addressed to any shared-key identity
       created at or after the watermark, unwrap each with the key for its
       `p` tag, sort the decoded roster updates by rumor timestamp (wrapper
       id breaks ties) and apply them to the roster.

    After step 2 the watermark advances to the newest wrapper timestamp
    observed, whether or not that wrapper decrypted. Wrappers dated more
    than MAX_FUTURE_SKEW ahead of the local clock are still unwrapped but do
    not count towards that timestamp. Every N-th cycle can
    instead replay from timestamp zero into a fresh state, which recovers
    updates the liveness rule skipped.

    Cycles are single-flight: a cycle that finds another in progress returns
    `None` immediately. Live ingestion waits for the running cycle instead.
*/

use super::roster::{Roster, RosterState, RosterUpdate};
use crate::core_envelope::EnvelopeUnwrapper;
use crate::core_event::{kinds, Event, EventSource, Filter, Timestamp};
use crate::core_identity::{Identity, Keys};
use crate::core_keys::SharedKeyRegistry;
use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

/// How far ahead of the local clock a wrapper may be and still move the watermark
pub const MAX_FUTURE_SKEW: Duration = Duration::from_secs(15 * 60);

/// Outcome of one synchronization cycle
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SyncReport {
    /// Key shares learned in step 1
    pub keys_ingested: usize,
    /// Distinct wrapper events fetched in step 2
    pub events_fetched: usize,
    /// Roster updates applied
    pub updates_applied: usize,
    /// Wrappers that failed to unwrap (both steps)
    pub decrypt_failures: usize,
    /// Wrappers addressed to an identity with no known key
    pub missing_keys: usize,
    /// Source queries that failed
    pub source_failures: usize,
    /// Watermark after the cycle
    pub watermark: Timestamp,
    /// Whether this cycle replayed from zero
    pub full_resync: bool,
}

/// What live ingestion did with a wrapper
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum IngestOutcome {
    /// A key share was learned for this identity
    KeyShared(Identity),
    /// A roster update was decoded; `applied` is false if it was stale
    RosterUpdated { applied: bool },
    /// Not addressed to us, undecryptable, or of no interest
    Ignored,
}

/// Drives the roster from encrypted roster-update envelopes
pub struct RosterSynchronizer {
    sources: Vec<Arc<dyn EventSource>>,
    trusted: Vec<Keys>,
    registry: Arc<SharedKeyRegistry>,
    roster: Arc<Roster>,
    unwrapper: EnvelopeUnwrapper,
    full_resync_every: Option<u64>,
    /// Completed cycle count; held for the duration of a cycle
    cycles: Mutex<u64>,
}

impl RosterSynchronizer {
    /// Create a synchronizer over `sources`
    ///
    /// `trusted` are the recipient keys whose wrappers carry key shares.
    pub fn new(
        sources: Vec<Arc<dyn EventSource>>,
        trusted: Vec<Keys>,
        registry: Arc<SharedKeyRegistry>,
        roster: Arc<Roster>,
        unwrapper: EnvelopeUnwrapper,
    ) -> Self {
        Self {
            sources,
            trusted,
            registry,
            roster,
            unwrapper,
            full_resync_every: None,
            cycles: Mutex::new(0),
        }
    }

    /// Replay from zero every `every` cycles
    pub fn with_full_resync_every(mut self, every: Option<u64>) -> Self {
        self.full_resync_every = every.filter(|n| *n > 0);
        self
    }

    pub fn roster(&self) -> &Arc<Roster> {
        &self.roster
    }

    pub fn registry(&self) -> &Arc<SharedKeyRegistry> {
        &self.registry
    }

    /// Whether `identity` is a trusted recipient
    pub fn is_trusted(&self, identity: &Identity) -> bool {
        self.trusted_keys(identity).is_some()
    }

    fn trusted_keys(&self, identity: &Identity) -> Option<&Keys> {
        self.trusted.iter().find(|k| k.identity() == identity)
    }

    /// Whether live ingestion would consider `wrapper`
    pub fn is_relevant(&self, wrapper: &Event) -> bool {
        kinds::is_wrapper(wrapper.kind)
            && wrapper
                .recipients()
                .next()
                .is_some_and(|p| self.is_trusted(&p) || self.registry.lookup(&p).is_some())
    }

    /// Run one cycle unless another is already running
    pub async fn run_cycle(&self) -> Option<SyncReport> {
        let mut cycles = match self.cycles.try_lock() {
            Ok(guard) => guard,
            Err(_) => {
                debug!("Roster sync already in progress; skipping");
                return None;
            }
        };
        *cycles += 1;

        let full_resync = self.full_resync_every.is_some_and(|n| *cycles % n == 0);
        let mut report = SyncReport { full_resync, ..SyncReport::default() };

        self.sync_keys(&mut report).await;
        self.sync_roster(&mut report).await;

        metrics::counter!("roster.sync.cycles").increment(1);
        metrics::counter!("roster.sync.events").increment(report.events_fetched as u64);
        metrics::counter!("roster.sync.applied").increment(report.updates_applied as u64);
        metrics::counter!("roster.sync.decrypt_failures").increment(report.decrypt_failures as u64);

        info!(
            cycle = *cycles,
            keys = report.keys_ingested,
            fetched = report.events_fetched,
            applied = report.updates_applied,
            failures = report.decrypt_failures,
            missing_keys = report.missing_keys,
            source_failures = report.source_failures,
            watermark = %report.watermark,
            full_resync,
            "Roster sync cycle complete"
        );

        Some(report)
    }

    /// Apply one wrapper delivered through the write path
    ///
    /// Waits for any running cycle. The watermark only moves if a roster
    /// update is applied.
    pub async fn ingest_wrapper(&self, wrapper: &Event) -> IngestOutcome {
        let _cycle = self.cycles.lock().await;

        let Some(recipient) = wrapper.recipients().next() else {
            return IngestOutcome::Ignored;
        };

        if let Some(trusted) = self.trusted_keys(&recipient) {
            return match self.unwrapper.unwrap(trusted.secret_key(), wrapper) {
                Ok(rumor) => match self.registry.ingest(&rumor) {
                    Some(identity) => IngestOutcome::KeyShared(identity),
                    None => IngestOutcome::Ignored,
                },
                Err(e) => {
                    warn!(wrapper = %wrapper.id, error = %e, "Failed to unwrap live key share");
                    IngestOutcome::Ignored
                }
            };
        }

        let Some(keys) = self.registry.lookup(&recipient) else {
            return IngestOutcome::Ignored;
        };

        match self.unwrapper.unwrap(keys.secret_key(), wrapper) {
            Ok(rumor) => match RosterUpdate::from_rumor(&rumor) {
                Some(update) => {
                    let applied = self.roster.update(|state| state.apply(&update));
                    debug!(wrapper = %wrapper.id, op = update.op.as_str(), applied, "Live roster update");
                    IngestOutcome::RosterUpdated { applied }
                }
                None => IngestOutcome::Ignored,
            },
            Err(e) => {
                warn!(wrapper = %wrapper.id, error = %e, "Failed to unwrap live roster update");
                IngestOutcome::Ignored
            }
        }
    }

    async fn sync_keys(&self, report: &mut SyncReport) {
        for trusted in &self.trusted {
            let filter = Filter::new().kinds(kinds::WRAPPERS).recipients([trusted.identity()]);

            for wrapper in self.fetch(&filter, report).await {
                match self.unwrapper.unwrap(trusted.secret_key(), &wrapper) {
                    Ok(rumor) => {
                        if self.registry.ingest(&rumor).is_some() {
                            report.keys_ingested += 1;
                        }
                    }
                    Err(e) => {
                        report.decrypt_failures += 1;
                        warn!(wrapper = %wrapper.id, recipient = %trusted.identity(), error = %e, "Skipping key-share wrapper");
                    }
                }
            }
        }
    }

    async fn sync_roster(&self, report: &mut SyncReport) {
        let identities = self.registry.identities();
        if identities.is_empty() {
            report.watermark = self.roster.watermark();
            return;
        }

        let since =
            if report.full_resync { Timestamp::default() } else { self.roster.watermark() };
        let filter = Filter::new().kinds(kinds::WRAPPERS).recipients(&identities).since(since);
        let wrappers = self.fetch(&filter, report).await;
        report.events_fetched = wrappers.len();

        let horizon = Timestamp::from_secs(
            Timestamp::now().as_secs().saturating_add(MAX_FUTURE_SKEW.as_secs()),
        );
        let newest = wrappers
            .iter()
            .map(|w| w.created_at)
            .filter(|created_at| {
                if *created_at > horizon {
                    debug!(created_at = %created_at, "Future-dated wrapper ignored for watermark");
                }
                *created_at <= horizon
            })
            .max()
            .unwrap_or_default();

        let mut updates: Vec<(RosterUpdate, &str)> = wrappers
            .iter()
            .filter_map(|wrapper| self.decode(wrapper, report).map(|u| (u, wrapper.id.as_str())))
            .collect();
        updates.sort_by(|(a, a_id), (b, b_id)| {
            a.created_at.cmp(&b.created_at).then_with(|| a_id.cmp(b_id))
        });

        let apply = |state: &mut RosterState| {
            let applied = updates.iter().filter(|(update, _)| state.apply(update)).count();
            state.observe(newest);
            applied
        };

        report.updates_applied = if report.full_resync {
            let mut rebuilt = RosterState::new();
            let applied = apply(&mut rebuilt);
            self.roster.replace(rebuilt);
            applied
        } else {
            self.roster.update(apply)
        };
        report.watermark = self.roster.watermark();
    }

    fn decode(&self, wrapper: &Event, report: &mut SyncReport) -> Option<RosterUpdate> {
        let recipient = wrapper.recipients().next()?;
        let Some(keys) = self.registry.lookup(&recipient) else {
            report.missing_keys += 1;
            debug!(wrapper = %wrapper.id, recipient = %recipient.short(), "No shared key for wrapper");
            return None;
        };

        match self.unwrapper.unwrap(keys.secret_key(), wrapper) {
            Ok(rumor) => RosterUpdate::from_rumor(&rumor),
            Err(e) => {
                report.decrypt_failures += 1;
                warn!(wrapper = %wrapper.id, recipient = %recipient.short(), error = %e, "Skipping roster wrapper");
                None
            }
        }
    }

    /// Query every source and merge the results by event id
    async fn fetch(&self, filter: &Filter, report: &mut SyncReport) -> Vec<Event> {
        let mut seen = HashSet::new();
        let mut merged = Vec::new();

        for source in &self.sources {
            match source.query(filter).await {
                Ok(events) => {
                    for event in events {
                        if seen.insert(event.id.clone()) {
                            merged.push(event);
                        }
                    }
                }
                Err(e) => {
                    report.source_failures += 1;
                    metrics::counter!("roster.sync.source_failures", "source" => source.name().to_string())
                        .increment(1);
                    warn!(source = source.name(), error = %e, "Event source query failed");
                }
            }
        }

        merged
    }
}
