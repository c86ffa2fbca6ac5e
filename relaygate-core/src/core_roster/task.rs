//! Background roster sync loop
//!
//! Ticks on a fixed interval and runs one cycle per tick. Shutdown is only
//! observed between cycles, so a cycle in flight always completes. Ticks
//! that fall behind a slow cycle are skipped rather than queued.

use super::synchronizer::RosterSynchronizer;
use crate::shutdown::ShutdownSignal;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tokio::time::{interval_at, Instant, MissedTickBehavior};
use tracing::info;

/// Spawn the sync loop
///
/// With `run_on_start` the first cycle runs immediately; otherwise it runs
/// one `period` after spawning.
pub fn spawn_sync_loop(
    sync: Arc<RosterSynchronizer>,
    period: Duration,
    run_on_start: bool,
    mut shutdown: broadcast::Receiver<ShutdownSignal>,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let start = if run_on_start { Instant::now() } else { Instant::now() + period };
        let mut ticker = interval_at(start, period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

        info!(period = ?period, run_on_start, "Roster sync loop started");

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    sync.run_cycle().await;
                }
                signal = shutdown.recv() => {
                    info!(signal = ?signal, "Roster sync loop stopping");
                    break;
                }
            }
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core_envelope::EnvelopeUnwrapper;
    use crate::core_event::EventSource;
    use crate::core_keys::SharedKeyRegistry;
    use crate::core_roster::Roster;
    use crate::test_utils::CountingSource;

    fn synchronizer(source: Arc<CountingSource>) -> Arc<RosterSynchronizer> {
        Arc::new(RosterSynchronizer::new(
            vec![source as Arc<dyn EventSource>],
            vec![crate::core_identity::Keys::generate()],
            Arc::new(SharedKeyRegistry::new()),
            Arc::new(Roster::new()),
            EnvelopeUnwrapper::default(),
        ))
    }

    #[tokio::test(start_paused = true)]
    async fn test_loop_runs_on_start_and_on_interval() {
        let source = Arc::new(CountingSource::new());
        let (tx, rx) = broadcast::channel(1);
        let handle =
            spawn_sync_loop(synchronizer(source.clone()), Duration::from_secs(300), true, rx);

        tokio::time::sleep(Duration::from_secs(1)).await;
        assert_eq!(source.queries(), 1);

        tokio::time::sleep(Duration::from_secs(300)).await;
        assert_eq!(source.queries(), 2);

        tx.send(ShutdownSignal::Graceful).unwrap();
        handle.await.unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn test_loop_waits_without_run_on_start() {
        let source = Arc::new(CountingSource::new());
        let (tx, rx) = broadcast::channel(1);
        let handle =
            spawn_sync_loop(synchronizer(source.clone()), Duration::from_secs(60), false, rx);

        tokio::time::sleep(Duration::from_secs(30)).await;
        assert_eq!(source.queries(), 0);

        tokio::time::sleep(Duration::from_secs(31)).await;
        assert_eq!(source.queries(), 1);

        tx.send(ShutdownSignal::Graceful).unwrap();
        handle.await.unwrap();
    }

    #[tokio::test]
    async fn test_loop_stops_when_sender_dropped() {
        let source = Arc::new(CountingSource::new());
        let (tx, rx) = broadcast::channel::<ShutdownSignal>(1);
        let handle =
            spawn_sync_loop(synchronizer(source), Duration::from_secs(3600), false, rx);

        drop(tx);
        handle.await.unwrap();
    }
}
