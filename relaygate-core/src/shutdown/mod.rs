//! Graceful shutdown coordinator
//!
//! Background tasks subscribe to a broadcast channel and stop at their next
//! safe point. `drain` then gives them a grace period to finish before they
//! are aborted.

use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{broadcast, RwLock};
use tokio::task::JoinHandle;
use tracing::{error, info, warn};

/// Shutdown signal
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ShutdownSignal {
    Graceful,
    Immediate,
}

/// Shutdown state
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ShutdownState {
    Running,
    ShuttingDown,
    Shutdown,
}

/// Graceful shutdown coordinator
pub struct ShutdownCoordinator {
    state: RwLock<ShutdownState>,
    shutdown_tx: broadcast::Sender<ShutdownSignal>,
    grace: Duration,
}

impl ShutdownCoordinator {
    /// Create a coordinator allowing tasks `grace` to finish
    pub fn new(grace: Duration) -> Self {
        let (shutdown_tx, _) = broadcast::channel(16);
        Self { state: RwLock::new(ShutdownState::Running), shutdown_tx, grace }
    }

    /// Subscribe to shutdown notifications
    pub fn subscribe(&self) -> broadcast::Receiver<ShutdownSignal> {
        self.shutdown_tx.subscribe()
    }

    /// Ask every subscriber to stop at its next safe point
    pub async fn shutdown(&self) {
        let mut state = self.state.write().await;
        if *state != ShutdownState::Running {
            warn!("Shutdown already in progress");
            return;
        }
        *state = ShutdownState::ShuttingDown;
        drop(state);

        info!("Initiating graceful shutdown");
        // No receivers just means nothing is running
        if self.shutdown_tx.send(ShutdownSignal::Graceful).is_err() {
            info!("No tasks subscribed to shutdown");
        }
    }

    /// Stop without a grace period
    pub async fn shutdown_immediately(&self) {
        warn!("Initiating immediate shutdown");
        *self.state.write().await = ShutdownState::Shutdown;
        let _ = self.shutdown_tx.send(ShutdownSignal::Immediate);
    }

    pub async fn is_shutting_down(&self) -> bool {
        *self.state.read().await != ShutdownState::Running
    }

    pub async fn state(&self) -> ShutdownState {
        *self.state.read().await
    }

    /// Wait until shutdown has been requested
    pub async fn wait_for_shutdown(&self) {
        let mut rx = self.subscribe();
        if self.is_shutting_down().await {
            return;
        }
        let _ = rx.recv().await;
    }

    /// Wait for `tasks` to finish, aborting any still running after the grace period
    pub async fn drain(&self, tasks: Vec<JoinHandle<()>>) {
        for mut task in tasks {
            match tokio::time::timeout(self.grace, &mut task).await {
                Ok(Ok(())) => {}
                Ok(Err(e)) => error!(error = %e, "Task failed during shutdown"),
                Err(_) => {
                    warn!(grace = ?self.grace, "Task did not stop in time; aborting");
                    task.abort();
                }
            }
        }

        *self.state.write().await = ShutdownState::Shutdown;
        info!("Shutdown complete");
    }
}

/// Trigger a graceful shutdown on SIGINT or SIGTERM
#[cfg(unix)]
pub fn install_signal_handlers(coordinator: Arc<ShutdownCoordinator>) -> JoinHandle<()> {
    use tokio::signal::unix::{signal, SignalKind};

    tokio::spawn(async move {
        let mut sigterm = match signal(SignalKind::terminate()) {
            Ok(stream) => Some(stream),
            Err(e) => {
                error!(error = %e, "Failed to install SIGTERM handler");
                None
            }
        };

        let terminated = async {
            match sigterm.as_mut() {
                Some(stream) => {
                    stream.recv().await;
                }
                None => std::future::pending::<()>().await,
            }
        };

        tokio::select! {
            _ = terminated => info!("Received SIGTERM"),
            result = tokio::signal::ctrl_c() => match result {
                Ok(()) => info!("Received SIGINT"),
                Err(e) => {
                    error!(error = %e, "Failed to listen for SIGINT");
                    return;
                }
            },
        }

        coordinator.shutdown().await;
    })
}

/// Trigger a graceful shutdown on Ctrl+C
#[cfg(not(unix))]
pub fn install_signal_handlers(coordinator: Arc<ShutdownCoordinator>) -> JoinHandle<()> {
    tokio::spawn(async move {
        match tokio::signal::ctrl_c().await {
            Ok(()) => {
                info!("Received Ctrl+C");
                coordinator.shutdown().await;
            }
            Err(e) => error!(error = %e, "Failed to listen for Ctrl+C"),
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_shutdown_broadcasts_once() {
        let coordinator = ShutdownCoordinator::new(Duration::from_millis(100));
        let mut rx = coordinator.subscribe();
        assert_eq!(coordinator.state().await, ShutdownState::Running);

        coordinator.shutdown().await;
        coordinator.shutdown().await;

        assert_eq!(rx.recv().await.unwrap(), ShutdownSignal::Graceful);
        assert!(rx.try_recv().is_err());
        assert_eq!(coordinator.state().await, ShutdownState::ShuttingDown);
    }

    #[tokio::test]
    async fn test_wait_for_shutdown_after_the_fact() {
        let coordinator = ShutdownCoordinator::new(Duration::from_millis(100));
        coordinator.shutdown().await;
        coordinator.wait_for_shutdown().await;
        assert!(coordinator.is_shutting_down().await);
    }

    #[tokio::test(start_paused = true)]
    async fn test_drain_waits_then_aborts() {
        let coordinator = Arc::new(ShutdownCoordinator::new(Duration::from_secs(5)));

        let mut rx = coordinator.subscribe();
        let cooperative = tokio::spawn(async move {
            let _ = rx.recv().await;
        });
        let stubborn = tokio::spawn(async {
            tokio::time::sleep(Duration::from_secs(3600)).await;
        });

        coordinator.shutdown().await;
        coordinator.drain(vec![cooperative, stubborn]).await;

        assert_eq!(coordinator.state().await, ShutdownState::Shutdown);
    }

    #[tokio::test]
    async fn test_immediate_shutdown() {
        let coordinator = ShutdownCoordinator::new(Duration::from_secs(5));
        let mut rx = coordinator.subscribe();
        coordinator.shutdown_immediately().await;
        assert_eq!(rx.recv().await.unwrap(), ShutdownSignal::Immediate);
        assert_eq!(coordinator.state().await, ShutdownState::Shutdown);
    }
}
