//! Scripted stand-ins for external collaborators

use crate::core_backend::{BackendError, RemoteAuthority};
use crate::core_event::{Event, EventSource, Filter, MemoryEventSource, SourceError};
use crate::core_identity::Identity;
use async_trait::async_trait;
use std::sync::atomic::{AtomicU16, AtomicUsize, Ordering};
use std::sync::{Mutex, PoisonError};
use std::time::Duration;

/// Remote authority answering with a fixed status
///
/// Every call is counted, including scripted failures.
#[derive(Debug)]
pub struct MockAuthority {
    status: AtomicU16,
    calls: AtomicUsize,
    failures: AtomicUsize,
    delay: Duration,
}

impl MockAuthority {
    pub fn with_status(status: u16) -> Self {
        Self {
            status: AtomicU16::new(status),
            calls: AtomicUsize::new(0),
            failures: AtomicUsize::new(0),
            delay: Duration::ZERO,
        }
    }

    /// Sleep this long inside every call
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    pub fn set_status(&self, status: u16) {
        self.status.store(status, Ordering::SeqCst);
    }

    /// Fail the next `n` calls with a transport error
    pub fn fail_next(&self, n: usize) {
        self.failures.store(n, Ordering::SeqCst);
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl RemoteAuthority for MockAuthority {
    async fn check(&self, _identity: &Identity) -> Result<u16, BackendError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }

        let failing = self
            .failures
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if failing {
            return Err(BackendError::Transport("scripted failure".to_string()));
        }

        Ok(self.status.load(Ordering::SeqCst))
    }
}

/// In-memory source that records queries and fails on demand
#[derive(Debug)]
pub struct CountingSource {
    inner: MemoryEventSource,
    filters: Mutex<Vec<Filter>>,
    failures: AtomicUsize,
    delay: Duration,
}

impl CountingSource {
    pub fn new() -> Self {
        Self::named("counting")
    }

    pub fn named(name: &str) -> Self {
        Self {
            inner: MemoryEventSource::new(name),
            filters: Mutex::new(Vec::new()),
            failures: AtomicUsize::new(0),
            delay: Duration::ZERO,
        }
    }

    /// Sleep this long inside every query
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    pub fn publish(&self, event: Event) {
        self.inner.publish(event);
    }

    /// Fail the next `n` queries
    pub fn fail_next(&self, n: usize) {
        self.failures.store(n, Ordering::SeqCst);
    }

    /// Number of queries received
    pub fn queries(&self) -> usize {
        self.filters.lock().unwrap_or_else(PoisonError::into_inner).len()
    }

    /// Filters received, oldest first
    pub fn filters(&self) -> Vec<Filter> {
        self.filters.lock().unwrap_or_else(PoisonError::into_inner).clone()
    }
}

impl Default for CountingSource {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl EventSource for CountingSource {
    fn name(&self) -> &str {
        self.inner.name()
    }

    async fn query(&self, filter: &Filter) -> Result<Vec<Event>, SourceError> {
        self.filters.lock().unwrap_or_else(PoisonError::into_inner).push(filter.clone());
        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }

        let failing = self
            .failures
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if failing {
            return Err(SourceError::Query("scripted failure".to_string()));
        }

        self.inner.query(filter).await
    }
}
