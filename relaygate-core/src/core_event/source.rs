/*
    source.rs - External event sources

    The synchronizer reads wrapper events through `EventSource`. Several
    sources may back one synchronizer; each is queried independently and
    the results are merged by the caller.

    Provided sources:
    - MemoryEventSource: events held in memory (tests, embedding)
    - JsonlEventSource: one JSON event per line, re-read on every query
*/

use super::event::Event;
use super::filter::Filter;
use async_trait::async_trait;
use std::path::{Path, PathBuf};
use std::sync::{PoisonError, RwLock};
use thiserror::Error;
use tracing::warn;

/// Event source errors
#[derive(Debug, Error)]
pub enum SourceError {
    #[error("Query failed: {0}")]
    Query(String),

    #[error("I/O error: {0}")]
    Io(String),
}

impl From<std::io::Error> for SourceError {
    fn from(e: std::io::Error) -> Self {
        SourceError::Io(e.to_string())
    }
}

/// A queryable store of signed events
#[async_trait]
pub trait EventSource: Send + Sync {
    /// Name used in logs and reports
    fn name(&self) -> &str;

    /// Return every event matching `filter`
    async fn query(&self, filter: &Filter) -> Result<Vec<Event>, SourceError>;
}

/// In-memory event source
#[derive(Debug, Default)]
pub struct MemoryEventSource {
    name: String,
    events: RwLock<Vec<Event>>,
}

impl MemoryEventSource {
    pub fn new(name: impl Into<String>) -> Self {
        Self { name: name.into(), events: RwLock::new(Vec::new()) }
    }

    /// Store an event
    pub fn publish(&self, event: Event) {
        self.events.write().unwrap_or_else(PoisonError::into_inner).push(event);
    }

    /// Number of stored events
    pub fn len(&self) -> usize {
        self.events.read().unwrap_or_else(PoisonError::into_inner).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[async_trait]
impl EventSource for MemoryEventSource {
    fn name(&self) -> &str {
        &self.name
    }

    async fn query(&self, filter: &Filter) -> Result<Vec<Event>, SourceError> {
        let events = self.events.read().unwrap_or_else(PoisonError::into_inner);
        Ok(events.iter().filter(|e| filter.matches(e)).cloned().collect())
    }
}

/// Event source backed by a JSON-lines file
///
/// Blank lines, malformed JSON and events that fail id/signature checks
/// are logged and skipped.
#[derive(Debug, Clone)]
pub struct JsonlEventSource {
    name: String,
    path: PathBuf,
}

impl JsonlEventSource {
    pub fn new(path: impl AsRef<Path>) -> Self {
        let path = path.as_ref().to_path_buf();
        Self { name: path.display().to_string(), path }
    }

    /// Read and validate every event in the file
    pub async fn load(&self) -> Result<Vec<Event>, SourceError> {
        let contents = tokio::fs::read_to_string(&self.path).await?;
        Ok(parse_lines(&self.name, &contents))
    }
}

#[async_trait]
impl EventSource for JsonlEventSource {
    fn name(&self) -> &str {
        &self.name
    }

    async fn query(&self, filter: &Filter) -> Result<Vec<Event>, SourceError> {
        let events = self.load().await?;
        Ok(events.into_iter().filter(|e| filter.matches(e)).collect())
    }
}

fn parse_lines(source: &str, contents: &str) -> Vec<Event> {
    let mut events = Vec::new();

    for (index, line) in contents.lines().enumerate() {
        let line = line.trim();
        if line.is_empty() {
            continue;
        }

        let event = match Event::from_json(line) {
            Ok(event) => event,
            Err(e) => {
                warn!(source, line = index + 1, error = %e, "Skipping malformed event");
                continue;
            }
        };

        if let Err(e) = event.verify() {
            warn!(source, line = index + 1, id = %event.id, error = %e, "Skipping unverifiable event");
            continue;
        }

        events.push(event);
    }

    events
}
