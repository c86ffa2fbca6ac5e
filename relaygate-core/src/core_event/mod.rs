//! Event module
//!
//! Signed events, rumors, filters and the sources the synchronizer
//! queries.

pub mod event;
pub mod filter;
pub mod source;

pub use event::{kinds, Event, EventBuilder, EventError, Tag, Timestamp};
pub use filter::Filter;
pub use source::{EventSource, JsonlEventSource, MemoryEventSource, SourceError};
