//! Event filters
//!
//! The subset of relay filters the access engine needs: kinds, `#p`
//! recipients and an inclusive lower time bound. Filters are evaluated
//! locally so every event source applies identical semantics.

use super::event::{Event, Timestamp};
use crate::core_identity::Identity;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;

/// Query filter over events
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Filter {
    /// Accepted kinds; `None` accepts every kind
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub kinds: Option<BTreeSet<u16>>,

    /// Accepted `p` tag recipients; `None` accepts every event
    #[serde(rename = "#p", default, skip_serializing_if = "Option::is_none")]
    pub recipients: Option<BTreeSet<Identity>>,

    /// Inclusive lower bound on `created_at`
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub since: Option<Timestamp>,
}

impl Filter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Restrict to `kinds`
    pub fn kinds(mut self, kinds: impl IntoIterator<Item = u16>) -> Self {
        self.kinds.get_or_insert_with(BTreeSet::new).extend(kinds);
        self
    }

    /// Restrict to events addressed to any of `recipients`
    pub fn recipients<'a>(mut self, recipients: impl IntoIterator<Item = &'a Identity>) -> Self {
        self.recipients
            .get_or_insert_with(BTreeSet::new)
            .extend(recipients.into_iter().cloned());
        self
    }

    /// Only events created at or after `since`
    pub fn since(mut self, since: Timestamp) -> Self {
        self.since = Some(since);
        self
    }

    /// Whether the filter names `kind` explicitly
    pub fn names_kind(&self, kind: u16) -> bool {
        self.kinds.as_ref().is_some_and(|k| k.contains(&kind))
    }

    /// Evaluate the filter against `event`
    pub fn matches(&self, event: &Event) -> bool {
        if let Some(kinds) = &self.kinds {
            if !kinds.contains(&event.kind) {
                return false;
            }
        }

        if let Some(since) = self.since {
            if event.created_at < since {
                return false;
            }
        }

        if let Some(recipients) = &self.recipients {
            if !event.recipients().any(|p| recipients.contains(&p)) {
                return false;
            }
        }

        true
    }
}
