//! Event routing
//!
//! Drains the subscriber's channel, drops keys outside the configured prefix
//! and broadcasts the rest to the hub in arrival order.

use keyscope_core::{ChangeEvent, Envelope};
use tokio::sync::mpsc;
use tracing::debug;

use crate::hub::Hub;

/// Key-prefix filter applied before events reach viewers
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct KeyFilter {
    prefix: String,
}

impl KeyFilter {
    pub fn new(prefix: impl Into<String>) -> Self {
        Self {
            prefix: prefix.into(),
        }
    }

    /// An empty prefix lets everything through
    #[must_use]
    pub fn matches(&self, key: &str) -> bool {
        key.starts_with(&self.prefix)
    }

    #[must_use]
    pub fn prefix(&self) -> &str {
        &self.prefix
    }
}

/// Counts reported when a router pump finishes
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RouteSummary {
    pub forwarded: u64,
    pub filtered: u64,
}

/// Forward events that pass `filter` to the hub until `events` closes
pub async fn route_events(
    mut events: mpsc::Receiver<ChangeEvent>,
    filter: KeyFilter,
    hub: Hub,
) -> RouteSummary {
    let mut summary = RouteSummary::default();

    while let Some(event) = events.recv().await {
        if !filter.matches(&event.key) {
            summary.filtered += 1;
            continue;
        }
        hub.broadcast(&Envelope::KeyEvent(event)).await;
        summary.forwarded += 1;
    }

    debug!(
        forwarded = summary.forwarded,
        filtered = summary.filtered,
        prefix = %filter.prefix(),
        "Event router stopped"
    );
    summary
}
