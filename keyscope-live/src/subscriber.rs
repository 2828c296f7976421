//! Keyspace notification subscriber
//!
//! Opens `__keyspace@{db}__:*` on the store and turns each delivered
//! `(channel, payload)` pair into a [`ChangeEvent`]. Events are handed out
//! through a bounded channel; when it closes, the subscription is over.

use futures::StreamExt;
use keyscope_core::store::{NotificationStream, RawNotification};
use keyscope_core::{ChangeEvent, Store};
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, trace, warn};

use crate::error::Result;

/// Pattern matching every key notification of database `db`
#[must_use]
pub fn keyspace_pattern(db: u32) -> String {
    format!("__keyspace@{db}__:*")
}

/// Channel prefix stripped to recover the key name
#[must_use]
pub fn keyspace_prefix(db: u32) -> String {
    format!("__keyspace@{db}__:")
}

/// Parse a raw notification; `None` if the channel is outside `prefix`
#[must_use]
pub fn parse_notification(prefix: &str, raw: RawNotification) -> Option<ChangeEvent> {
    let key = raw.channel.strip_prefix(prefix)?;
    Some(ChangeEvent::new(raw.payload, key))
}

/// Open the subscription and start pumping events.
///
/// Fails if the subscription cannot be opened. Once it is open, the
/// returned receiver yields events in the order the store produced them and
/// closes when `cancel` fires or the upstream subscription ends.
pub async fn subscribe(
    store: &Arc<dyn Store>,
    db: u32,
    buffer: usize,
    cancel: CancellationToken,
) -> Result<mpsc::Receiver<ChangeEvent>> {
    let pattern = keyspace_pattern(db);
    let stream = store.psubscribe(&pattern).await?;

    let (tx, rx) = mpsc::channel(buffer);
    tokio::spawn(pump(stream, keyspace_prefix(db), tx, cancel));

    info!(db = db, pattern = %pattern, "Keyspace subscriber started");
    Ok(rx)
}

async fn pump(
    mut stream: NotificationStream,
    prefix: String,
    tx: mpsc::Sender<ChangeEvent>,
    cancel: CancellationToken,
) {
    loop {
        let raw = tokio::select! {
            biased;
            () = cancel.cancelled() => {
                debug!("Keyspace subscriber cancelled");
                break;
            }
            next = stream.next() => match next {
                Some(raw) => raw,
                None => {
                    warn!("Keyspace subscription ended upstream");
                    break;
                }
            },
        };

        let channel = raw.channel.clone();
        let Some(event) = parse_notification(&prefix, raw) else {
            debug!(channel = %channel, "Ignoring notification outside the keyspace prefix");
            continue;
        };
        trace!(op = %event.operation, key = %event.key, "Keyspace event");

        // Block while the router is behind; cancellation still wins.
        tokio::select! {
            biased;
            () = cancel.cancelled() => {
                debug!("Keyspace subscriber cancelled while delivering");
                break;
            }
            sent = tx.send(event) => {
                if sent.is_err() {
                    debug!("Event consumer gone, stopping subscriber");
                    break;
                }
            }
        }
    }

    // Release the upstream subscription before the consumer sees end-of-stream.
    drop(stream);
    drop(tx);
}
