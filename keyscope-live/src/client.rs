//! Per-viewer delivery channel
//!
//! A viewer owns a bounded FIFO of serialized envelopes. The hub holds the
//! [`ClientHandle`] (enqueue side); the connection task holds the
//! [`ClientQueue`] and runs [`run_drain_loop`] against its transport.

use async_trait::async_trait;
use bytes::Bytes;
use std::fmt;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::time::timeout;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

/// Deadline for a single frame write
pub const DEFAULT_WRITE_TIMEOUT: Duration = Duration::from_secs(10);

/// Identifier of a connected viewer
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ClientId(String);

impl ClientId {
    #[must_use]
    pub fn new() -> Self {
        Self(nanoid::nanoid!(12))
    }

    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Default for ClientId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for ClientId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Enqueue side of a viewer's outbound queue
#[derive(Debug)]
pub struct ClientHandle {
    id: ClientId,
    queue: mpsc::Sender<Bytes>,
}

impl ClientHandle {
    #[must_use]
    pub const fn id(&self) -> &ClientId {
        &self.id
    }

    /// Non-blocking enqueue. Returns `false` when the frame was not accepted:
    /// the queue is full (frame dropped for this viewer only) or the drain
    /// side is gone.
    pub fn send(&self, frame: Bytes) -> bool {
        self.queue.try_send(frame).is_ok()
    }

    /// Whether the drain side has been dropped
    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.queue.is_closed()
    }
}

/// Drain side of a viewer's outbound queue
#[derive(Debug)]
pub struct ClientQueue {
    id: ClientId,
    rx: mpsc::Receiver<Bytes>,
}

impl ClientQueue {
    #[must_use]
    pub const fn id(&self) -> &ClientId {
        &self.id
    }

    /// Next frame; `None` once every handle is dropped and the queue is empty
    pub async fn recv(&mut self) -> Option<Bytes> {
        self.rx.recv().await
    }

    pub fn try_recv(&mut self) -> Option<Bytes> {
        self.rx.try_recv().ok()
    }
}

/// Create a viewer's outbound queue with the given capacity
#[must_use]
pub fn channel(capacity: usize) -> (ClientHandle, ClientQueue) {
    let (tx, rx) = mpsc::channel(capacity);
    let id = ClientId::new();
    (
        ClientHandle {
            id: id.clone(),
            queue: tx,
        },
        ClientQueue { id, rx },
    )
}

/// Transport a drain loop writes frames to
#[async_trait]
pub trait FrameSink: Send {
    async fn send_frame(&mut self, frame: Bytes) -> anyhow::Result<()>;

    /// Best-effort close of the underlying connection
    async fn close(&mut self);
}

/// Why a drain loop stopped
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DrainExit {
    /// Connection scope or server shut down
    Cancelled,
    /// The hub dropped this viewer (unregister or hub shutdown)
    QueueClosed,
    WriteFailed,
    TimedOut,
}

/// Write queued frames to `sink` until cancelled, the queue closes, or a
/// write fails or exceeds `write_timeout`. The sink is closed on exit.
pub async fn run_drain_loop<S: FrameSink>(
    mut queue: ClientQueue,
    mut sink: S,
    write_timeout: Duration,
    cancel: CancellationToken,
) -> DrainExit {
    let exit = loop {
        let frame = tokio::select! {
            biased;
            () = cancel.cancelled() => break DrainExit::Cancelled,
            frame = queue.recv() => match frame {
                Some(frame) => frame,
                None => break DrainExit::QueueClosed,
            },
        };

        match timeout(write_timeout, sink.send_frame(frame)).await {
            Ok(Ok(())) => {}
            Ok(Err(e)) => {
                warn!(client_id = %queue.id(), error = %e, "Write to viewer failed");
                break DrainExit::WriteFailed;
            }
            Err(_) => {
                warn!(
                    client_id = %queue.id(),
                    timeout_secs = write_timeout.as_secs(),
                    "Write to viewer timed out"
                );
                break DrainExit::TimedOut;
            }
        }
    };

    sink.close().await;
    debug!(client_id = %queue.id(), exit = ?exit, "Drain loop stopped");
    exit
}
