use bytes::Bytes;
use keyscope_core::Envelope;
use std::collections::HashMap;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, trace};

use crate::client::{ClientHandle, ClientId};
use crate::error::{Error, Result};

enum Command {
    Register(ClientHandle),
    Unregister(ClientId),
    Broadcast { frame: Bytes, kind: &'static str },
    ClientCount(oneshot::Sender<usize>),
}

/// Fan-out hub for connected viewers
///
/// The registry lives inside a single actor task; this handle only sends it
/// commands, which are applied in arrival order. Cloning the handle is cheap.
#[derive(Clone)]
pub struct Hub {
    commands: mpsc::Sender<Command>,
}

impl Hub {
    /// Spawn the hub actor. It runs until `shutdown` fires or every handle is
    /// dropped; on exit all outbound queues are closed.
    #[must_use]
    pub fn spawn(command_capacity: usize, shutdown: CancellationToken) -> (Self, JoinHandle<()>) {
        let (tx, rx) = mpsc::channel(command_capacity);
        let actor = HubActor {
            clients: HashMap::new(),
            commands: rx,
        };
        let handle = tokio::spawn(actor.run(shutdown));
        (Self { commands: tx }, handle)
    }

    /// Add a viewer to the registry
    pub async fn register(&self, client: ClientHandle) -> Result<()> {
        self.commands
            .send(Command::Register(client))
            .await
            .map_err(|_| Error::HubClosed)
    }

    /// Remove a viewer; unknown or already removed ids are ignored
    pub async fn unregister(&self, id: &ClientId) {
        if self.commands.send(Command::Unregister(id.clone())).await.is_err() {
            debug!(client_id = %id, "Hub already shut down, nothing to unregister");
        }
    }

    /// Serialize `envelope` once and offer it to every registered viewer
    pub async fn broadcast(&self, envelope: &Envelope) {
        let kind = envelope.kind();
        let frame = match envelope.to_frame() {
            Ok(frame) => frame,
            Err(e) => {
                error!(kind = kind, error = %e, "Failed to encode envelope, dropping it");
                return;
            }
        };

        if self
            .commands
            .send(Command::Broadcast { frame, kind })
            .await
            .is_err()
        {
            debug!(kind = kind, "Hub shut down, broadcast discarded");
        }
    }

    /// Number of registered viewers; 0 once the hub has shut down
    pub async fn client_count(&self) -> usize {
        let (tx, rx) = oneshot::channel();
        if self.commands.send(Command::ClientCount(tx)).await.is_err() {
            return 0;
        }
        rx.await.unwrap_or(0)
    }
}

struct HubActor {
    clients: HashMap<ClientId, ClientHandle>,
    commands: mpsc::Receiver<Command>,
}

impl HubActor {
    async fn run(mut self, shutdown: CancellationToken) {
        info!("Broadcast hub started");

        loop {
            let command = tokio::select! {
                biased;
                () = shutdown.cancelled() => break,
                command = self.commands.recv() => match command {
                    Some(command) => command,
                    None => break,
                },
            };

            match command {
                Command::Register(client) => self.register(client),
                Command::Unregister(id) => self.unregister(&id),
                Command::Broadcast { frame, kind } => self.broadcast(&frame, kind),
                Command::ClientCount(reply) => {
                    let _ = reply.send(self.clients.len());
                }
            }
        }

        // Dropping the handles closes every queue, which ends the drain loops.
        let remaining = self.clients.len();
        self.clients.clear();
        info!(remaining_clients = remaining, "Broadcast hub stopped");
    }

    fn register(&mut self, client: ClientHandle) {
        let id = client.id().clone();
        self.clients.insert(id.clone(), client);
        info!(
            client_id = %id,
            total_clients = self.clients.len(),
            "Viewer registered"
        );
    }

    fn unregister(&mut self, id: &ClientId) {
        if self.clients.remove(id).is_some() {
            info!(
                client_id = %id,
                total_clients = self.clients.len(),
                "Viewer unregistered"
            );
        } else {
            debug!(client_id = %id, "Viewer already unregistered");
        }
    }

    fn broadcast(&mut self, frame: &Bytes, kind: &'static str) {
        let mut delivered = 0usize;
        let mut dropped = 0usize;

        self.clients.retain(|id, client| {
            if client.send(frame.clone()) {
                delivered += 1;
                true
            } else if client.is_closed() {
                debug!(client_id = %id, "Viewer queue closed, removing from registry");
                false
            } else {
                dropped += 1;
                debug!(client_id = %id, kind = kind, "Viewer queue full, message dropped");
                true
            }
        });

        trace!(
            kind = kind,
            delivered = delivered,
            dropped = dropped,
            "Broadcast complete"
        );
    }
}
