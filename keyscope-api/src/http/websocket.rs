//! WebSocket delivery of live envelopes
//!
//! Each connection gets a bounded outbound queue registered with the hub.
//! The drain loop runs in its own task and writes JSON text frames; the
//! handler task reads the socket only to notice the viewer leaving. Both
//! share one cancellation scope, so whichever exits first tears down the
//! other, and the viewer is unregistered exactly once.

use async_trait::async_trait;
use axum::{
    extract::{
        ws::{Message, WebSocket},
        State, WebSocketUpgrade,
    },
    response::IntoResponse,
};
use bytes::Bytes;
use futures::stream::{SplitSink, SplitStream};
use futures::{SinkExt, StreamExt};
use keyscope_live::client::{self, run_drain_loop};
use keyscope_live::FrameSink;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::http::AppState;

/// Viewers never send anything meaningful; keep inbound frames small
const MAX_INBOUND_MESSAGE_SIZE: usize = 4 * 1024;

/// Websocket write half adapted to the drain loop
struct WebSocketSink {
    sender: SplitSink<WebSocket, Message>,
}

#[async_trait]
impl FrameSink for WebSocketSink {
    async fn send_frame(&mut self, frame: Bytes) -> anyhow::Result<()> {
        let text = String::from_utf8(frame.to_vec())?;
        self.sender.send(Message::Text(text.into())).await?;
        Ok(())
    }

    async fn close(&mut self) {
        let _ = self.sender.send(Message::Close(None)).await;
        let _ = self.sender.close().await;
    }
}

/// GET /ws - Upgrade into a live view connection
pub async fn websocket_handler(
    State(state): State<AppState>,
    ws: WebSocketUpgrade,
) -> impl IntoResponse {
    ws.max_message_size(MAX_INBOUND_MESSAGE_SIZE)
        .on_upgrade(move |socket| handle_socket(socket, state))
}

async fn handle_socket(socket: WebSocket, state: AppState) {
    let (handle, queue) = client::channel(state.queue_capacity);
    let client_id = handle.id().clone();

    // The snapshot may be slow; the controller settles its live flag when
    // it queues the greeting and registers the viewer.
    let snapshot = state.stats.snapshot().await;
    if let Err(e) = state.controller.admit(handle, snapshot).await {
        warn!(client_id = %client_id, error = %e, "Rejecting viewer");
        return;
    }
    info!(client_id = %client_id, "Live view connection established");

    let (sender, receiver) = socket.split();
    let scope = state.shutdown.child_token();

    let drain_scope = scope.clone();
    let write_timeout = state.write_timeout;
    let drain = tokio::spawn(async move {
        let _guard = drain_scope.clone().drop_guard();
        run_drain_loop(queue, WebSocketSink { sender }, write_timeout, drain_scope).await
    });

    watch_liveness(receiver, &scope).await;
    scope.cancel();

    state.hub.unregister(&client_id).await;
    match drain.await {
        Ok(exit) => info!(client_id = %client_id, exit = ?exit, "Live view connection closed"),
        Err(e) => warn!(client_id = %client_id, error = %e, "Drain task failed"),
    }
}

/// Read until the viewer goes away or the scope is cancelled
async fn watch_liveness(mut receiver: SplitStream<WebSocket>, scope: &CancellationToken) {
    loop {
        tokio::select! {
            biased;
            () = scope.cancelled() => return,
            message = receiver.next() => match message {
                Some(Ok(Message::Close(_))) | None => {
                    debug!("Viewer closed the connection");
                    return;
                }
                Some(Err(e)) => {
                    debug!(error = %e, "Viewer connection read failed");
                    return;
                }
                Some(Ok(_)) => {}
            },
        }
    }
}
