//! Server lifecycle management
//!
//! Wires the live pipeline together and runs it next to the HTTP server:
//! - broadcast hub actor
//! - notification controller (startup check, auto-enable)
//! - stats publisher
//! - HTTP/WebSocket server
//!
//! Every task hangs off one process-wide cancellation token.

use std::sync::Arc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use keyscope_api::{create_router, AppState};
use keyscope_core::{Config, Store};
use keyscope_live::{Hub, KeyFilter, NotificationController, StatsPublisher};

/// Keyscope server - owns the pipeline tasks and the HTTP server
pub struct KeyscopeServer {
    config: Config,
    store: Arc<dyn Store>,
    shutdown: CancellationToken,
}

impl KeyscopeServer {
    pub fn new(config: Config, store: Arc<dyn Store>) -> Self {
        Self {
            config,
            store,
            shutdown: CancellationToken::new(),
        }
    }

    /// Start everything and wait for a shutdown signal
    pub async fn start(self) -> anyhow::Result<()> {
        info!("Starting Keyscope server...");
        let live = &self.config.live;

        let (hub, hub_handle) = Hub::spawn(live.hub_command_capacity, self.shutdown.clone());

        let controller = Arc::new(NotificationController::new(
            Arc::clone(&self.store),
            hub.clone(),
            self.config.redis.db,
            KeyFilter::new(live.key_prefix.clone()),
            live.event_buffer,
            self.shutdown.clone(),
        ));
        controller.start(live.auto_enable).await;
        info!(
            live = controller.is_enabled(),
            auto_enable = live.auto_enable,
            "Notification controller initialized"
        );

        let stats = Arc::new(StatsPublisher::new(
            Arc::clone(&self.store),
            hub.clone(),
            Arc::clone(&controller),
            live.stats_interval(),
        ));
        let stats_handle = tokio::spawn(Arc::clone(&stats).run(self.shutdown.clone()));

        let state = AppState {
            controller,
            hub,
            stats,
            queue_capacity: live.client_queue_capacity,
            write_timeout: live.write_timeout(),
            shutdown: self.shutdown.clone(),
        };
        let mut http_handle = self.start_http_server(state).await?;

        // Wait for either the HTTP server to stop or a shutdown signal
        tokio::select! {
            result = &mut http_handle => {
                if let Err(e) = result {
                    error!("HTTP server task failed: {}", e);
                }
                warn!("HTTP server stopped unexpectedly, shutting down");
            }
            () = shutdown_signal() => {
                info!("Shutdown signal received, starting graceful shutdown...");
            }
        }

        self.shutdown.cancel();
        self.join(hub_handle, "hub").await;
        self.join(stats_handle, "stats publisher").await;
        if !http_handle.is_finished() {
            self.join(http_handle, "HTTP server").await;
        }

        info!("Keyscope server stopped");
        Ok(())
    }

    async fn join(&self, handle: JoinHandle<()>, name: &str) {
        if let Err(e) = handle.await {
            error!("{} task failed: {}", name, e);
        }
    }

    /// Bind the listener and serve until the shutdown token fires
    async fn start_http_server(&self, state: AppState) -> anyhow::Result<JoinHandle<()>> {
        let http_address = self.config.http_address();
        let http_addr: std::net::SocketAddr = http_address
            .parse()
            .map_err(|e| anyhow::anyhow!("Invalid HTTP address '{http_address}': {e}"))?;

        let listener = tokio::net::TcpListener::bind(http_addr)
            .await
            .map_err(|e| anyhow::anyhow!("Failed to bind HTTP address {http_addr}: {e}"))?;
        info!("HTTP server listening on {}", http_addr);

        let router = create_router(state);
        let shutdown = self.shutdown.clone();

        let handle = tokio::spawn(async move {
            if let Err(e) = axum::serve(listener, router)
                .with_graceful_shutdown(async move { shutdown.cancelled().await })
                .await
            {
                error!("HTTP server error: {}", e);
            }

            info!("HTTP server shut down gracefully");
        });

        Ok(handle)
    }
}

/// Wait for a shutdown signal (SIGTERM or SIGINT/Ctrl+C)
async fn shutdown_signal() {
    let ctrl_c = async {
        match tokio::signal::ctrl_c().await {
            Ok(()) => {
                info!("Received Ctrl+C signal");
            }
            Err(e) => {
                error!("Failed to install Ctrl+C handler: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
                info!("Received SIGTERM signal");
            }
            Err(e) => {
                error!("Failed to install SIGTERM handler: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {}
        () = terminate => {}
    }
}
