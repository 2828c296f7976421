// Module: http
// Axum router and shared state for the live view

pub mod error;
pub mod health;
pub mod notifications;
pub mod websocket;

use axum::{
    routing::{get, post},
    Router,
};
use keyscope_live::{Hub, NotificationController, StatsPublisher};
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

pub use error::{AppError, AppResult};

/// Shared application state
#[derive(Clone)]
pub struct AppState {
    pub controller: Arc<NotificationController>,
    pub hub: Hub,
    pub stats: Arc<StatsPublisher>,
    /// Outbound queue capacity for each new viewer
    pub queue_capacity: usize,
    pub write_timeout: Duration,
    /// Process-wide token; every connection scope is a child of it
    pub shutdown: CancellationToken,
}

/// Create the HTTP router
pub fn create_router(state: AppState) -> Router {
    let router = Router::new()
        .merge(health::create_health_router())
        .route("/ws", get(websocket::websocket_handler))
        .route("/api/notifications", get(notifications::get_status))
        .route("/api/notifications/enable", post(notifications::enable))
        .route("/api/notifications/disable", post(notifications::disable));

    let router = router
        .layer(
            CorsLayer::new()
                .allow_origin(Any)
                .allow_methods(Any)
                .allow_headers(Any),
        )
        .layer(TraceLayer::new_for_http());

    // Apply state to all routes (must be last)
    router.with_state(state)
}
