//! Health check endpoint for monitoring probes

use axum::{response::IntoResponse, routing::get, Router};

use crate::http::AppState;

/// Health check router
pub fn create_health_router() -> Router<AppState> {
    Router::new().route("/health", get(health_check))
}

/// Always returns OK while the server is running; the live view being
/// disabled does not make the process unhealthy
pub async fn health_check() -> impl IntoResponse {
    "OK"
}
