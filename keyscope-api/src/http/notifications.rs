//! Live view toggle endpoints
//!
//! The only way the HTTP layer touches the subscription lifecycle.

use axum::{extract::State, Json};
use serde::{Deserialize, Serialize};
use tracing::info;

use crate::http::error::AppResult;
use crate::http::AppState;

/// GET /api/notifications response
#[derive(Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct NotificationStatus {
    pub live: bool,
    pub clients: usize,
}

/// Response for enable / disable
#[derive(Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct ToggleResponse {
    pub live: bool,
    /// False when the requested state already held
    pub changed: bool,
}

/// GET /api/notifications - Current live state and viewer count
pub async fn get_status(State(state): State<AppState>) -> Json<NotificationStatus> {
    Json(NotificationStatus {
        live: state.controller.is_enabled(),
        clients: state.hub.client_count().await,
    })
}

/// POST /api/notifications/enable
pub async fn enable(State(state): State<AppState>) -> AppResult<Json<ToggleResponse>> {
    let changed = state.controller.enable().await?;
    info!(changed = changed, "Live view enable requested");

    Ok(Json(ToggleResponse {
        live: state.controller.is_enabled(),
        changed,
    }))
}

/// POST /api/notifications/disable
pub async fn disable(State(state): State<AppState>) -> Json<ToggleResponse> {
    let changed = state.controller.disable().await;
    info!(changed = changed, "Live view disable requested");

    Json(ToggleResponse {
        live: state.controller.is_enabled(),
        changed,
    })
}
