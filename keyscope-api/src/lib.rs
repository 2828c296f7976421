// Keyscope API Library
//
// HTTP surface for the live view: websocket delivery and notification toggles

pub mod http;

pub use http::{create_router, AppState};
