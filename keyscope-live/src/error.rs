//! Error types for the live pipeline

use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error {
    #[error("Store error: {0}")]
    Store(#[from] keyscope_core::Error),

    #[error("Hub is shut down")]
    HubClosed,
}

/// Result type for live pipeline operations
pub type Result<T> = std::result::Result<T, Error>;
