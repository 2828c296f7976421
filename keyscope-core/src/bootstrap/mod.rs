//! Startup helpers for the keyscope binary

pub mod config;

pub use config::{find_config_file, load_config};
