//! Live keyspace notification pipeline
//!
//! Subscriber -> router -> hub -> per-viewer delivery channels, with the
//! controller owning the subscription lifecycle and the stats publisher
//! feeding the same hub on its own timer.

pub mod client;
pub mod controller;
pub mod error;
pub mod hub;
pub mod router;
pub mod stats;
pub mod subscriber;

pub use client::{ClientHandle, ClientId, ClientQueue, DrainExit, FrameSink};
pub use controller::NotificationController;
pub use error::{Error, Result};
pub use hub::Hub;
pub use router::KeyFilter;
pub use stats::StatsPublisher;
