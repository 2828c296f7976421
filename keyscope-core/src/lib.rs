pub mod bootstrap;
pub mod config;
pub mod error;
pub mod logging;
pub mod models;
pub mod store;
pub mod test_helpers;

pub use config::Config;
pub use error::{Error, Result};
pub use models::{ChangeEvent, Envelope, LiveStatus, Operation, StatsSnapshot};
pub use store::{MemoryUsage, NotificationStream, RawNotification, RedisStore, Store};
