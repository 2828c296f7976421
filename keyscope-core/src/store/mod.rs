//! Access to the watched key-value store
//!
//! The pipeline only needs a handful of server-level operations: reading and
//! writing the keyspace notification setting, opening a pattern
//! subscription, and two health numbers. They sit behind [`Store`] so the
//! pipeline can run against [`crate::test_helpers::MemoryStore`] in tests.

mod redis_store;

pub use redis_store::{parse_memory_info, RedisStore};

use async_trait::async_trait;
use futures::stream::BoxStream;

use crate::Result;

/// Name of the server setting controlling keyspace notifications
pub const NOTIFY_CONFIG_KEY: &str = "notify-keyspace-events";

/// Keyspace + keyevent channels, all commands, generic, expired and evicted
pub const NOTIFY_FLAGS: &str = "KEAgxe";

/// A message as delivered by a pattern subscription
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawNotification {
    pub channel: String,
    pub payload: String,
}

impl RawNotification {
    pub fn new(channel: impl Into<String>, payload: impl Into<String>) -> Self {
        Self {
            channel: channel.into(),
            payload: payload.into(),
        }
    }
}

/// Messages from an open pattern subscription; ends when the connection does
pub type NotificationStream = BoxStream<'static, RawNotification>;

/// Memory figures reported by the server
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MemoryUsage {
    pub used_memory: i64,
    pub used_memory_human: String,
}

#[async_trait]
pub trait Store: Send + Sync {
    /// Current notification flags; empty when notifications are off
    async fn notification_config(&self) -> Result<String>;

    async fn set_notification_config(&self, flags: &str) -> Result<()>;

    /// Open a pattern subscription. The returned stream is independent of
    /// the store's command connection.
    async fn psubscribe(&self, pattern: &str) -> Result<NotificationStream>;

    async fn db_size(&self) -> Result<i64>;

    async fn memory_usage(&self) -> Result<MemoryUsage>;
}
