//! Test helpers and fixtures
//!
//! [`MemoryStore`] stands in for a Redis server in pipeline tests: it keeps
//! the notification setting, hands out pattern subscriptions fed by
//! in-process channels, and can be told to fail individual operations.

use async_trait::async_trait;
use futures::StreamExt;
use parking_lot::Mutex;
use tokio::sync::mpsc;
use tokio_stream::wrappers::UnboundedReceiverStream;

use crate::store::{MemoryUsage, NotificationStream, RawNotification, Store};
use crate::{Error, Result};

#[derive(Default)]
struct Inner {
    notify_flags: String,
    config_writes: Vec<String>,
    patterns: Vec<String>,
    subscriptions: Vec<(String, mpsc::UnboundedSender<RawNotification>)>,
    db_size: i64,
    db_size_calls: usize,
    memory: Option<MemoryUsage>,
    fail_config: bool,
    fail_subscribe: bool,
}

/// In-memory [`Store`] for tests
#[derive(Default)]
pub struct MemoryStore {
    inner: Mutex<Inner>,
}

impl MemoryStore {
    /// A store with notifications switched off
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn with_notify_flags(flags: &str) -> Self {
        let store = Self::new();
        store.inner.lock().notify_flags = flags.to_string();
        store
    }

    pub fn set_db_size(&self, size: i64) {
        self.inner.lock().db_size = size;
    }

    /// `None` makes `memory_usage` fail
    pub fn set_memory(&self, memory: Option<MemoryUsage>) {
        self.inner.lock().memory = memory;
    }

    pub fn fail_config(&self, fail: bool) {
        self.inner.lock().fail_config = fail;
    }

    pub fn fail_subscribe(&self, fail: bool) {
        self.inner.lock().fail_subscribe = fail;
    }

    #[must_use]
    pub fn notify_flags(&self) -> String {
        self.inner.lock().notify_flags.clone()
    }

    /// Every value written through `set_notification_config`, in order
    #[must_use]
    pub fn config_writes(&self) -> Vec<String> {
        self.inner.lock().config_writes.clone()
    }

    /// Every pattern passed to `psubscribe`, in order
    #[must_use]
    pub fn patterns(&self) -> Vec<String> {
        self.inner.lock().patterns.clone()
    }

    /// How many times `db_size` was queried
    #[must_use]
    pub fn db_size_calls(&self) -> usize {
        self.inner.lock().db_size_calls
    }

    /// Subscriptions whose stream is still held by someone
    #[must_use]
    pub fn open_subscriptions(&self) -> usize {
        let mut inner = self.inner.lock();
        inner.subscriptions.retain(|(_, tx)| !tx.is_closed());
        inner.subscriptions.len()
    }

    /// Deliver a raw message to every subscription whose pattern matches
    pub fn publish(&self, channel: &str, payload: &str) -> usize {
        let mut inner = self.inner.lock();
        inner.subscriptions.retain(|(_, tx)| !tx.is_closed());
        inner
            .subscriptions
            .iter()
            .filter(|(pattern, _)| pattern_matches(pattern, channel))
            .filter(|(_, tx)| tx.send(RawNotification::new(channel, payload)).is_ok())
            .count()
    }

    /// Simulate a key mutation; emits a keyspace notification only when the
    /// notification setting is non-empty, as a real server would
    pub fn touch(&self, db: u32, key: &str, op: &str) -> usize {
        if self.inner.lock().notify_flags.is_empty() {
            return 0;
        }
        self.publish(&format!("__keyspace@{db}__:{key}"), op)
    }

    /// Simulate the server dropping every subscription connection
    pub fn drop_subscriptions(&self) {
        self.inner.lock().subscriptions.clear();
    }
}

fn pattern_matches(pattern: &str, channel: &str) -> bool {
    match pattern.strip_suffix('*') {
        Some(prefix) => channel.starts_with(prefix),
        None => pattern == channel,
    }
}

#[async_trait]
impl Store for MemoryStore {
    async fn notification_config(&self) -> Result<String> {
        let inner = self.inner.lock();
        if inner.fail_config {
            return Err(Error::Timeout("injected CONFIG GET failure".to_string()));
        }
        Ok(inner.notify_flags.clone())
    }

    async fn set_notification_config(&self, flags: &str) -> Result<()> {
        let mut inner = self.inner.lock();
        if inner.fail_config {
            return Err(Error::Timeout("injected CONFIG SET failure".to_string()));
        }
        inner.notify_flags = flags.to_string();
        inner.config_writes.push(flags.to_string());
        Ok(())
    }

    async fn psubscribe(&self, pattern: &str) -> Result<NotificationStream> {
        let mut inner = self.inner.lock();
        if inner.fail_subscribe {
            return Err(Error::Timeout("injected PSUBSCRIBE failure".to_string()));
        }
        let (tx, rx) = mpsc::unbounded_channel();
        inner.patterns.push(pattern.to_string());
        inner.subscriptions.push((pattern.to_string(), tx));
        Ok(UnboundedReceiverStream::new(rx).boxed())
    }

    async fn db_size(&self) -> Result<i64> {
        let mut inner = self.inner.lock();
        inner.db_size_calls += 1;
        Ok(inner.db_size)
    }

    async fn memory_usage(&self) -> Result<MemoryUsage> {
        self.inner
            .lock()
            .memory
            .clone()
            .ok_or_else(|| Error::UnexpectedReply("memory stats unavailable".to_string()))
    }
}
