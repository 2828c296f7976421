use async_trait::async_trait;
use futures::{future, StreamExt};
use redis::aio::MultiplexedConnection;
use redis::{Client, FromRedisValue, IntoConnectionInfo};
use std::collections::HashMap;
use std::time::Duration;
use tokio::sync::Mutex;
use tokio::time::timeout;
use tracing::{debug, info, warn};

use super::{MemoryUsage, NotificationStream, RawNotification, Store, NOTIFY_CONFIG_KEY};
use crate::{Error, Result};

/// [`Store`] backed by a Redis server
///
/// Commands share one multiplexed connection that is opened lazily and
/// dropped after a connection-level failure so the next call reconnects.
/// Each pattern subscription gets a dedicated connection.
pub struct RedisStore {
    client: Client,
    op_timeout: Duration,
    conn: Mutex<Option<MultiplexedConnection>>,
}

impl RedisStore {
    /// Connection settings come from `url`, except the database: commands
    /// always run against `db`, the same database whose keyspace is watched.
    pub fn open(url: &str, db: u32, op_timeout: Duration) -> Result<Self> {
        let info = url.into_connection_info()?;
        if info.redis_settings().db() != i64::from(db) {
            debug!(
                url_db = info.redis_settings().db(),
                db = db,
                "Overriding database from Redis URL"
            );
        }
        let settings = info.redis_settings().clone().set_db(i64::from(db));
        let client = Client::open(info.set_redis_settings(settings))?;
        Ok(Self {
            client,
            op_timeout,
            conn: Mutex::new(None),
        })
    }

    async fn connection(&self) -> Result<MultiplexedConnection> {
        let mut guard = self.conn.lock().await;
        if let Some(conn) = guard.as_ref() {
            return Ok(conn.clone());
        }

        let conn = timeout(self.op_timeout, self.client.get_multiplexed_async_connection())
            .await
            .map_err(|_| Error::Timeout("connecting to Redis".to_string()))??;
        info!("Redis command connection established");
        *guard = Some(conn.clone());
        Ok(conn)
    }

    async fn query<T: FromRedisValue>(&self, cmd: &redis::Cmd) -> Result<T> {
        let mut conn = self.connection().await?;
        match timeout(self.op_timeout, cmd.query_async::<T>(&mut conn)).await {
            Ok(Ok(value)) => Ok(value),
            Ok(Err(e)) => {
                if e.is_connection_dropped() || e.is_io_error() {
                    debug!(error = %e, "Dropping broken Redis connection");
                    self.conn.lock().await.take();
                }
                Err(e.into())
            }
            Err(_) => {
                self.conn.lock().await.take();
                Err(Error::Timeout("Redis command".to_string()))
            }
        }
    }
}

#[async_trait]
impl Store for RedisStore {
    async fn notification_config(&self) -> Result<String> {
        let reply: HashMap<String, String> = self
            .query(redis::cmd("CONFIG").arg("GET").arg(NOTIFY_CONFIG_KEY))
            .await?;
        reply
            .get(NOTIFY_CONFIG_KEY)
            .cloned()
            .ok_or_else(|| {
                Error::UnexpectedReply(format!("CONFIG GET {NOTIFY_CONFIG_KEY} returned nothing"))
            })
    }

    async fn set_notification_config(&self, flags: &str) -> Result<()> {
        self.query::<()>(redis::cmd("CONFIG").arg("SET").arg(NOTIFY_CONFIG_KEY).arg(flags))
            .await
    }

    async fn psubscribe(&self, pattern: &str) -> Result<NotificationStream> {
        let mut pubsub = timeout(self.op_timeout, self.client.get_async_pubsub())
            .await
            .map_err(|_| Error::Timeout("opening Redis Pub/Sub connection".to_string()))??;

        timeout(self.op_timeout, pubsub.psubscribe(pattern))
            .await
            .map_err(|_| Error::Timeout(format!("subscribing to {pattern}")))??;

        info!(pattern = %pattern, "Redis pattern subscription opened");

        let stream = pubsub.into_on_message().filter_map(|msg| {
            let channel = msg.get_channel_name().to_string();
            let raw = match msg.get_payload::<String>() {
                Ok(payload) => Some(RawNotification { channel, payload }),
                Err(e) => {
                    warn!(error = %e, channel = %channel, "Invalid payload");
                    None
                }
            };
            future::ready(raw)
        });

        Ok(stream.boxed())
    }

    async fn db_size(&self) -> Result<i64> {
        self.query(&redis::cmd("DBSIZE")).await
    }

    async fn memory_usage(&self) -> Result<MemoryUsage> {
        let info: String = self.query(redis::cmd("INFO").arg("memory")).await?;
        parse_memory_info(&info).ok_or_else(|| {
            Error::UnexpectedReply("INFO memory has no used_memory field".to_string())
        })
    }
}

/// Extract `used_memory` and `used_memory_human` from an `INFO memory` reply
#[must_use]
pub fn parse_memory_info(info: &str) -> Option<MemoryUsage> {
    let mut used_memory = None;
    let mut used_memory_human = String::new();

    for line in info.lines() {
        match line.trim_end().split_once(':') {
            Some(("used_memory", value)) => used_memory = value.parse::<i64>().ok(),
            Some(("used_memory_human", value)) => used_memory_human = value.to_string(),
            _ => {}
        }
    }

    used_memory.map(|used_memory| MemoryUsage {
        used_memory,
        used_memory_human,
    })
}
