use bytes::Bytes;
use serde::{Deserialize, Serialize};

use super::event::ChangeEvent;

/// Wire message pushed to every viewer
///
/// Serialized as `{"type": "...", "data": {...}}`. Readers dispatch on `type`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", content = "data", rename_all = "snake_case")]
pub enum Envelope {
    KeyEvent(ChangeEvent),
    Stats(StatsSnapshot),
    Status(LiveStatus),
}

/// Periodic store health numbers
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StatsSnapshot {
    pub db_size: i64,
    pub used_memory: i64,
    pub used_memory_human: String,
    pub notifications_on: bool,
}

/// Whether the notification pipeline is live; `msg` is empty when there is nothing to add
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LiveStatus {
    pub live: bool,
    #[serde(default)]
    pub msg: String,
}

impl Envelope {
    pub fn status(live: bool, msg: impl Into<String>) -> Self {
        Self::Status(LiveStatus {
            live,
            msg: msg.into(),
        })
    }

    /// Discriminant as it appears on the wire
    #[must_use]
    pub const fn kind(&self) -> &'static str {
        match self {
            Self::KeyEvent(_) => "key_event",
            Self::Stats(_) => "stats",
            Self::Status(_) => "status",
        }
    }

    /// Serialize into a frame that can be shared by every viewer without copying
    pub fn to_frame(&self) -> crate::Result<Bytes> {
        Ok(Bytes::from(serde_json::to_vec(self)?))
    }
}

impl From<ChangeEvent> for Envelope {
    fn from(event: ChangeEvent) -> Self {
        Self::KeyEvent(event)
    }
}

impl From<StatsSnapshot> for Envelope {
    fn from(stats: StatsSnapshot) -> Self {
        Self::Stats(stats)
    }
}
