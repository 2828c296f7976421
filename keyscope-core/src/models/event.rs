use serde::{Deserialize, Serialize};
use std::fmt;

/// Operation code carried in a keyspace notification payload
///
/// The common codes get their own variant; anything else the server emits
/// (`hset`, `lpush`, `incrby`, ...) is kept verbatim in `Other`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum Operation {
    Set,
    Del,
    Expire,
    Expired,
    Evicted,
    RenameFrom,
    RenameTo,
    Other(String),
}

impl Operation {
    #[must_use]
    pub fn as_str(&self) -> &str {
        match self {
            Self::Set => "set",
            Self::Del => "del",
            Self::Expire => "expire",
            Self::Expired => "expired",
            Self::Evicted => "evicted",
            Self::RenameFrom => "rename_from",
            Self::RenameTo => "rename_to",
            Self::Other(op) => op,
        }
    }
}

impl From<&str> for Operation {
    fn from(op: &str) -> Self {
        match op {
            "set" => Self::Set,
            "del" => Self::Del,
            "expire" => Self::Expire,
            "expired" => Self::Expired,
            "evicted" => Self::Evicted,
            "rename_from" => Self::RenameFrom,
            "rename_to" => Self::RenameTo,
            other => Self::Other(other.to_string()),
        }
    }
}

impl From<String> for Operation {
    fn from(op: String) -> Self {
        Self::from(op.as_str())
    }
}

impl From<Operation> for String {
    fn from(op: Operation) -> Self {
        match op {
            Operation::Other(op) => op,
            known => known.as_str().to_string(),
        }
    }
}

impl fmt::Display for Operation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A single key mutation observed through keyspace notifications
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChangeEvent {
    #[serde(rename = "op")]
    pub operation: Operation,
    pub key: String,
}

impl ChangeEvent {
    pub fn new(operation: impl Into<Operation>, key: impl Into<String>) -> Self {
        Self {
            operation: operation.into(),
            key: key.into(),
        }
    }
}
