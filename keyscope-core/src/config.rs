use config::{Config as ConfigBuilder, ConfigError, Environment, File};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

/// Frames queued for a viewer on connect (status, then stats)
pub const GREETING_FRAMES: usize = 2;

/// Application configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub server: ServerConfig,
    pub redis: RedisConfig,
    pub live: LiveConfig,
    pub logging: LoggingConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub host: String,
    pub http_port: u16,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            http_port: 8080,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RedisConfig {
    pub url: String,
    /// Logical database to watch and measure; overrides any `/<db>` in `url`
    pub db: u32,
    pub connect_timeout_seconds: u64,
}

impl Default for RedisConfig {
    fn default() -> Self {
        Self {
            url: "redis://localhost:6379".to_string(),
            db: 0,
            connect_timeout_seconds: 5,
        }
    }
}

/// Live notification pipeline tuning
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LiveConfig {
    /// Write `notify-keyspace-events` at startup when the server has none
    pub auto_enable: bool,
    /// Only keys starting with this prefix reach viewers (empty = all keys)
    pub key_prefix: String,
    /// Capacity of the subscriber -> router event stream
    pub event_buffer: usize,
    /// Per-viewer outbound queue capacity
    pub client_queue_capacity: usize,
    /// Capacity of the hub command channel
    pub hub_command_capacity: usize,
    pub write_timeout_seconds: u64,
    pub stats_interval_seconds: u64,
}

impl Default for LiveConfig {
    fn default() -> Self {
        Self {
            auto_enable: false,
            key_prefix: String::new(),
            event_buffer: 100,
            client_queue_capacity: 256,
            hub_command_capacity: 1024,
            write_timeout_seconds: 10,
            stats_interval_seconds: 5,
        }
    }
}

impl LiveConfig {
    #[must_use]
    pub const fn write_timeout(&self) -> Duration {
        Duration::from_secs(self.write_timeout_seconds)
    }

    #[must_use]
    pub const fn stats_interval(&self) -> Duration {
        Duration::from_secs(self.stats_interval_seconds)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    pub level: String,
    pub format: String, // "json" or "pretty"
    pub file_path: Option<String>,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            format: "pretty".to_string(),
            file_path: None,
        }
    }
}

impl Config {
    /// Load configuration from multiple sources with priority:
    /// 1. Environment variables (highest priority)
    /// 2. Config file (if provided)
    /// 3. Defaults (lowest priority)
    pub fn load(config_file: Option<&str>) -> Result<Self, ConfigError> {
        let mut builder = ConfigBuilder::builder();

        if let Some(path) = config_file {
            if Path::new(path).exists() {
                builder = builder.add_source(File::with_name(path));
            }
        }

        // KEYSCOPE__LIVE__AUTO_ENABLE=true, KEYSCOPE__REDIS__URL=..., etc.
        builder = builder.add_source(
            Environment::with_prefix("KEYSCOPE")
                .prefix_separator("__")
                .separator("__")
                .try_parsing(true),
        );

        let config = builder.build()?;
        config.try_deserialize()
    }

    /// Load from environment variables only (for Docker/K8s)
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::load(None)
    }

    /// Load from file path
    pub fn from_file(path: &str) -> Result<Self, ConfigError> {
        Self::load(Some(path))
    }

    /// Check for misconfigurations, collecting every problem found
    pub fn validate(&self) -> Result<(), Vec<String>> {
        let mut errors = Vec::new();

        if self.server.http_port == 0 {
            errors.push("server.http_port must be non-zero".to_string());
        }
        if self.redis.url.is_empty() {
            errors.push("redis.url must be set".to_string());
        }
        if self.live.event_buffer == 0 {
            errors.push("live.event_buffer must be at least 1".to_string());
        }
        if self.live.client_queue_capacity < GREETING_FRAMES {
            errors.push(format!(
                "live.client_queue_capacity must be at least {GREETING_FRAMES} (connect greeting)"
            ));
        }
        if self.live.hub_command_capacity == 0 {
            errors.push("live.hub_command_capacity must be at least 1".to_string());
        }
        if self.live.write_timeout_seconds == 0 {
            errors.push("live.write_timeout_seconds must be at least 1".to_string());
        }
        if self.live.stats_interval_seconds == 0 {
            errors.push("live.stats_interval_seconds must be at least 1".to_string());
        }
        if !matches!(self.logging.format.as_str(), "json" | "pretty") {
            errors.push(format!(
                "logging.format must be \"json\" or \"pretty\", got {:?}",
                self.logging.format
            ));
        }

        if errors.is_empty() {
            Ok(())
        } else {
            Err(errors)
        }
    }

    #[must_use]
    pub fn redis_url(&self) -> &str {
        &self.redis.url
    }

    #[must_use]
    pub fn http_address(&self) -> String {
        format!("{}:{}", self.server.host, self.server.http_port)
    }
}
