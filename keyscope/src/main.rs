mod server;

use anyhow::Result;
use clap::Parser;
use std::sync::Arc;
use std::time::Duration;
use tracing::info;

use keyscope_core::{bootstrap::load_config, logging, RedisStore, Store};

use server::KeyscopeServer;

/// Live keyspace notification viewer for Redis
#[derive(Parser, Debug)]
#[command(name = "keyscope", version, about)]
struct Args {
    /// Config file (YAML/TOML); KEYSCOPE__* environment variables override it
    #[arg(long, env = "KEYSCOPE_CONFIG_PATH")]
    config: Option<String>,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    // 1. Load and validate configuration (fail fast on misconfigurations)
    let config = load_config(args.config.as_deref())?;

    // 2. Initialize logging
    logging::init_logging(&config.logging)?;
    info!("Keyscope starting...");
    info!("HTTP address: {}", config.http_address());

    // 3. Redis client. Connecting is lazy; an unreachable server only leaves
    //    the live view disabled. `redis.db` overrides any database in the URL.
    let store: Arc<dyn Store> = Arc::new(RedisStore::open(
        config.redis_url(),
        config.redis.db,
        Duration::from_secs(config.redis.connect_timeout_seconds),
    )?);
    info!(db = config.redis.db, "Redis client configured");

    // 4. Run until a shutdown signal arrives
    KeyscopeServer::new(config, store).start().await
}
