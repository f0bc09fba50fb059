//! calc-server: arithmetic over a fixed binary protocol
//!
//! Features:
//! - Six operations: add, subtract, or, and, floor division, multiply
//! - One request and one 8-byte response per connection
//! - Sequential or task-per-connection scheduling
//! - Per-connection read timeout
//! - Graceful shutdown on SIGINT/SIGTERM
//! - Configuration via CLI arguments or TOML file

use calc_server::config::Config;
use calc_server::server::Server;
use tracing::info;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Load configuration
    let config = Config::load()?;

    // Initialize logging
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&config.log_level));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .init();

    info!(
        listen = %config.listen,
        mode = ?config.mode,
        read_timeout_ms = config.read_timeout.as_millis() as u64,
        max_connections = config.max_connections,
        backlog = config.backlog,
        "Starting calc-server"
    );

    let server = Server::bind(config)?;
    server.run().await?;
    Ok(())
}
