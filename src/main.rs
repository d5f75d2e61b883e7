//! filecourier server
//!
//! Serves uploads and downloads of named files over TCP.
//!
//! Features:
//! - Single-threaded readiness loop over any number of connections
//! - Filenames confined to one data directory
//! - Optional idle timeout and connection limit
//! - Configuration via CLI arguments or TOML file

use filecourier::config::Config;
use filecourier::runtime;
use tracing::info;
use tracing_subscriber::EnvFilter;

fn main() -> Result<(), Box<dyn std::error::Error>> {
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
        protocol = ?config.protocol,
        data_root = %config.data_root.display(),
        max_connections = config.max_connections,
        chunk_size = config.chunk_size,
        idle_timeout = config.idle_timeout,
        "Starting filecourier server"
    );

    runtime::run(config)
}
