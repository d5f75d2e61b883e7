//! Configuration module for the filecourier server.
//!
//! Supports both command-line arguments and TOML configuration file.
//! CLI arguments take precedence over config file values.

use clap::{Parser, ValueEnum};
use serde::Deserialize;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::time::Duration;
use thiserror::Error;

/// Protocol served on accepted connections.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize, ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum ProtocolType {
    /// Framed upload/download of named files
    #[default]
    Transfer,
    /// Plain echo demo, no framing
    Echo,
}

/// Command-line arguments for the server
#[derive(Parser, Debug, Default)]
#[command(name = "filecourier")]
#[command(version)]
#[command(about = "A TCP file transfer server", long_about = None)]
pub struct CliArgs {
    /// Path to TOML configuration file
    #[arg(short, long)]
    pub config: Option<PathBuf>,

    /// Address to bind to (e.g., 0.0.0.0:50001)
    #[arg(long)]
    pub listen: Option<String>,

    /// Port to listen on (overrides the port of the listen address)
    #[arg(short = 'l', long)]
    pub port: Option<u16>,

    /// Maximum number of pending connections in the accept backlog
    #[arg(short = 'b', long)]
    pub backlog: Option<i32>,

    /// Maximum number of simultaneous connections
    #[arg(short = 'm', long)]
    pub max_connections: Option<usize>,

    /// Protocol to serve
    #[arg(short = 'p', long, value_enum)]
    pub protocol: Option<ProtocolType>,

    /// Directory uploads are written to and downloads are read from
    #[arg(short = 'd', long)]
    pub data_root: Option<PathBuf>,

    /// Socket read size and download read size in bytes
    #[arg(long)]
    pub chunk_size: Option<usize>,

    /// Close connections idle for this many seconds (0 = never)
    #[arg(long)]
    pub idle_timeout: Option<u64>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long)]
    pub log_level: Option<String>,
}

/// TOML configuration file structure
#[derive(Debug, Deserialize, Default)]
pub struct TomlConfig {
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub transfer: TransferConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
}

/// Server-related configuration
#[derive(Debug, Deserialize)]
pub struct ServerConfig {
    /// Address to bind to
    #[serde(default = "default_listen")]
    pub listen: String,
    /// Accept backlog
    #[serde(default = "default_backlog")]
    pub backlog: i32,
    /// Connection limit
    #[serde(default = "default_max_connections")]
    pub max_connections: usize,
    #[serde(default)]
    pub protocol: ProtocolType,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            listen: default_listen(),
            backlog: default_backlog(),
            max_connections: default_max_connections(),
            protocol: ProtocolType::default(),
        }
    }
}

/// File transfer configuration
#[derive(Debug, Deserialize)]
pub struct TransferConfig {
    #[serde(default = "default_data_root")]
    pub data_root: PathBuf,
    #[serde(default = "default_chunk_size")]
    pub chunk_size: usize,
    /// Idle timeout in seconds (0 = disabled)
    #[serde(default)]
    pub idle_timeout: u64,
}

impl Default for TransferConfig {
    fn default() -> Self {
        Self {
            data_root: default_data_root(),
            chunk_size: default_chunk_size(),
            idle_timeout: 0,
        }
    }
}

/// Logging configuration
#[derive(Debug, Deserialize)]
pub struct LoggingConfig {
    /// Log level
    #[serde(default = "default_log_level")]
    pub level: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
        }
    }
}

fn default_listen() -> String {
    "0.0.0.0:50001".to_string()
}

fn default_backlog() -> i32 {
    100
}

fn default_max_connections() -> usize {
    1024
}

fn default_data_root() -> PathBuf {
    PathBuf::from("data/server")
}

fn default_chunk_size() -> usize {
    1024
}

fn default_log_level() -> String {
    "info".to_string()
}

/// Final resolved configuration
#[derive(Debug, Clone)]
pub struct Config {
    pub listen: SocketAddr,
    pub backlog: i32,
    pub max_connections: usize,
    pub protocol: ProtocolType,
    pub data_root: PathBuf,
    pub chunk_size: usize,
    /// Idle timeout in seconds (0 = disabled)
    pub idle_timeout: u64,
    pub log_level: String,
}

impl Default for Config {
    fn default() -> Self {
        let server = ServerConfig::default();
        let transfer = TransferConfig::default();
        Self {
            listen: SocketAddr::from(([0, 0, 0, 0], 50001)),
            backlog: server.backlog,
            max_connections: server.max_connections,
            protocol: server.protocol,
            data_root: transfer.data_root,
            chunk_size: transfer.chunk_size,
            idle_timeout: transfer.idle_timeout,
            log_level: default_log_level(),
        }
    }
}

impl Config {
    /// Load configuration from CLI args and optional TOML file.
    /// CLI arguments take precedence over TOML file values.
    pub fn load() -> Result<Self, ConfigError> {
        let cli = CliArgs::parse();

        // Load TOML config if specified
        let toml_config = if let Some(ref config_path) = cli.config {
            let contents = std::fs::read_to_string(config_path)
                .map_err(|e| ConfigError::FileRead(config_path.clone(), e))?;
            toml::from_str(&contents)
                .map_err(|e| ConfigError::TomlParse(config_path.clone(), e))?
        } else {
            TomlConfig::default()
        };

        Self::resolve(cli, toml_config)
    }

    /// Merge CLI args over TOML values and validate the result.
    pub fn resolve(cli: CliArgs, toml_config: TomlConfig) -> Result<Self, ConfigError> {
        let listen = cli.listen.unwrap_or(toml_config.server.listen);
        let mut listen: SocketAddr = listen
            .parse()
            .map_err(|_| ConfigError::InvalidListen(listen.clone()))?;
        if let Some(port) = cli.port {
            listen.set_port(port);
        }

        let chunk_size = cli.chunk_size.unwrap_or(toml_config.transfer.chunk_size);
        if chunk_size == 0 {
            return Err(ConfigError::Invalid("chunk_size must be greater than 0"));
        }

        let max_connections = cli
            .max_connections
            .unwrap_or(toml_config.server.max_connections);
        if max_connections == 0 {
            return Err(ConfigError::Invalid("max_connections must be greater than 0"));
        }

        Ok(Config {
            listen,
            backlog: cli.backlog.unwrap_or(toml_config.server.backlog),
            max_connections,
            protocol: cli.protocol.unwrap_or(toml_config.server.protocol),
            data_root: cli.data_root.unwrap_or(toml_config.transfer.data_root),
            chunk_size,
            idle_timeout: cli.idle_timeout.unwrap_or(toml_config.transfer.idle_timeout),
            log_level: cli.log_level.unwrap_or(toml_config.logging.level),
        })
    }

    /// Idle timeout, if enabled.
    pub fn idle_timeout(&self) -> Option<Duration> {
        (self.idle_timeout > 0).then(|| Duration::from_secs(self.idle_timeout))
    }
}

/// Configuration loading errors
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read config file {0:?}: {1}")]
    FileRead(PathBuf, std::io::Error),
    #[error("Failed to parse config file {0:?}: {1}")]
    TomlParse(PathBuf, toml::de::Error),
    #[error("Invalid listen address '{0}'")]
    InvalidListen(String),
    #[error("Invalid configuration: {0}")]
    Invalid(&'static str),
}
