use serde::Deserialize;
use std::convert::TryFrom;
use std::path::PathBuf;
use std::time::Duration;

use crate::error::PoolError;

/// Configuration for the server.
///
/// Loaded from an optional `pollhttpd` config file and from environment
/// variables with the "POLLHTTPD_" prefix. Every field has a default, so an
/// empty environment yields a usable configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct ServerConfig {
    /// Listening address. Defaults to "0.0.0.0".
    #[serde(default = "default_host")]
    pub host: String,
    /// Listening port. Defaults to 8080.
    #[serde(default = "default_port")]
    pub port: u16,
    /// Directory every request target is resolved under. Defaults to ".".
    #[serde(default = "default_root")]
    pub root: PathBuf,
    /// Per-connection request buffer size in bytes. Defaults to 1024.
    #[serde(default = "default_buffer_capacity")]
    pub buffer_capacity: usize,
    /// Number of connection slots. Defaults to 1024.
    #[serde(default = "default_max_connections")]
    pub max_connections: usize,
    /// Filename extension that marks a target as an executable script.
    #[serde(default = "default_script_extension")]
    pub script_extension: String,
    /// Program used to list directories. Defaults to "ls".
    #[serde(default = "default_listing_program")]
    pub listing_program: String,
    /// Flags passed to the listing program before the directory. Defaults to "-l".
    #[serde(default = "default_listing_flags")]
    pub listing_flags: String,
    /// Extra spawn attempts when the system is out of processes.
    #[serde(default = "default_spawn_retries")]
    pub spawn_retries: u32,
    /// Maximum number of dispatch threads. Zero dispatches on the loop thread.
    #[serde(default = "default_max_workers")]
    pub max_workers: usize,
    /// Keep-alive duration in seconds for idle dispatch threads.
    #[serde(default = "default_keep_alive_secs")]
    pub worker_keep_alive_secs: u64,
}

/// Implements conversion from the config crate's Config type to ServerConfig.
impl TryFrom<config::Config> for ServerConfig {
    type Error = config::ConfigError;

    fn try_from(config: config::Config) -> Result<Self, Self::Error> {
        config.try_deserialize()
    }
}

impl ServerConfig {
    /// Creates a new ServerConfig from the environment and config file.
    ///
    /// This method will:
    /// 1. Load environment variables from a .env file if present
    /// 2. Load configuration from a "pollhttpd" file (if it exists)
    /// 3. Override with environment variables prefixed with "POLLHTTPD_"
    ///
    /// # Errors
    /// Returns a ConfigError if configuration loading or parsing fails.
    pub fn new() -> Result<Self, config::ConfigError> {
        dotenv::dotenv().ok();

        let builder = config::Config::builder()
            .add_source(config::File::with_name("pollhttpd").required(false))
            .add_source(config::Environment::with_prefix("POLLHTTPD"));

        builder.build()?.try_into()
    }

    /// Rejects values the connection pool cannot work with.
    pub fn validate(&self) -> Result<(), PoolError> {
        if self.root.as_os_str().is_empty() {
            return Err(PoolError::Config("root must not be empty".to_owned()));
        }
        if self.buffer_capacity < 4 {
            return Err(PoolError::Config(format!(
                "buffer_capacity must hold the 4-byte terminator, got {}",
                self.buffer_capacity
            )));
        }
        if self.max_connections == 0 {
            return Err(PoolError::Config("max_connections must be positive".to_owned()));
        }
        Ok(())
    }

    /// The `host:port` pair to bind.
    pub fn address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    /// Converts the worker_keep_alive_secs value into a Duration.
    pub fn worker_keep_alive(&self) -> Duration {
        Duration::from_secs(self.worker_keep_alive_secs)
    }
}

fn default_host() -> String {
    "0.0.0.0".to_string()
}

fn default_port() -> u16 {
    8080
}

fn default_root() -> PathBuf {
    PathBuf::from(".")
}

fn default_buffer_capacity() -> usize {
    1024
}

/// The classic descriptor-set size.
fn default_max_connections() -> usize {
    1024
}

fn default_script_extension() -> String {
    "cgi".to_string()
}

fn default_listing_program() -> String {
    "ls".to_string()
}

fn default_listing_flags() -> String {
    "-l".to_string()
}

fn default_spawn_retries() -> u32 {
    3
}

/// Default value for max_workers. Returns CPU count * 4.
fn default_max_workers() -> usize {
    num_cpus::get() * 4
}

fn default_keep_alive_secs() -> u64 {
    6
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            root: default_root(),
            buffer_capacity: default_buffer_capacity(),
            max_connections: default_max_connections(),
            script_extension: default_script_extension(),
            listing_program: default_listing_program(),
            listing_flags: default_listing_flags(),
            spawn_retries: default_spawn_retries(),
            max_workers: default_max_workers(),
            worker_keep_alive_secs: default_keep_alive_secs(),
        }
    }
}
