//! Configuration: a TOML file merged with command-line overrides, following
//! the teacher crate's `Config::load()` pattern (clap parses the CLI first,
//! a config file is read if present, every field falls back to a built-in
//! default otherwise).

use std::fs::read_to_string;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::time::Duration;

use anyhow::Result;
use clap::Parser;
use serde::Deserialize;

#[derive(Deserialize, Debug, Clone)]
#[serde(rename_all = "kebab-case")]
pub struct ServerConfig {
    #[serde(default = "ServerConfig::bind")]
    pub bind: SocketAddr,

    /// Frames larger than this are rejected (§8 "Boundary behaviors").
    #[serde(default = "ServerConfig::max_frame_bytes")]
    pub max_frame_bytes: usize,

    /// Tokio worker threads; defaults to the host's core count.
    #[serde(default = "num_cpus::get")]
    pub threads: usize,
}

impl ServerConfig {
    fn bind() -> SocketAddr {
        "0.0.0.0:3001".parse().unwrap()
    }

    fn max_frame_bytes() -> usize {
        crate::protocol::MAX_FRAME_BYTES
    }
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind: Self::bind(),
            max_frame_bytes: Self::max_frame_bytes(),
            threads: num_cpus::get(),
        }
    }
}

#[derive(Deserialize, Debug, Clone)]
#[serde(rename_all = "kebab-case")]
pub struct TransportPoolConfig {
    #[serde(default = "TransportPoolConfig::keepalive_secs")]
    pub keepalive_secs: u64,
    #[serde(default = "TransportPoolConfig::ready_timeout_secs")]
    pub ready_timeout_secs: u64,
    #[serde(default = "TransportPoolConfig::idle_close_secs")]
    pub idle_close_secs: u64,
}

impl TransportPoolConfig {
    fn keepalive_secs() -> u64 {
        10
    }

    fn ready_timeout_secs() -> u64 {
        20
    }

    fn idle_close_secs() -> u64 {
        5 * 60
    }

    pub fn keepalive(&self) -> Duration {
        Duration::from_secs(self.keepalive_secs)
    }

    pub fn ready_timeout(&self) -> Duration {
        Duration::from_secs(self.ready_timeout_secs)
    }

    pub fn idle_close(&self) -> Duration {
        Duration::from_secs(self.idle_close_secs)
    }
}

impl Default for TransportPoolConfig {
    fn default() -> Self {
        Self {
            keepalive_secs: Self::keepalive_secs(),
            ready_timeout_secs: Self::ready_timeout_secs(),
            idle_close_secs: Self::idle_close_secs(),
        }
    }
}

#[derive(Deserialize, Debug, Clone)]
#[serde(rename_all = "kebab-case")]
pub struct RemoteConfig {
    #[serde(default = "RemoteConfig::term")]
    pub term: String,
    /// Remembered remote parameters older than this are evicted (§3).
    #[serde(default = "RemoteConfig::remembered_max_age_days")]
    pub remembered_max_age_days: u64,
}

impl RemoteConfig {
    fn term() -> String {
        "xterm-256color".to_string()
    }

    fn remembered_max_age_days() -> u64 {
        7
    }
}

impl Default for RemoteConfig {
    fn default() -> Self {
        Self {
            term: Self::term(),
            remembered_max_age_days: Self::remembered_max_age_days(),
        }
    }
}

#[derive(Deserialize, Debug, Clone, Default)]
#[serde(rename_all = "kebab-case")]
pub struct ContainerConfig {
    /// Forces a specific runtime binary instead of probing candidates
    /// (§4.3 `detect()`).
    #[serde(default)]
    pub runtime_override: Option<String>,
}

#[derive(Deserialize, Debug, Clone)]
#[serde(rename_all = "kebab-case")]
pub struct PersistenceConfig {
    #[serde(default = "PersistenceConfig::data_dir")]
    pub data_dir: PathBuf,
}

impl PersistenceConfig {
    fn data_dir() -> PathBuf {
        PathBuf::from("./data")
    }
}

impl Default for PersistenceConfig {
    fn default() -> Self {
        Self {
            data_dir: Self::data_dir(),
        }
    }
}

#[derive(Deserialize, Debug, Clone, Copy, Default)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    Error,
    Warn,
    #[default]
    Info,
    Debug,
    Trace,
}

impl LogLevel {
    pub fn as_level(&self) -> log::Level {
        match self {
            Self::Error => log::Level::Error,
            Self::Warn => log::Level::Warn,
            Self::Info => log::Level::Info,
            Self::Debug => log::Level::Debug,
            Self::Trace => log::Level::Trace,
        }
    }
}

#[derive(Deserialize, Debug, Clone, Default)]
#[serde(rename_all = "kebab-case")]
pub struct LogConfig {
    #[serde(default)]
    pub level: LogLevel,
    #[serde(default)]
    pub file_directory: Option<PathBuf>,
}

#[derive(Deserialize, Debug, Clone, Default)]
#[serde(rename_all = "kebab-case")]
pub struct Config {
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub transport_pool: TransportPoolConfig,
    #[serde(default)]
    pub remote: RemoteConfig,
    #[serde(default)]
    pub container: ContainerConfig,
    #[serde(default)]
    pub persistence: PersistenceConfig,
    #[serde(default)]
    pub log: LogConfig,
}

#[derive(Parser, Debug)]
#[command(
    about = env!("CARGO_PKG_DESCRIPTION"),
    version = env!("CARGO_PKG_VERSION"),
)]
struct Cli {
    /// Path to a TOML configuration file. Missing file falls back to
    /// built-in defaults entirely.
    #[arg(long, short)]
    config: Option<PathBuf>,

    /// Overrides `[server] bind`.
    #[arg(long)]
    bind: Option<SocketAddr>,
}

impl Config {
    pub fn load() -> Result<Self> {
        let cli = Cli::parse();

        let mut config: Config = match &cli.config {
            Some(path) => toml::from_str(&read_to_string(path)?)?,
            None => Config::default(),
        };

        if let Some(bind) = cli.bind {
            config.server.bind = bind;
        }

        if let Ok(port) = std::env::var("PORT") {
            if let Ok(port) = port.parse::<u16>() {
                config.server.bind.set_port(port);
            }
        }

        Ok(config)
    }
}
