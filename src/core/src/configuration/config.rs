use super::types::StorageBackend;
use crate::error_handling::types::ConfigError;
use clap::Parser;
use log::{debug, info};
use serde::{Deserialize, Serialize};
use std::fs;
use std::net::{IpAddr, SocketAddr};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Application configuration structure that defines all runtime parameters.
///
/// The configuration is read from a TOML file; every section and every field
/// has a default, so an empty file (or no file at all) is a valid
/// configuration. Command-line flags ([`CliArgs`]) are applied on top.
///
/// # Examples
///
/// ```
/// use netlyzer::configuration::config::Config;
///
/// let config = Config::from_toml_str(r#"
///     [capture]
///     interface = "eth0"
///
///     [storage]
///     backend = "file"
/// "#).unwrap();
/// assert_eq!(config.capture.interface.as_deref(), Some("eth0"));
/// assert_eq!(config.capture.snaplen, 65536);
/// ```
///
/// # Sections Overview
///
/// - `capture`: device selection and capture handle parameters
/// - `dispatch`: per-consumer queue size and the publish deadline
/// - `storage`: persistence backend, its location and optional retention
/// - `web`: HTTP JSON API binding
/// - `stats`: size of the recent-packet feed
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub capture: CaptureConfig,
    pub dispatch: DispatchConfig,
    pub storage: StorageConfig,
    pub web: WebConfig,
    pub stats: StatsConfig,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CaptureConfig {
    /// Device to open. `None` selects the first device reported by the system.
    pub interface: Option<String>,
    /// Bytes captured per packet, large enough for a full datagram by default
    pub snaplen: i32,
    pub promiscuous: bool,
    /// Upper bound for one blocking read; also bounds how long `stop()` waits
    pub read_timeout_ms: u64,
    /// Consecutive transient read faults tolerated before the session ends
    pub max_consecutive_faults: u32,
    /// Start capturing as soon as the application is up
    pub autostart: bool,
}

impl Default for CaptureConfig {
    fn default() -> Self {
        Self {
            interface: None,
            snaplen: 65536,
            promiscuous: true,
            read_timeout_ms: 1000,
            max_consecutive_faults: 100,
            autostart: true,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DispatchConfig {
    /// Records buffered per consumer
    pub queue_capacity: usize,
    /// How long one publish may wait on full queues before dropping
    pub enqueue_timeout_ms: u64,
}

impl Default for DispatchConfig {
    fn default() -> Self {
        Self {
            queue_capacity: 4096,
            enqueue_timeout_ms: 50,
        }
    }
}

impl DispatchConfig {
    pub fn enqueue_timeout(&self) -> Duration {
        Duration::from_millis(self.enqueue_timeout_ms)
    }
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    pub backend: StorageBackend,
    /// Directory for the file backend, database file for the database
    /// backend. When unset the backend's environment default applies.
    pub path: Option<PathBuf>,
    /// Records older than this are removed at startup
    pub retention_hours: Option<u64>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct WebConfig {
    pub enabled: bool,
    pub bind_address: String,
    pub port: u16,
}

impl Default for WebConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            bind_address: "127.0.0.1".to_string(),
            port: 8080,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct StatsConfig {
    /// Capacity of the recent-packet feed
    pub recent_capacity: usize,
}

impl Default for StatsConfig {
    fn default() -> Self {
        Self { recent_capacity: 100 }
    }
}

impl Config {
    /// Reads and validates a TOML configuration file.
    pub fn from_file(path: &Path) -> Result<Config, ConfigError> {
        debug!("Reading configuration from {}", path.display());
        let content = fs::read_to_string(path)?;
        let config = Self::from_toml_str(&content)?;
        info!("Configuration loaded from {}", path.display());
        Ok(config)
    }

    pub fn from_toml_str(content: &str) -> Result<Config, ConfigError> {
        let config: Config =
            toml::from_str(content).map_err(|e| ConfigError::TomlError(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    /// Applies command-line overrides and re-validates.
    pub fn apply_args(&mut self, args: &CliArgs) -> Result<(), ConfigError> {
        if let Some(interface) = &args.interface {
            self.capture.interface = Some(interface.clone());
        }
        if let Some(backend) = &args.storage {
            self.storage.backend = backend.parse()?;
        }
        if let Some(path) = &args.storage_path {
            self.storage.path = Some(path.clone());
        }
        if let Some(port) = args.port {
            self.web.port = port;
        }
        if args.no_capture {
            self.capture.autostart = false;
        }
        if args.no_web {
            self.web.enabled = false;
        }
        self.validate()
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if !(64..=262_144).contains(&self.capture.snaplen) {
            return Err(ConfigError::NotInRange(format!(
                "capture.snaplen must be within 64..=262144, got {}",
                self.capture.snaplen
            )));
        }
        if !(1..=60_000).contains(&self.capture.read_timeout_ms) {
            return Err(ConfigError::NotInRange(format!(
                "capture.read_timeout_ms must be within 1..=60000, got {}",
                self.capture.read_timeout_ms
            )));
        }
        if self.dispatch.queue_capacity == 0 {
            return Err(ConfigError::NotInRange(
                "dispatch.queue_capacity must be at least 1".to_string(),
            ));
        }
        if self.dispatch.enqueue_timeout_ms > 10_000 {
            return Err(ConfigError::NotInRange(format!(
                "dispatch.enqueue_timeout_ms must be at most 10000, got {}",
                self.dispatch.enqueue_timeout_ms
            )));
        }
        if self.stats.recent_capacity == 0 {
            return Err(ConfigError::NotInRange(
                "stats.recent_capacity must be at least 1".to_string(),
            ));
        }
        if self.web.enabled && self.web.port == 0 {
            return Err(ConfigError::NotInRange("web.port must not be 0".to_string()));
        }
        self.web
            .bind_address
            .parse::<IpAddr>()
            .map_err(|_| ConfigError::BadIPFormatting(self.web.bind_address.clone()))?;

        // backends create the last path component themselves, not its parents
        if let Some(parent) = self.storage.path.as_deref().and_then(Path::parent) {
            if !parent.as_os_str().is_empty() && !parent.exists() {
                return Err(ConfigError::DirectoryDoesNotExist(parent.display().to_string()));
            }
        }
        Ok(())
    }

    /// Address the web API listens on.
    pub fn web_socket_addr(&self) -> Result<SocketAddr, ConfigError> {
        let ip: IpAddr = self
            .web
            .bind_address
            .parse()
            .map_err(|_| ConfigError::BadIPFormatting(self.web.bind_address.clone()))?;
        Ok(SocketAddr::new(ip, self.web.port))
    }
}

/// Command-line interface.
///
/// Everything except `--list-devices` overrides a value from the
/// configuration file.
#[derive(Parser, Debug, Clone, Default)]
#[command(name = "netlyzer")]
#[command(version)]
#[command(about = "Live packet capture, classification and statistics")]
pub struct CliArgs {
    /// Path to a TOML configuration file
    pub config_file: Option<PathBuf>,

    /// Capture interface, defaults to the first available device
    #[arg(short, long, env = "NETLYZER_INTERFACE")]
    pub interface: Option<String>,

    /// Storage backend: memory, file or database
    #[arg(long)]
    pub storage: Option<String>,

    /// Storage directory (file backend) or database file (database backend)
    #[arg(long)]
    pub storage_path: Option<PathBuf>,

    /// Port of the HTTP API
    #[arg(short, long)]
    pub port: Option<u16>,

    /// Do not start capturing at startup
    #[arg(long, action = clap::ArgAction::SetTrue)]
    pub no_capture: bool,

    /// Do not serve the HTTP API
    #[arg(long, action = clap::ArgAction::SetTrue)]
    pub no_web: bool,

    /// Print the capture devices and exit
    #[arg(long, action = clap::ArgAction::SetTrue)]
    pub list_devices: bool,
}

impl CliArgs {
    /// Loads the configuration file if one was given, then applies the
    /// remaining flags.
    pub fn load_config(&self) -> Result<Config, ConfigError> {
        let mut config = match &self.config_file {
            Some(path) => Config::from_file(path)?,
            None => {
                info!("No configuration file given, using defaults");
                Config::default()
            }
        };
        config.apply_args(self)?;
        Ok(config)
    }
}
