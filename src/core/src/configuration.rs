pub mod config;
pub mod types;

pub use config::{CaptureConfig, CliArgs, Config, DispatchConfig, StatsConfig, StorageConfig, WebConfig};
pub use types::StorageBackend;
