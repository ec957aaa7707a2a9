//! Capture backends.
//!
//! A [`CaptureBackend`] knows how to enumerate local devices and open one of
//! them; the opened [`PacketSource`] is then owned by exactly one capture
//! worker. Dropping the source closes the underlying handle.
//!
//! The libpcap backend lives in [`super::pcap_source`] and is compiled only
//! with the `live-capture` feature. Without it, [`default_backend`] returns a
//! backend that refuses to open anything.

use std::fmt;
use std::sync::Arc;

use serde::Serialize;

use super::types::RawPacket;
use crate::configuration::config::CaptureConfig;
use crate::error_handling::types::CaptureError;
use crate::network::types::LinkLayer;

/// Read failure reported by a [`PacketSource`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SourceError {
    /// The read failed but the handle can still be polled.
    Transient(String),
    /// The handle is gone (device removed, interface down, end of stream).
    Closed(String),
}

impl fmt::Display for SourceError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SourceError::Transient(e) => write!(f, "transient read error: {}", e),
            SourceError::Closed(e) => write!(f, "source closed: {}", e),
        }
    }
}

impl std::error::Error for SourceError {}

/// An open capture handle.
pub trait PacketSource: Send {
    /// Blocks for at most the configured read timeout. `Ok(None)` means the
    /// timeout expired without a packet.
    fn next_packet(&mut self) -> Result<Option<RawPacket>, SourceError>;
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DeviceInfo {
    pub name: String,
    pub description: Option<String>,
}

/// A successfully opened device.
pub struct OpenedSource {
    pub device: String,
    pub link: LinkLayer,
    pub source: Box<dyn PacketSource>,
}

impl fmt::Debug for OpenedSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("OpenedSource")
            .field("device", &self.device)
            .field("link", &self.link)
            .finish_non_exhaustive()
    }
}

pub trait CaptureBackend: Send + Sync {
    fn list_devices(&self) -> Result<Vec<DeviceInfo>, CaptureError>;

    /// Opens the configured interface, or the first available device when
    /// none is configured.
    fn open(&self, config: &CaptureConfig) -> Result<OpenedSource, CaptureError>;
}

/// Backend used when the crate is built without live capture support.
#[derive(Debug, Default, Clone, Copy)]
pub struct UnavailableBackend;

impl CaptureBackend for UnavailableBackend {
    fn list_devices(&self) -> Result<Vec<DeviceInfo>, CaptureError> {
        Ok(Vec::new())
    }

    fn open(&self, _config: &CaptureConfig) -> Result<OpenedSource, CaptureError> {
        Err(CaptureError::DeviceUnavailable(
            "built without the `live-capture` feature".to_string(),
        ))
    }
}

#[cfg(feature = "live-capture")]
pub fn default_backend() -> Arc<dyn CaptureBackend> {
    Arc::new(super::pcap_source::PcapBackend::new())
}

#[cfg(not(feature = "live-capture"))]
pub fn default_backend() -> Arc<dyn CaptureBackend> {
    Arc::new(UnavailableBackend)
}
