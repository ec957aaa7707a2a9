//! Capture pipeline: device handle, read loop, classification and fan-out.
pub mod backend;
pub mod capture_engine;
pub mod diagnostics;
pub mod dispatcher;
#[cfg(feature = "live-capture")]
pub mod pcap_source;
pub mod recorder;
pub mod types;

#[cfg(test)]
mod integration_tests;

pub use backend::{default_backend, CaptureBackend, DeviceInfo, PacketSource, SourceError};
pub use capture_engine::CaptureEngine;
pub use diagnostics::Diagnostics;
pub use dispatcher::{ConsumerId, EventDispatcher, PacketConsumer};
pub use recorder::PacketRecorder;
pub use types::{CaptureState, DiagnosticCounters, DiagnosticEvent, PacketRecord, RawPacket};
