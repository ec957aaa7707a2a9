//! Common data types used across the data_capture subsystem.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error_handling::types::CaptureError;
use crate::network::types::{Classification, Protocol};

/// One classified packet, created exactly once by the capture engine.
///
/// Records are immutable; the dispatcher shares them between consumers
/// behind an `Arc`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PacketRecord {
    /// Capture-side timestamp, non-decreasing within a session
    pub timestamp: DateTime<Utc>,
    /// Dotted-quad source address
    pub source_address: String,
    /// Dotted-quad destination address
    pub destination_address: String,
    pub protocol: Protocol,
    /// Total on-wire length, which may exceed the captured snapshot
    pub size_bytes: u32,
}

impl PacketRecord {
    pub fn new(
        timestamp: DateTime<Utc>,
        source_address: impl Into<String>,
        destination_address: impl Into<String>,
        protocol: Protocol,
        size_bytes: u32,
    ) -> Self {
        Self {
            timestamp,
            source_address: source_address.into(),
            destination_address: destination_address.into(),
            protocol,
            size_bytes,
        }
    }

    pub fn from_classification(
        timestamp: DateTime<Utc>,
        classification: &Classification,
        size_bytes: u32,
    ) -> Self {
        Self::new(
            timestamp,
            classification.source.to_string(),
            classification.destination.to_string(),
            classification.protocol,
            size_bytes,
        )
    }

    /// Case-sensitive substring match against either address.
    pub fn involves_address(&self, needle: &str) -> bool {
        self.source_address.contains(needle) || self.destination_address.contains(needle)
    }
}

/// A frame as read from the capture handle, before classification.
#[derive(Debug, Clone)]
pub struct RawPacket {
    pub data: Vec<u8>,
    /// Original length on the wire
    pub wire_len: u32,
    pub captured_at: DateTime<Utc>,
}

/// Observable state of the capture engine.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "state")]
pub enum CaptureState {
    Idle,
    Running {
        session_id: Uuid,
        device: String,
        started_at: DateTime<Utc>,
    },
}

impl CaptureState {
    pub fn is_running(&self) -> bool {
        matches!(self, CaptureState::Running { .. })
    }
}

/// Out-of-band notifications emitted by the capture pipeline.
///
/// Session lifecycle and non-fatal faults share this channel so the hot path
/// never has to return errors to its caller.
#[derive(Debug, Clone, PartialEq)]
pub enum DiagnosticEvent {
    SessionStarted {
        session_id: Uuid,
        device: String,
    },
    /// `error` is set when the session ended on a fatal fault rather than `stop()`.
    SessionStopped {
        session_id: Uuid,
        error: Option<CaptureError>,
    },
    /// Always carries `CaptureError::ReadFault`.
    ReadFault {
        session_id: Uuid,
        error: CaptureError,
    },
    ConsumerFailure {
        consumer: String,
        message: String,
    },
    RecordDropped {
        consumer: String,
    },
}

/// Point-in-time copy of the diagnostic counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct DiagnosticCounters {
    pub read_faults: u64,
    pub classification_skips: u64,
    pub consumer_failures: u64,
    pub dropped_records: u64,
}
