use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::data_capture::types::{CaptureState, DiagnosticCounters, PacketRecord};
use crate::network::types::Protocol;

/// API error payload
#[derive(Debug, Serialize)]
pub struct ApiError {
    pub message: String,
}

impl ApiError {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }
}

/// Query string of `GET /packets`.
#[derive(Debug, Default, Deserialize)]
pub struct PacketQuery {
    pub protocol: Option<String>,
    pub ip: Option<String>,
}

/// Query string of `POST /capture/start`.
#[derive(Debug, Default, Deserialize)]
pub struct StartQuery {
    pub interface: Option<String>,
}

/// Body of `POST /packets`. Unknown protocol labels are stored as `OTHER`
/// and a missing timestamp means "now".
#[derive(Debug, Serialize, Deserialize)]
pub struct NewPacket {
    pub timestamp: Option<DateTime<Utc>>,
    pub source_address: String,
    pub destination_address: String,
    pub protocol: String,
    pub size_bytes: u32,
}

impl NewPacket {
    pub fn into_record(self) -> PacketRecord {
        PacketRecord::new(
            self.timestamp.unwrap_or_else(Utc::now),
            self.source_address,
            self.destination_address,
            Protocol::from_label(&self.protocol),
            self.size_bytes,
        )
    }
}

#[derive(Debug, Serialize)]
pub struct CaptureStatusResponse {
    #[serde(flatten)]
    pub state: CaptureState,
    pub last_error: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct DiagnosticsResponse {
    #[serde(flatten)]
    pub counters: DiagnosticCounters,
    pub consumers: Vec<String>,
}
