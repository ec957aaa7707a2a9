//! libpcap-backed capture, enabled with the `live-capture` feature.

use chrono::{DateTime, Utc};
use log::{debug, error, info};
use pcap::{Active, Capture, Device, Linktype};

use super::backend::{CaptureBackend, DeviceInfo, OpenedSource, PacketSource, SourceError};
use super::types::RawPacket;
use crate::configuration::config::CaptureConfig;
use crate::error_handling::types::CaptureError;
use crate::network::types::LinkLayer;

#[derive(Debug, Default, Clone, Copy)]
pub struct PcapBackend;

impl PcapBackend {
    pub fn new() -> Self {
        Self
    }
}

impl CaptureBackend for PcapBackend {
    fn list_devices(&self) -> Result<Vec<DeviceInfo>, CaptureError> {
        let devices = Device::list().map_err(|e| {
            error!("Failed to enumerate capture devices: {}", e);
            CaptureError::DeviceUnavailable(e.to_string())
        })?;
        Ok(devices
            .into_iter()
            .map(|d| DeviceInfo {
                name: d.name,
                description: d.desc,
            })
            .collect())
    }

    fn open(&self, config: &CaptureConfig) -> Result<OpenedSource, CaptureError> {
        let device = match &config.interface {
            Some(name) => Device::from(name.as_str()),
            None => Device::list()
                .map_err(|e| CaptureError::DeviceUnavailable(e.to_string()))?
                .into_iter()
                .next()
                .ok_or_else(|| CaptureError::DeviceUnavailable("no capture device found".into()))?,
        };
        let name = device.name.clone();
        debug!(
            "opening {} (promisc={}, snaplen={}, timeout={}ms)",
            name, config.promiscuous, config.snaplen, config.read_timeout_ms
        );

        let capture = Capture::from_device(device)
            .and_then(|c| {
                c.promisc(config.promiscuous)
                    .snaplen(config.snaplen)
                    .timeout(config.read_timeout_ms.min(i32::MAX as u64) as i32)
                    .open()
            })
            .map_err(|e| {
                error!("Failed to open capture device {}: {}", name, e);
                CaptureError::DeviceUnavailable(format!("{}: {}", name, e))
            })?;

        let link = link_layer(capture.get_datalink()).ok_or_else(|| {
            CaptureError::DeviceUnavailable(format!(
                "{}: unsupported link type {:?}",
                name,
                capture.get_datalink()
            ))
        })?;
        info!("Opened capture device {} ({:?})", name, link);

        Ok(OpenedSource {
            device: name,
            link,
            source: Box::new(PcapSource { capture }),
        })
    }
}

fn link_layer(linktype: Linktype) -> Option<LinkLayer> {
    match linktype.0 {
        1 => Some(LinkLayer::Ethernet),
        // DLT_RAW (12 on most platforms), LINKTYPE_RAW and LINKTYPE_IPV4
        12 | 101 | 228 => Some(LinkLayer::RawIp),
        _ => None,
    }
}

struct PcapSource {
    capture: Capture<Active>,
}

impl PacketSource for PcapSource {
    fn next_packet(&mut self) -> Result<Option<RawPacket>, SourceError> {
        match self.capture.next_packet() {
            Ok(packet) => {
                let ts = packet.header.ts;
                let captured_at =
                    DateTime::from_timestamp(ts.tv_sec as i64, (ts.tv_usec as u32).saturating_mul(1000))
                        .unwrap_or_else(Utc::now);
                Ok(Some(RawPacket {
                    data: packet.data.to_vec(),
                    wire_len: packet.header.len,
                    captured_at,
                }))
            }
            Err(pcap::Error::TimeoutExpired) => Ok(None),
            Err(e) => Err(map_read_error(e)),
        }
    }
}

fn map_read_error(e: pcap::Error) -> SourceError {
    match e {
        pcap::Error::NoMorePackets => SourceError::Closed("no more packets".into()),
        pcap::Error::IoError(kind) => SourceError::Closed(format!("I/O error: {:?}", kind)),
        pcap::Error::PcapError(msg)
            if msg.contains("went down") || msg.contains("No such device") =>
        {
            SourceError::Closed(msg)
        }
        other => SourceError::Transient(other.to_string()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn maps_link_types() {
        assert_eq!(link_layer(Linktype(1)), Some(LinkLayer::Ethernet));
        assert_eq!(link_layer(Linktype(101)), Some(LinkLayer::RawIp));
        assert_eq!(link_layer(Linktype(113)), None);
    }

    #[test]
    fn interface_down_closes_the_source() {
        let err = map_read_error(pcap::Error::PcapError("The interface went down".into()));
        assert!(matches!(err, SourceError::Closed(_)));
        let err = map_read_error(pcap::Error::PcapError("read: EINTR".into()));
        assert!(matches!(err, SourceError::Transient(_)));
    }
}
