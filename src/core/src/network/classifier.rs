//! Protocol classification of raw captured frames.
//!
//! [`classify`] is a pure function: it only looks at the bytes it is given and
//! always returns the same answer for the same buffer. Only IPv4 traffic is
//! labeled; everything else is reported as a [`ClassificationSkip`] and never
//! becomes a `PacketRecord`.
//!
//! HTTP and HTTPS are detected with a cheap heuristic layered on TCP:
//! 1. payload signature (HTTP/1.x request or status line, TLS record header)
//! 2. well-known ports on either side of the connection
//!
//! Both checks are imprecise by nature. Traffic on a non-standard port without
//! a recognizable first segment stays `TCP`, and anything talking plain TCP on
//! port 80 is labeled `HTTP`.

use std::sync::OnceLock;

use etherparse::{Ethernet2HeaderSlice, Ipv4HeaderSlice, TcpHeaderSlice};
use regex::bytes::Regex;

use super::types::{Classification, LinkLayer, Protocol};
use crate::error_handling::types::ClassificationSkip;

mod ether_type {
    pub const IPV4: u16 = 0x0800;
    pub const VLAN: u16 = 0x8100;
}

mod ip_number {
    pub const ICMP: u8 = 1;
    pub const TCP: u8 = 6;
    pub const UDP: u8 = 17;
}

const HTTP_PORTS: [u16; 3] = [80, 8080, 8000];
const HTTPS_PORTS: [u16; 2] = [443, 8443];

/// Only the start of the payload is inspected.
const SIGNATURE_WINDOW: usize = 256;

fn http_signature() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(
            r"^(?:(?:GET|POST|PUT|DELETE|HEAD|OPTIONS|PATCH|CONNECT|TRACE) \S+ HTTP/1\.[01]|HTTP/1\.[01] [0-9]{3})",
        )
        .expect("static HTTP signature must compile")
    })
}

/// Classifies a single frame captured on a link of type `link`.
pub fn classify(frame: &[u8], link: LinkLayer) -> Result<Classification, ClassificationSkip> {
    let ip = match link {
        LinkLayer::Ethernet => strip_ethernet(frame)?,
        LinkLayer::RawIp => frame,
    };
    classify_ipv4(ip)
}

fn strip_ethernet(frame: &[u8]) -> Result<&[u8], ClassificationSkip> {
    let eth = Ethernet2HeaderSlice::from_slice(frame)
        .map_err(|e| ClassificationSkip::Malformed(format!("ethernet: {e}")))?;
    let mut ether_type = eth.ether_type().0;
    let mut rest = &frame[eth.slice().len()..];

    // single 802.1Q tag: TCI (2 bytes) then the inner ether type
    if ether_type == ether_type::VLAN {
        if rest.len() < 4 {
            return Err(ClassificationSkip::Malformed("truncated VLAN tag".into()));
        }
        ether_type = u16::from_be_bytes([rest[2], rest[3]]);
        rest = &rest[4..];
    }

    if ether_type != ether_type::IPV4 {
        return Err(ClassificationSkip::NotIpv4);
    }
    Ok(rest)
}

fn classify_ipv4(data: &[u8]) -> Result<Classification, ClassificationSkip> {
    match data.first() {
        None => return Err(ClassificationSkip::Malformed("empty IP payload".into())),
        Some(b) if b >> 4 != 4 => return Err(ClassificationSkip::NotIpv4),
        Some(_) => {}
    }

    let ipv4 = Ipv4HeaderSlice::from_slice(data)
        .map_err(|e| ClassificationSkip::Malformed(format!("ipv4: {e}")))?;

    let header_len = ipv4.slice().len();
    let end = usize::from(ipv4.total_len()).clamp(header_len, data.len());
    let payload = &data[header_len..end];

    let protocol = match ipv4.protocol().0 {
        ip_number::ICMP => Protocol::ICMP,
        ip_number::UDP => Protocol::UDP,
        ip_number::TCP if ipv4.fragments_offset().value() == 0 => refine_tcp(payload),
        ip_number::TCP => Protocol::TCP,
        _ => Protocol::OTHER,
    };

    Ok(Classification {
        source: ipv4.source_addr(),
        destination: ipv4.destination_addr(),
        protocol,
    })
}

fn refine_tcp(segment: &[u8]) -> Protocol {
    let tcp = match TcpHeaderSlice::from_slice(segment) {
        Ok(tcp) => tcp,
        Err(_) => return Protocol::TCP,
    };
    let payload = &segment[tcp.slice().len()..];
    let window = &payload[..payload.len().min(SIGNATURE_WINDOW)];

    if http_signature().is_match(window) {
        return Protocol::HTTP;
    }
    if looks_like_tls_record(window) {
        return Protocol::HTTPS;
    }

    let ports = [tcp.source_port(), tcp.destination_port()];
    if ports.iter().any(|p| HTTPS_PORTS.contains(p)) {
        Protocol::HTTPS
    } else if ports.iter().any(|p| HTTP_PORTS.contains(p)) {
        Protocol::HTTP
    } else {
        Protocol::TCP
    }
}

/// Content type 20..=23 (change_cipher_spec, alert, handshake, application_data)
/// followed by a 3.x record version.
fn looks_like_tls_record(payload: &[u8]) -> bool {
    payload.len() >= 5 && (20..=23).contains(&payload[0]) && payload[1] == 3 && payload[2] <= 4
}

#[cfg(test)]
pub(crate) mod test_frames {
    //! Synthetic frame builders shared by the capture tests.

    use std::net::Ipv4Addr;

    pub fn ethernet(ether_type: u16, payload: &[u8]) -> Vec<u8> {
        let mut frame = vec![0x02, 0, 0, 0, 0, 0x01, 0x02, 0, 0, 0, 0, 0x02];
        frame.extend_from_slice(&ether_type.to_be_bytes());
        frame.extend_from_slice(payload);
        frame
    }

    pub fn ipv4(protocol: u8, src: Ipv4Addr, dst: Ipv4Addr, payload: &[u8]) -> Vec<u8> {
        let total_len = (20 + payload.len()) as u16;
        let mut header = vec![
            0x45, 0x00, 0, 0, // version/ihl, dscp, total length
            0x00, 0x01, 0x40, 0x00, // id, flags (DF), fragment offset
            64, protocol, 0, 0, // ttl, protocol, checksum
        ];
        header[2..4].copy_from_slice(&total_len.to_be_bytes());
        header.extend_from_slice(&src.octets());
        header.extend_from_slice(&dst.octets());
        let checksum = checksum(&header);
        header[10..12].copy_from_slice(&checksum.to_be_bytes());
        header.extend_from_slice(payload);
        header
    }

    pub fn tcp(src_port: u16, dst_port: u16, payload: &[u8]) -> Vec<u8> {
        let mut segment = Vec::with_capacity(20 + payload.len());
        segment.extend_from_slice(&src_port.to_be_bytes());
        segment.extend_from_slice(&dst_port.to_be_bytes());
        segment.extend_from_slice(&[0, 0, 0, 1]); // seq
        segment.extend_from_slice(&[0, 0, 0, 0]); // ack
        segment.extend_from_slice(&[0x50, 0x18]); // data offset 5, PSH|ACK
        segment.extend_from_slice(&[0xff, 0xff, 0, 0, 0, 0]); // window, checksum, urgent
        segment.extend_from_slice(payload);
        segment
    }

    pub fn udp(src_port: u16, dst_port: u16, payload: &[u8]) -> Vec<u8> {
        let len = (8 + payload.len()) as u16;
        let mut datagram = Vec::with_capacity(len as usize);
        datagram.extend_from_slice(&src_port.to_be_bytes());
        datagram.extend_from_slice(&dst_port.to_be_bytes());
        datagram.extend_from_slice(&len.to_be_bytes());
        datagram.extend_from_slice(&[0, 0]);
        datagram.extend_from_slice(payload);
        datagram
    }

    pub fn tcp_frame(src: &str, dst: &str, src_port: u16, dst_port: u16, payload: &[u8]) -> Vec<u8> {
        let ip = ipv4(
            6,
            src.parse().unwrap(),
            dst.parse().unwrap(),
            &tcp(src_port, dst_port, payload),
        );
        ethernet(0x0800, &ip)
    }

    pub fn udp_frame(src: &str, dst: &str) -> Vec<u8> {
        let ip = ipv4(
            17,
            src.parse().unwrap(),
            dst.parse().unwrap(),
            &udp(5353, 53, b"query"),
        );
        ethernet(0x0800, &ip)
    }

    pub fn arp_frame() -> Vec<u8> {
        ethernet(0x0806, &[0u8; 28])
    }

    fn checksum(header: &[u8]) -> u16 {
        let mut sum: u32 = header
            .chunks(2)
            .map(|c| u32::from(u16::from_be_bytes([c[0], c[1]])))
            .sum();
        while sum > 0xffff {
            sum = (sum & 0xffff) + (sum >> 16);
        }
        !(sum as u16)
    }
}
