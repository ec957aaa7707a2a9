use std::fmt;
use std::net::Ipv4Addr;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error_handling::types::FilterError;

/// Closed set of labels a captured packet can carry.
///
/// `HTTP` and `HTTPS` are best-effort refinements of `TCP`; see
/// [`crate::network::classifier`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum Protocol {
    TCP,
    UDP,
    ICMP,
    HTTP,
    HTTPS,
    OTHER,
}

impl Protocol {
    pub const ALL: [Protocol; 6] = [
        Protocol::TCP,
        Protocol::UDP,
        Protocol::ICMP,
        Protocol::HTTP,
        Protocol::HTTPS,
        Protocol::OTHER,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Protocol::TCP => "TCP",
            Protocol::UDP => "UDP",
            Protocol::ICMP => "ICMP",
            Protocol::HTTP => "HTTP",
            Protocol::HTTPS => "HTTPS",
            Protocol::OTHER => "OTHER",
        }
    }

    /// Strict, case-insensitive parse. Returns `None` for labels outside the set.
    pub fn parse(label: &str) -> Option<Protocol> {
        Protocol::ALL
            .iter()
            .copied()
            .find(|p| p.as_str().eq_ignore_ascii_case(label.trim()))
    }

    /// Lenient parse used when reading labels back from storage: anything
    /// unknown folds into `OTHER`.
    pub fn from_label(label: &str) -> Protocol {
        Protocol::parse(label).unwrap_or(Protocol::OTHER)
    }
}

impl fmt::Display for Protocol {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Link-layer framing of the buffers handed to the classifier.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LinkLayer {
    Ethernet,
    /// No link header, the buffer starts at the IP header.
    RawIp,
}

/// Result of classifying one frame.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Classification {
    pub source: Ipv4Addr,
    pub destination: Ipv4Addr,
    pub protocol: Protocol,
}

/// Protocol component of a retrieval filter.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum ProtocolFilter {
    #[default]
    All,
    Only(Protocol),
}

impl ProtocolFilter {
    pub fn matches(&self, protocol: Protocol) -> bool {
        match self {
            ProtocolFilter::All => true,
            ProtocolFilter::Only(p) => *p == protocol,
        }
    }
}

impl FromStr for ProtocolFilter {
    type Err = FilterError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();
        if s.is_empty() || s.eq_ignore_ascii_case("all") {
            return Ok(ProtocolFilter::All);
        }
        Protocol::parse(s)
            .map(ProtocolFilter::Only)
            .ok_or_else(|| FilterError::UnknownProtocol(s.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_is_case_insensitive() {
        assert_eq!(Protocol::parse("udp"), Some(Protocol::UDP));
        assert_eq!(Protocol::parse(" HTTPS "), Some(Protocol::HTTPS));
        assert_eq!(Protocol::parse("SCTP"), None);
    }

    #[test]
    fn unknown_labels_fold_into_other() {
        assert_eq!(Protocol::from_label("QUIC"), Protocol::OTHER);
        assert_eq!(Protocol::from_label("ICMP"), Protocol::ICMP);
    }

    #[test]
    fn protocol_filter_selection() {
        assert_eq!("All".parse::<ProtocolFilter>(), Ok(ProtocolFilter::All));
        assert_eq!("".parse::<ProtocolFilter>(), Ok(ProtocolFilter::All));
        assert_eq!(
            "UDP".parse::<ProtocolFilter>(),
            Ok(ProtocolFilter::Only(Protocol::UDP))
        );
        assert!("nope".parse::<ProtocolFilter>().is_err());
    }

    #[test]
    fn serializes_as_uppercase_label() {
        let json = serde_json::to_string(&Protocol::HTTPS).unwrap();
        assert_eq!(json, "\"HTTPS\"");
    }
}
