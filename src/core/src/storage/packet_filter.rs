//! Retrieval filter for persisted packets.
//!
//! Every backend answers `query_packets` with the same semantics:
//! - protocol: `All` matches everything, `Only(p)` matches label `p` exactly
//! - ip: case-sensitive substring of the source or destination address; an
//!   empty or absent needle matches everything
//! - results are ordered by timestamp ascending, ties in insertion order

use crate::data_capture::types::PacketRecord;
use crate::error_handling::types::FilterError;
use crate::network::types::{Protocol, ProtocolFilter};

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PacketFilter {
    pub protocol: ProtocolFilter,
    pub ip: Option<String>,
}

impl PacketFilter {
    /// Matches every record.
    pub fn all() -> Self {
        Self::default()
    }

    /// Builds a filter from the textual form used by the query API, e.g.
    /// `("UDP", "")` or `("All", "10.0.0")`.
    pub fn parse(protocol: &str, ip: &str) -> Result<Self, FilterError> {
        Ok(Self {
            protocol: protocol.parse()?,
            ip: if ip.is_empty() { None } else { Some(ip.to_string()) },
        })
    }

    pub fn only(protocol: Protocol) -> Self {
        Self {
            protocol: ProtocolFilter::Only(protocol),
            ip: None,
        }
    }

    pub fn with_ip(mut self, ip: impl Into<String>) -> Self {
        let ip = ip.into();
        self.ip = if ip.is_empty() { None } else { Some(ip) };
        self
    }

    /// Non-empty IP needle, if any.
    pub fn ip_needle(&self) -> Option<&str> {
        self.ip.as_deref().filter(|s| !s.is_empty())
    }

    pub fn matches(&self, record: &PacketRecord) -> bool {
        self.protocol.matches(record.protocol)
            && self
                .ip_needle()
                .map_or(true, |needle| record.involves_address(needle))
    }

    /// Filters `records` (given in insertion order) and sorts the survivors
    /// by timestamp. The sort is stable.
    pub fn apply<I>(&self, records: I) -> Vec<PacketRecord>
    where
        I: IntoIterator<Item = PacketRecord>,
    {
        let mut selected: Vec<PacketRecord> =
            records.into_iter().filter(|r| self.matches(r)).collect();
        selected.sort_by_key(|r| r.timestamp);
        selected
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, Utc};

    #[test]
    fn parses_textual_filters() {
        let f = PacketFilter::parse("udp", "").unwrap();
        assert_eq!(f, PacketFilter::only(Protocol::UDP));

        let f = PacketFilter::parse("All", "10.0.0").unwrap();
        assert_eq!(f.protocol, ProtocolFilter::All);
        assert_eq!(f.ip_needle(), Some("10.0.0"));

        assert!(PacketFilter::parse("carrier-pigeon", "").is_err());
    }

    #[test]
    fn ip_match_is_case_sensitive_substring() {
        let r = PacketRecord::new(Utc::now(), "fe80::ABCD", "10.0.0.7", Protocol::OTHER, 1);
        assert!(PacketFilter::all().with_ip("ABC").matches(&r));
        assert!(!PacketFilter::all().with_ip("abc").matches(&r));
        assert!(PacketFilter::all().with_ip("0.0.7").matches(&r));
        assert!(PacketFilter::all().with_ip("").matches(&r));
    }

    #[test]
    fn apply_sorts_by_timestamp_keeping_ties_stable() {
        let t0 = Utc::now();
        let records = vec![
            PacketRecord::new(t0 + Duration::seconds(2), "a", "b", Protocol::TCP, 1),
            PacketRecord::new(t0, "a", "b", Protocol::TCP, 2),
            PacketRecord::new(t0, "a", "b", Protocol::TCP, 3),
        ];
        let sizes: Vec<u32> = PacketFilter::all()
            .apply(records)
            .iter()
            .map(|r| r.size_bytes)
            .collect();
        assert_eq!(sizes, vec![2, 3, 1]);
    }
}
