//! Live views derived from the capture stream.
//!
//! Both types here are dispatcher consumers:
//! - `aggregator`: protocol distribution, byte count and capture rate since the
//!   last reset.
//! - `recent_packets`: bounded feed of the latest records.

pub mod aggregator;
pub mod recent_packets;

pub use aggregator::{PacketSummary, ProtocolTally, StatisticsAggregator, StatsSnapshot};
pub use recent_packets::RecentPackets;
