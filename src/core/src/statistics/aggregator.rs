//! Live protocol distribution and capture rate.

use std::collections::BTreeMap;
use std::sync::Mutex;
use std::time::Instant;

use chrono::{DateTime, Utc};
use log::{debug, info};
use serde::Serialize;

use crate::data_capture::dispatcher::PacketConsumer;
use crate::data_capture::types::PacketRecord;
use crate::error_handling::types::ConsumerError;
use crate::network::types::Protocol;

/// Count per protocol label. Always holds an entry for every label.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(transparent)]
pub struct ProtocolTally(BTreeMap<Protocol, u64>);

impl Default for ProtocolTally {
    fn default() -> Self {
        Self(Protocol::ALL.iter().map(|p| (*p, 0)).collect())
    }
}

impl ProtocolTally {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn increment(&mut self, protocol: Protocol) {
        *self.0.entry(protocol).or_insert(0) += 1;
    }

    pub fn get(&self, protocol: Protocol) -> u64 {
        self.0.get(&protocol).copied().unwrap_or(0)
    }

    pub fn total(&self) -> u64 {
        self.0.values().sum()
    }

    /// TCP including the HTTP and HTTPS refinements.
    pub fn tcp_like(&self) -> u64 {
        self.get(Protocol::TCP) + self.get(Protocol::HTTP) + self.get(Protocol::HTTPS)
    }

    pub fn other(&self) -> u64 {
        self.get(Protocol::ICMP) + self.get(Protocol::OTHER)
    }

    pub fn iter(&self) -> impl Iterator<Item = (Protocol, u64)> + '_ {
        self.0.iter().map(|(p, c)| (*p, *c))
    }
}

/// Distribution over a fixed set of records, such as a filtered query result.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PacketSummary {
    pub total_packets: u64,
    pub total_bytes: u64,
    pub tally: ProtocolTally,
    pub tcp_like: u64,
    pub other: u64,
}

impl PacketSummary {
    pub fn from_records(records: &[PacketRecord]) -> Self {
        let mut tally = ProtocolTally::new();
        let mut total_bytes = 0;
        for record in records {
            tally.increment(record.protocol);
            total_bytes += record.size_bytes as u64;
        }
        Self {
            total_packets: records.len() as u64,
            total_bytes,
            tcp_like: tally.tcp_like(),
            other: tally.other(),
            tally,
        }
    }
}

/// Consistent copy of the aggregator state.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StatsSnapshot {
    pub total_packets: u64,
    pub total_bytes: u64,
    pub tally: ProtocolTally,
    pub tcp_like: u64,
    pub other: u64,
    pub started_at: DateTime<Utc>,
    pub elapsed_ms: u64,
    /// Packets per second since `started_at`.
    pub rate: f64,
}

struct AggregatorState {
    total_packets: u64,
    total_bytes: u64,
    tally: ProtocolTally,
    epoch: Instant,
    started_at: DateTime<Utc>,
}

impl AggregatorState {
    fn fresh() -> Self {
        Self {
            total_packets: 0,
            total_bytes: 0,
            tally: ProtocolTally::new(),
            epoch: Instant::now(),
            started_at: Utc::now(),
        }
    }

    fn elapsed_ms(&self) -> u64 {
        self.epoch.elapsed().as_millis().min(u64::MAX as u128) as u64
    }

    fn rate(&self) -> f64 {
        rate_for(self.total_packets, self.elapsed_ms())
    }
}

fn rate_for(total: u64, elapsed_ms: u64) -> f64 {
    if elapsed_ms == 0 {
        0.0
    } else {
        total as f64 * 1000.0 / elapsed_ms as f64
    }
}

/// Dispatcher consumer keeping per-protocol counts since the last reset.
///
/// All state sits behind one mutex so `reset()` and `snapshot()` never
/// observe a record counted in the total but not in the tally.
pub struct StatisticsAggregator {
    state: Mutex<AggregatorState>,
}

impl Default for StatisticsAggregator {
    fn default() -> Self {
        Self::new()
    }
}

impl StatisticsAggregator {
    pub fn new() -> Self {
        Self {
            state: Mutex::new(AggregatorState::fresh()),
        }
    }

    pub fn record(&self, record: &PacketRecord) {
        let mut state = self.state.lock().unwrap_or_else(|e| e.into_inner());
        state.total_packets += 1;
        state.total_bytes += record.size_bytes as u64;
        state.tally.increment(record.protocol);
    }

    pub fn total(&self) -> u64 {
        self.state.lock().unwrap_or_else(|e| e.into_inner()).total_packets
    }

    pub fn tally(&self) -> ProtocolTally {
        self.state.lock().unwrap_or_else(|e| e.into_inner()).tally.clone()
    }

    /// Packets per second since the epoch; zero when no time has elapsed.
    pub fn rate(&self) -> f64 {
        self.state.lock().unwrap_or_else(|e| e.into_inner()).rate()
    }

    pub fn reset(&self) {
        let mut state = self.state.lock().unwrap_or_else(|e| e.into_inner());
        debug!(
            "resetting statistics ({} packets, {} bytes)",
            state.total_packets, state.total_bytes
        );
        *state = AggregatorState::fresh();
        info!("statistics reset");
    }

    pub fn snapshot(&self) -> StatsSnapshot {
        let state = self.state.lock().unwrap_or_else(|e| e.into_inner());
        let elapsed_ms = state.elapsed_ms();
        StatsSnapshot {
            total_packets: state.total_packets,
            total_bytes: state.total_bytes,
            tally: state.tally.clone(),
            tcp_like: state.tally.tcp_like(),
            other: state.tally.other(),
            started_at: state.started_at,
            elapsed_ms,
            rate: rate_for(state.total_packets, elapsed_ms),
        }
    }
}

impl PacketConsumer for StatisticsAggregator {
    fn name(&self) -> &str {
        "statistics"
    }

    fn on_record(&self, record: &PacketRecord) -> Result<(), ConsumerError> {
        self.record(record);
        Ok(())
    }
}
