use std::collections::VecDeque;
use std::sync::Mutex;

use crate::data_capture::dispatcher::PacketConsumer;
use crate::data_capture::types::PacketRecord;
use crate::error_handling::types::ConsumerError;

/// Bounded feed of the most recently captured records, oldest first.
pub struct RecentPackets {
    capacity: usize,
    buffer: Mutex<VecDeque<PacketRecord>>,
}

impl RecentPackets {
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            capacity,
            buffer: Mutex::new(VecDeque::with_capacity(capacity)),
        }
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn push(&self, record: PacketRecord) {
        let mut buffer = self.buffer.lock().unwrap_or_else(|e| e.into_inner());
        if buffer.len() == self.capacity {
            buffer.pop_front();
        }
        buffer.push_back(record);
    }

    pub fn snapshot(&self) -> Vec<PacketRecord> {
        self.buffer
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .iter()
            .cloned()
            .collect()
    }

    pub fn len(&self) -> usize {
        self.buffer.lock().unwrap_or_else(|e| e.into_inner()).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn clear(&self) {
        self.buffer.lock().unwrap_or_else(|e| e.into_inner()).clear();
    }
}

impl PacketConsumer for RecentPackets {
    fn name(&self) -> &str {
        "recent-packets"
    }

    fn on_record(&self, record: &PacketRecord) -> Result<(), ConsumerError> {
        self.push(record.clone());
        Ok(())
    }
}
