use std::sync::Mutex;

use chrono::{DateTime, Utc};
use log::{debug, info};

use crate::data_capture::types::PacketRecord;
use crate::error_handling::types::StorageError;
use crate::storage::packet_filter::PacketFilter;
use crate::storage::storage_trait::Storage;

/// Volatile backend keeping records in insertion order.
#[derive(Default)]
pub struct MemoryStorage {
    records: Mutex<Vec<PacketRecord>>,
}

impl MemoryStorage {
    pub fn new() -> Self {
        Self::default()
    }
}

impl Storage for MemoryStorage {
    fn save_packet(&self, record: &PacketRecord) -> Result<(), StorageError> {
        self.records
            .lock()
            .map_err(|_| StorageError::WriteFailed)?
            .push(record.clone());
        Ok(())
    }

    fn query_packets(&self, filter: &PacketFilter) -> Result<Vec<PacketRecord>, StorageError> {
        let records = self.records.lock().map_err(|_| StorageError::ReadFailed)?;
        let selected = filter.apply(records.iter().cloned());
        debug!("Memory query matched {}/{} record(s)", selected.len(), records.len());
        Ok(selected)
    }

    fn count_packets(&self) -> Result<usize, StorageError> {
        Ok(self.records.lock().map_err(|_| StorageError::ReadFailed)?.len())
    }

    fn cleanup_old_packets(&self, older_than: DateTime<Utc>) -> Result<usize, StorageError> {
        let mut records = self.records.lock().map_err(|_| StorageError::WriteFailed)?;
        let before = records.len();
        records.retain(|r| r.timestamp >= older_than);
        let removed = before - records.len();
        info!("Removed {} old packet(s) (cutoff: {})", removed, older_than.to_rfc3339());
        Ok(removed)
    }
}
