//! Persistence consumer.
//!
//! `PacketRecorder` is registered with the dispatcher like any other
//! consumer and writes every record it receives through the injected
//! [`Storage`] backend. A failed write becomes a consumer failure, is logged,
//! and the record is lost for persistence; capture and the other consumers
//! are unaffected.
//!
//! Minimal usage
//! ```no_run
//! use std::sync::Arc;
//! use netlyzer::data_capture::{Diagnostics, EventDispatcher, PacketRecorder};
//! use netlyzer::configuration::config::DispatchConfig;
//! use netlyzer::storage::memory_storage::MemoryStorage;
//!
//! let diagnostics = Arc::new(Diagnostics::new());
//! let dispatcher = EventDispatcher::new(&DispatchConfig::default(), diagnostics);
//! let recorder = PacketRecorder::new(Arc::new(MemoryStorage::new()));
//! dispatcher.register(Arc::new(recorder)).unwrap();
//! ```

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use log::{error, trace};

use super::dispatcher::PacketConsumer;
use super::types::PacketRecord;
use crate::error_handling::types::ConsumerError;
use crate::storage::storage_trait::Storage;

pub struct PacketRecorder {
    storage: Arc<dyn Storage>,
    saved: AtomicU64,
}

impl PacketRecorder {
    pub fn new(storage: Arc<dyn Storage>) -> Self {
        Self {
            storage,
            saved: AtomicU64::new(0),
        }
    }

    /// Records written since construction.
    pub fn saved(&self) -> u64 {
        self.saved.load(Ordering::Relaxed)
    }
}

impl PacketConsumer for PacketRecorder {
    fn name(&self) -> &str {
        "recorder"
    }

    fn on_record(&self, record: &PacketRecord) -> Result<(), ConsumerError> {
        self.storage.save_packet(record).map_err(|e| {
            error!(
                "Failed to persist {} packet {} -> {}: {}",
                record.protocol, record.source_address, record.destination_address, e
            );
            e
        })?;
        let saved = self.saved.fetch_add(1, Ordering::Relaxed) + 1;
        trace!("persisted record #{}", saved);
        Ok(())
    }
}
