//! Storage Trait
//!
//! This module defines the `Storage` trait, the interface every packet
//! persistence backend implements.
//!
//! Implementors of this trait are responsible for:
//! - Persisting captured packet records
//! - Answering filtered retrieval queries (see [`PacketFilter`])
//! - Removing records older than a cutoff
//!
//! All methods are synchronous and return a `Result` to handle potential
//! storage errors; callers on an async runtime go through `spawn_blocking`.

use crate::data_capture::types::PacketRecord;
use crate::error_handling::types::StorageError;
use crate::storage::packet_filter::PacketFilter;
use chrono::{DateTime, Utc};

/// The `Storage` trait defines the interface for packet storage backends.
pub trait Storage: Send + Sync {
    /// Persists one record. A record that was saved is returned by later
    /// matching queries with every field equal.
    fn save_packet(&self, record: &PacketRecord) -> Result<(), StorageError>;

    /// Retrieves the records matching `filter`, ordered by timestamp.
    fn query_packets(&self, filter: &PacketFilter) -> Result<Vec<PacketRecord>, StorageError>;

    /// Number of stored records.
    fn count_packets(&self) -> Result<usize, StorageError>;

    /// Removes records captured before `older_than` and returns how many were removed.
    fn cleanup_old_packets(&self, older_than: DateTime<Utc>) -> Result<usize, StorageError>;
}
