//! Storage subsystem
//!
//! This module provides the persistence contract for captured packets and
//! its implementations.
//!
//! Components:
//! - `storage_trait`: the Storage trait defining a uniform API.
//! - `packet_filter`: protocol + IP substring filter shared by every backend.
//! - `memory_storage`: volatile in-process backend.
//! - `file_storage`: JSON lines file for simple persistence and inspection.
//! - `database_storage`: ORM-based SQLite implementation using SeaORM.
//! - `db_entities`: SeaORM entity models for the database backend.

pub mod database_storage;
pub mod db_entities;
pub mod file_storage;
pub mod memory_storage;
pub mod packet_filter;
pub mod storage_trait;

pub use packet_filter::PacketFilter;
pub use storage_trait::Storage;
