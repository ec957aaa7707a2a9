use std::env;
use std::path::{Path, PathBuf};

use chrono::{DateTime, SecondsFormat, Utc};
use log::{debug, error, info};
use sea_orm::sea_query::Condition;
use sea_orm::{
    ActiveValue::{NotSet, Set},
    ColumnTrait, ConnectionTrait, Database, DatabaseConnection, EntityTrait, PaginatorTrait,
    QueryFilter, QueryOrder, Schema,
};

use crate::data_capture::types::PacketRecord;
use crate::error_handling::types::StorageError;
use crate::network::types::{Protocol, ProtocolFilter};
use crate::storage::db_entities::packets;
use crate::storage::packet_filter::PacketFilter;
use crate::storage::storage_trait::Storage;

fn format_timestamp(ts: &DateTime<Utc>) -> String {
    // fixed width so text order equals time order
    ts.to_rfc3339_opts(SecondsFormat::Nanos, true)
}

impl packets::Model {
    fn into_record(self) -> Result<PacketRecord, StorageError> {
        let timestamp = DateTime::parse_from_rfc3339(&self.timestamp)
            .map_err(|e| {
                error!("Invalid timestamp in packet row {}: {}", self.id, e);
                StorageError::ReadFailed
            })?
            .with_timezone(&Utc);
        let size_bytes = u32::try_from(self.size_bytes).map_err(|_| {
            error!("Invalid size in packet row {}: {}", self.id, self.size_bytes);
            StorageError::ReadFailed
        })?;
        Ok(PacketRecord {
            timestamp,
            source_address: self.source_address,
            destination_address: self.destination_address,
            protocol: Protocol::from_label(&self.protocol),
            size_bytes,
        })
    }
}

/// SQLite-backed storage through SeaORM.
///
/// The trait is synchronous, so the backend owns a private current-thread
/// runtime and blocks on it. Do not call it from inside an async task; use
/// `spawn_blocking` there.
pub struct DatabaseStorage {
    rt: tokio::runtime::Runtime,
    db: DatabaseConnection,
}

impl DatabaseStorage {
    /// Default database filename used in the application's working directory
    const DEFAULT_DB_FILE: &'static str = "netlyzer.sqlite3";

    /// Opens the database named by `NETLYZER_DB_PATH`, or the default file in
    /// the current working directory.
    pub fn new() -> Result<Self, StorageError> {
        if let Ok(path) = env::var("NETLYZER_DB_PATH") {
            info!("Using DatabaseStorage from NETLYZER_DB_PATH: {}", path);
            return Self::new_file(PathBuf::from(path));
        }
        let cwd = env::current_dir().map_err(|_| StorageError::ConnectionFailed)?;
        Self::new_file(cwd.join(Self::DEFAULT_DB_FILE))
    }

    pub fn new_file<P: AsRef<Path>>(path: P) -> Result<Self, StorageError> {
        let rt = tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build()
            .map_err(|_| StorageError::ConnectionFailed)?;
        let path_ref = path.as_ref();
        if let Some(parent) = path_ref.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent).map_err(|_| StorageError::WriteFailed)?;
            }
        }
        let url = format!("sqlite://{}?mode=rwc", path_ref.display());

        let db = rt.block_on(async {
            let db = Database::connect(&url).await.map_err(|e| {
                error!("Failed to open database {}: {}", url, e);
                StorageError::ConnectionFailed
            })?;
            let backend = db.get_database_backend();
            let schema = Schema::new(backend);
            let mut create = schema.create_table_from_entity(packets::Entity);
            create.if_not_exists();
            db.execute(backend.build(&create)).await.map_err(|e| {
                error!("Failed to create packets table: {}", e);
                StorageError::WriteFailed
            })?;
            Ok::<_, StorageError>(db)
        })?;

        info!("DatabaseStorage initialized at {}", path_ref.display());
        Ok(Self { rt, db })
    }
}

impl Storage for DatabaseStorage {
    fn save_packet(&self, record: &PacketRecord) -> Result<(), StorageError> {
        let row = packets::ActiveModel {
            id: NotSet,
            timestamp: Set(format_timestamp(&record.timestamp)),
            source_address: Set(record.source_address.clone()),
            destination_address: Set(record.destination_address.clone()),
            protocol: Set(record.protocol.as_str().to_string()),
            size_bytes: Set(record.size_bytes as i64),
        };
        self.rt.block_on(async {
            packets::Entity::insert(row).exec(&self.db).await.map_err(|e| {
                error!("Failed to insert packet: {}", e);
                StorageError::WriteFailed
            })?;
            Ok(())
        })
    }

    fn query_packets(&self, filter: &PacketFilter) -> Result<Vec<PacketRecord>, StorageError> {
        let mut query = packets::Entity::find();
        if let ProtocolFilter::Only(p) = filter.protocol {
            query = query.filter(packets::Column::Protocol.eq(p.as_str()));
        }
        if let Some(needle) = filter.ip_needle() {
            query = query.filter(
                Condition::any()
                    .add(packets::Column::SourceAddress.contains(needle))
                    .add(packets::Column::DestinationAddress.contains(needle)),
            );
        }
        let rows = self.rt.block_on(async {
            query
                .order_by_asc(packets::Column::Timestamp)
                .order_by_asc(packets::Column::Id)
                .all(&self.db)
                .await
                .map_err(|e| {
                    error!("Failed to query packets: {}", e);
                    StorageError::ReadFailed
                })
        })?;

        let fetched = rows.len();
        let records = rows
            .into_iter()
            .map(packets::Model::into_record)
            .collect::<Result<Vec<_>, _>>()?;
        // LIKE is case-insensitive in SQLite; narrow to the exact match
        let records = filter.apply(records);
        debug!("Database query fetched {} row(s), {} after filter", fetched, records.len());
        Ok(records)
    }

    fn count_packets(&self) -> Result<usize, StorageError> {
        self.rt.block_on(async {
            let n = packets::Entity::find().count(&self.db).await.map_err(|e| {
                error!("Failed to count packets: {}", e);
                StorageError::ReadFailed
            })?;
            Ok(n as usize)
        })
    }

    fn cleanup_old_packets(&self, older_than: DateTime<Utc>) -> Result<usize, StorageError> {
        let cutoff = format_timestamp(&older_than);
        self.rt.block_on(async {
            let res = packets::Entity::delete_many()
                .filter(packets::Column::Timestamp.lt(cutoff))
                .exec(&self.db)
                .await
                .map_err(|e| {
                    error!("Failed to delete old packets: {}", e);
                    StorageError::WriteFailed
                })?;
            info!(
                "Removed {} old packet(s) (cutoff: {})",
                res.rows_affected,
                older_than.to_rfc3339()
            );
            Ok(res.rows_affected as usize)
        })
    }
}
