//! SeaORM entity models used by the database storage backend.
//!
//! These structs map to the SQLite tables created by `database_storage`:
//! - `packets`: one row per captured packet record

/// Packets table entity model.
pub mod packets {
    use sea_orm::entity::prelude::*;

    /// Stores packet records with addresses and labels as strings for portability.
    #[derive(Clone, Debug, PartialEq, Eq, DeriveEntityModel)]
    #[sea_orm(table_name = "packets")]
    pub struct Model {
        /// Auto-increment row id, preserves insertion order
        #[sea_orm(primary_key)]
        pub id: i64,
        /// RFC3339 UTC timestamp with nanoseconds, sortable as text
        pub timestamp: String,
        pub source_address: String,
        pub destination_address: String,
        /// Protocol label (e.g. "TCP")
        pub protocol: String,
        /// On-wire size as 64-bit integer
        pub size_bytes: i64,
    }

    #[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
    pub enum Relation {}

    impl ActiveModelBehavior for ActiveModel {}
}
