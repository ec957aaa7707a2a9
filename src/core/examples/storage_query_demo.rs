use chrono::{Duration, Utc};
use env_logger::Env;
use log::{info, warn};
use netlyzer::network::types::Protocol;
use netlyzer::storage::database_storage::DatabaseStorage;
use netlyzer::storage::file_storage::FileStorage;
use netlyzer::storage::packet_filter::PacketFilter;
use netlyzer::storage::storage_trait::Storage;
use netlyzer::PacketRecord;
use std::env;
use std::fs;
use std::path::PathBuf;

fn main() {
    // RUST_LOG can override; default to info
    let _ = env_logger::Builder::from_env(Env::default().default_filter_or("info")).try_init();

    let out_dir: PathBuf = env::var("STORAGE_DEMO_DIR")
        .map(PathBuf::from)
        .unwrap_or_else(|_| {
            env::current_dir()
                .expect("cwd")
                .join("target")
                .join("storage_demo")
        });
    fs::create_dir_all(&out_dir).expect("create output dir");

    let storage_db = if env::var("NETLYZER_DB_PATH").is_ok() {
        info!("Using DatabaseStorage::new() with NETLYZER_DB_PATH");
        DatabaseStorage::new().expect("create db (env)")
    } else {
        let db_path = out_dir.join("storage_demo.sqlite3");
        info!(
            "Using DatabaseStorage at {} (no NETLYZER_DB_PATH)",
            db_path.display()
        );
        DatabaseStorage::new_file(&db_path).expect("create db (file)")
    };

    let storage_fs = if env::var("NETLYZER_STORAGE_DIR").is_ok() {
        info!("Using FileStorage::new_default() with NETLYZER_STORAGE_DIR");
        FileStorage::new_default().expect("create file storage (env)")
    } else {
        info!(
            "Using FileStorage rooted at {} (no NETLYZER_STORAGE_DIR)",
            out_dir.display()
        );
        FileStorage::new(&out_dir).expect("create file storage (dir)")
    };

    let now = Utc::now();
    let samples = [
        ("192.168.1.10", "93.184.216.34", Protocol::HTTP, 512),
        ("192.168.1.10", "142.250.74.78", Protocol::HTTPS, 1480),
        ("192.168.1.20", "192.168.1.1", Protocol::UDP, 74),
        ("10.0.0.5", "192.168.1.10", Protocol::ICMP, 98),
        ("192.168.1.20", "10.0.0.7", Protocol::TCP, 66),
    ];
    for (i, (src, dst, protocol, size)) in samples.into_iter().enumerate() {
        let record = PacketRecord::new(now + Duration::milliseconds(i as i64), src, dst, protocol, size);
        storage_db.save_packet(&record).expect("save packet db");
        storage_fs.save_packet(&record).expect("save packet fs");
    }
    info!("Saved {} sample packets to DB and FS", samples.len());

    info!(
        "Stored packets -> DB: {}, FS: {}",
        storage_db.count_packets().expect("count db"),
        storage_fs.count_packets().expect("count fs")
    );

    // a few of the filters the web API accepts
    for (protocol, ip) in [("All", ""), ("tcp", ""), ("udp", "192.168.1"), ("icmp", "10.0.0.5")] {
        let filter = PacketFilter::parse(protocol, ip).expect("valid filter");
        let from_db = storage_db.query_packets(&filter).expect("query db");
        let from_fs = storage_fs.query_packets(&filter).expect("query fs");
        info!(
            "protocol={:?} ip={:?} -> DB: {} rows, FS: {} rows",
            protocol,
            ip,
            from_db.len(),
            from_fs.len()
        );
        if from_db.len() != from_fs.len() {
            warn!("DB and FS disagree for protocol={:?} ip={:?}", protocol, ip);
        }
        for record in &from_db {
            info!(
                "  {} {} -> {} {} {} bytes",
                record.timestamp, record.source_address, record.destination_address, record.protocol, record.size_bytes
            );
        }
    }

    if let Err(e) = PacketFilter::parse("gopher", "") {
        info!("Unknown protocol label rejected: {}", e);
    }

    let export_path = out_dir.join("packets_export.json");
    let all = storage_db
        .query_packets(&PacketFilter::all())
        .expect("query all db");
    let json = serde_json::to_string_pretty(&all).expect("serialize packets");
    fs::write(&export_path, json).expect("write export json");
    info!("Exported {} DB rows to {}", all.len(), export_path.display());

    let removed = storage_db
        .cleanup_old_packets(now + Duration::seconds(1))
        .expect("cleanup db");
    info!("Cleanup removed {} DB rows", removed);
}
