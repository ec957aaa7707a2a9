use std::fs::{self, File, OpenOptions};
use std::io::{BufRead, BufReader, BufWriter, Write};
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use chrono::{DateTime, Utc};
use log::{debug, error, info, warn};

use crate::data_capture::types::PacketRecord;
use crate::error_handling::types::StorageError;
use crate::storage::packet_filter::PacketFilter;
use crate::storage::storage_trait::Storage;

/// Append-only JSON lines file, one `PacketRecord` per line.
pub struct FileStorage {
    base_path: PathBuf,
    // serializes appends and the rewrite done by cleanup
    write_lock: Mutex<()>,
}

impl FileStorage {
    const PACKETS_FILE: &'static str = "packets.jsonl";

    pub fn new<P: AsRef<Path>>(base_path: P) -> Result<Self, StorageError> {
        let base_path = base_path.as_ref().to_path_buf();
        fs::create_dir_all(&base_path).map_err(|e| {
            error!("Failed to create storage dir {}: {}", base_path.display(), e);
            StorageError::WriteFailed
        })?;
        info!("FileStorage initialized at {}", base_path.display());
        Ok(Self {
            base_path,
            write_lock: Mutex::new(()),
        })
    }

    /// Construct FileStorage using env var NETLYZER_STORAGE_DIR if set, otherwise current directory.
    pub fn new_default() -> Result<Self, StorageError> {
        if let Ok(dir) = std::env::var("NETLYZER_STORAGE_DIR") {
            info!("Using FileStorage from NETLYZER_STORAGE_DIR: {}", dir);
            return Self::new(PathBuf::from(dir));
        }
        let cwd = std::env::current_dir().map_err(|e| {
            error!("Failed to get current dir: {}", e);
            StorageError::ReadFailed
        })?;
        info!("Using FileStorage at current directory: {}", cwd.display());
        Self::new(cwd)
    }

    pub fn base_path(&self) -> &Path {
        &self.base_path
    }

    fn packets_path(&self) -> PathBuf {
        self.base_path.join(Self::PACKETS_FILE)
    }

    /// Reads every parseable record in file order. Corrupt lines are skipped.
    fn read_all(&self) -> Result<Vec<PacketRecord>, StorageError> {
        let path = self.packets_path();
        let file = match File::open(&path) {
            Ok(f) => f,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => {
                error!("Failed to open {}: {}", path.display(), e);
                return Err(StorageError::ReadFailed);
            }
        };

        let mut records = Vec::new();
        for (n, line) in BufReader::new(file).lines().enumerate() {
            let line = line.map_err(|e| {
                error!("Read failed {}: {}", path.display(), e);
                StorageError::ReadFailed
            })?;
            if line.trim().is_empty() {
                continue;
            }
            match serde_json::from_str::<PacketRecord>(&line) {
                Ok(record) => records.push(record),
                Err(e) => warn!("Skipping corrupt line {} in {}: {}", n + 1, path.display(), e),
            }
        }
        Ok(records)
    }
}

impl Storage for FileStorage {
    fn save_packet(&self, record: &PacketRecord) -> Result<(), StorageError> {
        let line = serde_json::to_string(record).map_err(|e| {
            error!("Failed to serialize packet record: {}", e);
            StorageError::WriteFailed
        })?;
        let path = self.packets_path();
        let _guard = self.write_lock.lock().map_err(|_| StorageError::WriteFailed)?;
        let mut f = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&path)
            .map_err(|e| {
                error!("Open append failed {}: {}", path.display(), e);
                StorageError::WriteFailed
            })?;
        writeln!(f, "{}", line).map_err(|e| {
            error!("Write failed {}: {}", path.display(), e);
            StorageError::WriteFailed
        })?;
        Ok(())
    }

    fn query_packets(&self, filter: &PacketFilter) -> Result<Vec<PacketRecord>, StorageError> {
        let records = self.read_all()?;
        let total = records.len();
        let selected = filter.apply(records);
        debug!("Loaded {} packet(s), {} after filter", total, selected.len());
        Ok(selected)
    }

    fn count_packets(&self) -> Result<usize, StorageError> {
        Ok(self.read_all()?.len())
    }

    fn cleanup_old_packets(&self, older_than: DateTime<Utc>) -> Result<usize, StorageError> {
        let _guard = self.write_lock.lock().map_err(|_| StorageError::WriteFailed)?;
        let records = self.read_all()?;
        let before = records.len();
        let kept: Vec<&PacketRecord> = records.iter().filter(|r| r.timestamp >= older_than).collect();
        let removed = before - kept.len();
        if removed == 0 {
            info!("Removed 0 old packet(s) (cutoff: {})", older_than.to_rfc3339());
            return Ok(0);
        }

        let path = self.packets_path();
        let tmp = self.base_path.join(format!("{}.tmp", Self::PACKETS_FILE));
        {
            let f = File::create(&tmp).map_err(|e| {
                error!("Create failed {}: {}", tmp.display(), e);
                StorageError::WriteFailed
            })?;
            let mut w = BufWriter::new(f);
            for record in kept {
                let line = serde_json::to_string(record).map_err(|_| StorageError::WriteFailed)?;
                writeln!(w, "{}", line).map_err(|e| {
                    error!("Write failed {}: {}", tmp.display(), e);
                    StorageError::WriteFailed
                })?;
            }
            w.flush().map_err(|e| {
                error!("Flush failed {}: {}", tmp.display(), e);
                StorageError::WriteFailed
            })?;
        }
        fs::rename(&tmp, &path).map_err(|e| {
            error!("Failed to replace {}: {}", path.display(), e);
            StorageError::WriteFailed
        })?;

        info!("Removed {} old packet(s) (cutoff: {})", removed, older_than.to_rfc3339());
        Ok(removed)
    }
}
