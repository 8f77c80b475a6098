//! Durable file -> chunk -> node index
//!
//! Persisted as a single versioned JSON snapshot. Loading never fails
//! on bad content: an unparsable snapshot is set aside and the index
//! starts empty, malformed records are quarantined and skipped.

use crate::metadata::error::{MetadataError, MetadataResult};
use crate::metadata::types::FileRecord;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

const SNAPSHOT_VERSION: u32 = 1;

#[derive(Debug, Serialize, Deserialize)]
struct IndexSnapshot {
    version: u32,
    files: BTreeMap<String, FileRecord>,
}

/// A persisted record that could not be admitted on load
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QuarantinedRecord {
    pub key: String,
    pub reason: String,
}

pub struct MetadataIndex {
    path: Option<PathBuf>,
    records: BTreeMap<String, FileRecord>,
    quarantined: Vec<QuarantinedRecord>,
}

impl MetadataIndex {
    /// Create a non-persistent index
    pub fn in_memory() -> Self {
        Self {
            path: None,
            records: BTreeMap::new(),
            quarantined: Vec::new(),
        }
    }

    /// Open the index backed by `path`, loading whatever is there
    pub async fn open(path: impl AsRef<Path>) -> MetadataResult<Self> {
        let mut index = Self {
            path: Some(path.as_ref().to_path_buf()),
            records: BTreeMap::new(),
            quarantined: Vec::new(),
        };
        index.load().await?;
        Ok(index)
    }

    /// Replace the in-memory view with the persisted snapshot.
    /// Absent or unreadable snapshots yield an empty index.
    pub async fn load(&mut self) -> MetadataResult<()> {
        self.records.clear();
        self.quarantined.clear();

        let Some(path) = self.path.clone() else {
            return Ok(());
        };

        let raw = match tokio::fs::read(&path).await {
            Ok(raw) => raw,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                tracing::info!("no metadata snapshot at {}, starting empty", path.display());
                return Ok(());
            }
            Err(e) => {
                tracing::warn!("metadata snapshot {} unreadable: {}", path.display(), e);
                self.quarantine_snapshot(&path, e.to_string()).await;
                return Ok(());
            }
        };

        let files = match parse_snapshot(&raw) {
            Ok(files) => files,
            Err(reason) => {
                tracing::warn!("metadata snapshot {} corrupted: {}", path.display(), reason);
                self.quarantine_snapshot(&path, reason).await;
                return Ok(());
            }
        };

        for (key, value) in files {
            match admit(&key, value) {
                Ok(record) => {
                    self.records.insert(record.file_id.clone(), record);
                }
                Err(reason) => {
                    tracing::warn!("quarantining metadata record {}: {}", key, reason);
                    self.quarantined.push(QuarantinedRecord { key, reason });
                }
            }
        }

        tracing::info!(
            files = self.records.len(),
            quarantined = self.quarantined.len(),
            "metadata index loaded from {}",
            path.display()
        );
        Ok(())
    }

    /// Write the current snapshot atomically (temp file + rename)
    pub async fn persist(&self) -> MetadataResult<()> {
        let Some(path) = &self.path else {
            return Ok(());
        };

        let snapshot = IndexSnapshot {
            version: SNAPSHOT_VERSION,
            files: self.records.clone(),
        };
        let raw = serde_json::to_vec_pretty(&snapshot)?;

        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        let tmp_path = path.with_extension("json.tmp");
        tokio::fs::write(&tmp_path, raw).await?;
        tokio::fs::rename(&tmp_path, path).await?;

        tracing::debug!(files = self.records.len(), "metadata index persisted");
        Ok(())
    }

    /// Admit a new record. Records are never overwritten.
    pub fn create(&mut self, record: FileRecord) -> MetadataResult<()> {
        record.validate()?;
        if self.records.contains_key(&record.file_id) {
            return Err(MetadataError::AlreadyExists(record.file_id));
        }
        tracing::info!(
            "recorded file {} ({}, {} chunks)",
            record.file_id,
            record.original_filename,
            record.total_chunks
        );
        self.records.insert(record.file_id.clone(), record);
        Ok(())
    }

    /// Drop a record that never became durable
    pub(crate) fn discard(&mut self, file_id: &str) -> Option<FileRecord> {
        self.records.remove(file_id)
    }

    pub fn lookup(&self, file_id: &str) -> MetadataResult<&FileRecord> {
        self.records
            .get(file_id)
            .ok_or_else(|| MetadataError::FileNotFound(file_id.to_string()))
    }

    pub fn contains(&self, file_id: &str) -> bool {
        self.records.contains_key(file_id)
    }

    pub fn records(&self) -> impl Iterator<Item = &FileRecord> {
        self.records.values()
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    pub fn quarantined(&self) -> &[QuarantinedRecord] {
        &self.quarantined
    }

    async fn quarantine_snapshot(&mut self, path: &Path, reason: String) {
        let aside = path.with_extension("json.corrupt");
        if let Err(e) = tokio::fs::rename(path, &aside).await {
            tracing::warn!("could not move corrupt snapshot aside: {}", e);
        }
        self.quarantined.push(QuarantinedRecord {
            key: path.display().to_string(),
            reason,
        });
    }
}

/// Accepts the versioned snapshot and the older flat `{file_id: record}` shape
fn parse_snapshot(raw: &[u8]) -> Result<serde_json::Map<String, serde_json::Value>, String> {
    let value: serde_json::Value = serde_json::from_slice(raw).map_err(|e| e.to_string())?;
    let serde_json::Value::Object(mut root) = value else {
        return Err("snapshot root is not an object".into());
    };

    if root.contains_key("version") {
        match root.remove("files") {
            Some(serde_json::Value::Object(files)) => Ok(files),
            Some(_) => Err("`files` is not an object".into()),
            None => Ok(serde_json::Map::new()),
        }
    } else {
        Ok(root)
    }
}

fn admit(key: &str, value: serde_json::Value) -> Result<FileRecord, String> {
    let record: FileRecord = serde_json::from_value(value).map_err(|e| e.to_string())?;
    if record.file_id != key {
        return Err(format!("keyed as {} but names itself {}", key, record.file_id));
    }
    record.validate().map_err(|e| e.to_string())?;
    Ok(record)
}
