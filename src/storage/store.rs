//! Per-node segment store
//!
//! Segments live on disk as raw `<file_hash>_chunk_<index>.bin` blobs with
//! no header. Checksums and sizes are kept in a sidecar `segments.json`
//! so corruption is still detectable after a restart.

use crate::storage::chunker::checksum;
use crate::storage::error::{StorageError, StorageResult};
use crate::storage::types::{blob_name, parse_segment_id, Segment};
use bytes::Bytes;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};

const MANIFEST_FILE: &str = "segments.json";
const MANIFEST_VERSION: u32 = 1;

/// What the store knows about a committed segment
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SegmentEntry {
    pub segment_id: String,
    pub file_hash: String,
    pub chunk_index: u32,
    pub size_bytes: u64,
    pub checksum: [u8; 32],
    pub created_at: i64,
}

impl From<&Segment> for SegmentEntry {
    fn from(segment: &Segment) -> Self {
        Self {
            segment_id: segment.segment_id.clone(),
            file_hash: segment.file_hash.clone(),
            chunk_index: segment.chunk_index,
            size_bytes: segment.size_bytes,
            checksum: segment.checksum,
            created_at: segment.created_at,
        }
    }
}

#[derive(Debug, Serialize, Deserialize)]
struct SegmentManifest {
    version: u32,
    segments: Vec<SegmentEntry>,
}

/// Storage partition owned by exactly one node worker
pub struct SegmentStore {
    node_id: String,
    root: PathBuf,
    capacity_bytes: u64,
    used_bytes: u64,
    entries: BTreeMap<String, SegmentEntry>,
}

impl SegmentStore {
    /// Open (or create) the store rooted at `root`, recovering any
    /// segments a previous run left behind
    pub async fn open(
        node_id: impl Into<String>,
        root: impl AsRef<Path>,
        capacity_bytes: u64,
    ) -> StorageResult<Self> {
        let root = root.as_ref().to_path_buf();
        tokio::fs::create_dir_all(&root).await?;

        let mut store = Self {
            node_id: node_id.into(),
            root,
            capacity_bytes,
            used_bytes: 0,
            entries: BTreeMap::new(),
        };

        let dirty = store.recover().await?;
        if dirty {
            store.persist_manifest().await?;
        }

        tracing::info!(
            node = %store.node_id,
            segments = store.entries.len(),
            used_bytes = store.used_bytes,
            capacity_bytes = store.capacity_bytes,
            "segment store opened at {}",
            store.root.display()
        );

        Ok(store)
    }

    /// Commit a segment if it fits; on any failure nothing changes
    pub async fn store(&mut self, segment: &Segment) -> StorageResult<()> {
        if !segment.verify() {
            return Err(StorageError::CorruptedSegment(segment.segment_id.clone()));
        }

        if let Some(existing) = self.entries.get(&segment.segment_id) {
            if existing.checksum == segment.checksum {
                return Ok(());
            }
            return Err(StorageError::CorruptedSegment(segment.segment_id.clone()));
        }

        if self.used_bytes + segment.size_bytes > self.capacity_bytes {
            tracing::warn!(
                node = %self.node_id,
                "insufficient space for segment {} ({} bytes, {} available)",
                segment.segment_id,
                segment.size_bytes,
                self.available_bytes()
            );
            return Err(StorageError::InsufficientSpace {
                needed: segment.size_bytes,
                available: self.available_bytes(),
            });
        }

        let path = self.blob_path(&segment.segment_id);
        let tmp_path = path.with_extension("bin.tmp");
        if let Err(e) = write_blob(&tmp_path, &path, &segment.data).await {
            let _ = tokio::fs::remove_file(&tmp_path).await;
            return Err(e.into());
        }

        self.entries
            .insert(segment.segment_id.clone(), SegmentEntry::from(segment));
        self.used_bytes += segment.size_bytes;

        if let Err(e) = self.persist_manifest().await {
            self.entries.remove(&segment.segment_id);
            self.used_bytes -= segment.size_bytes;
            let _ = tokio::fs::remove_file(&path).await;
            return Err(e);
        }

        tracing::debug!(
            node = %self.node_id,
            "segment {} stored ({} bytes)",
            segment.segment_id,
            segment.size_bytes
        );
        Ok(())
    }

    /// Read a segment back, verifying it against the recorded checksum
    pub async fn retrieve(&self, segment_id: &str) -> StorageResult<Segment> {
        let entry = self
            .entries
            .get(segment_id)
            .ok_or_else(|| StorageError::SegmentNotFound(segment_id.to_string()))?;

        let data = match tokio::fs::read(self.blob_path(segment_id)).await {
            Ok(data) => data,
            Err(e) if e.kind() == ErrorKind::NotFound => {
                return Err(StorageError::SegmentNotFound(segment_id.to_string()))
            }
            Err(e) => return Err(e.into()),
        };

        if checksum(&data) != entry.checksum {
            tracing::warn!(node = %self.node_id, "checksum mismatch on segment {}", segment_id);
            return Err(StorageError::CorruptedSegment(segment_id.to_string()));
        }

        Ok(Segment {
            segment_id: entry.segment_id.clone(),
            file_hash: entry.file_hash.clone(),
            chunk_index: entry.chunk_index,
            size_bytes: data.len() as u64,
            data: Bytes::from(data),
            checksum: entry.checksum,
            created_at: entry.created_at,
        })
    }

    /// Purge a segment and release its space
    pub async fn remove(&mut self, segment_id: &str) -> StorageResult<Option<SegmentEntry>> {
        let Some(entry) = self.entries.remove(segment_id) else {
            return Ok(None);
        };
        self.used_bytes = self.used_bytes.saturating_sub(entry.size_bytes);

        match tokio::fs::remove_file(self.blob_path(segment_id)).await {
            Ok(()) => {}
            Err(e) if e.kind() == ErrorKind::NotFound => {}
            Err(e) => tracing::warn!(node = %self.node_id, "failed to delete blob {}: {}", segment_id, e),
        }

        self.persist_manifest().await?;
        tracing::debug!(node = %self.node_id, "segment {} purged", segment_id);
        Ok(Some(entry))
    }

    pub fn contains(&self, segment_id: &str) -> bool {
        self.entries.contains_key(segment_id)
    }

    pub fn entries(&self) -> impl Iterator<Item = &SegmentEntry> {
        self.entries.values()
    }

    pub fn node_id(&self) -> &str {
        &self.node_id
    }

    pub fn capacity_bytes(&self) -> u64 {
        self.capacity_bytes
    }

    pub fn used_bytes(&self) -> u64 {
        self.used_bytes
    }

    pub fn available_bytes(&self) -> u64 {
        self.capacity_bytes.saturating_sub(self.used_bytes)
    }

    fn blob_path(&self, segment_id: &str) -> PathBuf {
        self.root.join(blob_name(segment_id))
    }

    /// Rebuild the in-memory view from the manifest and the blobs on disk.
    /// Returns true when the manifest needs rewriting.
    async fn recover(&mut self) -> StorageResult<bool> {
        let mut dirty = false;

        for entry in self.load_manifest().await {
            if !tokio::fs::try_exists(self.blob_path(&entry.segment_id)).await? {
                tracing::warn!(
                    node = %self.node_id,
                    "manifest lists {} but its blob is missing, dropping",
                    entry.segment_id
                );
                dirty = true;
                continue;
            }
            if !self.admit_recovered(entry) {
                dirty = true;
            }
        }

        let mut dir = tokio::fs::read_dir(&self.root).await?;
        while let Some(dirent) = dir.next_entry().await? {
            let path = dirent.path();
            if path.extension().map(|e| e != "bin").unwrap_or(true) {
                continue;
            }
            let Some(segment_id) = path.file_stem().and_then(|s| s.to_str()) else {
                continue;
            };
            if self.entries.contains_key(segment_id) {
                continue;
            }
            let Some((file_hash, chunk_index)) = parse_segment_id(segment_id) else {
                continue;
            };

            let data = tokio::fs::read(&path).await?;
            tracing::warn!(
                node = %self.node_id,
                "adopting unlisted blob {} with recomputed checksum",
                segment_id
            );
            let entry = SegmentEntry {
                segment_id: segment_id.to_string(),
                file_hash,
                chunk_index,
                size_bytes: data.len() as u64,
                checksum: checksum(&data),
                created_at: chrono::Utc::now().timestamp(),
            };
            self.admit_recovered(entry);
            dirty = true;
        }

        Ok(dirty)
    }

    fn admit_recovered(&mut self, entry: SegmentEntry) -> bool {
        if self.used_bytes + entry.size_bytes > self.capacity_bytes {
            tracing::warn!(
                node = %self.node_id,
                "recovered segment {} exceeds capacity, leaving it unaccounted",
                entry.segment_id
            );
            return false;
        }
        self.used_bytes += entry.size_bytes;
        self.entries.insert(entry.segment_id.clone(), entry);
        true
    }

    async fn load_manifest(&self) -> Vec<SegmentEntry> {
        let path = self.root.join(MANIFEST_FILE);
        let raw = match tokio::fs::read(&path).await {
            Ok(raw) => raw,
            Err(_) => return Vec::new(),
        };

        match serde_json::from_slice::<SegmentManifest>(&raw) {
            Ok(manifest) => manifest.segments,
            Err(e) => {
                tracing::warn!(
                    node = %self.node_id,
                    "segment manifest unreadable ({}), rebuilding from blobs",
                    e
                );
                Vec::new()
            }
        }
    }

    async fn persist_manifest(&self) -> StorageResult<()> {
        let manifest = SegmentManifest {
            version: MANIFEST_VERSION,
            segments: self.entries.values().cloned().collect(),
        };
        let raw = serde_json::to_vec_pretty(&manifest)?;

        let path = self.root.join(MANIFEST_FILE);
        let tmp_path = self.root.join(format!("{}.tmp", MANIFEST_FILE));
        tokio::fs::write(&tmp_path, raw).await?;
        tokio::fs::rename(&tmp_path, &path).await?;
        Ok(())
    }
}

async fn write_blob(tmp_path: &Path, path: &Path, data: &[u8]) -> std::io::Result<()> {
    tokio::fs::write(tmp_path, data).await?;
    tokio::fs::rename(tmp_path, path).await
}
