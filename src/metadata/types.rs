use crate::metadata::error::{MetadataError, MetadataResult};
use crate::storage::chunk_count;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Length of the file id, taken as a prefix of the hex file hash
pub const FILE_ID_LEN: usize = 16;

/// Placement record for one uploaded file. Immutable once created.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FileRecord {
    pub file_id: String,
    pub original_filename: String,
    pub file_hash: String,
    pub total_size_bytes: u64,
    pub chunk_size_bytes: u64,
    pub total_chunks: u32,
    /// Chunk index (as string) -> primary node id
    pub chunks: BTreeMap<String, String>,
    /// Chunk index -> additional replica node ids, in fallback order
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub replica_nodes: BTreeMap<String, Vec<String>>,
    #[serde(with = "iso8601")]
    pub created_at: DateTime<Utc>,
    #[serde(default = "default_replicas")]
    pub replicas: u32,
}

fn default_replicas() -> u32 {
    1
}

/// Derive the file id from a full hex file hash
pub fn file_id_for(file_hash: &str) -> String {
    file_hash.chars().take(FILE_ID_LEN).collect()
}

impl FileRecord {
    /// Build a record from a per-chunk placement list (primary first)
    pub fn new(
        original_filename: impl Into<String>,
        file_hash: impl Into<String>,
        total_size_bytes: u64,
        chunk_size_bytes: u64,
        placements: &[Vec<String>],
        replicas: u32,
    ) -> Self {
        let file_hash = file_hash.into();
        let mut chunks = BTreeMap::new();
        let mut replica_nodes = BTreeMap::new();

        for (index, nodes) in placements.iter().enumerate() {
            if let Some((primary, rest)) = nodes.split_first() {
                chunks.insert(index.to_string(), primary.clone());
                if !rest.is_empty() {
                    replica_nodes.insert(index.to_string(), rest.to_vec());
                }
            }
        }

        Self {
            file_id: file_id_for(&file_hash),
            original_filename: original_filename.into(),
            file_hash,
            total_size_bytes,
            chunk_size_bytes,
            total_chunks: placements.len() as u32,
            chunks,
            replica_nodes,
            created_at: Utc::now(),
            replicas,
        }
    }

    /// Every node holding chunk `index`, primary first
    pub fn nodes_for(&self, index: u32) -> Vec<String> {
        let key = index.to_string();
        let mut nodes: Vec<String> = self.chunks.get(&key).cloned().into_iter().collect();
        if let Some(extra) = self.replica_nodes.get(&key) {
            nodes.extend(extra.iter().cloned());
        }
        nodes
    }

    /// Does any chunk of this file live on `node_id`
    pub fn references_node(&self, node_id: &str) -> bool {
        self.chunks.values().any(|n| n == node_id)
            || self
                .replica_nodes
                .values()
                .any(|nodes| nodes.iter().any(|n| n == node_id))
    }

    /// Structural checks run before admitting a record
    pub fn validate(&self) -> MetadataResult<()> {
        let corrupted = |reason: String| {
            Err(MetadataError::IndexCorrupted(format!(
                "{}: {}",
                self.file_id, reason
            )))
        };

        if self.file_id != file_id_for(&self.file_hash) {
            return corrupted("file id is not a prefix of the file hash".into());
        }
        if self.chunk_size_bytes == 0 && self.total_size_bytes > 0 {
            return corrupted("zero chunk size".into());
        }
        let expected = chunk_count(self.total_size_bytes, self.chunk_size_bytes as usize);
        if self.total_chunks != expected {
            return corrupted(format!(
                "total_chunks {} does not match size (expected {})",
                self.total_chunks, expected
            ));
        }
        if self.chunks.len() != self.total_chunks as usize {
            return corrupted(format!(
                "{} chunk mappings for {} chunks",
                self.chunks.len(),
                self.total_chunks
            ));
        }
        for index in 0..self.total_chunks {
            let nodes = self.nodes_for(index);
            if nodes.is_empty() {
                return corrupted(format!("chunk {} has no placement", index));
            }
            if nodes.len() != self.replicas as usize {
                return corrupted(format!(
                    "chunk {} has {} placements, expected {}",
                    index,
                    nodes.len(),
                    self.replicas
                ));
            }
        }
        Ok(())
    }
}

/// ISO-8601 timestamps. Accepts offset-less values written by older
/// snapshots and reads them as UTC.
mod iso8601 {
    use chrono::{DateTime, NaiveDateTime, Utc};
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S>(time: &DateTime<Utc>, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_str(&time.to_rfc3339())
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<DateTime<Utc>, D::Error>
    where
        D: Deserializer<'de>,
    {
        let raw = String::deserialize(deserializer)?;
        if let Ok(time) = DateTime::parse_from_rfc3339(&raw) {
            return Ok(time.with_timezone(&Utc));
        }
        NaiveDateTime::parse_from_str(&raw, "%Y-%m-%dT%H:%M:%S%.f")
            .map(|naive| naive.and_utc())
            .map_err(serde::de::Error::custom)
    }
}
