use super::chunker::checksum;
use bytes::Bytes;
use serde::{Deserialize, Serialize};

/// One fixed-size slice of a file, checksummed independently
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Segment {
    pub segment_id: String,
    pub file_hash: String,
    pub chunk_index: u32,
    pub data: Bytes,
    pub size_bytes: u64,
    pub checksum: [u8; 32], // SHA-256 of data
    pub created_at: i64,
}

impl Segment {
    pub fn new(file_hash: &str, chunk_index: u32, data: Bytes) -> Self {
        let checksum = checksum(&data);
        Self {
            segment_id: segment_id(file_hash, chunk_index),
            file_hash: file_hash.to_string(),
            chunk_index,
            size_bytes: data.len() as u64,
            data,
            checksum,
            created_at: chrono::Utc::now().timestamp(),
        }
    }

    pub fn verify(&self) -> bool {
        checksum(&self.data) == self.checksum
    }
}

/// `<file_hash>_chunk_<index>`
pub fn segment_id(file_hash: &str, chunk_index: u32) -> String {
    format!("{}_chunk_{}", file_hash, chunk_index)
}

/// Inverse of [`segment_id`]
pub fn parse_segment_id(segment_id: &str) -> Option<(String, u32)> {
    let (hash, index) = segment_id.rsplit_once("_chunk_")?;
    if hash.is_empty() {
        return None;
    }
    Some((hash.to_string(), index.parse().ok()?))
}

/// On-disk blob name for a segment
pub fn blob_name(segment_id: &str) -> String {
    format!("{}.bin", segment_id)
}
