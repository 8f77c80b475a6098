pub mod chunker;
pub mod error;
pub mod store;
pub mod types;

pub use chunker::{checksum, chunk, chunk_count, file_hash, reconstruct};
pub use error::{StorageError, StorageResult};
pub use store::{SegmentEntry, SegmentStore};
pub use types::{blob_name, parse_segment_id, segment_id, Segment};
