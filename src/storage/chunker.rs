//! Deterministic file chunking and reassembly

use bytes::{Bytes, BytesMut};
use sha2::{Digest, Sha256};

use super::error::{StorageError, StorageResult};
use super::types::Segment;

/// Lowercase hex SHA-256 of a whole file
pub fn file_hash(data: &[u8]) -> String {
    hex::encode(checksum(data))
}

/// SHA-256 digest of a byte slice
pub fn checksum(data: &[u8]) -> [u8; 32] {
    Sha256::digest(data).into()
}

/// Number of segments a file of `size` bytes splits into
pub fn chunk_count(size: u64, chunk_size: usize) -> u32 {
    if chunk_size == 0 {
        return 0;
    }
    size.div_ceil(chunk_size as u64) as u32
}

/// Split file into fixed-size segments; the last one may be shorter.
///
/// The file hash is computed once and shared by every segment, so the
/// same bytes and chunk size always produce the same ids and checksums.
pub fn chunk(file_bytes: Bytes, chunk_size: usize) -> StorageResult<(String, Vec<Segment>)> {
    if chunk_size == 0 {
        return Err(StorageError::InvalidChunkSize(chunk_size));
    }

    let hash = file_hash(&file_bytes);
    let mut segments = Vec::with_capacity(chunk_count(file_bytes.len() as u64, chunk_size) as usize);
    let mut offset = 0;

    while offset < file_bytes.len() {
        let end = std::cmp::min(offset + chunk_size, file_bytes.len());
        let index = segments.len() as u32;
        segments.push(Segment::new(&hash, index, file_bytes.slice(offset..end)));
        offset = end;
    }

    Ok((hash, segments))
}

/// Concatenate segments by chunk index.
///
/// Indices must be contiguous from zero; the caller still has to compare
/// the result against the recorded whole-file hash.
pub fn reconstruct(mut segments: Vec<Segment>) -> StorageResult<Bytes> {
    segments.sort_by_key(|s| s.chunk_index);

    let total: usize = segments.iter().map(|s| s.data.len()).sum();
    let mut output = BytesMut::with_capacity(total);

    for (expected, segment) in segments.iter().enumerate() {
        if segment.chunk_index as usize != expected {
            return Err(StorageError::SegmentNotFound(super::types::segment_id(
                &segment.file_hash,
                expected as u32,
            )));
        }
        output.extend_from_slice(&segment.data);
    }

    Ok(output.freeze())
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::{Rng, SeedableRng};

    fn test_data(size: usize) -> Bytes {
        Bytes::from((0..size).map(|i| (i % 256) as u8).collect::<Vec<u8>>())
    }

    #[test]
    fn test_split_and_reconstruct() {
        let data = test_data(256 * 1024);
        let (hash, segments) = chunk(data.clone(), 64 * 1024).unwrap();

        assert_eq!(segments.len(), 4);
        assert_eq!(hash, file_hash(&data));
        assert!(segments.iter().all(|s| s.size_bytes == 64 * 1024));

        let rebuilt = reconstruct(segments).unwrap();
        assert_eq!(rebuilt, data);
    }

    #[test]
    fn test_last_segment_is_shorter() {
        let (_, segments) = chunk(test_data(1000), 300).unwrap();

        let sizes: Vec<u64> = segments.iter().map(|s| s.size_bytes).collect();
        assert_eq!(sizes, vec![300, 300, 300, 100]);
        assert_eq!(chunk_count(1000, 300), 4);
    }

    #[test]
    fn test_chunking_is_deterministic() {
        let (_, first) = chunk(test_data(5000), 1024).unwrap();
        let (_, second) = chunk(test_data(5000), 1024).unwrap();

        for (a, b) in first.iter().zip(second.iter()) {
            assert_eq!(a.segment_id, b.segment_id);
            assert_eq!(a.checksum, b.checksum);
        }
    }

    #[test]
    fn test_round_trip_random_inputs() {
        let mut rng = rand::rngs::StdRng::seed_from_u64(7);

        for _ in 0..32 {
            let len = rng.gen_range(0..20_000);
            let chunk_size = rng.gen_range(1..4096);
            let data: Vec<u8> = (0..len).map(|_| rng.gen()).collect();
            let data = Bytes::from(data);

            let (_, mut segments) = chunk(data.clone(), chunk_size).unwrap();
            assert_eq!(segments.len() as u32, chunk_count(len as u64, chunk_size));

            // Order of arrival must not matter
            segments.reverse();
            assert_eq!(reconstruct(segments).unwrap(), data);
        }
    }

    #[test]
    fn test_empty_file_has_no_segments() {
        let (_, segments) = chunk(Bytes::new(), 64).unwrap();
        assert!(segments.is_empty());
        assert!(reconstruct(segments).unwrap().is_empty());
    }

    #[test]
    fn test_zero_chunk_size_rejected() {
        let result = chunk(test_data(10), 0);
        assert!(matches!(result, Err(StorageError::InvalidChunkSize(0))));
    }

    #[test]
    fn test_reconstruct_with_gap_fails() {
        let (_, mut segments) = chunk(test_data(1000), 100).unwrap();
        segments.remove(3);

        let result = reconstruct(segments);
        assert!(matches!(result, Err(StorageError::SegmentNotFound(id)) if id.ends_with("_chunk_3")));
    }

    #[test]
    fn test_file_hash_is_sha256_hex() {
        assert_eq!(
            file_hash(b"abc"),
            "ba7816bf8f01cfea414140de5dae2223b00361a396177a9cb410ff61f20015ad"
        );
        assert_eq!(
            file_hash(b""),
            "e3b0c44298fc1c149afbf4c8996fb92427ae41e4649b934ca495991b7852b855"
        );
    }
}
