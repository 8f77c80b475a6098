//! Overlapping operations against one fabric

mod common;

use common::{lossless_config, payload, start, KB};
use tempfile::TempDir;

#[tokio::test]
async fn test_same_bytes_uploaded_twice_at_once() {
    println!("\n=== Concurrent upload of identical bytes ===\n");

    let dir = TempDir::new().unwrap();
    let (fabric, _clock) = start(lossless_config(dir.path())).await;
    let data = payload(128 * KB, 21);

    let (first, second) = tokio::join!(
        fabric.upload(data.clone(), "left.bin", 16 * KB, 2),
        fabric.upload(data.clone(), "right.bin", 16 * KB, 2),
    );
    let first = first.unwrap();
    let second = second.unwrap();
    assert_eq!(first, second);

    let files = fabric.list_files().await;
    assert_eq!(files.len(), 1);
    assert_eq!(files[0].total_chunks, 8);

    let report = fabric.reconcile().await.unwrap();
    println!("missing: {:?}, orphaned: {:?}", report.missing, report.orphaned);
    assert!(report.is_consistent());

    // One copy per replica, never two
    let used: u64 = fabric.storage_stats().values().map(|s| s.used_bytes).sum();
    assert_eq!(used, 2 * 128 * KB as u64);

    let restored = fabric.download(&first).await.unwrap();
    assert_eq!(&restored[..], &data[..]);
}

#[tokio::test]
async fn test_distinct_uploads_at_once() {
    println!("\n=== Concurrent upload of distinct files ===\n");

    let dir = TempDir::new().unwrap();
    let (fabric, _clock) = start(lossless_config(dir.path())).await;
    let alpha = payload(96 * KB, 22);
    let beta = payload(80 * KB, 23);

    let (a, b) = tokio::join!(
        fabric.upload(alpha.clone(), "alpha.bin", 16 * KB, 1),
        fabric.upload(beta.clone(), "beta.bin", 16 * KB, 1),
    );
    let a = a.unwrap();
    let b = b.unwrap();
    assert_ne!(a, b);
    assert_eq!(fabric.list_files().await.len(), 2);
    assert!(fabric.reconcile().await.unwrap().is_consistent());

    let (restored_a, restored_b) = tokio::join!(fabric.download(&a), fabric.download(&b));
    assert_eq!(&restored_a.unwrap()[..], &alpha[..]);
    assert_eq!(&restored_b.unwrap()[..], &beta[..]);

    let stats = fabric.network_stats();
    let sent: u64 = stats.per_pair.iter().map(|p| p.stats.packets_sent).sum();
    let received: u64 = stats.per_pair.iter().map(|p| p.stats.packets_received).sum();
    let bytes: u64 = stats.per_pair.iter().map(|p| p.stats.bytes_sent).sum();
    assert_eq!(stats.total.packets_sent, sent);
    assert_eq!(stats.total.packets_received, received);
    assert_eq!(stats.total.bytes_sent, bytes);
    assert_eq!(sent, received);
}
