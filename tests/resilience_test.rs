//! Restart, corruption, lossy links and cancellation

mod common;

use chunkmesh::clock::VirtualClock;
use chunkmesh::health::HealthStatus;
use chunkmesh::network::TransportConfig;
use chunkmesh::planner::PlacementError;
use chunkmesh::storage::{file_hash, segment_id, StorageError};
use chunkmesh::{CancelToken, FabricError, StorageFabric};
use common::{lossless_config, payload, start, CancelAt, KB};
use std::sync::Arc;
use std::time::Duration;
use tempfile::TempDir;

#[tokio::test]
async fn test_files_survive_restart() {
    println!("\n=== Restart on the same data directory ===\n");

    let dir = TempDir::new().unwrap();
    let photo = payload(200 * KB, 11);
    let notes = payload(3 * KB, 12);

    let (photo_id, notes_id, used_before) = {
        let (fabric, _clock) = start(lossless_config(dir.path())).await;
        let photo_id = fabric.upload(photo.clone(), "photo.jpg", 64 * KB, 2).await.unwrap();
        let notes_id = fabric.upload(notes.clone(), "notes.txt", KB, 1).await.unwrap();
        let used = fabric.storage_stats();
        fabric.shutdown().await.unwrap();
        (photo_id, notes_id, used)
    };

    let (fabric, _clock) = start(lossless_config(dir.path())).await;

    let files = fabric.list_files().await;
    assert_eq!(files.len(), 2);
    assert_eq!(fabric.file_info(&photo_id).await.unwrap().replicas, 2);

    for (node_id, stats) in fabric.storage_stats() {
        assert_eq!(stats.used_bytes, used_before[&node_id].used_bytes, "{}", node_id);
        assert_eq!(stats.segments, used_before[&node_id].segments);
    }

    let restored = fabric.download(&photo_id).await.unwrap();
    assert_eq!(&restored[..], &photo[..]);
    let restored = fabric.download(&notes_id).await.unwrap();
    assert_eq!(&restored[..], &notes[..]);

    assert!(fabric.reconcile().await.unwrap().is_consistent());
}

#[tokio::test]
async fn test_corrupted_blob_served_from_replica() {
    let dir = TempDir::new().unwrap();
    let (fabric, _clock) = start(lossless_config(dir.path())).await;
    let data = payload(256 * KB, 13);

    let file_id = fabric.upload(data.clone(), "disk.img", 64 * KB, 2).await.unwrap();
    let record = fabric.file_info(&file_id).await.unwrap();
    assert_eq!(record.nodes_for(0), vec!["Node_01", "Node_02"]);

    let blob = dir
        .path()
        .join("Node_01")
        .join(format!("{}.bin", segment_id(&record.file_hash, 0)));
    let mut raw = std::fs::read(&blob).unwrap();
    raw[100] ^= 0xFF;
    std::fs::write(&blob, raw).unwrap();

    let restored = fabric.download(&file_id).await.unwrap();
    assert_eq!(&restored[..], &data[..]);
}

#[tokio::test]
async fn test_corrupted_blob_without_replica_fails() {
    let dir = TempDir::new().unwrap();
    let (fabric, _clock) = start(lossless_config(dir.path())).await;
    let data = payload(256 * KB, 14);

    let file_id = fabric.upload(data, "disk.img", 64 * KB, 1).await.unwrap();
    let record = fabric.file_info(&file_id).await.unwrap();

    let blob = dir
        .path()
        .join("Node_02")
        .join(format!("{}.bin", segment_id(&record.file_hash, 1)));
    std::fs::write(&blob, b"tampered").unwrap();

    match fabric.download(&file_id).await {
        Err(FabricError::Storage(StorageError::CorruptedSegment(id))) => {
            assert_eq!(id, segment_id(&record.file_hash, 1));
        }
        other => panic!("expected CorruptedSegment, got {:?}", other),
    }
}

#[tokio::test]
async fn test_lossy_corrupting_links_still_deliver() {
    println!("\n=== 20% loss, 10% corruption ===\n");

    let dir = TempDir::new().unwrap();
    let transport = TransportConfig::default()
        .with_loss(0.2)
        .with_corruption(0.1)
        .with_max_attempts(25)
        .with_seed(42);
    let (fabric, _clock) = start(lossless_config(dir.path()).with_transport(transport)).await;
    let data = payload(256 * KB, 15);

    let file_id = fabric.upload(data.clone(), "noisy.bin", 16 * KB, 2).await.unwrap();
    let restored = fabric.download(&file_id).await.unwrap();
    assert_eq!(&restored[..], &data[..]);

    assert_eq!(fabric.network_stats().configured_loss_rate, 0.2);
    let stats = fabric.network_stats().total;
    println!(
        "sent {} lost {} corrupted {} retransmitted {}",
        stats.packets_sent, stats.packets_lost, stats.packets_corrupted, stats.retransmissions
    );
    assert!(stats.packets_lost > 0);
    assert!(stats.packets_corrupted > 0);
    // Every send eventually got through, so each failure was retried
    assert_eq!(
        stats.retransmissions,
        stats.packets_lost + stats.packets_corrupted
    );
    assert!(stats.packets_received < stats.packets_sent);
}

#[tokio::test]
async fn test_dead_links_leave_no_live_nodes() {
    let dir = TempDir::new().unwrap();
    let transport = TransportConfig::reliable().with_loss(1.0).with_seed(1);
    let (fabric, _clock) = start(lossless_config(dir.path()).with_transport(transport)).await;

    let health = fabric.health().await;
    assert!(health.values().all(|s| *s == HealthStatus::Dead));

    let result = fabric.upload(payload(4 * KB, 16), "lost.bin", KB, 1).await;
    assert!(matches!(
        result,
        Err(FabricError::Placement(PlacementError::NoLiveNodes))
    ));
    assert!(fabric.list_files().await.is_empty());
}

#[tokio::test]
async fn test_cancel_before_upload() {
    let dir = TempDir::new().unwrap();
    let (fabric, _clock) = start(lossless_config(dir.path())).await;

    let token = CancelToken::new();
    token.cancel();
    let result = fabric
        .upload_with_cancel(payload(64 * KB, 17), "never.bin", 16 * KB, 1, &token)
        .await;

    assert!(matches!(result, Err(FabricError::Cancelled)));
    assert!(fabric.list_files().await.is_empty());
    assert!(fabric.storage_stats().values().all(|s| s.segments == 0));
}

#[tokio::test]
async fn test_cancel_mid_upload_rolls_back() {
    println!("\n=== Cancel after 1.5s of a 4s upload ===\n");

    let dir = TempDir::new().unwrap();
    let token = CancelToken::new();
    let clock = CancelAt::new(VirtualClock::new(), Duration::from_millis(1500), token.clone());
    let fabric = StorageFabric::start_with_clock(lossless_config(dir.path()), Arc::new(clock))
        .await
        .unwrap();
    let data = payload(256 * KB, 18);

    let result = fabric
        .upload_with_cancel(data.clone(), "big.bin", 64 * KB, 1, &token)
        .await;
    assert!(matches!(result, Err(FabricError::Cancelled)));
    assert!(token.is_cancelled());

    // Segments sent before the cancel were purged
    assert!(fabric.list_files().await.is_empty());
    for (node_id, stats) in fabric.storage_stats() {
        assert_eq!(stats.segments, 0, "{} kept a segment", node_id);
        assert_eq!(stats.used_bytes, 0);
    }
    assert!(fabric.reconcile().await.unwrap().is_consistent());

    // The fabric stays usable
    let file_id = fabric.upload(data.clone(), "big.bin", 64 * KB, 1).await.unwrap();
    let restored = fabric.download(&file_id).await.unwrap();
    assert_eq!(&restored[..], &data[..]);
}

#[tokio::test]
async fn test_cancel_download() {
    let dir = TempDir::new().unwrap();
    let (fabric, _clock) = start(lossless_config(dir.path())).await;

    let file_id = fabric
        .upload(payload(64 * KB, 19), "movie.mkv", 16 * KB, 1)
        .await
        .unwrap();

    let token = CancelToken::new();
    token.cancel();
    let result = fabric.download_with_cancel(&file_id, &token).await;
    assert!(matches!(result, Err(FabricError::Cancelled)));

    // The stored file is untouched
    assert_eq!(fabric.list_files().await.len(), 1);
    assert!(fabric.download(&file_id).await.is_ok());
}

#[tokio::test]
async fn test_reconcile_reports_missing_and_orphaned() {
    let dir = TempDir::new().unwrap();
    let (fabric, _clock) = start(lossless_config(dir.path())).await;

    let file_id = fabric
        .upload(payload(8 * KB, 20), "a.bin", 4 * KB, 1)
        .await
        .unwrap();
    assert!(fabric.reconcile().await.unwrap().is_consistent());

    let record = fabric.file_info(&file_id).await.unwrap();
    fabric.shutdown().await.unwrap();

    // Move chunk 1 from Node_02 to Node_05 behind the fabric's back
    let id = segment_id(&record.file_hash, 1);
    let from = dir.path().join("Node_02").join(format!("{}.bin", id));
    let to = dir.path().join("Node_05").join(format!("{}.bin", id));
    std::fs::rename(&from, &to).unwrap();
    drop(fabric);

    let (fabric, _clock) = start(lossless_config(dir.path())).await;
    let report = fabric.reconcile().await.unwrap();

    assert_eq!(report.missing.len(), 1);
    assert_eq!(report.missing[0].node_id, "Node_02");
    assert_eq!(report.missing[0].segment_id, id);
    assert_eq!(report.orphaned.len(), 1);
    assert_eq!(report.orphaned[0].node_id, "Node_05");
    assert!(report.unreachable.is_empty());
}

#[tokio::test]
async fn test_reads_files_written_in_flat_snapshot_format() {
    let dir = TempDir::new().unwrap();
    let data = payload(6 * KB, 21);
    let hash = file_hash(&data);
    let file_id = hash[..16].to_string();

    // Two 4 KB chunks on Node_01 and Node_02, SHA-256 named, no manifests
    for (index, node) in ["Node_01", "Node_02"].iter().enumerate() {
        let node_dir = dir.path().join(node);
        std::fs::create_dir_all(&node_dir).unwrap();
        let start = index * 4 * KB;
        let end = std::cmp::min(start + 4 * KB, data.len());
        std::fs::write(
            node_dir.join(format!("{}_chunk_{}.bin", hash, index)),
            &data[start..end],
        )
        .unwrap();
    }
    let snapshot = serde_json::json!({
        file_id.clone(): {
            "file_id": file_id,
            "original_filename": "legacy.txt",
            "file_hash": hash,
            "total_size_bytes": data.len(),
            "chunk_size_bytes": 4 * KB,
            "total_chunks": 2,
            "chunks": { "0": "Node_01", "1": "Node_02" },
            "created_at": "2024-05-01T12:30:00.123456",
            "replicas": 1
        }
    });
    std::fs::write(
        dir.path().join("metadata.json"),
        serde_json::to_vec_pretty(&snapshot).unwrap(),
    )
    .unwrap();

    let (fabric, _clock) = start(lossless_config(dir.path())).await;
    assert_eq!(fabric.list_files().await.len(), 1);

    let restored = fabric.download(&file_id).await.unwrap();
    assert_eq!(&restored[..], &data[..]);

    // Same content hashes to the same id, so nothing new is written
    let again = fabric.upload(data, "copy.txt", 4 * KB, 1).await.unwrap();
    assert_eq!(again, file_id);
    assert_eq!(fabric.list_files().await.len(), 1);
}

#[tokio::test]
async fn test_lost_store_answer_is_rolled_back() {
    println!("\n=== 20% loss, single attempt, no handshake ===\n");

    let mut failures = 0;
    for seed in 0..40u64 {
        let dir = TempDir::new().unwrap();
        let transport = TransportConfig::reliable()
            .with_loss(0.2)
            .with_max_attempts(1)
            .with_handshake(false)
            .with_seed(seed);
        let config = lossless_config(dir.path())
            .with_nodes(3)
            .with_transport(transport);
        let (fabric, _clock) = start(config).await;

        let result = fabric
            .upload(payload(16 * KB, seed as u8), "flaky.bin", 4 * KB, 1)
            .await;

        let report = fabric.reconcile().await.unwrap();
        assert!(report.orphaned.is_empty(), "seed {}: {:?}", seed, report.orphaned);
        assert!(report.missing.is_empty(), "seed {}: {:?}", seed, report.missing);

        if result.is_err() {
            failures += 1;
            assert!(fabric.list_files().await.is_empty());
            let used: u64 = fabric.storage_stats().values().map(|s| s.used_bytes).sum();
            assert_eq!(used, 0, "seed {} left data behind", seed);
        }
    }
    println!("{} of 40 uploads failed and were rolled back", failures);
    assert!(failures > 0);
}
