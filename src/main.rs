use chunkmesh::{FabricConfig, StorageFabric};
use std::env;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config = match env::args().nth(1) {
        Some(path) => FabricConfig::from_json_file(path)?,
        None => FabricConfig::default(),
    };

    println!("chunkmesh - simulated distributed storage");
    println!("==========================================\n");

    let fabric = StorageFabric::start(config).await?;

    let topology = fabric.topology();
    println!(
        "Network {} ({}), {} nodes, {} links",
        topology.network_name,
        topology.subnet,
        topology.nodes.len(),
        topology.link_count()
    );
    for node in &topology.nodes {
        println!("  {} @ {} [{}]", node.node_id, node.address, node.state);
    }

    // 256 KB at the default 64 KB/s link takes about four seconds
    let data: Vec<u8> = (0..256 * 1024).map(|i| (i % 251) as u8).collect();
    println!("\nUploading demo.bin ({} bytes)...", data.len());
    let file_id = fabric.upload_with_defaults(data.clone(), "demo.bin").await?;
    println!("  stored as {}", file_id);

    let restored = fabric.download(&file_id).await?;
    println!(
        "  downloaded {} bytes, intact: {}",
        restored.len(),
        restored[..] == data[..]
    );

    println!("\nHealth:");
    for (node_id, status) in fabric.health().await {
        println!("  {}: {:?}", node_id, status);
    }

    println!("\nStorage:");
    for (node_id, stats) in fabric.storage_stats() {
        println!(
            "  {}: {} segments, {} bytes used ({:.4}%)",
            node_id, stats.segments, stats.used_bytes, stats.utilization_percent
        );
    }

    let network = fabric.network_stats();
    println!(
        "\nNetwork: {} packets sent, {} lost, {} retransmitted, {:.0} B/s",
        network.total.packets_sent,
        network.total.packets_lost,
        network.total.retransmissions,
        network.throughput_bytes_per_sec
    );

    fabric.shutdown().await?;
    Ok(())
}
