use crate::coordinator::error::{FabricError, FabricResult};
use crate::health::HealthConfig;
use crate::network::TransportConfig;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Everything needed to bring up a fabric
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct FabricConfig {
    pub network_name: String,

    /// First three octets of the node subnet
    pub address_prefix: String,

    pub node_count: usize,

    /// Storage quota per node in bytes
    pub capacity_per_node: u64,

    /// Node partitions and metadata.json live under here
    pub data_dir: PathBuf,

    pub default_chunk_size: usize,
    pub default_replication: u32,

    pub transport: TransportConfig,
    pub health: HealthConfig,
}

impl Default for FabricConfig {
    fn default() -> Self {
        Self {
            network_name: "P2P_Storage_Network".to_string(),
            address_prefix: "192.168.1".to_string(),
            node_count: 5,
            capacity_per_node: 10 * 1024 * 1024 * 1024, // 10 GB
            data_dir: PathBuf::from("./node_storage"),
            default_chunk_size: 64 * 1024,
            default_replication: 1,
            transport: TransportConfig::default(),
            health: HealthConfig::default(),
        }
    }
}

impl FabricConfig {
    pub fn new(data_dir: impl Into<PathBuf>) -> Self {
        Self {
            data_dir: data_dir.into(),
            ..Default::default()
        }
    }

    pub fn with_nodes(mut self, count: usize) -> Self {
        self.node_count = count;
        self
    }

    pub fn with_capacity_per_node(mut self, bytes: u64) -> Self {
        self.capacity_per_node = bytes;
        self
    }

    pub fn with_transport(mut self, transport: TransportConfig) -> Self {
        self.transport = transport;
        self
    }

    pub fn with_health(mut self, health: HealthConfig) -> Self {
        self.health = health;
        self
    }

    pub fn with_defaults(mut self, chunk_size: usize, replication: u32) -> Self {
        self.default_chunk_size = chunk_size;
        self.default_replication = replication;
        self
    }

    pub fn metadata_path(&self) -> PathBuf {
        self.data_dir.join("metadata.json")
    }

    pub fn node_dir(&self, node_id: &str) -> PathBuf {
        self.data_dir.join(node_id)
    }

    pub fn validate(&self) -> FabricResult<()> {
        if self.node_count == 0 {
            return Err(FabricError::Config("node_count must be at least 1".into()));
        }
        if self.node_count > 253 {
            return Err(FabricError::Config(format!(
                "{} nodes do not fit in a /24",
                self.node_count
            )));
        }
        let octets: Vec<&str> = self.address_prefix.split('.').collect();
        if octets.len() != 3 || octets.iter().any(|o| o.parse::<u8>().is_err()) {
            return Err(FabricError::Config(format!(
                "address prefix {} is not three octets",
                self.address_prefix
            )));
        }
        if self.default_chunk_size == 0 {
            return Err(FabricError::Config("default_chunk_size must be positive".into()));
        }
        if self.default_replication == 0 {
            return Err(FabricError::Config("default_replication must be at least 1".into()));
        }
        self.transport.validate()?;
        Ok(())
    }

    pub fn from_json_file(path: impl AsRef<Path>) -> FabricResult<Self> {
        let raw = std::fs::read(path.as_ref())
            .map_err(|e| FabricError::Config(format!("{}: {}", path.as_ref().display(), e)))?;
        let config: FabricConfig = serde_json::from_slice(&raw)
            .map_err(|e| FabricError::Config(format!("{}: {}", path.as_ref().display(), e)))?;
        config.validate()?;
        Ok(config)
    }

    pub fn to_json_file(&self, path: impl AsRef<Path>) -> FabricResult<()> {
        let raw = serde_json::to_vec_pretty(self)
            .map_err(|e| FabricError::Config(e.to_string()))?;
        std::fs::write(path.as_ref(), raw)
            .map_err(|e| FabricError::Config(format!("{}: {}", path.as_ref().display(), e)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_defaults() {
        let config = FabricConfig::default();
        assert_eq!(config.node_count, 5);
        assert_eq!(config.default_chunk_size, 65536);
        assert_eq!(config.transport.bandwidth_bps, 64 * 1024 * 8);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_validation() {
        assert!(FabricConfig::default().with_nodes(0).validate().is_err());
        assert!(FabricConfig::default().with_nodes(254).validate().is_err());

        let mut config = FabricConfig::default();
        config.address_prefix = "10.0".into();
        assert!(config.validate().is_err());

        let config = FabricConfig::default()
            .with_transport(TransportConfig::default().with_loss(2.0));
        assert!(matches!(config.validate(), Err(FabricError::Network(_))));
    }

    #[test]
    fn test_json_file_round_trip() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("fabric.json");

        let config = FabricConfig::new(dir.path().join("data"))
            .with_nodes(3)
            .with_capacity_per_node(1024);
        config.to_json_file(&path).unwrap();

        let loaded = FabricConfig::from_json_file(&path).unwrap();
        assert_eq!(loaded.node_count, 3);
        assert_eq!(loaded.capacity_per_node, 1024);
        assert_eq!(loaded.data_dir, dir.path().join("data"));
    }

    #[test]
    fn test_partial_json_uses_defaults() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("fabric.json");
        std::fs::write(&path, br#"{ "node_count": 2 }"#).unwrap();

        let loaded = FabricConfig::from_json_file(&path).unwrap();
        assert_eq!(loaded.node_count, 2);
        assert_eq!(loaded.address_prefix, "192.168.1");
    }
}
