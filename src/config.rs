//! Deployment configuration: the constants the design calls out in §6 plus
//! the addresses of the storage servers and the client listener.

use crate::error::{Error, Result};
use serde::Deserialize;
use std::{net::SocketAddr, path::Path};

/// Tree height `H`: the tree has `2^H` leaves and paths are `H + 1` buckets.
pub type Height = u32;

#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    /// Tree height (`H`).
    pub tree_height: Height,
    /// Bucket capacity (`Z`), typically 4.
    pub bucket_capacity: usize,
    /// Block payload size in bytes (`B`).
    pub block_size: usize,
    /// Stash capacity (`S`) before an overflow is logged.
    pub stash_capacity: usize,
    /// Write-back threshold (`K`): a batch ships every `K` flushes.
    pub write_back_threshold: u64,
    /// Address the proxy listens on for client connections.
    pub client_listen_addr: SocketAddr,
    /// Storage servers, in partition order. Leaves are split contiguously
    /// across these addresses (see `PositionMap::server_of`).
    pub servers: Vec<SocketAddr>,
}

impl Config {
    pub fn from_toml_str(text: &str) -> Result<Self> {
        let config: Self = toml::from_str(text).map_err(|e| Error::Config(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let text = std::fs::read_to_string(path)?;
        Self::from_toml_str(&text)
    }

    /// Total number of leaves: `2^H`.
    pub fn num_leaves(&self) -> u64 {
        1u64 << self.tree_height
    }

    fn validate(&self) -> Result<()> {
        if self.servers.is_empty() {
            return Err(Error::Config("at least one storage server is required".into()));
        }
        if self.tree_height == 0 || self.tree_height > 62 {
            return Err(Error::Config("tree_height out of range".into()));
        }
        if self.bucket_capacity == 0 {
            return Err(Error::Config("bucket_capacity must be positive".into()));
        }
        if self.write_back_threshold == 0 {
            return Err(Error::Config("write_back_threshold must be positive".into()));
        }
        if self.num_leaves() < self.servers.len() as u64 {
            return Err(Error::Config(
                "tree_height too small to partition across all servers".into(),
            ));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_minimal_config() {
        let text = r#"
            tree_height = 3
            bucket_capacity = 4
            block_size = 4
            stash_capacity = 64
            write_back_threshold = 3
            client_listen_addr = "127.0.0.1:9000"
            servers = ["127.0.0.1:9100", "127.0.0.1:9101"]
        "#;

        let config = Config::from_toml_str(text).unwrap();
        assert_eq!(config.num_leaves(), 8);
        assert_eq!(config.servers.len(), 2);
    }

    #[test]
    fn rejects_no_servers() {
        let text = r#"
            tree_height = 3
            bucket_capacity = 4
            block_size = 4
            stash_capacity = 64
            write_back_threshold = 3
            client_listen_addr = "127.0.0.1:9000"
            servers = []
        "#;

        assert!(Config::from_toml_str(text).is_err());
    }
}
