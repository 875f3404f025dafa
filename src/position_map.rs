//! Position Map (§4.1): the authoritative block-id -> leaf-id map, plus
//! the server-partitioning math. Leaves are split contiguously across
//! the configured storage servers; `relative_leaf` is computed, not
//! tabulated.

use crate::{block::BlockId, path::LeafId};
use std::{collections::HashMap, net::SocketAddr};
use tokio::sync::RwLock;

/// `position_map.get` result for a block that has never been written.
pub const UNMAPPED: Option<LeafId> = None;

pub struct PositionMap {
    map: RwLock<HashMap<BlockId, LeafId>>,
    servers: Vec<SocketAddr>,
    num_leaves: u64,
}

impl PositionMap {
    pub fn new(servers: Vec<SocketAddr>, num_leaves: u64) -> Self {
        assert!(!servers.is_empty(), "at least one storage server is required");
        assert!(
            num_leaves >= servers.len() as u64,
            "not enough leaves to partition across all servers"
        );

        Self {
            map: RwLock::new(HashMap::new()),
            servers,
            num_leaves,
        }
    }

    pub async fn get(&self, block_id: BlockId) -> Option<LeafId> {
        self.map.read().await.get(&block_id).copied()
    }

    pub async fn set(&self, block_id: BlockId, leaf: LeafId) {
        self.map.write().await.insert(block_id, leaf);
    }

    pub fn num_leaves(&self) -> u64 {
        self.num_leaves
    }

    pub fn num_servers(&self) -> usize {
        self.servers.len()
    }

    /// Index of the server owning `leaf`: leaves are split into
    /// contiguous ranges, server `i` owning `[i * 2^H / N, (i + 1) * 2^H
    /// / N)`. Inverting that boundary formula for a given leaf `x` gives
    /// `idx = floor(((x + 1) * N - 1) / num_leaves)`.
    fn server_index(&self, leaf: LeafId) -> usize {
        let n = self.servers.len() as u64;
        let idx = ((leaf.0 + 1) * n - 1) / self.num_leaves;
        idx.min(n - 1) as usize
    }

    pub fn server_of(&self, leaf: LeafId) -> SocketAddr {
        self.servers[self.server_index(leaf)]
    }

    /// Pure function: absolute leaf -> 0-based index within its owning
    /// server's contiguous partition.
    pub fn relative_leaf(&self, leaf: LeafId) -> u64 {
        let n = self.servers.len() as u64;
        let idx = self.server_index(leaf) as u64;
        let partition_start = (idx * self.num_leaves) / n;
        leaf.0 - partition_start
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn addr(port: u16) -> SocketAddr {
        format!("127.0.0.1:{port}").parse().unwrap()
    }

    #[tokio::test]
    async fn unmapped_block_returns_none() {
        let map = PositionMap::new(vec![addr(1)], 8);
        assert_eq!(map.get(BlockId(5)).await, None);
    }

    #[tokio::test]
    async fn set_then_get_round_trips() {
        let map = PositionMap::new(vec![addr(1)], 8);
        map.set(BlockId(5), LeafId(3)).await;
        assert_eq!(map.get(BlockId(5)).await, Some(LeafId(3)));
    }

    #[test]
    fn partitions_contiguously_across_servers() {
        let map = PositionMap::new(vec![addr(1), addr(2)], 8);
        for leaf in 0..4 {
            assert_eq!(map.server_of(LeafId(leaf)), addr(1));
            assert_eq!(map.relative_leaf(LeafId(leaf)), leaf);
        }
        for leaf in 4..8 {
            assert_eq!(map.server_of(LeafId(leaf)), addr(2));
            assert_eq!(map.relative_leaf(LeafId(leaf)), leaf - 4);
        }
    }

    #[test]
    fn uneven_partition_assigns_remainder_to_last_server() {
        // 10 leaves over 3 servers: partitions of size 3, 3, 4.
        let map = PositionMap::new(vec![addr(1), addr(2), addr(3)], 10);
        assert_eq!(map.server_of(LeafId(0)), addr(1));
        assert_eq!(map.server_of(LeafId(2)), addr(1));
        assert_eq!(map.server_of(LeafId(3)), addr(2));
        assert_eq!(map.server_of(LeafId(6)), addr(3));
        assert_eq!(map.relative_leaf(LeafId(9)), 3);
    }
}
