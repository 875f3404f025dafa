//! Stash (§4.2): bounded overflow store of real blocks not currently
//! placed on a path. O(1) lookup by id; `snapshot` is linearizable with
//! respect to concurrent `add`/`remove` because all three go through the
//! same lock.

use crate::block::{Block, BlockId};
use std::collections::HashMap;
use tokio::sync::Mutex;

pub struct Stash {
    inner: Mutex<HashMap<BlockId, Block>>,
}

impl Stash {
    pub fn new() -> Self {
        Self {
            inner: Mutex::new(HashMap::new()),
        }
    }

    pub async fn add(&self, block: Block) {
        self.inner.lock().await.insert(block.id, block);
    }

    pub async fn remove(&self, block_id: BlockId) -> Option<Block> {
        self.inner.lock().await.remove(&block_id)
    }

    pub async fn find(&self, block_id: BlockId) -> Option<Block> {
        self.inner.lock().await.get(&block_id).cloned()
    }

    pub async fn len(&self) -> usize {
        self.inner.lock().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }

    pub async fn snapshot(&self) -> Vec<Block> {
        self.inner.lock().await.values().cloned().collect()
    }
}

impl Default for Stash {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn block(id: u64) -> Block {
        Block::new(BlockId(id), vec![id as u8].into_boxed_slice())
    }

    #[tokio::test]
    async fn add_find_remove_round_trip() {
        let stash = Stash::new();
        stash.add(block(1)).await;
        assert!(stash.find(BlockId(1)).await.is_some());
        assert_eq!(stash.len().await, 1);

        let removed = stash.remove(BlockId(1)).await.unwrap();
        assert_eq!(removed.id, BlockId(1));
        assert!(stash.is_empty().await);
    }

    #[tokio::test]
    async fn snapshot_reflects_current_contents() {
        let stash = Stash::new();
        stash.add(block(1)).await;
        stash.add(block(2)).await;

        let mut ids: Vec<_> = stash.snapshot().await.into_iter().map(|b| b.id).collect();
        ids.sort();
        assert_eq!(ids, vec![BlockId(1), BlockId(2)]);
    }
}
