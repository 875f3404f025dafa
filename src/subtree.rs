//! Subtree Cache (§4.3): the sparse in-memory image of the ORAM tree.
//!
//! Nodes are addressed by the standard complete-binary-tree array index
//! (root = 0, children of `i` are `2i+1` and `2i+2`). `add_path` and the
//! back-index both key off that index rather than off `(level, leaf)`
//! pairs, so two different leaves whose paths cross the same node agree
//! on its identity.
//!
//! Both mutation regimes described in the design — additive (read-path
//! completion) and destructive (post-write-back pruning) — go through
//! the same internal lock, and every block-move updates bucket contents
//! and the back-index together, per the design notes on back-index
//! coherence.

use crate::{
    block::{Block, BlockId},
    bucket::Bucket,
    path::{LeafId, Path},
};
use std::collections::{HashMap, HashSet};
use std::sync::Mutex;

type NodeIndex = u64;

fn node_index(leaf: LeafId, level: u32, height: u32) -> NodeIndex {
    debug_assert!(level <= height);
    ((1u64 << level) - 1) + (leaf.0 >> (height - level))
}

struct Inner {
    nodes: HashMap<NodeIndex, Bucket>,
    back_index: HashMap<BlockId, NodeIndex>,
}

pub struct SubtreeCache {
    inner: Mutex<Inner>,
    height: u32,
}

impl SubtreeCache {
    pub fn new(height: u32) -> Self {
        Self {
            inner: Mutex::new(Inner {
                nodes: HashMap::new(),
                back_index: HashMap::new(),
            }),
            height,
        }
    }

    /// Merges a freshly decrypted path into the cache. For each level, if
    /// a bucket is already resident the incoming one is discarded (the
    /// resident copy may hold more recent writes); otherwise the
    /// incoming bucket becomes resident and its back-index entries are
    /// installed.
    pub fn add_path(&self, mut path: Path) {
        let mut inner = self.inner.lock().unwrap();

        for level in 0..=self.height {
            let idx = node_index(path.leaf, level, self.height);
            if inner.nodes.contains_key(&idx) {
                continue;
            }

            let bucket = std::mem::replace(&mut path.buckets[level as usize], Bucket::empty(0));
            for block in bucket.iter() {
                inner.back_index.insert(block.id, idx);
            }
            inner.nodes.insert(idx, bucket);
        }
    }

    /// Returns the currently-resident path to `leaf`, or `None` if any
    /// bucket along it has not been fetched (or has since been pruned).
    pub fn get_path(&self, leaf: LeafId) -> Option<Path> {
        let inner = self.inner.lock().unwrap();
        let mut buckets = Vec::with_capacity(self.height as usize + 1);

        for level in 0..=self.height {
            let idx = node_index(leaf, level, self.height);
            buckets.push(inner.nodes.get(&idx)?.clone());
        }

        Some(Path::new(leaf, buckets))
    }

    pub fn bucket_with_block(&self, block_id: BlockId) -> Option<Bucket> {
        let inner = self.inner.lock().unwrap();
        let idx = inner.back_index.get(&block_id)?;
        inner.nodes.get(idx).cloned()
    }

    pub fn read_block(&self, block_id: BlockId) -> Option<Box<[u8]>> {
        let inner = self.inner.lock().unwrap();
        let idx = inner.back_index.get(&block_id)?;
        inner.nodes.get(idx)?.find(block_id).map(|b| b.data.clone())
    }

    /// Overwrites a block already resident in the cache, in place.
    /// Returns `false` if the block is not currently back-indexed.
    pub fn write_block_in_place(&self, block_id: BlockId, data: Box<[u8]>) -> bool {
        let mut inner = self.inner.lock().unwrap();
        let Some(&idx) = inner.back_index.get(&block_id) else {
            return false;
        };
        match inner.nodes.get_mut(&idx).and_then(|b| b.find_mut(block_id)) {
            Some(block) => {
                block.data = data;
                true
            }
            None => false,
        }
    }

    pub fn map_block_to_bucket(&self, block_id: BlockId, node: NodeIndex) {
        self.inner.lock().unwrap().back_index.insert(block_id, node);
    }

    /// Executes `f` with exclusive access to the path's resident buckets
    /// and the back-index, as a single critical section — this is the
    /// "per-path composite lock" of the design, realized as one mutex
    /// acquisition rather than per-bucket locks acquired top-down (the
    /// cache has no concurrent per-bucket lock granularity to order).
    pub fn with_path_mut<R>(&self, leaf: LeafId, f: impl FnOnce(&mut PathView) -> R) -> Option<R> {
        let mut inner = self.inner.lock().unwrap();

        for level in 0..=self.height {
            let idx = node_index(leaf, level, self.height);
            if !inner.nodes.contains_key(&idx) {
                return None;
            }
        }

        let mut view = PathView {
            inner: &mut inner,
            leaf,
            height: self.height,
        };
        Some(f(&mut view))
    }

    /// Post-write-back pruning (§4.3/§4.4.4). Walks `leaf`'s path from
    /// the leaf toward the root, removing each bucket whose
    /// `last_touched <= cutoff_timestamp` AND whose subtree contains no
    /// leaf in `protected_leaves`. Stops at the first bucket that fails
    /// either test, preserving the prefix-closure invariant.
    pub fn delete_nodes(
        &self,
        leaf: LeafId,
        cutoff_timestamp: u64,
        protected_leaves: &HashSet<LeafId>,
    ) {
        let mut inner = self.inner.lock().unwrap();

        for level in (0..=self.height).rev() {
            let idx = node_index(leaf, level, self.height);

            let Some(bucket) = inner.nodes.get(&idx) else {
                break;
            };

            if bucket.last_touched > cutoff_timestamp {
                break;
            }

            if subtree_covers_any(leaf, level, self.height, protected_leaves) {
                break;
            }

            if let Some(removed) = inner.nodes.remove(&idx) {
                for block in removed.iter() {
                    if inner.back_index.get(&block.id) == Some(&idx) {
                        inner.back_index.remove(&block.id);
                    }
                }
            }
        }
    }

    #[cfg(test)]
    pub fn resident_count(&self) -> usize {
        self.inner.lock().unwrap().nodes.len()
    }
}

fn subtree_covers_any(leaf: LeafId, level: u32, height: u32, leaves: &HashSet<LeafId>) -> bool {
    if leaves.is_empty() {
        return false;
    }
    let idx = node_index(leaf, level, height);
    leaves.iter().any(|&l| node_index(l, level, height) == idx)
}

/// Mutable view over one resident path, handed to the closure passed to
/// [`SubtreeCache::with_path_mut`].
pub struct PathView<'a> {
    inner: &'a mut Inner,
    leaf: LeafId,
    height: u32,
}

impl<'a> PathView<'a> {
    fn node_index(&self, level: u32) -> NodeIndex {
        node_index(self.leaf, level, self.height)
    }

    pub fn bucket_mut(&mut self, level: u32) -> &mut Bucket {
        let idx = self.node_index(level);
        self.inner.nodes.get_mut(&idx).expect("path already validated resident")
    }

    /// Places `block` at `level`, stamping the bucket's `last_touched`
    /// and updating the back-index. Returns `false` if the bucket is
    /// full.
    pub fn place(&mut self, level: u32, block: Block, write_back_counter: u64) -> bool {
        let idx = self.node_index(level);
        let block_id = block.id;
        let placed = self
            .inner
            .nodes
            .get_mut(&idx)
            .expect("path already validated resident")
            .place(block);

        if placed {
            self.inner.nodes.get_mut(&idx).unwrap().last_touched = write_back_counter;
            self.inner.back_index.insert(block_id, idx);
        }
        placed
    }

    pub fn drain_level(&mut self, level: u32) -> Vec<Block> {
        self.bucket_mut(level).drain()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bucket::Bucket;

    fn path_with_blocks(leaf: LeafId, height: u32, blocks: &[(u32, u64)]) -> Path {
        let mut buckets: Vec<Bucket> = (0..=height).map(|_| Bucket::empty(4)).collect();
        for &(level, id) in blocks {
            buckets[level as usize].place(Block::new(BlockId(id), vec![0u8; 4].into_boxed_slice()));
        }
        Path::new(leaf, buckets)
    }

    #[test]
    fn add_path_installs_back_index() {
        let cache = SubtreeCache::new(3);
        let path = path_with_blocks(LeafId(5), 3, &[(2, 99)]);
        cache.add_path(path);

        assert!(cache.bucket_with_block(BlockId(99)).is_some());
        assert_eq!(cache.resident_count(), 4);
    }

    #[test]
    fn resident_copy_is_authoritative_on_second_add() {
        let cache = SubtreeCache::new(3);
        cache.add_path(path_with_blocks(LeafId(5), 3, &[(3, 1)]));

        cache.write_block_in_place(BlockId(1), vec![9, 9, 9, 9].into_boxed_slice());

        // A second fetch of a path sharing the leaf's prefix must not
        // clobber the write we just made to the resident copy.
        cache.add_path(path_with_blocks(LeafId(5), 3, &[(3, 1)]));

        assert_eq!(
            cache.read_block(BlockId(1)).unwrap().as_ref(),
            &[9, 9, 9, 9]
        );
    }

    #[test]
    fn get_path_is_none_until_fetched() {
        let cache = SubtreeCache::new(3);
        assert!(cache.get_path(LeafId(5)).is_none());
        cache.add_path(path_with_blocks(LeafId(5), 3, &[]));
        assert!(cache.get_path(LeafId(5)).is_some());
    }

    #[test]
    fn delete_nodes_stops_at_protected_leaf() {
        let cache = SubtreeCache::new(3);
        cache.add_path(path_with_blocks(LeafId(0), 3, &[]));

        // leaf 0 and leaf 1 share everything except the deepest level.
        let mut protected = HashSet::new();
        protected.insert(LeafId(1));

        cache.delete_nodes(LeafId(0), u64::MAX, &protected);

        // Level 3 (the leaf itself) is safe to remove (leaf 1 does not
        // share it), but level 2 is shared with leaf 1 so pruning stops
        // there, preserving it and everything above.
        assert_eq!(cache.resident_count(), 3);
    }

    #[test]
    fn delete_nodes_respects_timestamp_cutoff() {
        let cache = SubtreeCache::new(3);
        cache.add_path(path_with_blocks(LeafId(0), 3, &[]));
        cache.with_path_mut(LeafId(0), |view| {
            view.bucket_mut(3).last_touched = 10;
        });

        cache.delete_nodes(LeafId(0), 5, &HashSet::new());

        // last_touched (10) > cutoff (5): nothing is pruned.
        assert_eq!(cache.resident_count(), 4);
    }
}
