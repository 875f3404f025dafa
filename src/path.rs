//! Path: the root-to-leaf sequence of buckets, and the tree-geometry
//! helpers the rest of the core relies on (§3).

use crate::bucket::Bucket;
use std::fmt;

/// Identifies one leaf (equivalently, one root-to-leaf path) of the tree.
/// Leaves are numbered `0..2^H`.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct LeafId(pub u64);

impl fmt::Debug for LeafId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "LeafId({})", self.0)
    }
}

impl From<u64> for LeafId {
    fn from(value: u64) -> Self {
        LeafId(value)
    }
}

/// Sequence of buckets from root (index 0) to leaf (index `H`).
#[derive(Clone)]
pub struct Path {
    pub leaf: LeafId,
    pub buckets: Vec<Bucket>,
}

impl Path {
    pub fn new(leaf: LeafId, buckets: Vec<Bucket>) -> Self {
        Self { leaf, buckets }
    }

    pub fn height(&self) -> u32 {
        (self.buckets.len() - 1) as u32
    }
}

/// Deepest tree level at which the paths to `p` and `q` share a bucket.
/// Level `0` is the root, level `height` is the leaf level. Two leaves
/// always share the root, so the result is always well-defined.
///
/// Two leaves share a bucket at level `l` exactly when their top
/// `l` bits agree, i.e. `p >> (height - l) == q >> (height - l)`.
pub fn greatest_common_level(p: LeafId, q: LeafId, height: u32) -> u32 {
    let mut level = height;
    while level > 0 {
        let shift = height - level;
        if (p.0 >> shift) == (q.0 >> shift) {
            return level;
        }
        level -= 1;
    }
    0
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn identical_leaves_share_the_leaf_level() {
        assert_eq!(greatest_common_level(LeafId(5), LeafId(5), 3), 3);
    }

    #[test]
    fn distinct_leaves_share_at_most_the_root() {
        // height 3: leaves 0b000 and 0b111 share only the root.
        assert_eq!(greatest_common_level(LeafId(0b000), LeafId(0b111), 3), 0);
    }

    #[test]
    fn partial_prefix_match() {
        // height 3: 0b010 and 0b011 share the top two bits (01) -> level 2.
        assert_eq!(greatest_common_level(LeafId(0b010), LeafId(0b011), 3), 2);
    }

    #[test]
    fn is_symmetric() {
        for height in 1..6 {
            for p in 0..(1u64 << height) {
                for q in 0..(1u64 << height) {
                    assert_eq!(
                        greatest_common_level(LeafId(p), LeafId(q), height),
                        greatest_common_level(LeafId(q), LeafId(p), height)
                    );
                }
            }
        }
    }
}
