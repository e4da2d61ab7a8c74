//! Hash tree construction for aggregation rounds and the calendar

use kts_types::{
    messages::{compute_leaf_hash, hash_pair, MerkleNode, MerklePath},
    Digest, Imprint, Nonce,
};

/// One client request inside an aggregation round
#[derive(Debug, Clone)]
pub struct AggregationLeaf {
    /// The document imprint to be timestamped
    pub imprint: Imprint,
    /// The unique nonce for this leaf
    pub nonce: Nonce,
}

impl AggregationLeaf {
    pub fn compute_hash(&self) -> Digest {
        compute_leaf_hash(&self.imprint, &self.nonce)
    }
}

/// A binary hash tree over a fixed sequence of leaf hashes.
///
/// An odd node at the end of a level is paired with itself.
#[derive(Debug, Clone)]
pub struct HashTree {
    /// levels[0] is the leaves, the last level holds only the root
    levels: Vec<Vec<Digest>>,
}

impl HashTree {
    pub fn root(&self) -> Digest {
        self.levels
            .last()
            .and_then(|level| level.first())
            .copied()
            .unwrap_or_else(|| Digest::new([0u8; 32]))
    }

    pub fn leaf_count(&self) -> usize {
        self.levels.first().map_or(0, Vec::len)
    }

    pub fn leaf(&self, index: usize) -> Option<&Digest> {
        self.levels.first().and_then(|leaves| leaves.get(index))
    }

    /// Generate a Merkle path for a specific leaf
    pub fn generate_path(&self, leaf_index: usize) -> Option<MerklePath> {
        if leaf_index >= self.leaf_count() {
            return None;
        }

        let mut siblings = Vec::with_capacity(self.levels.len().saturating_sub(1));
        let mut index = leaf_index;

        for level in &self.levels[..self.levels.len() - 1] {
            let sibling = if index % 2 == 0 {
                // Trailing odd node was hashed with itself
                MerkleNode {
                    hash: *level.get(index + 1).unwrap_or(&level[index]),
                    is_left: false,
                }
            } else {
                MerkleNode {
                    hash: level[index - 1],
                    is_left: true,
                }
            };
            siblings.push(sibling);
            index /= 2;
        }

        Some(MerklePath {
            leaf_index: leaf_index as u64,
            siblings,
        })
    }
}

/// Builder for [`HashTree`]
#[derive(Debug, Default)]
pub struct HashTreeBuilder {
    leaves: Vec<Digest>,
}

impl HashTreeBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            leaves: Vec::with_capacity(capacity),
        }
    }

    pub fn add_leaf(&mut self, leaf: Digest) {
        self.leaves.push(leaf);
    }

    pub fn len(&self) -> usize {
        self.leaves.len()
    }

    pub fn is_empty(&self) -> bool {
        self.leaves.is_empty()
    }

    pub fn build(self) -> HashTree {
        if self.leaves.is_empty() {
            return HashTree { levels: Vec::new() };
        }

        let mut levels = vec![self.leaves];
        while let Some(prev_level) = levels.last() {
            if prev_level.len() <= 1 {
                break;
            }
            let next_level: Vec<Digest> = prev_level
                .chunks(2)
                .map(|pair| {
                    let left = &pair[0];
                    hash_pair(left, pair.get(1).unwrap_or(left))
                })
                .collect();
            levels.push(next_level);
        }

        HashTree { levels }
    }
}

impl FromIterator<Digest> for HashTree {
    fn from_iter<I: IntoIterator<Item = Digest>>(iter: I) -> Self {
        HashTreeBuilder {
            leaves: iter.into_iter().collect(),
        }
        .build()
    }
}
