//! Key index.
//!
//! Maps key bytes to the position of the key's latest record in the WAL.
//! The backing structure is the persistent radix tree: writers build a new
//! version in a transaction and publish it atomically through an
//! [`ArcSwap`], so readers never take a lock and always see a complete
//! tree.

use arc_swap::ArcSwap;
use parking_lot::Mutex;
use std::sync::Arc;

use crate::radix::RadixTree;
use crate::wal::ChunkPosition;

/// In-memory mapping from keys to chunk positions.
pub(crate) struct Index {
    tree: ArcSwap<RadixTree<ChunkPosition>>,
    /// Serializes mutations; reads go straight to the published tree.
    write_lock: Mutex<()>,
}

impl Index {
    /// Create an empty index.
    pub fn new() -> Self {
        Self {
            tree: ArcSwap::from_pointee(RadixTree::new()),
            write_lock: Mutex::new(()),
        }
    }

    /// Map a key to a position. Returns the position it replaced, if any.
    pub fn put(&self, key: &[u8], position: ChunkPosition) -> Option<ChunkPosition> {
        let _guard = self.write_lock.lock();
        let mut txn = self.tree.load().txn();
        let old = txn.insert(key, position);
        self.tree.store(Arc::new(txn.commit()));
        old
    }

    /// Remove a key. Returns the position it mapped to, if any.
    pub fn delete(&self, key: &[u8]) -> Option<ChunkPosition> {
        let _guard = self.write_lock.lock();
        let mut txn = self.tree.load().txn();
        let old = txn.delete(key);
        self.tree.store(Arc::new(txn.commit()));
        old
    }

    /// Look up a key's position. Lock-free snapshot read.
    pub fn get(&self, key: &[u8]) -> Option<ChunkPosition> {
        self.tree.load().get(key).copied()
    }

    /// Number of live keys.
    pub fn len(&self) -> usize {
        self.tree.load().len()
    }
}
