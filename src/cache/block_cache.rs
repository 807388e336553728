//! Block cache for WAL segment blocks.

use std::sync::Arc;

use bytes::Bytes;

use super::lru::{CacheStats, LruCache};
use crate::wal::BLOCK_SIZE;

/// Key for the block cache: which block of which segment.
#[derive(Debug, Clone, Copy, Hash, PartialEq, Eq)]
pub struct BlockCacheKey {
    /// Segment file id.
    pub segment_id: u32,
    /// Block number within the segment.
    pub block_number: u32,
}

impl BlockCacheKey {
    /// Create a new block cache key.
    pub fn new(segment_id: u32, block_number: u32) -> Self {
        Self {
            segment_id,
            block_number,
        }
    }
}

/// Cache of full 32 KiB segment blocks.
///
/// Only completed blocks are cached: the tail block of the active segment
/// is still growing and must always be read from the file. Cached blocks
/// never change, so hits can be handed out without validation.
pub struct BlockCache {
    cache: LruCache<BlockCacheKey, Bytes>,
}

impl BlockCache {
    /// Create a cache bounded by a byte budget. Capacity is rounded up to
    /// a whole number of blocks.
    pub fn with_byte_capacity(bytes: u64) -> Self {
        let blocks = (bytes + BLOCK_SIZE as u64 - 1) / BLOCK_SIZE as u64;
        Self {
            cache: LruCache::new(blocks.max(1) as usize),
        }
    }

    /// Get a block from the cache.
    pub fn get(&self, segment_id: u32, block_number: u32) -> Option<Bytes> {
        self.cache.get(&BlockCacheKey::new(segment_id, block_number))
    }

    /// Insert a full block into the cache.
    pub fn insert(&self, segment_id: u32, block_number: u32, block: Bytes) {
        debug_assert_eq!(block.len(), BLOCK_SIZE);
        self.cache
            .insert(BlockCacheKey::new(segment_id, block_number), block);
    }

    /// Number of cached blocks.
    pub fn len(&self) -> usize {
        self.cache.len()
    }

    /// Check if the cache is empty.
    pub fn is_empty(&self) -> bool {
        self.cache.is_empty()
    }

    /// Drop every cached block.
    pub fn purge(&self) {
        self.cache.purge();
    }

    /// Get cache statistics.
    pub fn stats(&self) -> Arc<CacheStats> {
        self.cache.stats()
    }
}
