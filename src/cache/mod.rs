//! Caching layer.
//!
//! The WAL keeps a block-level cache so repeated point reads against the
//! same 32 KiB block hit memory instead of the file. The cache is a
//! sharded LRU; entries are immutable once inserted.

mod block_cache;
mod lru;

pub use block_cache::{BlockCache, BlockCacheKey};
pub use lru::{CacheStats, LruCache};
