//! # walkv
//!
//! An embedded, crash-safe key-value store built on an append-only
//! write-ahead log.
//!
//! ## Features
//!
//! - **Append-only WAL**: chunked, block-aligned, CRC-checked segments
//!   with rotation and a block-level read cache
//! - **Atomic batches**: grouped writes commit all-or-nothing, bracketed
//!   by a terminal marker the recovery path honors
//! - **Persistent radix tree index**: copy-on-write with structural
//!   sharing; readers get lock-free snapshots
//! - **Crash recovery**: reopening replays the log and applies only
//!   fully committed batches
//! - **Per-batch durability**: fsync on every write, on a byte
//!   threshold, or per commit
//!
//! ## Quick Start
//!
//! ```rust,ignore
//! use walkv::{Database, Options};
//!
//! let db = Database::open(Options::new("./my_data"))?;
//!
//! // Single-key operations
//! db.put(b"hello", b"world")?;
//! let value = db.get(b"hello")?;
//! db.delete(b"hello")?;
//!
//! // Atomic batches
//! let mut batch = db.new_batch(Default::default());
//! batch.put(b"key1", b"value1")?;
//! batch.put(b"key2", b"value2")?;
//! batch.commit()?;
//! ```

// Public modules
pub mod error;
pub mod options;
pub mod record;

// Storage layers
pub mod cache;
pub mod radix;
pub mod wal;

// Engine
mod batch;
mod db;
mod index;
mod util;

// Re-export main types for convenience
pub use error::{Error, Result};
pub use options::{BatchOptions, Options, OptionsBuilder};
pub use record::{LogRecord, LogRecordType};

pub use batch::Batch;
pub use db::{Database, DatabaseStats};

pub use cache::{BlockCache, CacheStats, LruCache};
pub use radix::RadixTree;
pub use wal::{ChunkPosition, ChunkType, Wal, WalOptions, WalReader};
