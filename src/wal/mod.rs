//! Write-ahead log.
//!
//! The WAL is an ordered set of append-only segment files. Each segment is
//! divided into 32 KiB blocks; records are framed as chunks with a 7-byte
//! header:
//!
//! ```text
//! +---------+--------+------+----------------+
//! | CRC (4) | len (2)| type | payload        |
//! +---------+--------+------+----------------+
//! ```
//!
//! A record that fits in the current block is one FULL chunk; otherwise it
//! is split into FIRST, zero or more MIDDLE, and LAST chunks, each wholly
//! within one block. Chunks never cross segment boundaries. When fewer
//! than 7 spare bytes remain in a block the tail is zero-padded and the
//! next chunk starts at the next block boundary.
//!
//! One segment (the highest id) is active and writable; the rest are
//! read-only. The WAL rotates to a fresh segment when a write would push
//! the active segment past the configured size.

mod reader;
mod segment;

pub use reader::WalReader;
pub(crate) use segment::Segment;

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;

use parking_lot::RwLock;

use crate::cache::BlockCache;
use crate::util::filename::{create_dir_if_missing, parse_segment_id, segment_file_path};
use crate::{Error, Result};

/// Block size (32 KiB).
pub const BLOCK_SIZE: usize = 32 * 1024;

/// Chunk header size: CRC (4) + length (2) + type (1).
pub const CHUNK_HEADER_SIZE: usize = 7;

/// Id of the first segment file ever created in a directory.
pub(crate) const INITIAL_SEGMENT_ID: u32 = 1;

/// Chunk types for WAL framing.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum ChunkType {
    /// Complete record in a single chunk.
    Full = 0,
    /// First chunk of a fragmented record.
    First = 1,
    /// Interior chunk of a fragmented record.
    Middle = 2,
    /// Final chunk of a fragmented record.
    Last = 3,
}

impl ChunkType {
    /// Create from byte value.
    pub fn from_byte(b: u8) -> Option<Self> {
        match b {
            0 => Some(ChunkType::Full),
            1 => Some(ChunkType::First),
            2 => Some(ChunkType::Middle),
            3 => Some(ChunkType::Last),
            _ => None,
        }
    }

    /// Convert to byte.
    pub fn to_byte(self) -> u8 {
        self as u8
    }
}

/// Location of a logical record on disk.
///
/// Positions stay valid for the life of the record: segments are
/// append-only and records are never rewritten in place.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChunkPosition {
    /// Segment file id.
    pub segment_id: u32,
    /// Block holding the record's first chunk.
    pub block_number: u32,
    /// Byte offset of the first chunk within that block.
    pub chunk_offset: u64,
    /// Total bytes the record occupies (payload plus chunk headers).
    pub chunk_size: u32,
}

/// Configuration for a [`Wal`].
#[derive(Debug, Clone)]
pub struct WalOptions {
    /// Directory holding the segment files.
    pub dir_path: PathBuf,
    /// Maximum size of one segment file in bytes.
    pub segment_size: u64,
    /// Segment file extension, including the leading dot.
    pub segment_file_ext: String,
    /// Block cache capacity in bytes; zero disables caching.
    pub block_cache: u64,
    /// Fsync after every write.
    pub sync: bool,
    /// Fsync once this many bytes have accumulated; zero disables.
    pub bytes_per_sync: u64,
}

struct WalInner {
    /// Segment currently being appended to.
    active: Arc<Segment>,
    /// Read-only segments, keyed by id.
    older: HashMap<u32, Arc<Segment>>,
    /// Bytes written since the last sync.
    bytes_write: u64,
}

/// The write-ahead log: a rotating set of chunked segment files.
///
/// Writes take the exclusive side of the internal lock, reads the shared
/// side; rotation happens under the write lock.
pub struct Wal {
    inner: RwLock<WalInner>,
    cache: Option<Arc<BlockCache>>,
    options: WalOptions,
}

impl Wal {
    /// Open the log in `options.dir_path`, creating the directory and the
    /// first segment if nothing exists yet. The highest existing segment
    /// id becomes the active segment.
    pub fn open(options: WalOptions) -> Result<Wal> {
        if !options.segment_file_ext.starts_with('.') {
            return Err(Error::InvalidConfiguration(
                "segment file extension must start with '.'".into(),
            ));
        }

        create_dir_if_missing(&options.dir_path)?;

        let cache = if options.block_cache > 0 {
            Some(Arc::new(BlockCache::with_byte_capacity(options.block_cache)))
        } else {
            None
        };

        let mut segment_ids = Vec::new();
        for entry in std::fs::read_dir(&options.dir_path)? {
            let entry = entry?;
            if !entry.file_type()?.is_file() {
                continue;
            }
            let name = entry.file_name();
            if let Some(id) = parse_segment_id(&name.to_string_lossy(), &options.segment_file_ext)
            {
                segment_ids.push(id);
            }
        }
        segment_ids.sort_unstable();

        let mut older = HashMap::new();
        let active = match segment_ids.split_last() {
            None => Arc::new(Segment::open(
                &segment_file_path(
                    &options.dir_path,
                    &options.segment_file_ext,
                    INITIAL_SEGMENT_ID,
                ),
                INITIAL_SEGMENT_ID,
                cache.clone(),
            )?),
            Some((&last, rest)) => {
                for &id in rest {
                    let segment = Segment::open(
                        &segment_file_path(&options.dir_path, &options.segment_file_ext, id),
                        id,
                        cache.clone(),
                    )?;
                    older.insert(id, Arc::new(segment));
                }
                Arc::new(Segment::open(
                    &segment_file_path(&options.dir_path, &options.segment_file_ext, last),
                    last,
                    cache.clone(),
                )?)
            }
        };

        Ok(Wal {
            inner: RwLock::new(WalInner {
                active,
                older,
                bytes_write: 0,
            }),
            cache,
            options,
        })
    }

    /// Append one logical record and return its position.
    ///
    /// Rotates to a new segment first when the active one cannot take the
    /// record, syncing the outgoing segment. Fails with
    /// [`Error::ValueTooLarge`] when the record cannot fit in any segment.
    pub fn write(&self, data: &[u8]) -> Result<ChunkPosition> {
        let mut inner = self.inner.write();

        if (data.len() + CHUNK_HEADER_SIZE) as u64 > self.options.segment_size {
            return Err(Error::ValueTooLarge);
        }

        if inner.active.size() + (data.len() + CHUNK_HEADER_SIZE) as u64
            > self.options.segment_size
        {
            inner.active.sync()?;
            inner.bytes_write = 0;

            let next_id = inner.active.id() + 1;
            let segment = Arc::new(Segment::open(
                &segment_file_path(&self.options.dir_path, &self.options.segment_file_ext, next_id),
                next_id,
                self.cache.clone(),
            )?);
            let retired = std::mem::replace(&mut inner.active, segment);
            inner.older.insert(retired.id(), retired);
        }

        let position = inner.active.write(data)?;
        inner.bytes_write += position.chunk_size as u64;

        let need_sync = self.options.sync
            || (self.options.bytes_per_sync > 0
                && inner.bytes_write >= self.options.bytes_per_sync);
        if need_sync {
            inner.active.sync()?;
            inner.bytes_write = 0;
        }

        Ok(position)
    }

    /// Read the logical record at the given position.
    pub fn read(&self, position: &ChunkPosition) -> Result<bytes::Bytes> {
        let inner = self.inner.read();

        let segment = if position.segment_id == inner.active.id() {
            &inner.active
        } else {
            inner
                .older
                .get(&position.segment_id)
                .ok_or(Error::SegmentNotFound(position.segment_id))?
        };

        segment.read(position.block_number, position.chunk_offset)
    }

    /// Force the active segment to stable storage.
    pub fn sync(&self) -> Result<()> {
        let mut inner = self.inner.write();
        inner.bytes_write = 0;
        inner.active.sync()
    }

    /// Sequential reader over every segment in ascending id order.
    pub fn new_reader(&self) -> WalReader {
        self.new_reader_with_max(0)
    }

    /// Sequential reader over segments with id at most `max_id`
    /// (0 means all segments).
    pub fn new_reader_with_max(&self, max_id: u32) -> WalReader {
        let inner = self.inner.read();

        let mut segments: Vec<Arc<Segment>> = inner
            .older
            .values()
            .filter(|s| max_id == 0 || s.id() <= max_id)
            .cloned()
            .collect();
        if max_id == 0 || inner.active.id() <= max_id {
            segments.push(Arc::clone(&inner.active));
        }
        segments.sort_unstable_by_key(|s| s.id());

        WalReader::new(segments.iter().map(|s| s.reader()).collect())
    }

    /// Number of segment files currently open.
    pub fn segment_count(&self) -> usize {
        let inner = self.inner.read();
        inner.older.len() + 1
    }

    /// Total bytes across all segments.
    pub fn disk_size(&self) -> u64 {
        let inner = self.inner.read();
        inner.older.values().map(|s| s.size()).sum::<u64>() + inner.active.size()
    }

    /// Purge the cache and close every segment. Idempotent.
    pub fn close(&self) -> Result<()> {
        let inner = self.inner.write();

        if let Some(cache) = &self.cache {
            cache.purge();
        }

        for segment in inner.older.values() {
            segment.close()?;
        }
        inner.active.close()
    }
}
