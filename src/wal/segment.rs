//! Segment files and chunk framing.

use std::fs::{File, OpenOptions};
use std::io::Write;
use std::os::unix::fs::FileExt;
use std::path::Path;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::Arc;

use bytes::{Bytes, BytesMut};

use crate::cache::BlockCache;
use crate::util::crc::{crc32, crc32_multi};
use crate::{Error, Result};

use super::{ChunkPosition, ChunkType, BLOCK_SIZE, CHUNK_HEADER_SIZE};

/// One append-only file of the WAL.
///
/// The segment tracks where its next chunk will land
/// (`current_block_number` / `current_block_size`). The counters are
/// atomics so readers can compute the segment size without taking a lock;
/// the WAL's write lock serializes all mutation.
pub(crate) struct Segment {
    id: u32,
    file: File,
    cache: Option<Arc<BlockCache>>,
    current_block_number: AtomicU32,
    current_block_size: AtomicU32,
    closed: AtomicBool,
}

/// Sequential cursor over one segment's logical records.
pub(crate) struct SegmentReader {
    segment: Arc<Segment>,
    block_number: u32,
    chunk_offset: u64,
}

impl Segment {
    /// Open (or create) the segment file at `path`. The write cursor is
    /// derived from the file length, which is always a valid chunk
    /// boundary: writers pad block tails under the same rule readers use
    /// to skip them.
    pub(crate) fn open(path: &Path, id: u32, cache: Option<Arc<BlockCache>>) -> Result<Segment> {
        let file = OpenOptions::new()
            .create(true)
            .read(true)
            .append(true)
            .open(path)?;

        let len = file.metadata()?.len();
        Ok(Segment {
            id,
            file,
            cache,
            current_block_number: AtomicU32::new((len / BLOCK_SIZE as u64) as u32),
            current_block_size: AtomicU32::new((len % BLOCK_SIZE as u64) as u32),
            closed: AtomicBool::new(false),
        })
    }

    pub(crate) fn id(&self) -> u32 {
        self.id
    }

    /// Bytes the segment occupies, padding included.
    pub(crate) fn size(&self) -> u64 {
        self.current_block_number.load(Ordering::Acquire) as u64 * BLOCK_SIZE as u64
            + self.current_block_size.load(Ordering::Acquire) as u64
    }

    /// Append one logical record as one or more chunks.
    ///
    /// Must be called with writes serialized (the WAL write lock).
    pub(crate) fn write(&self, data: &[u8]) -> Result<ChunkPosition> {
        if self.closed.load(Ordering::Acquire) {
            return Err(Error::SegmentClosed);
        }

        let mut block_number = self.current_block_number.load(Ordering::Acquire);
        let mut block_size = self.current_block_size.load(Ordering::Acquire) as usize;

        // Not enough room left for another header: pad out the block.
        if block_size + CHUNK_HEADER_SIZE >= BLOCK_SIZE {
            if block_size < BLOCK_SIZE {
                let padding = vec![0u8; BLOCK_SIZE - block_size];
                (&self.file).write_all(&padding)?;
            }
            block_number += 1;
            block_size = 0;
        }

        let mut position = ChunkPosition {
            segment_id: self.id,
            block_number,
            chunk_offset: block_size as u64,
            chunk_size: 0,
        };

        if block_size + data.len() + CHUNK_HEADER_SIZE <= BLOCK_SIZE {
            self.emit_chunk(data, ChunkType::Full)?;
            position.chunk_size = (data.len() + CHUNK_HEADER_SIZE) as u32;
            block_size += data.len() + CHUNK_HEADER_SIZE;
            if block_size == BLOCK_SIZE {
                block_number += 1;
                block_size = 0;
            }
        } else {
            let mut left = data.len();
            let mut chunk_count = 0u32;
            while left > 0 {
                let avail = BLOCK_SIZE - block_size - CHUNK_HEADER_SIZE;
                let take = left.min(avail);
                let start = data.len() - left;

                let chunk_type = if left == data.len() {
                    ChunkType::First
                } else if left == take {
                    ChunkType::Last
                } else {
                    ChunkType::Middle
                };
                self.emit_chunk(&data[start..start + take], chunk_type)?;

                block_size += take + CHUNK_HEADER_SIZE;
                if block_size == BLOCK_SIZE {
                    block_number += 1;
                    block_size = 0;
                }
                left -= take;
                chunk_count += 1;
            }
            position.chunk_size = chunk_count * CHUNK_HEADER_SIZE as u32 + data.len() as u32;
        }

        self.current_block_number.store(block_number, Ordering::Release);
        self.current_block_size
            .store(block_size as u32, Ordering::Release);
        Ok(position)
    }

    /// Write a single chunk: header (CRC, length, type) plus payload.
    fn emit_chunk(&self, data: &[u8], chunk_type: ChunkType) -> Result<()> {
        let mut buf = Vec::with_capacity(CHUNK_HEADER_SIZE + data.len());
        buf.extend_from_slice(&[0u8; 4]);
        buf.extend_from_slice(&(data.len() as u16).to_le_bytes());
        buf.push(chunk_type.to_byte());
        buf.extend_from_slice(data);

        // CRC covers length, type, and payload.
        let sum = crc32(&buf[4..]);
        buf[..4].copy_from_slice(&sum.to_le_bytes());

        (&self.file).write_all(&buf)?;
        Ok(())
    }

    /// Read the logical record whose first chunk starts at the given
    /// block and offset.
    pub(crate) fn read(&self, block_number: u32, chunk_offset: u64) -> Result<Bytes> {
        match self.read_chunks(block_number, chunk_offset)? {
            Some((value, _next)) => Ok(value),
            None => Err(Error::corruption("chunk position beyond end of segment")),
        }
    }

    /// Read a logical record and compute where the next one starts.
    ///
    /// Returns `Ok(None)` when the cursor is at (or a crash left a torn
    /// chunk at) the end of the segment. Damage before the tail surfaces
    /// as [`Error::CrcMismatch`] or [`Error::Corruption`].
    fn read_chunks(
        &self,
        mut block_number: u32,
        mut chunk_offset: u64,
    ) -> Result<Option<(Bytes, ChunkPosition)>> {
        if self.closed.load(Ordering::Acquire) {
            return Err(Error::SegmentClosed);
        }

        let segment_size = self.size();
        let mut result = BytesMut::new();

        loop {
            let block_start = block_number as u64 * BLOCK_SIZE as u64;
            if block_start >= segment_size {
                return Ok(None);
            }
            let block_len = (BLOCK_SIZE as u64).min(segment_size - block_start) as usize;
            let is_tail_block = block_len < BLOCK_SIZE;

            let offset = chunk_offset as usize;
            if offset + CHUNK_HEADER_SIZE > block_len {
                // End of segment, or a header torn by a crash.
                return Ok(None);
            }

            let block = self.read_block(block_number, block_start, block_len)?;

            let header = &block[offset..offset + CHUNK_HEADER_SIZE];
            let saved_sum = u32::from_le_bytes([header[0], header[1], header[2], header[3]]);
            let length = u16::from_le_bytes([header[4], header[5]]) as usize;
            let type_byte = header[6];

            let payload_end = offset + CHUNK_HEADER_SIZE + length;
            if payload_end > block_len {
                if is_tail_block {
                    // Payload torn by a crash: drop the tail.
                    return Ok(None);
                }
                return Err(Error::corruption("chunk extends beyond block boundary"));
            }

            // CRC covers length, type, and payload.
            let actual = crc32_multi(&[&header[4..], &block[offset + CHUNK_HEADER_SIZE..payload_end]]);
            if saved_sum != actual {
                return Err(Error::CrcMismatch {
                    expected: saved_sum,
                    actual,
                });
            }

            let chunk_type = ChunkType::from_byte(type_byte)
                .ok_or_else(|| Error::corruption("invalid chunk type"))?;

            result.extend_from_slice(&block[offset + CHUNK_HEADER_SIZE..payload_end]);

            if matches!(chunk_type, ChunkType::Full | ChunkType::Last) {
                let mut next = ChunkPosition {
                    segment_id: self.id,
                    block_number,
                    chunk_offset: payload_end as u64,
                    chunk_size: 0,
                };
                // Too little room left for another header: the writer
                // padded to the next block.
                if payload_end + CHUNK_HEADER_SIZE >= BLOCK_SIZE {
                    next.block_number += 1;
                    next.chunk_offset = 0;
                }
                return Ok(Some((result.freeze(), next)));
            }

            block_number += 1;
            chunk_offset = 0;
        }
    }

    /// Fetch one block, consulting the cache. Only completed blocks are
    /// cached; the growing tail block always comes from the file.
    fn read_block(&self, block_number: u32, block_start: u64, block_len: usize) -> Result<Bytes> {
        if let Some(cache) = &self.cache {
            if let Some(block) = cache.get(self.id, block_number) {
                return Ok(block);
            }
        }

        let mut buf = vec![0u8; block_len];
        self.file.read_exact_at(&mut buf, block_start)?;
        let block = Bytes::from(buf);

        if block_len == BLOCK_SIZE {
            if let Some(cache) = &self.cache {
                cache.insert(self.id, block_number, block.clone());
            }
        }
        Ok(block)
    }

    /// Sequential reader starting at block 0, offset 0.
    pub(crate) fn reader(self: &Arc<Self>) -> SegmentReader {
        SegmentReader {
            segment: Arc::clone(self),
            block_number: 0,
            chunk_offset: 0,
        }
    }

    /// Force buffered writes to stable storage.
    pub(crate) fn sync(&self) -> Result<()> {
        if self.closed.load(Ordering::Acquire) {
            return Ok(());
        }
        self.file.sync_data()?;
        Ok(())
    }

    /// Mark the segment closed. Idempotent; subsequent reads and writes
    /// fail with [`Error::SegmentClosed`].
    pub(crate) fn close(&self) -> Result<()> {
        self.closed.store(true, Ordering::Release);
        Ok(())
    }
}

impl SegmentReader {
    /// Read the record at the cursor and advance past it, accounting for
    /// any padding before the next chunk. Returns `Ok(None)` at the end
    /// of the segment.
    pub(crate) fn next(&mut self) -> Result<Option<(Bytes, ChunkPosition)>> {
        let start_block = self.block_number;
        let start_offset = self.chunk_offset;

        match self
            .segment
            .read_chunks(self.block_number, self.chunk_offset)?
        {
            None => Ok(None),
            Some((value, next)) => {
                // Size is the cursor distance, padding included.
                let chunk_size = (next.block_number as u64 * BLOCK_SIZE as u64 + next.chunk_offset)
                    - (start_block as u64 * BLOCK_SIZE as u64 + start_offset);
                let position = ChunkPosition {
                    segment_id: self.segment.id(),
                    block_number: start_block,
                    chunk_offset: start_offset,
                    chunk_size: chunk_size as u32,
                };
                self.block_number = next.block_number;
                self.chunk_offset = next.chunk_offset;
                Ok(Some((value, position)))
            }
        }
    }

    /// Id of the segment this reader walks.
    pub(crate) fn segment_id(&self) -> u32 {
        self.segment.id()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn open_segment(dir: &Path) -> Arc<Segment> {
        Arc::new(Segment::open(&dir.join("000000001.SEG"), 1, None).unwrap())
    }

    #[test]
    fn test_write_read_small() {
        let dir = tempdir().unwrap();
        let segment = open_segment(dir.path());

        let pos = segment.write(b"hello").unwrap();
        assert_eq!(pos.block_number, 0);
        assert_eq!(pos.chunk_offset, 0);
        assert_eq!(pos.chunk_size as usize, 5 + CHUNK_HEADER_SIZE);

        assert_eq!(segment.read(0, 0).unwrap().as_ref(), b"hello");
    }

    #[test]
    fn test_write_positions_advance() {
        let dir = tempdir().unwrap();
        let segment = open_segment(dir.path());

        let pos1 = segment.write(b"aaa").unwrap();
        let pos2 = segment.write(b"bbbb").unwrap();

        assert_eq!(pos2.chunk_offset, pos1.chunk_size as u64);
        assert_eq!(
            segment.read(pos2.block_number, pos2.chunk_offset).unwrap().as_ref(),
            b"bbbb"
        );
    }

    #[test]
    fn test_large_record_spans_blocks() {
        let dir = tempdir().unwrap();
        let segment = open_segment(dir.path());

        // 100 KiB needs FIRST + at least two MIDDLE + LAST across 4 blocks.
        let data: Vec<u8> = (0..100 * 1024).map(|i| (i % 253) as u8).collect();
        let pos = segment.write(&data).unwrap();

        assert_eq!(pos.block_number, 0);
        assert_eq!(pos.chunk_size as usize, data.len() + 4 * CHUNK_HEADER_SIZE);
        assert!(segment.size() > 3 * BLOCK_SIZE as u64);

        assert_eq!(segment.read(0, 0).unwrap().as_ref(), data.as_slice());
    }

    #[test]
    fn test_block_tail_padding() {
        let dir = tempdir().unwrap();
        let segment = open_segment(dir.path());

        // Leave fewer than 7 spare bytes in block 0.
        let first = vec![1u8; BLOCK_SIZE - CHUNK_HEADER_SIZE - 3];
        segment.write(&first).unwrap();

        // The next record starts on a fresh block.
        let pos = segment.write(b"next").unwrap();
        assert_eq!(pos.block_number, 1);
        assert_eq!(pos.chunk_offset, 0);
        assert_eq!(segment.read(1, 0).unwrap().as_ref(), b"next");
    }

    #[test]
    fn test_exactly_full_block_advances() {
        let dir = tempdir().unwrap();
        let segment = open_segment(dir.path());

        let exact = vec![9u8; BLOCK_SIZE - CHUNK_HEADER_SIZE];
        segment.write(&exact).unwrap();
        assert_eq!(segment.size(), BLOCK_SIZE as u64);

        let pos = segment.write(b"x").unwrap();
        assert_eq!(pos.block_number, 1);
        assert_eq!(pos.chunk_offset, 0);
    }

    #[test]
    fn test_sequential_reader() {
        let dir = tempdir().unwrap();
        let segment = open_segment(dir.path());

        let payloads: Vec<Vec<u8>> = vec![
            b"one".to_vec(),
            vec![2u8; 40_000], // spans a block boundary
            b"three".to_vec(),
        ];
        let mut written = Vec::new();
        for payload in &payloads {
            written.push(segment.write(payload).unwrap());
        }

        let mut reader = segment.reader();
        for (payload, pos) in payloads.iter().zip(&written) {
            let (value, read_pos) = reader.next().unwrap().unwrap();
            assert_eq!(value.as_ref(), payload.as_slice());
            assert_eq!(read_pos.block_number, pos.block_number);
            assert_eq!(read_pos.chunk_offset, pos.chunk_offset);
        }
        assert!(reader.next().unwrap().is_none());
    }

    #[test]
    fn test_reader_skips_padding() {
        let dir = tempdir().unwrap();
        let segment = open_segment(dir.path());

        let first = vec![1u8; BLOCK_SIZE - CHUNK_HEADER_SIZE - 3];
        segment.write(&first).unwrap();
        segment.write(b"second").unwrap();

        let mut reader = segment.reader();
        assert_eq!(reader.next().unwrap().unwrap().0.len(), first.len());
        let (value, pos) = reader.next().unwrap().unwrap();
        assert_eq!(value.as_ref(), b"second");
        assert_eq!(pos.block_number, 1);
        assert!(reader.next().unwrap().is_none());
    }

    #[test]
    fn test_corrupted_chunk_fails_crc() {
        use std::io::{Seek, SeekFrom, Write};

        let dir = tempdir().unwrap();
        let path = dir.path().join("000000001.SEG");
        {
            let segment = Arc::new(Segment::open(&path, 1, None).unwrap());
            segment.write(b"precious data").unwrap();
        }

        // Flip a payload byte on disk.
        let mut file = OpenOptions::new().write(true).open(&path).unwrap();
        file.seek(SeekFrom::Start(CHUNK_HEADER_SIZE as u64 + 2)).unwrap();
        file.write_all(&[0xFF]).unwrap();
        drop(file);

        let segment = Arc::new(Segment::open(&path, 1, None).unwrap());
        assert!(matches!(
            segment.read(0, 0).unwrap_err(),
            Error::CrcMismatch { .. }
        ));
    }

    #[test]
    fn test_torn_tail_is_end_of_segment() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("000000001.SEG");
        {
            let segment = Arc::new(Segment::open(&path, 1, None).unwrap());
            segment.write(b"kept").unwrap();
            segment.write(&[5u8; 200]).unwrap();
        }

        // Truncate into the second record's payload.
        let len = std::fs::metadata(&path).unwrap().len();
        let file = OpenOptions::new().write(true).open(&path).unwrap();
        file.set_len(len - 100).unwrap();
        drop(file);

        let segment = Arc::new(Segment::open(&path, 1, None).unwrap());
        let mut reader = segment.reader();
        assert_eq!(reader.next().unwrap().unwrap().0.as_ref(), b"kept");
        assert!(reader.next().unwrap().is_none());
    }

    #[test]
    fn test_closed_segment_rejects_ops() {
        let dir = tempdir().unwrap();
        let segment = open_segment(dir.path());
        segment.write(b"data").unwrap();

        segment.close().unwrap();
        segment.close().unwrap(); // idempotent

        assert_eq!(segment.write(b"more").unwrap_err(), Error::SegmentClosed);
        assert_eq!(segment.read(0, 0).unwrap_err(), Error::SegmentClosed);
    }

    #[test]
    fn test_reopen_derives_cursor_from_length() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("000000001.SEG");

        let size_after_first = {
            let segment = Arc::new(Segment::open(&path, 1, None).unwrap());
            segment.write(b"before reopen").unwrap();
            segment.size()
        };

        let segment = Arc::new(Segment::open(&path, 1, None).unwrap());
        assert_eq!(segment.size(), size_after_first);

        let pos = segment.write(b"after reopen").unwrap();
        assert_eq!(pos.chunk_offset, size_after_first);
        assert_eq!(
            segment.read(pos.block_number, pos.chunk_offset).unwrap().as_ref(),
            b"after reopen"
        );
    }
}
