//! Sequential reader across segments.

use bytes::Bytes;

use crate::Result;

use super::segment::SegmentReader;
use super::ChunkPosition;

/// Replays every logical record in the log in write order, crossing
/// segment boundaries transparently.
pub struct WalReader {
    readers: Vec<SegmentReader>,
    current: usize,
}

impl WalReader {
    pub(crate) fn new(readers: Vec<SegmentReader>) -> Self {
        Self {
            readers,
            current: 0,
        }
    }

    /// Read the next record and its position. Returns `Ok(None)` after the
    /// last record of the last segment.
    pub fn next(&mut self) -> Result<Option<(Bytes, ChunkPosition)>> {
        while self.current < self.readers.len() {
            match self.readers[self.current].next()? {
                Some(item) => return Ok(Some(item)),
                None => self.current += 1,
            }
        }
        Ok(None)
    }

    /// Id of the segment the cursor is currently in, if any segment
    /// remains.
    pub fn current_segment_id(&self) -> Option<u32> {
        self.readers.get(self.current).map(|r| r.segment_id())
    }
}
