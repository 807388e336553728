//! Configuration options for walkv.

use std::path::PathBuf;

use crate::{Error, Result};

/// One byte.
pub const B: u64 = 1;
/// One kibibyte.
pub const KB: u64 = 1024 * B;
/// One mebibyte.
pub const MB: u64 = 1024 * KB;
/// One gibibyte.
pub const GB: u64 = 1024 * MB;

/// Default maximum segment file size (1 GiB).
pub const DEFAULT_SEGMENT_SIZE: u64 = GB;

/// Default block cache capacity in bytes (64 MiB).
pub const DEFAULT_BLOCK_CACHE_SIZE: u64 = 64 * MB;

/// Database configuration options.
#[derive(Debug, Clone)]
pub struct Options {
    /// Directory holding the segment files and the lock file.
    pub dir_path: PathBuf,

    /// Maximum size of each segment file in bytes.
    pub segment_size: u64,

    /// Block cache capacity in bytes. Zero disables the cache.
    pub block_cache: u64,

    /// Fsync the active segment after every write.
    pub sync: bool,

    /// Fsync once this many bytes have accumulated since the last sync.
    /// Zero disables the threshold.
    pub bytes_per_sync: u64,
}

impl Options {
    /// Create options for the given directory with defaults everywhere else.
    pub fn new(dir_path: impl Into<PathBuf>) -> Self {
        Self {
            dir_path: dir_path.into(),
            segment_size: DEFAULT_SEGMENT_SIZE,
            block_cache: DEFAULT_BLOCK_CACHE_SIZE,
            sync: false,
            bytes_per_sync: 0,
        }
    }

    /// Validate the options.
    pub fn validate(&self) -> Result<()> {
        if self.dir_path.as_os_str().is_empty() {
            return Err(Error::InvalidConfiguration(
                "database dir path is empty".into(),
            ));
        }
        if self.segment_size == 0 {
            return Err(Error::InvalidConfiguration(
                "segment size must be greater than 0".into(),
            ));
        }
        Ok(())
    }
}

/// Options for a single batch.
#[derive(Debug, Clone, Copy)]
pub struct BatchOptions {
    /// Fsync the log once when the batch commits.
    pub sync: bool,

    /// Reject mutations; the batch only serves reads.
    pub read_only: bool,
}

impl Default for BatchOptions {
    fn default() -> Self {
        Self {
            sync: true,
            read_only: false,
        }
    }
}

/// Builder for [`Options`].
#[derive(Debug, Clone)]
pub struct OptionsBuilder {
    options: Options,
}

impl OptionsBuilder {
    /// Create a new builder rooted at the given directory.
    pub fn new(dir_path: impl Into<PathBuf>) -> Self {
        Self {
            options: Options::new(dir_path),
        }
    }

    /// Set the maximum segment file size.
    pub fn segment_size(mut self, size: u64) -> Self {
        self.options.segment_size = size;
        self
    }

    /// Set the block cache capacity in bytes.
    pub fn block_cache(mut self, size: u64) -> Self {
        self.options.block_cache = size;
        self
    }

    /// Set whether every write is fsynced.
    pub fn sync(mut self, sync: bool) -> Self {
        self.options.sync = sync;
        self
    }

    /// Set the periodic fsync threshold.
    pub fn bytes_per_sync(mut self, bytes: u64) -> Self {
        self.options.bytes_per_sync = bytes;
        self
    }

    /// Validate and build the options.
    pub fn build(self) -> Result<Options> {
        self.options.validate()?;
        Ok(self.options)
    }
}
