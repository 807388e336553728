//! Database — the embedding entry point.
//!
//! A `Database` owns one directory: the `FLOCK` advisory lock file plus
//! the WAL segment files. Opening replays the log to rebuild the key
//! index, applying only batches whose batch-finished marker is present,
//! so a crash mid-commit leaves no partial batch visible.

use std::collections::HashMap;
use std::fs::{File, OpenOptions};
use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};

use bytes::Bytes;
use parking_lot::RwLock;

use crate::batch::Batch;
use crate::index::Index;
use crate::options::{BatchOptions, Options};
use crate::record::{LogRecord, LogRecordType};
use crate::util::filename::{create_dir_if_missing, lock_file_path, SEGMENT_FILE_EXT};
use crate::wal::{ChunkPosition, Wal, WalOptions};
use crate::{Error, Result};

/// Point-in-time database counters.
#[derive(Debug, Clone, Copy)]
pub struct DatabaseStats {
    /// Number of live keys in the index.
    pub key_count: usize,
    /// Number of open segment files.
    pub segment_count: usize,
    /// Total bytes of log on disk, padding included.
    pub disk_size: u64,
}

/// An embedded key-value store over a write-ahead log.
///
/// One process owns a database directory at a time (advisory file lock).
/// The handle is thread-safe: share it behind an `Arc` and open batches
/// from any thread.
pub struct Database {
    wal: Wal,
    index: Index,
    options: Options,
    /// Batch-level lock: writable batches take the write side for their
    /// whole lifetime, read-only batches the read side.
    lock: RwLock<()>,
    /// Keeps the flock alive; the lock drops with the file handle.
    lock_file: File,
    closed: AtomicBool,
}

impl std::fmt::Debug for Database {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Database")
            .field("options", &self.options)
            .field("closed", &self.closed.load(Ordering::Relaxed))
            .finish_non_exhaustive()
    }
}

impl Database {
    /// Open the database in `options.dir_path`, creating it if needed,
    /// and replay the log into a fresh index.
    ///
    /// Fails with [`Error::DatabaseIsUsing`] when another process holds
    /// the directory, and with a corruption error when replay hits
    /// damaged chunks before the log tail.
    pub fn open(options: Options) -> Result<Database> {
        options.validate()?;
        create_dir_if_missing(&options.dir_path)?;

        let lock_file = Self::acquire_lock(&options.dir_path)?;

        let wal = Wal::open(WalOptions {
            dir_path: options.dir_path.clone(),
            segment_size: options.segment_size,
            segment_file_ext: SEGMENT_FILE_EXT.to_string(),
            block_cache: options.block_cache,
            sync: options.sync,
            bytes_per_sync: options.bytes_per_sync,
        })?;

        let db = Database {
            wal,
            index: Index::new(),
            options,
            lock: RwLock::new(()),
            lock_file,
            closed: AtomicBool::new(false),
        };
        db.load_index_from_wal()?;
        Ok(db)
    }

    /// Take the `FLOCK` advisory lock, non-blocking.
    fn acquire_lock(dir_path: &Path) -> Result<File> {
        let lock_path = lock_file_path(dir_path);
        let lock_file = OpenOptions::new()
            .create(true)
            .write(true)
            .open(&lock_path)?;

        #[cfg(unix)]
        {
            use std::os::unix::io::AsRawFd;
            let ret =
                unsafe { libc::flock(lock_file.as_raw_fd(), libc::LOCK_EX | libc::LOCK_NB) };
            if ret != 0 {
                return Err(Error::DatabaseIsUsing);
            }
        }

        Ok(lock_file)
    }

    /// Replay the WAL into the index.
    ///
    /// Records are buffered per batch id; a batch-finished marker applies
    /// that batch's records and consumes the buffer. Whatever is still
    /// buffered at the end of the log belonged to batches that never
    /// committed and is discarded.
    fn load_index_from_wal(&self) -> Result<()> {
        let mut pending_by_batch: HashMap<u64, Vec<(Bytes, LogRecordType, ChunkPosition)>> =
            HashMap::new();

        let mut reader = self.wal.new_reader();
        while let Some((chunk, position)) = reader.next()? {
            let record = LogRecord::decode(&chunk)?;

            if record.record_type == LogRecordType::BatchFinished {
                let batch_id = LogRecord::parse_batch_id(&record.key)?;
                if let Some(records) = pending_by_batch.remove(&batch_id) {
                    for (key, record_type, record_position) in records {
                        match record_type {
                            LogRecordType::Normal => {
                                self.index.put(&key, record_position);
                            }
                            LogRecordType::Deleted => {
                                self.index.delete(&key);
                            }
                            LogRecordType::BatchFinished => {}
                        }
                    }
                }
            } else {
                pending_by_batch.entry(record.batch_id).or_default().push((
                    record.key,
                    record.record_type,
                    position,
                ));
            }
        }
        Ok(())
    }

    /// Start a batch. Writable batches serialize against each other and
    /// against read-only batches via the database lock.
    pub fn new_batch(&self, options: BatchOptions) -> Batch<'_> {
        Batch::new(self, options)
    }

    /// Put a single key in its own batch. Durability follows the WAL's
    /// configured sync policy rather than forcing a per-commit sync.
    pub fn put(&self, key: &[u8], value: &[u8]) -> Result<()> {
        let options = BatchOptions {
            sync: false,
            ..Default::default()
        };
        let mut batch = self.new_batch(options);
        batch.put(key, value)?;
        batch.commit()
    }

    /// Get a single key through a read-only batch.
    pub fn get(&self, key: &[u8]) -> Result<Bytes> {
        let options = BatchOptions {
            read_only: true,
            ..Default::default()
        };
        let mut batch = self.new_batch(options);
        let value = batch.get(key);
        batch.commit()?;
        value
    }

    /// Delete a single key in its own batch. Durability follows the
    /// WAL's configured sync policy.
    pub fn delete(&self, key: &[u8]) -> Result<()> {
        let options = BatchOptions {
            sync: false,
            ..Default::default()
        };
        let mut batch = self.new_batch(options);
        batch.delete(key)?;
        batch.commit()
    }

    /// Force the log to stable storage.
    pub fn sync(&self) -> Result<()> {
        if self.is_closed() {
            return Err(Error::DatabaseClosed);
        }
        self.wal.sync()
    }

    /// Point-in-time counters.
    pub fn stats(&self) -> DatabaseStats {
        DatabaseStats {
            key_count: self.index.len(),
            segment_count: self.wal.segment_count(),
            disk_size: self.wal.disk_size(),
        }
    }

    /// Close the log and release the directory lock. Idempotent. Waits
    /// for in-flight batches to finish.
    pub fn close(&self) -> Result<()> {
        let _guard = self.lock.write();

        if self.closed.swap(true, Ordering::AcqRel) {
            return Ok(());
        }

        self.wal.close()?;

        #[cfg(unix)]
        {
            use std::os::unix::io::AsRawFd;
            let ret = unsafe { libc::flock(self.lock_file.as_raw_fd(), libc::LOCK_UN) };
            if ret != 0 {
                return Err(std::io::Error::last_os_error().into());
            }
        }

        Ok(())
    }

    pub(crate) fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    pub(crate) fn lock(&self) -> &RwLock<()> {
        &self.lock
    }

    pub(crate) fn wal(&self) -> &Wal {
        &self.wal
    }

    pub(crate) fn index(&self) -> &Index {
        &self.index
    }

    pub(crate) fn options(&self) -> &Options {
        &self.options
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn test_open_rejects_bad_options() {
        assert!(Database::open(Options::new("")).is_err());

        let dir = tempdir().unwrap();
        let mut options = Options::new(dir.path());
        options.segment_size = 0;
        assert!(Database::open(options).is_err());
    }

    #[test]
    fn test_single_writer_lock() {
        let dir = tempdir().unwrap();
        let db = Database::open(Options::new(dir.path())).unwrap();

        let err = Database::open(Options::new(dir.path())).unwrap_err();
        assert_eq!(err, Error::DatabaseIsUsing);

        // Releasing the first holder frees the directory.
        db.close().unwrap();
        let db2 = Database::open(Options::new(dir.path())).unwrap();
        db2.close().unwrap();
    }

    #[test]
    fn test_close_is_idempotent() {
        let dir = tempdir().unwrap();
        let db = Database::open(Options::new(dir.path())).unwrap();
        db.close().unwrap();
        db.close().unwrap();

        assert_eq!(db.put(b"k", b"v").unwrap_err(), Error::DatabaseClosed);
        assert_eq!(db.get(b"k").unwrap_err(), Error::DatabaseClosed);
        assert_eq!(db.delete(b"k").unwrap_err(), Error::DatabaseClosed);
    }

    #[test]
    fn test_put_get_delete() {
        let dir = tempdir().unwrap();
        let db = Database::open(Options::new(dir.path())).unwrap();

        db.put(b"k", b"v").unwrap();
        assert_eq!(db.get(b"k").unwrap().as_ref(), b"v");
        assert_eq!(db.stats().key_count, 1);

        db.delete(b"k").unwrap();
        assert_eq!(db.get(b"k").unwrap_err(), Error::KeyNotFound);
        assert_eq!(db.stats().key_count, 0);
    }

    #[test]
    fn test_overwrite_returns_latest() {
        let dir = tempdir().unwrap();
        let db = Database::open(Options::new(dir.path())).unwrap();

        for i in 0..10u32 {
            db.put(b"counter", i.to_string().as_bytes()).unwrap();
        }
        assert_eq!(db.get(b"counter").unwrap().as_ref(), b"9");
        assert_eq!(db.stats().key_count, 1);
    }

    #[test]
    fn test_recovery_applies_committed_batches() {
        let dir = tempdir().unwrap();

        {
            let db = Database::open(Options::new(dir.path())).unwrap();
            let mut batch = db.new_batch(BatchOptions::default());
            batch.put(b"a", b"1").unwrap();
            batch.put(b"b", b"2").unwrap();
            batch.commit().unwrap();
            db.close().unwrap();
        }

        let db = Database::open(Options::new(dir.path())).unwrap();
        assert_eq!(db.get(b"a").unwrap().as_ref(), b"1");
        assert_eq!(db.get(b"b").unwrap().as_ref(), b"2");
        assert_eq!(db.stats().key_count, 2);
    }

    #[test]
    fn test_recovery_discards_unfinished_batches() {
        let dir = tempdir().unwrap();

        {
            let db = Database::open(Options::new(dir.path())).unwrap();
            db.put(b"committed", b"yes").unwrap();

            let mut batch = db.new_batch(BatchOptions::default());
            batch.put(b"abandoned", b"no").unwrap();
            drop(batch);
            db.close().unwrap();
        }

        let db = Database::open(Options::new(dir.path())).unwrap();
        assert_eq!(db.get(b"committed").unwrap().as_ref(), b"yes");
        assert_eq!(db.get(b"abandoned").unwrap_err(), Error::KeyNotFound);
    }

    #[test]
    fn test_recovery_replays_tombstones() {
        let dir = tempdir().unwrap();

        {
            let db = Database::open(Options::new(dir.path())).unwrap();
            db.put(b"k", b"v").unwrap();
            db.delete(b"k").unwrap();
            db.close().unwrap();
        }

        let db = Database::open(Options::new(dir.path())).unwrap();
        assert_eq!(db.get(b"k").unwrap_err(), Error::KeyNotFound);
        assert_eq!(db.stats().key_count, 0);
    }
}
