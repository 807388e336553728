//! Atomic write batches.
//!
//! A batch buffers Put/Delete operations in memory and applies them
//! atomically on commit: every record is appended to the WAL, then a
//! terminal batch-finished marker. The batch is durable and visible if
//! and only if that marker made it to the log — recovery replays only
//! batches whose marker it finds.

use std::collections::HashMap;

use bytes::Bytes;
use parking_lot::{RwLockReadGuard, RwLockWriteGuard};

use crate::db::Database;
use crate::options::BatchOptions;
use crate::record::LogRecord;
use crate::util::id::BatchIdGenerator;
use crate::wal::ChunkPosition;
use crate::{Error, Result};

/// Guard over the database lock: shared for read-only batches, exclusive
/// for writable ones. Held from construction through commit (or drop).
enum DbGuard<'db> {
    Read(#[allow(dead_code)] RwLockReadGuard<'db, ()>),
    Write(#[allow(dead_code)] RwLockWriteGuard<'db, ()>),
}

/// State a writable batch carries; absent on read-only batches.
struct WriteState {
    pending: HashMap<Bytes, LogRecord>,
    ids: BatchIdGenerator,
}

/// A group of writes committed atomically. Single-use: commit once, then
/// drop.
///
/// Writable batches hold the database's write lock for their entire
/// lifetime, so batches never interleave; read-only batches share the
/// read side.
pub struct Batch<'db> {
    db: &'db Database,
    guard: Option<DbGuard<'db>>,
    writes: Option<WriteState>,
    options: BatchOptions,
    committed: bool,
}

impl<'db> Batch<'db> {
    pub(crate) fn new(db: &'db Database, options: BatchOptions) -> Self {
        let guard = if options.read_only {
            DbGuard::Read(db.lock().read())
        } else {
            DbGuard::Write(db.lock().write())
        };
        let writes = if options.read_only {
            None
        } else {
            Some(WriteState {
                pending: HashMap::new(),
                ids: BatchIdGenerator::new(1),
            })
        };
        Self {
            db,
            guard: Some(guard),
            writes,
            options,
            committed: false,
        }
    }

    /// Buffer a put of `key` to `value`.
    pub fn put(&mut self, key: &[u8], value: &[u8]) -> Result<()> {
        if key.is_empty() {
            return Err(Error::KeyIsEmpty);
        }
        if self.db.is_closed() {
            return Err(Error::DatabaseClosed);
        }
        let writes = match self.writes.as_mut() {
            Some(writes) => writes,
            None => return Err(Error::ReadOnlyBatch),
        };

        let key = Bytes::copy_from_slice(key);
        let record = LogRecord::normal(key.clone(), Bytes::copy_from_slice(value));
        writes.pending.insert(key, record);
        Ok(())
    }

    /// Buffer a delete of `key`.
    ///
    /// A key that is not in the index needs no tombstone: any pending
    /// write for it is simply dropped, so a put-then-delete of a fresh
    /// key nets out to nothing.
    pub fn delete(&mut self, key: &[u8]) -> Result<()> {
        if key.is_empty() {
            return Err(Error::KeyIsEmpty);
        }
        if self.db.is_closed() {
            return Err(Error::DatabaseClosed);
        }
        let indexed = self.db.index().get(key).is_some();
        let writes = match self.writes.as_mut() {
            Some(writes) => writes,
            None => return Err(Error::ReadOnlyBatch),
        };

        if indexed {
            let key = Bytes::copy_from_slice(key);
            writes.pending.insert(key.clone(), LogRecord::deleted(key));
        } else {
            writes.pending.remove(key);
        }
        Ok(())
    }

    /// Read `key`, observing this batch's own pending writes first.
    pub fn get(&self, key: &[u8]) -> Result<Bytes> {
        if key.is_empty() {
            return Err(Error::KeyIsEmpty);
        }
        if self.db.is_closed() {
            return Err(Error::DatabaseClosed);
        }

        if let Some(writes) = &self.writes {
            if let Some(record) = writes.pending.get(key) {
                if record.is_deleted() {
                    return Err(Error::KeyNotFound);
                }
                return Ok(record.value.clone());
            }
        }

        let position = self.db.index().get(key).ok_or(Error::KeyNotFound)?;
        let chunk = self.db.wal().read(&position)?;
        let record = LogRecord::decode(&chunk)?;
        if record.is_deleted() {
            return Err(Error::KeyNotFound);
        }
        Ok(record.value)
    }

    /// Write all pending records plus the batch-finished marker, sync if
    /// requested, and publish the new positions to the index.
    ///
    /// The database lock is released on return no matter the outcome.
    pub fn commit(&mut self) -> Result<()> {
        let _guard = self.guard.take();

        if self.db.is_closed() {
            return Err(Error::DatabaseClosed);
        }

        let db = self.db;
        let sync_on_commit = self.options.sync;
        let writes = match self.writes.as_mut() {
            Some(writes) if !writes.pending.is_empty() => writes,
            _ => return Ok(()),
        };
        if self.committed {
            return Err(Error::BatchCommitted);
        }

        let batch_id = writes.ids.next_id();
        let mut positions: HashMap<Bytes, ChunkPosition> =
            HashMap::with_capacity(writes.pending.len());

        for record in writes.pending.values_mut() {
            record.batch_id = batch_id;
            let position = db.wal().write(&record.encode())?;
            positions.insert(record.key.clone(), position);
        }

        let finished = LogRecord::batch_finished(batch_id);
        db.wal().write(&finished.encode())?;

        // The WAL already syncs per write under the database's global
        // sync policy; only sync here when this batch asks for more.
        if sync_on_commit && !db.options().sync {
            db.wal().sync()?;
        }

        for (key, record) in &writes.pending {
            if record.is_deleted() {
                db.index().delete(key);
            } else if let Some(position) = positions.get(key) {
                db.index().put(key, *position);
            }
        }

        self.committed = true;
        Ok(())
    }
}
