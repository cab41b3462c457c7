//! The write path: snapshot allocation, WAL-first inserts, memtable
//! rotation, and asynchronous flush.
//!
//! A [`TableWriter`] owns the single mutex guarding the current
//! memtable + WAL pair. A write holds it just long enough to append to
//! the log and insert into the map; readers never touch it.
//!
//! When the memtable crosses its byte budget the writer rotates: the
//! full memtable is frozen in place (it simply stops receiving writes),
//! a fresh memtable + log pair at the next generation is registered,
//! and a flush task is queued. The flush worker streams the frozen
//! memtable through a [`TableBuilder`], installs the finished disk
//! table over the memtable's registry slot — the one linearization
//! point of a flush — and only then deletes the log.
//!
//! Flush I/O failures are retried with exponential backoff; persistent
//! failure flips the database read-only, and the frozen memtable keeps
//! serving reads from memory with its log intact on disk.

use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use thiserror::Error;
use tracing::{debug, error, info, warn};

use crate::cache::BlockCache;
use crate::db::Config;
use crate::memtable::{MemoryTable, MemtableError};
use crate::snapshot::Snapshots;
use crate::table::{DiskTable, TableBuilder, TableError};
use crate::tables::{TableHandle, Tables};
use crate::task::{Executor, TaskError};
use crate::tuple::{Key, Tuple, Value};

/// Flush attempts before the database goes read-only.
const FLUSH_ATTEMPTS: u32 = 5;

/// Base delay of the flush retry backoff.
const FLUSH_BACKOFF: Duration = Duration::from_millis(20);

/// Errors returned by the write path.
#[derive(Debug, Error)]
pub enum WriteError {
    /// Memtable or WAL failure.
    #[error("memtable error: {0}")]
    Memtable(#[from] MemtableError),

    /// Rotation could not allocate the next WAL file.
    #[error("capacity error: {0}")]
    Capacity(String),

    /// The database is read-only after a persistent background failure.
    #[error("database is read-only: {0}")]
    ReadOnly(String),

    /// Background queue rejected the flush task.
    #[error("task error: {0}")]
    Task(#[from] TaskError),
}

struct WriterInner {
    memtable: Arc<MemoryTable>,
}

/// The put/delete pipeline.
pub struct TableWriter {
    inner: Mutex<WriterInner>,
    directory: PathBuf,
    config: Arc<Config>,
    tables: Arc<Tables>,
    snapshots: Arc<Snapshots>,
    cache: Arc<BlockCache>,
    flush_executor: Arc<Executor>,
    next_generation: Arc<AtomicU64>,
    read_only: Arc<AtomicBool>,
}

impl TableWriter {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        directory: PathBuf,
        config: Arc<Config>,
        tables: Arc<Tables>,
        snapshots: Arc<Snapshots>,
        cache: Arc<BlockCache>,
        flush_executor: Arc<Executor>,
        next_generation: Arc<AtomicU64>,
        read_only: Arc<AtomicBool>,
        initial_memtable: Arc<MemoryTable>,
    ) -> Self {
        Self {
            inner: Mutex::new(WriterInner {
                memtable: initial_memtable,
            }),
            directory,
            config,
            tables,
            snapshots,
            cache,
            flush_executor,
            next_generation,
            read_only,
        }
    }

    /// Writes one tuple: next snapshot id → WAL append → memtable
    /// insert → rotation check. Returns the snapshot id.
    pub fn write(&self, key_bytes: &[u8], value: Value, fsync: bool) -> Result<u64, WriteError> {
        if self.read_only.load(Ordering::Acquire) {
            return Err(WriteError::ReadOnly(
                "background flush failed persistently".into(),
            ));
        }

        let mut inner = match self.inner.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };

        let snapshot_id = self.snapshots.next_id();
        let tuple = Tuple::new(Key::new(key_bytes, snapshot_id), value);
        inner.memtable.put(tuple, fsync)?;

        if inner.memtable.size() > self.config.memtable_max_bytes {
            self.rotate(&mut inner)?;
        }

        Ok(snapshot_id)
    }

    /// Freezes the current memtable, installs a fresh pair at the next
    /// generation, and queues the flush.
    fn rotate(&self, inner: &mut WriterInner) -> Result<(), WriteError> {
        let generation = self.next_generation.fetch_add(1, Ordering::SeqCst);
        let wal_path = self.directory.join(format!("{generation}.write"));

        let fresh = Arc::new(MemoryTable::open(&wal_path).map_err(|e| {
            WriteError::Capacity(format!(
                "cannot create write-ahead log {}: {e}",
                wal_path.display()
            ))
        })?);

        let frozen = std::mem::replace(&mut inner.memtable, Arc::clone(&fresh));
        self.tables.register(TableHandle::Memory(fresh));

        info!(
            frozen_generation = frozen.generation(),
            new_generation = generation,
            frozen_bytes = frozen.size(),
            "memtable rotated"
        );

        self.schedule_flush(frozen)?;
        Ok(())
    }

    /// Queues a flush of `frozen` on the flush executor.
    pub fn schedule_flush(&self, frozen: Arc<MemoryTable>) -> Result<(), WriteError> {
        let directory = self.directory.clone();
        let config = Arc::clone(&self.config);
        let tables = Arc::clone(&self.tables);
        let cache = Arc::clone(&self.cache);
        let read_only = Arc::clone(&self.read_only);

        self.flush_executor.submit(Box::new(move || {
            flush_with_retry(&directory, &config, &tables, &cache, &read_only, frozen);
        }))?;
        Ok(())
    }

    /// The writable memtable's current byte size (tests and metrics).
    pub fn memtable_size(&self) -> usize {
        let inner = match self.inner.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        inner.memtable.size()
    }

    /// Syncs the writable memtable's log to stable storage.
    pub fn sync(&self) -> Result<(), WriteError> {
        let inner = match self.inner.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        inner.memtable.sync_wal()?;
        Ok(())
    }
}

/// Runs one flush, retrying with exponential backoff. Persistent
/// failure flips the database read-only; the memtable stays live and
/// its log stays on disk, so no acknowledged write is lost.
fn flush_with_retry(
    directory: &std::path::Path,
    config: &Config,
    tables: &Tables,
    cache: &Arc<BlockCache>,
    read_only: &AtomicBool,
    frozen: Arc<MemoryTable>,
) {
    let generation = frozen.generation();
    let mut delay = FLUSH_BACKOFF;

    for attempt in 1..=FLUSH_ATTEMPTS {
        match flush(directory, config, tables, cache, &frozen) {
            Ok(()) => return,
            Err(e) => {
                warn!(generation, attempt, error = %e, "flush attempt failed");
                if attempt < FLUSH_ATTEMPTS {
                    std::thread::sleep(delay);
                    delay = delay.saturating_mul(2);
                }
            }
        }
    }

    error!(
        generation,
        "flush failed persistently, database is now read-only"
    );
    read_only.store(true, Ordering::Release);
}

/// Streams a frozen memtable into a disk table and swaps it into the
/// registry, then deletes the write-ahead log.
fn flush(
    directory: &std::path::Path,
    config: &Config,
    tables: &Tables,
    cache: &Arc<BlockCache>,
    frozen: &Arc<MemoryTable>,
) -> Result<(), TableError> {
    let generation = frozen.generation();

    if frozen.is_empty() {
        // Nothing to persist: drop the registry slot and the log.
        tables.remove(&[generation]);
        if let Err(e) = std::fs::remove_file(frozen.wal().path()) {
            warn!(generation, error = %e, "failed to remove empty log");
        }
        return Ok(());
    }

    let table_path = directory.join(format!("{generation}.table"));
    let mut builder = TableBuilder::new(
        &table_path,
        frozen.tuple_count(),
        config.record_block_size,
        config.index_block_size,
        config.bloom_false_positive_rate,
    )?;

    for tuple in frozen.iter_for_flush() {
        builder.add(&tuple)?;
    }
    let path = builder.finish()?;

    let disk = Arc::new(DiskTable::open(&path, Arc::clone(cache))?);
    let tuples = disk.tuple_count();

    // The swap is the linearization point: from here the tuples are
    // durably reachable through the registry.
    tables.install_flushed(generation, disk);

    if let Err(e) = std::fs::remove_file(frozen.wal().path()) {
        warn!(generation, error = %e, "failed to remove flushed log");
    }

    debug!(generation, tuples, "memtable flushed to disk table");
    Ok(())
}
