//! The database façade: open, read, write, scan, compact, close.
//!
//! [`Database`] wires the storage components together and owns their
//! lifecycles:
//!
//! 1. **Open** scans the directory — discarding abandoned `.tmp`
//!    builds, quarantining corrupt tables as `.broken`, opening every
//!    committed table, and replaying every write-ahead log whose
//!    generation has no committed table. Replayed memtables go straight
//!    back onto the flush queue; the snapshot counter restarts above
//!    the highest id found anywhere on disk.
//! 2. **Reads and writes** delegate to [`TableReader`] and
//!    [`TableWriter`]; the façade converts tombstones to "absent" and
//!    surfaces the spec's error kinds.
//! 3. **Close** stops accepting work, lets queued background work
//!    drain, and joins the executors. It is idempotent.
//!
//! Iterators pin their read snapshot for their whole lifetime, so a
//! concurrent compaction can never collapse a version an open iterator
//! still needs.

#[cfg(test)]
mod tests;

use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;

use thiserror::Error;
use tracing::{info, warn};

use crate::cache::BlockCache;
use crate::compact::{CompactionError, CompactionHandle, CompactionStrategyType, Compactor};
use crate::memtable::{MemoryTable, MemtableError};
use crate::metrics::{Metrics, Operation};
use crate::read::{ScanIterator, TableReader};
use crate::snapshot::Snapshots;
use crate::table::{self, DiskTable, TableError};
use crate::tables::{TableHandle, Tables};
use crate::task::{Executor, TaskError};
use crate::tuple::{Tuple, Value};
use crate::wal;
use crate::write::{TableWriter, WriteError};

/// Configuration recognized by the storage core.
#[derive(Debug, Clone)]
pub struct Config {
    /// Memtable byte budget before rotation and flush.
    pub memtable_max_bytes: usize,

    /// Target serialized size of one record block.
    pub record_block_size: usize,

    /// Target serialized size of one index block. Together with the
    /// key sizes this fixes the index fan-out; the default aims at
    /// roughly 32 record blocks per leaf index block.
    pub index_block_size: usize,

    /// False-positive rate the per-table bloom filters are sized for.
    pub bloom_false_positive_rate: f64,

    /// Which compaction policy runs in the background.
    pub compaction_strategy: CompactionStrategyType,

    /// Byte capacity of the record-block cache.
    pub table_cache_bytes: u64,

    /// Byte capacity of the index-block cache.
    pub index_cache_bytes: u64,

    /// Whether every write fsyncs its log append before returning.
    pub fsync_on_write: bool,

    /// Size-tiered: lower bound multiplier of a bucket's size range.
    pub bucket_low: f64,

    /// Size-tiered: upper bound multiplier of a bucket's size range.
    pub bucket_high: f64,

    /// Size-tiered: tables smaller than this share the "small" bucket.
    pub min_table_bytes: u64,

    /// Size-tiered: minimum bucket population to trigger a merge.
    pub min_compaction_tables: usize,

    /// Size-tiered: maximum tables merged per round.
    pub max_compaction_tables: usize,

    /// Worker threads in the compaction pool.
    pub compaction_threads: usize,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            memtable_max_bytes: 4 * 1024 * 1024,
            record_block_size: 64 * 1024,
            index_block_size: 2 * 1024,
            bloom_false_positive_rate: 0.01,
            compaction_strategy: CompactionStrategyType::SizeTiered,
            table_cache_bytes: 64 * 1024 * 1024,
            index_cache_bytes: 16 * 1024 * 1024,
            fsync_on_write: false,
            bucket_low: 0.5,
            bucket_high: 1.5,
            min_table_bytes: 4 * 1024,
            min_compaction_tables: 4,
            max_compaction_tables: 10,
            compaction_threads: 2,
        }
    }
}

/// Errors surfaced at the database boundary.
#[derive(Debug, Error)]
pub enum Error {
    /// Underlying disk read/write/fsync failure.
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// Footer magic mismatch, CRC failure, or index out of bounds.
    #[error("corrupt table: {0}")]
    CorruptTable(String),

    /// Operation issued after `close()`.
    #[error("database is closed")]
    Closed,

    /// Resource allocation failure (e.g. the next write-ahead log).
    #[error("capacity error: {0}")]
    Capacity(String),
}

impl From<TableError> for Error {
    fn from(e: TableError) -> Self {
        match e {
            TableError::Io(e) => Error::Io(e),
            TableError::Corrupt(msg) => Error::CorruptTable(msg),
            TableError::Encoding(e) => Error::CorruptTable(e.to_string()),
            TableError::Internal(msg) => Error::Io(io::Error::other(msg)),
        }
    }
}

impl From<wal::WalError> for Error {
    fn from(e: wal::WalError) -> Self {
        match e {
            wal::WalError::Io(e) => Error::Io(e),
            wal::WalError::RecordTooLarge(n) => {
                Error::Capacity(format!("record of {n} bytes exceeds log limit"))
            }
            other => Error::Io(io::Error::other(other.to_string())),
        }
    }
}

impl From<MemtableError> for Error {
    fn from(e: MemtableError) -> Self {
        match e {
            MemtableError::Wal(e) => e.into(),
            MemtableError::Internal(msg) => Error::Io(io::Error::other(msg)),
        }
    }
}

impl From<WriteError> for Error {
    fn from(e: WriteError) -> Self {
        match e {
            WriteError::Memtable(e) => e.into(),
            WriteError::Capacity(msg) => Error::Capacity(msg),
            WriteError::ReadOnly(msg) => Error::Io(io::Error::other(msg)),
            WriteError::Task(_) => Error::Closed,
        }
    }
}

impl From<CompactionError> for Error {
    fn from(e: CompactionError) -> Self {
        match e {
            CompactionError::Table(e) => e.into(),
            CompactionError::Task(_) => Error::Closed,
            CompactionError::Internal(msg) => Error::Io(io::Error::other(msg)),
        }
    }
}

impl From<TaskError> for Error {
    fn from(_: TaskError) -> Self {
        Error::Closed
    }
}

/// A visible key-value pair returned to callers.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Record {
    /// The key bytes.
    pub key: Vec<u8>,

    /// The value bytes. Never empty — tombstones are filtered before
    /// records reach callers.
    pub value: Vec<u8>,

    /// The snapshot id of this version.
    pub snapshot_id: u64,
}

impl Record {
    fn from_tuple(tuple: Tuple) -> Self {
        let snapshot_id = tuple.key.snapshot_id();
        Self {
            key: tuple.key.into_bytes(),
            value: tuple.value.into_bytes(),
            snapshot_id,
        }
    }
}

/// An embedded, snapshot-isolated, log-structured key-value store.
pub struct Database {
    directory: PathBuf,
    config: Arc<Config>,
    tables: Arc<Tables>,
    snapshots: Arc<Snapshots>,
    writer: TableWriter,
    reader: TableReader,
    compactor: Arc<Compactor>,
    flush_executor: Arc<Executor>,
    compaction_executor: Arc<Executor>,
    metrics: Arc<Metrics>,
    closed: AtomicBool,
    closing: Arc<AtomicBool>,
}

impl Database {
    /// Opens (or creates) a database in `directory`.
    pub fn open(directory: impl AsRef<Path>, config: Config) -> Result<Self, Error> {
        let directory = directory.as_ref().to_path_buf();
        fs::create_dir_all(&directory)?;

        let config = Arc::new(config);
        let cache = Arc::new(BlockCache::new(
            config.table_cache_bytes,
            config.index_cache_bytes,
        ));

        let recovered = recover_directory(&directory, &cache)?;

        let mut max_snapshot = recovered.max_snapshot;
        for memtable in &recovered.memtables {
            max_snapshot = max_snapshot.max(memtable.max_snapshot());
        }

        // The writable memtable takes the next generation; the shared
        // counter continues after it.
        let writable_generation = recovered.max_generation + 1;
        let wal_path = directory.join(format!("{writable_generation}.write"));
        let writable = Arc::new(MemoryTable::open(&wal_path)?);
        let next_generation = Arc::new(AtomicU64::new(writable_generation + 1));

        let mut handles: Vec<TableHandle> = Vec::new();
        for table in recovered.disk_tables {
            handles.push(TableHandle::Disk(table));
        }
        for memtable in &recovered.memtables {
            handles.push(TableHandle::Memory(Arc::clone(memtable)));
        }
        handles.push(TableHandle::Memory(Arc::clone(&writable)));
        let tables = Arc::new(Tables::new(handles));

        let snapshots = Arc::new(Snapshots::new(max_snapshot));
        let read_only = Arc::new(AtomicBool::new(false));
        let closing = Arc::new(AtomicBool::new(false));

        let flush_executor = Arc::new(Executor::new("flush", 1, 16)?);
        let compaction_executor = Arc::new(Executor::new(
            "compaction",
            config.compaction_threads,
            8,
        )?);

        let writer = TableWriter::new(
            directory.clone(),
            Arc::clone(&config),
            Arc::clone(&tables),
            Arc::clone(&snapshots),
            Arc::clone(&cache),
            Arc::clone(&flush_executor),
            Arc::clone(&next_generation),
            Arc::clone(&read_only),
            Arc::clone(&writable),
        );
        let reader = TableReader::new(Arc::clone(&tables));
        let compactor = Arc::new(Compactor::new(
            directory.clone(),
            Arc::clone(&config),
            Arc::clone(&tables),
            Arc::clone(&snapshots),
            Arc::clone(&cache),
            Arc::clone(&compaction_executor),
            Arc::clone(&next_generation),
            Arc::clone(&read_only),
            Arc::clone(&closing),
        ));

        // Replayed memtables go straight back onto the flush queue;
        // their logs disappear once each flush lands.
        for memtable in recovered.memtables {
            writer.schedule_flush(memtable)?;
        }

        info!(
            directory = %directory.display(),
            tables = tables.len(),
            snapshot_floor = max_snapshot,
            "database opened"
        );

        Ok(Self {
            directory,
            config,
            tables,
            snapshots,
            writer,
            reader,
            compactor,
            flush_executor,
            compaction_executor,
            metrics: Arc::new(Metrics::new()),
            closed: AtomicBool::new(false),
            closing,
        })
    }

    fn check_open(&self) -> Result<(), Error> {
        if self.closed.load(Ordering::Acquire) {
            Err(Error::Closed)
        } else {
            Ok(())
        }
    }

    /// Writes a key-value pair, returning the snapshot id of the write.
    ///
    /// An empty value is the tombstone marker, making this equivalent
    /// to [`delete`](Self::delete).
    pub fn put(&self, key: &[u8], value: &[u8]) -> Result<u64, Error> {
        self.put_with_fsync(key, value, self.config.fsync_on_write)
    }

    /// [`put`](Self::put) with an explicit fsync choice for this write.
    pub fn put_with_fsync(&self, key: &[u8], value: &[u8], fsync: bool) -> Result<u64, Error> {
        self.check_open()?;
        if key.is_empty() {
            return Err(Error::Io(io::Error::new(
                io::ErrorKind::InvalidInput,
                "key must not be empty",
            )));
        }
        let snapshot_id = self.writer.write(key, Value::new(value), fsync)?;
        self.metrics
            .observe_bytes(Operation::Write, (key.len() + value.len()) as u64);
        Ok(snapshot_id)
    }

    /// Deletes a key by writing a tombstone. Returns the snapshot id.
    pub fn delete(&self, key: &[u8]) -> Result<u64, Error> {
        self.check_open()?;
        if key.is_empty() {
            return Err(Error::Io(io::Error::new(
                io::ErrorKind::InvalidInput,
                "key must not be empty",
            )));
        }
        let snapshot_id = self
            .writer
            .write(key, Value::tombstone(), self.config.fsync_on_write)?;
        self.metrics
            .observe_bytes(Operation::Write, key.len() as u64);
        Ok(snapshot_id)
    }

    /// The newest visible value of `key` at the current snapshot.
    pub fn get(&self, key: &[u8]) -> Result<Option<Record>, Error> {
        self.get_at(key, self.snapshots.current())
    }

    /// The newest value of `key` visible at `snapshot_id`.
    pub fn get_at(&self, key: &[u8], snapshot_id: u64) -> Result<Option<Record>, Error> {
        self.check_open()?;
        let found = self.reader.get(key, snapshot_id)?;
        Ok(match found {
            Some(tuple) if tuple.value.is_tombstone() => None,
            Some(tuple) => {
                self.metrics
                    .observe_bytes(Operation::Read, tuple.size() as u64);
                Some(Record::from_tuple(tuple))
            }
            None => None,
        })
    }

    /// Ascending iterator from `start` (or the first key) at the given
    /// snapshot (or the current one). The snapshot stays pinned until
    /// the iterator is dropped.
    pub fn ascending(
        &self,
        start: Option<&[u8]>,
        snapshot_id: Option<u64>,
    ) -> Result<DbIterator, Error> {
        self.check_open()?;
        let snapshot_id = snapshot_id.unwrap_or_else(|| self.snapshots.current());
        self.snapshots.retain(snapshot_id);
        Ok(DbIterator {
            inner: self.reader.ascending(start, snapshot_id),
            snapshots: Arc::clone(&self.snapshots),
            metrics: Arc::clone(&self.metrics),
            snapshot_id,
            released: false,
        })
    }

    /// Descending iterator from `start` (or the last key) at the given
    /// snapshot (or the current one).
    pub fn descending(
        &self,
        start: Option<&[u8]>,
        snapshot_id: Option<u64>,
    ) -> Result<DbIterator, Error> {
        self.check_open()?;
        let snapshot_id = snapshot_id.unwrap_or_else(|| self.snapshots.current());
        self.snapshots.retain(snapshot_id);
        Ok(DbIterator {
            inner: self.reader.descending(start, snapshot_id),
            snapshots: Arc::clone(&self.snapshots),
            metrics: Arc::clone(&self.metrics),
            snapshot_id,
            released: false,
        })
    }

    /// The current (most recently allocated) snapshot id.
    pub fn current_snapshot(&self) -> u64 {
        self.snapshots.current()
    }

    /// Pins `snapshot_id` against compaction until released.
    pub fn retain_snapshot(&self, snapshot_id: u64) {
        self.snapshots.retain(snapshot_id);
    }

    /// Releases one pin on `snapshot_id`.
    pub fn release_snapshot(&self, snapshot_id: u64) {
        self.snapshots.release(snapshot_id);
    }

    /// Triggers one round of compaction, returning a waitable handle.
    pub fn compact(&self) -> Result<CompactionHandle, Error> {
        self.check_open()?;
        Ok(self.compactor.compact()?)
    }

    /// Number of live tables (memtables and disk tables) — test and
    /// tooling surface.
    pub fn table_count(&self) -> usize {
        self.tables.len()
    }

    /// Number of live disk tables.
    pub fn disk_table_count(&self) -> usize {
        self.tables.disk_table_count()
    }

    /// Emits operation counters through `tracing`.
    pub fn log_metrics(&self) {
        self.metrics.log();
    }

    /// Closes the database: stops accepting operations, drains queued
    /// background work, and joins the executors. Idempotent.
    pub fn close(&self) -> Result<(), Error> {
        if self.closed.swap(true, Ordering::AcqRel) {
            return Ok(());
        }
        self.closing.store(true, Ordering::Release);

        // Make sure acknowledged writes are on disk before we go.
        if let Err(e) = self.writer.sync() {
            warn!(error = %e, "log sync during close failed");
        }

        self.flush_executor.shutdown();
        self.compaction_executor.shutdown();

        info!(directory = %self.directory.display(), "database closed");
        Ok(())
    }
}

impl Drop for Database {
    fn drop(&mut self) {
        let _ = self.close();
    }
}

/// Iterator over visible records, tombstones filtered, snapshot pinned.
pub struct DbIterator {
    inner: ScanIterator,
    snapshots: Arc<Snapshots>,
    metrics: Arc<Metrics>,
    snapshot_id: u64,
    released: bool,
}

impl DbIterator {
    /// The snapshot this iterator reads at.
    pub fn snapshot_id(&self) -> u64 {
        self.snapshot_id
    }

    /// Releases the pinned snapshot early; `Drop` does the same.
    pub fn close(mut self) {
        self.release();
    }

    fn release(&mut self) {
        if !self.released {
            self.released = true;
            self.snapshots.release(self.snapshot_id);
        }
    }
}

impl Iterator for DbIterator {
    type Item = Result<Record, Error>;

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            match self.inner.next()? {
                Ok(tuple) => {
                    if tuple.value.is_tombstone() {
                        continue;
                    }
                    self.metrics
                        .observe_bytes(Operation::Scan, tuple.size() as u64);
                    return Some(Ok(Record::from_tuple(tuple)));
                }
                Err(e) => return Some(Err(e.into())),
            }
        }
    }
}

impl Drop for DbIterator {
    fn drop(&mut self) {
        self.release();
    }
}

/// What directory recovery found.
struct Recovered {
    disk_tables: Vec<Arc<DiskTable>>,
    memtables: Vec<Arc<MemoryTable>>,
    max_generation: u64,
    max_snapshot: u64,
}

/// Scans the database directory: discards abandoned `.tmp` builds,
/// quarantines corrupt tables, opens committed tables, and replays
/// every log whose generation has no committed table.
fn recover_directory(directory: &Path, cache: &Arc<BlockCache>) -> Result<Recovered, Error> {
    let mut table_paths: Vec<(u64, PathBuf)> = Vec::new();
    let mut wal_paths: Vec<(u64, PathBuf)> = Vec::new();

    for entry in fs::read_dir(directory)? {
        let entry = entry?;
        let path = entry.path();
        if !path.is_file() {
            continue;
        }

        let name = match path.file_name().and_then(|n| n.to_str()) {
            Some(name) => name,
            None => continue,
        };

        if name.ends_with(".table.tmp") {
            warn!(path = %path.display(), "discarding abandoned table build");
            fs::remove_file(&path)?;
            continue;
        }
        if let Some(generation) = table::parse_generation(&path) {
            table_paths.push((generation, path));
            continue;
        }
        if let Some(generation) = wal::parse_generation(&path) {
            wal_paths.push((generation, path));
        }
    }

    let mut disk_tables = Vec::new();
    let mut max_generation = 0u64;
    let mut max_snapshot = 0u64;

    for (generation, path) in table_paths {
        match DiskTable::open(&path, Arc::clone(cache)) {
            Ok(table) => {
                max_generation = max_generation.max(generation);
                max_snapshot = max_snapshot.max(table.max_snapshot());
                disk_tables.push(Arc::new(table));
            }
            Err(TableError::Io(e)) => return Err(Error::Io(e)),
            Err(e) => {
                // Quarantine: the database opens without this table,
                // with the generation marked missing.
                let broken = path.with_extension("broken");
                warn!(
                    generation,
                    path = %path.display(),
                    error = %e,
                    "quarantining corrupt table, generation is missing"
                );
                fs::rename(&path, &broken)?;
                max_generation = max_generation.max(generation);
            }
        }
    }

    let mut memtables = Vec::new();
    for (generation, path) in wal_paths {
        max_generation = max_generation.max(generation);
        if disk_tables.iter().any(|t| t.generation() == generation) {
            // The flush landed but its log cleanup did not: finish it.
            info!(generation, "removing log left behind by a completed flush");
            fs::remove_file(&path)?;
            continue;
        }
        let memtable = Arc::new(MemoryTable::open(&path)?);
        info!(
            generation,
            tuples = memtable.tuple_count(),
            "memtable recovered from log"
        );
        memtables.push(memtable);
    }

    Ok(Recovered {
        disk_tables,
        memtables,
        max_generation,
        max_snapshot,
    })
}
