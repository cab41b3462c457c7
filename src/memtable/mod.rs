//! The in-memory write buffer.
//!
//! A [`MemoryTable`] is a concurrent sorted map of tuples paired 1:1
//! with a write-ahead log of the same generation. Every mutation is
//! appended to the log **before** it lands in the map, so the map is
//! always reconstructible from the log alone.
//!
//! Because keys order by (bytes ascending, snapshot descending), all
//! versions of a logical key sit adjacent in the map with the newest
//! first — `get` is a single lower-bound seek, and forward iteration
//! naturally yields newest-first version runs.
//!
//! # Concurrency
//!
//! The map is a lock-free skip list: readers never block and never
//! observe partial writes. Writers are serialized above this layer by
//! the table writer's rotation mutex; the memtable itself performs no
//! locking beyond the log's internal file mutex.
//!
//! # Freezing
//!
//! A memtable past its byte budget is *frozen* by the writer: it simply
//! stops receiving writes and keeps serving reads until the flush
//! worker has streamed it into a disk table, at which point its log is
//! deleted. Frozen-ness is a property of who holds the write path, not
//! of this type.


use std::ops::Bound;
use std::path::Path;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};

use crossbeam_skiplist::SkipMap;
use thiserror::Error;
use tracing::{info, warn};

use crate::tuple::{Key, Tuple, Value};
use crate::wal::{Wal, WalError};

/// Errors returned by memtable operations.
#[derive(Debug, Error)]
pub enum MemtableError {
    /// Underlying log failure.
    #[error("log error: {0}")]
    Wal(#[from] WalError),

    /// Internal invariant violation.
    #[error("internal error: {0}")]
    Internal(String),
}

/// An in-memory sorted table of tuples backed by a write-ahead log.
pub struct MemoryTable {
    generation: u64,
    map: SkipMap<Key, Value>,
    approximate_size: AtomicUsize,
    /// Highest snapshot id ever inserted, replay included.
    max_snapshot: AtomicU64,
    wal: Wal<Tuple>,
}

impl MemoryTable {
    /// Opens the memtable for `<generation>.write` at `wal_path`,
    /// replaying any existing log content.
    ///
    /// Replay stops cleanly at the first torn record — the residue of a
    /// crash mid-append — and keeps everything before it. Genuine I/O
    /// errors propagate.
    pub fn open(wal_path: impl AsRef<Path>) -> Result<Self, MemtableError> {
        let wal: Wal<Tuple> = Wal::open(wal_path)?;
        let generation = wal.generation();

        let map = SkipMap::new();
        let mut size = 0usize;
        let mut replayed = 0usize;
        let mut max_snapshot = 0u64;

        for result in wal.replay_iter() {
            match result {
                Ok(tuple) => {
                    size += tuple.size();
                    replayed += 1;
                    max_snapshot = max_snapshot.max(tuple.key.snapshot_id());
                    map.insert(tuple.key, tuple.value);
                }
                Err(e) if e.is_torn_tail() => {
                    warn!(generation, error = %e, "log replay stopped at torn tail");
                    break;
                }
                Err(e) => return Err(e.into()),
            }
        }

        if replayed > 0 {
            info!(generation, replayed, "memtable rebuilt from log");
        }

        Ok(Self {
            generation,
            map,
            approximate_size: AtomicUsize::new(size),
            max_snapshot: AtomicU64::new(max_snapshot),
            wal,
        })
    }

    /// Generation id shared with the paired log.
    pub fn generation(&self) -> u64 {
        self.generation
    }

    /// Approximate in-memory footprint in bytes.
    pub fn size(&self) -> usize {
        self.approximate_size.load(Ordering::Relaxed)
    }

    /// Number of tuples currently held (versions counted separately).
    pub fn tuple_count(&self) -> usize {
        self.map.len()
    }

    pub fn is_empty(&self) -> bool {
        self.map.is_empty()
    }

    /// Inserts a tuple, log-first. `fsync` forces the log append to
    /// stable storage before the in-memory insert.
    pub fn put(&self, tuple: Tuple, fsync: bool) -> Result<(), MemtableError> {
        self.wal.append(&tuple, fsync)?;
        self.approximate_size
            .fetch_add(tuple.size(), Ordering::Relaxed);
        self.max_snapshot
            .fetch_max(tuple.key.snapshot_id(), Ordering::Relaxed);
        self.map.insert(tuple.key, tuple.value);
        Ok(())
    }

    /// Highest snapshot id ever inserted, replay included.
    pub fn max_snapshot(&self) -> u64 {
        self.max_snapshot.load(Ordering::Relaxed)
    }

    /// Newest version of `key_bytes` visible at `snapshot_id`, if any.
    pub fn get(&self, key_bytes: &[u8], snapshot_id: u64) -> Option<Tuple> {
        let seek = Key::new(key_bytes, snapshot_id);
        let entry = self.map.lower_bound(Bound::Included(&seek))?;
        if entry.key().bytes() == key_bytes {
            Some(Tuple::new(entry.key().clone(), entry.value().clone()))
        } else {
            None
        }
    }

    /// All tuples with key ≥ `start` in ascending order, or the whole
    /// table when `start` is `None`.
    ///
    /// The result is an owned point-in-time copy: the memtable is
    /// bounded by its byte budget, and an owned run lets iterators
    /// outlive the registry read lock. Concurrent inserts after the
    /// copy are invisible, which is exactly the snapshot the caller's
    /// read snapshot id already enforces.
    pub fn ascending_from(&self, start: Option<&Key>) -> Vec<Tuple> {
        let mut run = Vec::new();
        let mut entry = match start {
            Some(key) => self.map.lower_bound(Bound::Included(key)),
            None => self.map.front(),
        };
        while let Some(e) = entry {
            run.push(Tuple::new(e.key().clone(), e.value().clone()));
            entry = e.next();
        }
        run
    }

    /// All tuples with key ≤ `start` in descending order, or the whole
    /// table reversed when `start` is `None`.
    pub fn descending_from(&self, start: Option<&Key>) -> Vec<Tuple> {
        let mut run = Vec::new();
        let mut entry = match start {
            Some(key) => self.map.upper_bound(Bound::Included(key)),
            None => self.map.back(),
        };
        while let Some(e) = entry {
            run.push(Tuple::new(e.key().clone(), e.value().clone()));
            entry = e.prev();
        }
        run
    }

    /// Tombstone count, used to size the table filter during flush.
    pub fn tombstone_count(&self) -> usize {
        self.map
            .iter()
            .filter(|e| e.value().is_tombstone())
            .count()
    }

    /// The paired write-ahead log.
    pub fn wal(&self) -> &Wal<Tuple> {
        &self.wal
    }

    /// Forces the log to stable storage.
    pub fn sync_wal(&self) -> Result<(), MemtableError> {
        self.wal.sync()?;
        Ok(())
    }
}

impl std::fmt::Debug for MemoryTable {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MemoryTable")
            .field("generation", &self.generation)
            .field("tuples", &self.map.len())
            .field("bytes", &self.size())
            .finish()
    }
}

impl MemoryTable {
    /// The memtable's full contents in key order; consumed by the flush
    /// worker when streaming into a table builder.
    pub fn iter_for_flush(&self) -> impl Iterator<Item = Tuple> + '_ {
        self.map
            .iter()
            .map(|e| Tuple::new(e.key().clone(), e.value().clone()))
    }
}
