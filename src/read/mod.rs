//! The read path: point lookups and merged scans.
//!
//! A [`TableReader`] answers every read from a point-in-time copy of
//! the table registry, so flushes and compactions never invalidate an
//! in-flight operation.
//!
//! # Point lookups
//!
//! Memtables are probed newest-generation-first and the first match
//! wins — rotation order guarantees a newer memtable only holds newer
//! snapshots. Disk tables cannot rely on generation order alone
//! (a compaction output carries a fresh generation but old snapshots),
//! so the reader tracks the best candidate and stops as soon as no
//! remaining table's max snapshot can beat it.
//!
//! # Scans
//!
//! Per-table iterators feed a binary heap keyed by the central
//! comparator. The merged stream is then filtered for MVCC visibility:
//! versions above the read snapshot vanish, and exactly one tuple per
//! unique key bytes — the newest visible version — survives. Tombstones
//! are surfaced; converting them to "absent" is the façade's job.

#[cfg(test)]
mod tests;

use std::cmp::Ordering;
use std::collections::BinaryHeap;
use std::sync::Arc;

use tracing::trace;

use crate::table::TableError;
use crate::tables::{TableHandle, Tables};
use crate::tuple::{Key, Tuple};

/// Item type of every scan source: disk reads can fail mid-iteration.
pub type TupleResult = Result<Tuple, TableError>;

/// Boxed scan source. Memtable runs are owned vectors; disk iterators
/// stream blocks and own their table reference.
pub type TupleSource = Box<dyn Iterator<Item = TupleResult> + Send>;

/// Scan direction, fixing both the heap order and the visibility
/// filter's grouping behavior.
#[derive(Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    Ascending,
    Descending,
}

/// Reads against the live table set.
pub struct TableReader {
    tables: Arc<Tables>,
}

impl TableReader {
    pub fn new(tables: Arc<Tables>) -> Self {
        Self { tables }
    }

    /// Newest version of `key_bytes` visible at `snapshot_id`, across
    /// all live tables. Tombstones are returned as empty-value tuples.
    pub fn get(&self, key_bytes: &[u8], snapshot_id: u64) -> Result<Option<Tuple>, TableError> {
        let view = self.tables.view();

        // Memtables first: rotation makes their snapshot ranges
        // disjoint and generation-ordered, so the first hit is final.
        for handle in &view {
            if let TableHandle::Memory(table) = handle {
                if let Some(tuple) = table.get(key_bytes, snapshot_id) {
                    trace!(generation = table.generation(), "point lookup hit memtable");
                    return Ok(Some(tuple));
                }
            }
        }

        // Disk tables: keep the best candidate, pruning tables whose
        // max snapshot cannot improve on it.
        let mut disk: Vec<&Arc<crate::table::DiskTable>> =
            view.iter().filter_map(|h| h.as_disk()).collect();
        disk.sort_by(|a, b| b.max_snapshot().cmp(&a.max_snapshot()));

        let mut best: Option<Tuple> = None;
        for table in disk {
            if let Some(found) = &best {
                if table.max_snapshot() <= found.key.snapshot_id() {
                    break;
                }
            }
            if let Some(tuple) = table.get(key_bytes, snapshot_id)? {
                let replace = match &best {
                    Some(found) => tuple.key.snapshot_id() > found.key.snapshot_id(),
                    None => true,
                };
                if replace {
                    best = Some(tuple);
                }
            }
        }
        Ok(best)
    }

    /// Merged ascending scan from `start` (inclusive over all versions
    /// of `start`), visible at `snapshot_id`.
    pub fn ascending(&self, start: Option<&[u8]>, snapshot_id: u64) -> ScanIterator {
        self.scan(start, snapshot_id, Direction::Ascending)
    }

    /// Merged descending scan from `start` downward, visible at
    /// `snapshot_id`.
    pub fn descending(&self, start: Option<&[u8]>, snapshot_id: u64) -> ScanIterator {
        self.scan(start, snapshot_id, Direction::Descending)
    }

    fn scan(&self, start: Option<&[u8]>, snapshot_id: u64, direction: Direction) -> ScanIterator {
        let seek = start.map(|bytes| match direction {
            // First version of the start key sorts before every stored
            // version; last version sorts after. Either way the whole
            // version group lands inside the scan.
            Direction::Ascending => Key::first_version(bytes),
            Direction::Descending => Key::last_version(bytes),
        });

        let mut sources: Vec<TupleSource> = Vec::new();
        for handle in self.tables.view() {
            match handle {
                TableHandle::Memory(table) => {
                    let run = match direction {
                        Direction::Ascending => table.ascending_from(seek.as_ref()),
                        Direction::Descending => table.descending_from(seek.as_ref()),
                    };
                    sources.push(Box::new(run.into_iter().map(Ok)));
                }
                TableHandle::Disk(table) => {
                    let iter = match direction {
                        Direction::Ascending => table.ascending_iter(seek.clone()),
                        Direction::Descending => table.descending_iter(seek.clone()),
                    };
                    sources.push(Box::new(iter));
                }
            }
        }

        ScanIterator::new(MergeIterator::new(sources, direction), snapshot_id, direction)
    }
}

/// Heap entry: one buffered tuple per live source.
struct HeapEntry {
    tuple: Tuple,
    source: usize,
    direction: Direction,
}

impl PartialEq for HeapEntry {
    fn eq(&self, other: &Self) -> bool {
        self.tuple.key == other.tuple.key
    }
}

impl Eq for HeapEntry {}

impl Ord for HeapEntry {
    fn cmp(&self, other: &Self) -> Ordering {
        // BinaryHeap is a max-heap: reverse for ascending scans so the
        // smallest key pops first, keep natural order for descending.
        match self.direction {
            Direction::Ascending => self.tuple.key.cmp(&other.tuple.key).reverse(),
            Direction::Descending => self.tuple.key.cmp(&other.tuple.key),
        }
    }
}

impl PartialOrd for HeapEntry {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

/// K-way merge of sorted tuple sources under the central comparator.
///
/// Also the engine of compaction merges: the compactor feeds it disk
/// iterators and pipes the output through its retention filter.
pub struct MergeIterator {
    sources: Vec<TupleSource>,
    heap: BinaryHeap<HeapEntry>,
    direction: Direction,
    failed: Option<TableError>,
}

impl MergeIterator {
    pub fn new(mut sources: Vec<TupleSource>, direction: Direction) -> Self {
        let mut heap = BinaryHeap::with_capacity(sources.len());
        let mut failed = None;
        for (index, source) in sources.iter_mut().enumerate() {
            match source.next() {
                Some(Ok(tuple)) => heap.push(HeapEntry {
                    tuple,
                    source: index,
                    direction,
                }),
                Some(Err(e)) => {
                    failed = Some(e);
                    break;
                }
                None => {}
            }
        }
        Self {
            sources,
            heap,
            direction,
            failed,
        }
    }
}

impl Iterator for MergeIterator {
    type Item = TupleResult;

    fn next(&mut self) -> Option<Self::Item> {
        if let Some(e) = self.failed.take() {
            self.heap.clear();
            return Some(Err(e));
        }

        let entry = self.heap.pop()?;
        let index = entry.source;

        match self.sources[index].next() {
            Some(Ok(tuple)) => self.heap.push(HeapEntry {
                tuple,
                source: index,
                direction: self.direction,
            }),
            Some(Err(e)) => {
                self.failed = Some(e);
            }
            None => {}
        }

        Some(Ok(entry.tuple))
    }
}

/// MVCC visibility filter over a merged stream.
///
/// Skips versions newer than the read snapshot, then reduces every
/// version group to its newest visible tuple. Ascending streams arrive
/// newest-version-first per key (the comparator inversion at work), so
/// the first visible tuple of a group wins. Descending streams arrive
/// oldest-version-first, so the group is drained and its last visible
/// tuple wins.
pub struct ScanIterator {
    merged: MergeIterator,
    snapshot_id: u64,
    direction: Direction,
    /// Ascending: key bytes already emitted or suppressed.
    current_bytes: Option<Vec<u8>>,
    /// Descending: best visible tuple of the group in progress.
    pending: Option<Tuple>,
    done: bool,
}

impl ScanIterator {
    fn new(merged: MergeIterator, snapshot_id: u64, direction: Direction) -> Self {
        Self {
            merged,
            snapshot_id,
            direction,
            current_bytes: None,
            pending: None,
            done: false,
        }
    }

    fn next_ascending(&mut self) -> Option<TupleResult> {
        loop {
            let tuple = match self.merged.next()? {
                Ok(tuple) => tuple,
                Err(e) => {
                    self.done = true;
                    return Some(Err(e));
                }
            };
            if tuple.key.snapshot_id() > self.snapshot_id {
                continue;
            }
            if self
                .current_bytes
                .as_deref()
                .is_some_and(|bytes| bytes == tuple.key.bytes())
            {
                continue;
            }
            self.current_bytes = Some(tuple.key.bytes().to_vec());
            return Some(Ok(tuple));
        }
    }

    fn next_descending(&mut self) -> Option<TupleResult> {
        loop {
            match self.merged.next() {
                Some(Ok(tuple)) => {
                    if tuple.key.snapshot_id() > self.snapshot_id {
                        continue;
                    }
                    match &self.pending {
                        Some(pending) if pending.key.bytes() == tuple.key.bytes() => {
                            // Same group, newer visible version.
                            self.pending = Some(tuple);
                        }
                        Some(_) => {
                            // Group boundary: emit the finished group.
                            let finished = self.pending.replace(tuple);
                            return finished.map(Ok);
                        }
                        None => self.pending = Some(tuple),
                    }
                }
                Some(Err(e)) => {
                    self.done = true;
                    return Some(Err(e));
                }
                None => {
                    return self.pending.take().map(Ok);
                }
            }
        }
    }
}

impl Iterator for ScanIterator {
    type Item = TupleResult;

    fn next(&mut self) -> Option<Self::Item> {
        if self.done {
            return None;
        }
        match self.direction {
            Direction::Ascending => self.next_ascending(),
            Direction::Descending => self.next_descending(),
        }
    }
}
