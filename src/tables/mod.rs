//! The registry of live tables.
//!
//! [`Tables`] holds every table a reader may touch — the writable
//! memtable, any frozen memtables awaiting flush, and the disk tables —
//! ordered by generation id, newest first. Readers copy the list under
//! a read lock and then work entirely on their copy; the three mutation
//! paths (writer rotation, flush install, compaction swap) each take
//! the write lock only for the swap itself.
//!
//! A table handle is an `Arc`, so a copied view keeps its tables alive
//! for as long as any get or iterator needs them. Disk tables retired
//! by compaction are merely marked obsolete here; their files unlink
//! when the last handle drops.


use std::sync::{Arc, RwLock};

use crate::memtable::MemoryTable;
use crate::table::DiskTable;

/// One live table: in memory or on disk.
#[derive(Clone)]
pub enum TableHandle {
    Memory(Arc<MemoryTable>),
    Disk(Arc<DiskTable>),
}

impl TableHandle {
    /// Generation id of the underlying table.
    pub fn generation(&self) -> u64 {
        match self {
            TableHandle::Memory(table) => table.generation(),
            TableHandle::Disk(table) => table.generation(),
        }
    }

    pub fn is_memory(&self) -> bool {
        matches!(self, TableHandle::Memory(_))
    }

    pub fn as_disk(&self) -> Option<&Arc<DiskTable>> {
        match self {
            TableHandle::Disk(table) => Some(table),
            TableHandle::Memory(_) => None,
        }
    }
}

impl std::fmt::Debug for TableHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            TableHandle::Memory(t) => write!(f, "mem:{}", t.generation()),
            TableHandle::Disk(t) => write!(f, "disk:{}", t.generation()),
        }
    }
}

/// Generation-ordered set of live tables.
pub struct Tables {
    /// Sorted by generation descending (newest first).
    inner: RwLock<Vec<TableHandle>>,
}

impl Tables {
    pub fn new(initial: Vec<TableHandle>) -> Self {
        let mut tables = initial;
        tables.sort_by(|a, b| b.generation().cmp(&a.generation()));
        Self {
            inner: RwLock::new(tables),
        }
    }

    /// A point-in-time copy of the registry, newest generation first.
    ///
    /// The copy pins every table it references; compaction and flush
    /// swaps never invalidate it.
    pub fn view(&self) -> Vec<TableHandle> {
        match self.inner.read() {
            Ok(guard) => guard.clone(),
            Err(poisoned) => poisoned.into_inner().clone(),
        }
    }

    /// Registers a new table (writer rotation, newest generation).
    pub fn register(&self, handle: TableHandle) {
        let mut guard = match self.inner.write() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        guard.push(handle);
        guard.sort_by(|a, b| b.generation().cmp(&a.generation()));
    }

    /// Replaces the memtable of `generation` with its flushed disk
    /// table — the single linearization point of a flush.
    pub fn install_flushed(&self, generation: u64, table: Arc<DiskTable>) {
        let mut guard = match self.inner.write() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        if let Some(slot) = guard.iter_mut().find(|h| h.generation() == generation) {
            *slot = TableHandle::Disk(table);
        }
    }

    /// Atomically replaces `retired` generations with `replacement`
    /// (compaction swap). The retired disk tables are marked obsolete;
    /// their files unlink once unreferenced.
    pub fn swap(&self, retired: &[u64], replacement: Arc<DiskTable>) {
        let mut guard = match self.inner.write() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        for handle in guard.iter() {
            if retired.contains(&handle.generation()) {
                if let Some(disk) = handle.as_disk() {
                    disk.mark_obsolete();
                }
            }
        }
        guard.retain(|h| !retired.contains(&h.generation()));
        guard.push(TableHandle::Disk(replacement));
        guard.sort_by(|a, b| b.generation().cmp(&a.generation()));
    }

    /// Removes `retired` generations without installing a replacement
    /// (a compaction whose output was empty).
    pub fn remove(&self, retired: &[u64]) {
        let mut guard = match self.inner.write() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        for handle in guard.iter() {
            if retired.contains(&handle.generation()) {
                if let Some(disk) = handle.as_disk() {
                    disk.mark_obsolete();
                }
            }
        }
        guard.retain(|h| !retired.contains(&h.generation()));
    }

    /// The oldest live generation, if any table exists.
    pub fn oldest_generation(&self) -> Option<u64> {
        let guard = match self.inner.read() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        guard.last().map(|h| h.generation())
    }

    /// Number of live tables.
    pub fn len(&self) -> usize {
        match self.inner.read() {
            Ok(guard) => guard.len(),
            Err(poisoned) => poisoned.into_inner().len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Number of live disk tables.
    pub fn disk_table_count(&self) -> usize {
        self.view().iter().filter(|h| !h.is_memory()).count()
    }
}
