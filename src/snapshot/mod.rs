//! Snapshot allocation and retention.
//!
//! Snapshot ids are a single monotonic counter: every write takes the
//! next id, and every read fixes the newest id it is allowed to see.
//! Retention pins ids against compaction — the compactor may collapse
//! history only below the minimum retained id, so a pinned reader keeps
//! seeing exactly the tuples it started with.


use std::collections::BTreeMap;
use std::sync::Mutex;
use std::sync::atomic::{AtomicU64, Ordering};

/// Monotonic snapshot id allocator plus the retained-id refcount set.
pub struct Snapshots {
    /// The next id to hand out; `current()` is `next - 1`.
    next: AtomicU64,

    /// Retained ids with their pin counts.
    retained: Mutex<BTreeMap<u64, u64>>,
}

impl Snapshots {
    /// Starts the counter so the first allocated id is `floor + 1`.
    ///
    /// At open, `floor` is the highest snapshot id found on disk, which
    /// keeps invariant "every `put` returns a strictly greater id"
    /// across restarts.
    pub fn new(floor: u64) -> Self {
        Self {
            next: AtomicU64::new(floor + 1),
            retained: Mutex::new(BTreeMap::new()),
        }
    }

    /// Allocates the next snapshot id. Strictly increasing.
    pub fn next_id(&self) -> u64 {
        self.next.fetch_add(1, Ordering::SeqCst)
    }

    /// The most recently allocated id — the default read snapshot.
    pub fn current(&self) -> u64 {
        self.next.load(Ordering::SeqCst).saturating_sub(1)
    }

    /// Pins `id` against compaction. Pins nest.
    pub fn retain(&self, id: u64) {
        let mut retained = match self.retained.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        *retained.entry(id).or_insert(0) += 1;
    }

    /// Releases one pin on `id`. Unknown ids are ignored.
    pub fn release(&self, id: u64) {
        let mut retained = match self.retained.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        if let Some(count) = retained.get_mut(&id) {
            *count -= 1;
            if *count == 0 {
                retained.remove(&id);
            }
        }
    }

    /// The smallest retained id, or the next unissued id when nothing
    /// is pinned — in which case all history may collapse to the newest
    /// version per key.
    pub fn min_retained(&self) -> u64 {
        let retained = match self.retained.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        retained
            .first_key_value()
            .map(|(id, _)| *id)
            .unwrap_or_else(|| self.next.load(Ordering::SeqCst))
    }

    /// Number of distinct retained ids.
    pub fn retained_count(&self) -> usize {
        let retained = match self.retained.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        retained.len()
    }
}
