//! Byte-weighted block caches.
//!
//! Two bounded LRUs sit between disk tables and the filesystem: one for
//! record blocks, one for index blocks, both keyed by
//! `(generation, file offset)`. Capacity is measured in bytes via a
//! weigher, so a handful of large blocks and a crowd of small ones
//! compete fairly.
//!
//! Misses load through `try_get_with`, which coalesces concurrent
//! lookups of the same key into a single disk read — the other callers
//! block until the first load resolves and then share its result.

use std::sync::Arc;

use moka::sync::Cache;

use crate::block::{IndexBlock, RecordBlock};

/// Cache key: (table generation, block offset within the file).
pub type BlockAddress = (u64, u64);

/// The pair of block caches shared by every disk table in a database.
pub struct BlockCache {
    records: Cache<BlockAddress, Arc<RecordBlock>>,
    indexes: Cache<BlockAddress, Arc<IndexBlock>>,
}

impl BlockCache {
    /// Creates caches bounded to the given byte capacities.
    pub fn new(record_bytes: u64, index_bytes: u64) -> Self {
        let records = Cache::builder()
            .weigher(|_key: &BlockAddress, block: &Arc<RecordBlock>| {
                u32::try_from(block.size()).unwrap_or(u32::MAX)
            })
            .max_capacity(record_bytes)
            .support_invalidation_closures()
            .build();
        let indexes = Cache::builder()
            .weigher(|_key: &BlockAddress, block: &Arc<IndexBlock>| {
                u32::try_from(block.size()).unwrap_or(u32::MAX)
            })
            .max_capacity(index_bytes)
            .support_invalidation_closures()
            .build();
        Self { records, indexes }
    }

    /// Fetches the record block at `address`, loading it via `load` on
    /// a miss. Concurrent misses for the same address share one load.
    pub fn record_block<E>(
        &self,
        address: BlockAddress,
        load: impl FnOnce() -> Result<Arc<RecordBlock>, E>,
    ) -> Result<Arc<RecordBlock>, Arc<E>>
    where
        E: Send + Sync + 'static,
    {
        self.records.try_get_with(address, load)
    }

    /// Fetches the index block at `address`, loading it via `load` on a
    /// miss.
    pub fn index_block<E>(
        &self,
        address: BlockAddress,
        load: impl FnOnce() -> Result<Arc<IndexBlock>, E>,
    ) -> Result<Arc<IndexBlock>, Arc<E>>
    where
        E: Send + Sync + 'static,
    {
        self.indexes.try_get_with(address, load)
    }

    /// Drops every cached block belonging to `generation`.
    ///
    /// Called when a table file is retired so its blocks stop occupying
    /// budget. Generations are never reused, so a missed invalidation
    /// only delays eviction until the LRU catches up.
    pub fn evict_generation(&self, generation: u64) {
        let _ = self
            .records
            .invalidate_entries_if(move |(g, _), _| *g == generation);
        let _ = self
            .indexes
            .invalidate_entries_if(move |(g, _), _| *g == generation);
    }
}
