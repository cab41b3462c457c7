//! Background compaction.
//!
//! A compaction merges a set of disk tables into one table at a fresh
//! generation, collapsing version history that no retained snapshot can
//! still observe. The merge reuses the read path's heap merge; what
//! makes compaction compaction is the [`RetentionFilter`] between the
//! merged stream and the table builder:
//!
//! - the newest version of each unique key bytes always survives;
//! - an older version is dropped only once a newer version of the same
//!   key has a snapshot at or below the minimum retained id — every
//!   retained snapshot still resolves to exactly the tuple it saw
//!   before;
//! - a tombstone is dropped only when the merge includes the oldest
//!   live generation (nothing deeper can resurrect the key) **and**
//!   its snapshot is below the minimum retained id.
//!
//! The finished table replaces its inputs in the registry in one atomic
//! swap; input files unlink when their last reference drops. Strategies
//! ([`SizeTieredCompaction`], [`FullCompaction`]) only decide *which*
//! generations to merge; disjoint input sets may compact concurrently.


pub mod size_tiered;

pub use size_tiered::SizeTieredCompaction;

use std::collections::HashSet;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use crossbeam::channel::{Receiver, bounded};
use thiserror::Error;
use tracing::{debug, error, info, warn};

use crate::cache::BlockCache;
use crate::db::Config;
use crate::read::{Direction, MergeIterator, TupleResult, TupleSource};
use crate::snapshot::Snapshots;
use crate::table::{DiskTable, TableBuilder, TableError};
use crate::tables::Tables;
use crate::task::{Executor, TaskError};

/// Merge attempts before the database goes read-only.
const COMPACTION_ATTEMPTS: u32 = 3;

/// Base delay of the compaction retry backoff.
const COMPACTION_BACKOFF: Duration = Duration::from_millis(50);

/// Errors produced by compaction.
#[derive(Debug, Error)]
pub enum CompactionError {
    /// Table read/write failure during the merge.
    #[error("table error: {0}")]
    Table(#[from] TableError),

    /// Background queue rejected the compaction task.
    #[error("task error: {0}")]
    Task(#[from] TaskError),

    /// Internal invariant violation.
    #[error("internal error: {0}")]
    Internal(String),
}

/// Which compaction policy drives the background merges.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum CompactionStrategyType {
    /// Group tables of similar size and merge a bucket once it holds
    /// enough of them.
    #[default]
    SizeTiered,

    /// Merge every disk table into one on each trigger; the trigger
    /// cadence belongs to the caller.
    FullOnSchedule,

    /// Never compact.
    None,
}

impl CompactionStrategyType {
    /// The concrete strategy, or `None` for the no-op policy.
    pub fn strategy(&self) -> Option<Box<dyn CompactionStrategy>> {
        match self {
            Self::SizeTiered => Some(Box::new(SizeTieredCompaction)),
            Self::FullOnSchedule => Some(Box::new(FullCompaction)),
            Self::None => None,
        }
    }
}

/// Picks which generations to merge.
///
/// `plan` sees only tables not already claimed by a running compaction,
/// so concurrent compactions always work disjoint input sets.
pub trait CompactionStrategy: Send + Sync {
    /// Returns the generations to merge, or `None` when there is
    /// nothing worth doing. Must propose at least two generations.
    fn plan(&self, tables: &[Arc<DiskTable>], config: &Config) -> Option<Vec<u64>>;
}

/// Merge everything: the `FullOnSchedule` policy.
pub struct FullCompaction;

impl CompactionStrategy for FullCompaction {
    fn plan(&self, tables: &[Arc<DiskTable>], _config: &Config) -> Option<Vec<u64>> {
        if tables.len() < 2 {
            return None;
        }
        Some(tables.iter().map(|t| t.generation()).collect())
    }
}

/// Completion handle for a triggered compaction.
///
/// `wait` resolves to `Ok(true)` when a merge ran, `Ok(false)` when the
/// strategy found nothing to do (or the database was closing), and
/// `Err` when the merge failed persistently.
pub struct CompactionHandle {
    receiver: Receiver<Result<bool, String>>,
}

impl CompactionHandle {
    /// Blocks until the compaction resolves.
    pub fn wait(self) -> Result<bool, String> {
        match self.receiver.recv() {
            Ok(result) => result,
            Err(_) => Err("compaction worker dropped its result".into()),
        }
    }
}

/// Owns the compaction policy and its background execution.
pub struct Compactor {
    directory: PathBuf,
    config: Arc<Config>,
    tables: Arc<Tables>,
    snapshots: Arc<Snapshots>,
    cache: Arc<BlockCache>,
    executor: Arc<Executor>,
    next_generation: Arc<AtomicU64>,
    read_only: Arc<AtomicBool>,
    closing: Arc<AtomicBool>,
    /// Generations claimed by running compactions.
    in_flight: Arc<Mutex<HashSet<u64>>>,
}

impl Compactor {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        directory: PathBuf,
        config: Arc<Config>,
        tables: Arc<Tables>,
        snapshots: Arc<Snapshots>,
        cache: Arc<BlockCache>,
        executor: Arc<Executor>,
        next_generation: Arc<AtomicU64>,
        read_only: Arc<AtomicBool>,
        closing: Arc<AtomicBool>,
    ) -> Self {
        Self {
            directory,
            config,
            tables,
            snapshots,
            cache,
            executor,
            next_generation,
            read_only,
            closing,
            in_flight: Arc::new(Mutex::new(HashSet::new())),
        }
    }

    /// Schedules one round of compaction and returns its handle.
    pub fn compact(self: &Arc<Self>) -> Result<CompactionHandle, CompactionError> {
        let (sender, receiver) = bounded(1);
        let compactor = Arc::clone(self);
        self.executor.submit(Box::new(move || {
            let result = compactor.run_once().map_err(|e| e.to_string());
            let _ = sender.send(result);
        }))?;
        Ok(CompactionHandle { receiver })
    }

    /// Runs one strategy round synchronously on the calling (worker)
    /// thread.
    fn run_once(&self) -> Result<bool, CompactionError> {
        if self.closing.load(Ordering::Acquire) {
            debug!("compaction cancelled: database closing");
            return Ok(false);
        }

        let strategy = match self.config.compaction_strategy.strategy() {
            Some(strategy) => strategy,
            None => return Ok(false),
        };

        // Plan over unclaimed disk tables, then claim the proposal so a
        // concurrent round cannot overlap it.
        let (inputs, claimed): (Vec<Arc<DiskTable>>, Vec<u64>) = {
            let mut in_flight = match self.in_flight.lock() {
                Ok(guard) => guard,
                Err(poisoned) => poisoned.into_inner(),
            };
            let candidates: Vec<Arc<DiskTable>> = self
                .tables
                .view()
                .iter()
                .filter_map(|h| h.as_disk().cloned())
                .filter(|t| !in_flight.contains(&t.generation()))
                .collect();

            match strategy.plan(&candidates, &self.config) {
                Some(generations) if generations.len() >= 2 => {
                    let inputs: Vec<Arc<DiskTable>> = candidates
                        .iter()
                        .filter(|t| generations.contains(&t.generation()))
                        .cloned()
                        .collect();
                    for generation in &generations {
                        in_flight.insert(*generation);
                    }
                    (inputs, generations)
                }
                _ => {
                    debug!("compaction strategy found nothing to do");
                    return Ok(false);
                }
            }
        };

        let result = self.merge_with_retry(&inputs);

        {
            let mut in_flight = match self.in_flight.lock() {
                Ok(guard) => guard,
                Err(poisoned) => poisoned.into_inner(),
            };
            for generation in &claimed {
                in_flight.remove(generation);
            }
        }

        result.map(|_| true)
    }

    fn merge_with_retry(&self, inputs: &[Arc<DiskTable>]) -> Result<(), CompactionError> {
        let mut delay = COMPACTION_BACKOFF;
        let mut last_error: Option<CompactionError> = None;

        for attempt in 1..=COMPACTION_ATTEMPTS {
            match self.merge(inputs) {
                Ok(()) => return Ok(()),
                Err(e) => {
                    warn!(attempt, error = %e, "compaction attempt failed");
                    last_error = Some(e);
                    if attempt < COMPACTION_ATTEMPTS {
                        std::thread::sleep(delay);
                        delay = delay.saturating_mul(2);
                    }
                }
            }
        }

        error!("compaction failed persistently, database is now read-only");
        self.read_only.store(true, Ordering::Release);
        Err(last_error
            .unwrap_or_else(|| CompactionError::Internal("compaction failed without error".into())))
    }

    /// Merges `inputs` into one table at a fresh generation and swaps
    /// it into the registry.
    fn merge(&self, inputs: &[Arc<DiskTable>]) -> Result<(), CompactionError> {
        let retired: Vec<u64> = inputs.iter().map(|t| t.generation()).collect();
        let includes_oldest = retired.iter().min().copied() == self.tables.oldest_generation();
        let min_retained = self.snapshots.min_retained();
        let expected: u64 = inputs.iter().map(|t| t.tuple_count()).sum();

        let output_generation = self.next_generation.fetch_add(1, Ordering::SeqCst);
        let output_path = self.directory.join(format!("{output_generation}.table"));

        info!(
            inputs = ?retired,
            output_generation,
            min_retained,
            includes_oldest,
            "compaction merge starting"
        );

        let sources: Vec<TupleSource> = inputs
            .iter()
            .map(|t| Box::new(t.ascending_iter(None)) as TupleSource)
            .collect();
        let merged = MergeIterator::new(sources, Direction::Ascending);
        let filtered = RetentionFilter::new(merged, min_retained, includes_oldest);

        let mut builder = TableBuilder::new(
            &output_path,
            usize::try_from(expected).unwrap_or(usize::MAX),
            self.config.record_block_size,
            self.config.index_block_size,
            self.config.bloom_false_positive_rate,
        )?;

        let mut kept: u64 = 0;
        for result in filtered {
            let tuple = match result {
                Ok(tuple) => tuple,
                Err(e) => {
                    builder.abort();
                    return Err(e.into());
                }
            };
            if let Err(e) = builder.add(&tuple) {
                builder.abort();
                return Err(e.into());
            }
            kept += 1;
        }

        if kept == 0 {
            // Everything was collapsible: retire the inputs outright.
            builder.abort();
            self.tables.remove(&retired);
            info!(inputs = ?retired, "compaction eliminated all tuples");
            return Ok(());
        }

        let path = builder.finish()?;
        let output = Arc::new(DiskTable::open(&path, Arc::clone(&self.cache))?);

        self.tables.swap(&retired, output);

        info!(
            inputs = ?retired,
            output_generation,
            kept,
            dropped = expected.saturating_sub(kept),
            "compaction merge complete"
        );
        Ok(())
    }
}

/// The compaction retention filter.
///
/// Consumes an ascending merged stream — key bytes ascending, snapshot
/// descending within a key — and drops the versions no reader can still
/// observe. See the module docs for the exact rules.
pub struct RetentionFilter<I: Iterator<Item = TupleResult>> {
    input: I,
    min_retained: u64,
    includes_oldest: bool,
    /// Key bytes of the version group in progress.
    group_bytes: Option<Vec<u8>>,
    /// A kept newer version already satisfies every retained snapshot;
    /// everything older in this group is shadowed.
    group_shadowed: bool,
}

impl<I: Iterator<Item = TupleResult>> RetentionFilter<I> {
    pub fn new(input: I, min_retained: u64, includes_oldest: bool) -> Self {
        Self {
            input,
            min_retained,
            includes_oldest,
            group_bytes: None,
            group_shadowed: false,
        }
    }
}

impl<I: Iterator<Item = TupleResult>> Iterator for RetentionFilter<I> {
    type Item = TupleResult;

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            let tuple = match self.input.next()? {
                Ok(tuple) => tuple,
                Err(e) => return Some(Err(e)),
            };

            let newest_of_group = self
                .group_bytes
                .as_deref()
                .is_none_or(|bytes| bytes != tuple.key.bytes());

            if newest_of_group {
                self.group_bytes = Some(tuple.key.bytes().to_vec());
                self.group_shadowed = false;

                // A dead-and-forgotten key: the tombstone is below every
                // retained snapshot and no deeper table can resurrect
                // the key, so the whole group vanishes.
                if tuple.value.is_tombstone()
                    && self.includes_oldest
                    && tuple.key.snapshot_id() < self.min_retained
                {
                    self.group_shadowed = true;
                    continue;
                }
            } else if self.group_shadowed {
                continue;
            }

            if tuple.key.snapshot_id() <= self.min_retained {
                self.group_shadowed = true;
            }
            return Some(Ok(tuple));
        }
    }
}
