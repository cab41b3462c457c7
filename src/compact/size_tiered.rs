//! Size-tiered compaction strategy.
//!
//! Tables are grouped into buckets of similar file size: tables below
//! `min_table_bytes` share one "small" bucket, and the rest join a
//! bucket when their size falls within `[avg × bucket_low,
//! avg × bucket_high]` of the bucket's running average. The fullest
//! bucket holding at least `min_compaction_tables` tables is merged,
//! capped at `max_compaction_tables` inputs per round.

use std::sync::Arc;

use tracing::debug;

use crate::compact::CompactionStrategy;
use crate::db::Config;
use crate::table::DiskTable;

/// The size-tiered policy.
pub struct SizeTieredCompaction;

impl CompactionStrategy for SizeTieredCompaction {
    fn plan(&self, tables: &[Arc<DiskTable>], config: &Config) -> Option<Vec<u64>> {
        let buckets = bucket_tables(tables, config);
        let selected = select_bucket(&buckets, config)?;
        let generations: Vec<u64> = selected
            .iter()
            .map(|&index| tables[index].generation())
            .collect();
        debug!(
            buckets = buckets.len(),
            selected = generations.len(),
            "size-tiered plan"
        );
        Some(generations)
    }
}

/// Groups tables into size buckets.
///
/// Returns bucket members as indices into `tables`.
pub fn bucket_tables(tables: &[Arc<DiskTable>], config: &Config) -> Vec<Vec<usize>> {
    if tables.is_empty() {
        return Vec::new();
    }

    let mut indices: Vec<usize> = (0..tables.len()).collect();
    indices.sort_by_key(|&index| tables[index].file_size());

    let mut small_bucket: Vec<usize> = Vec::new();
    let mut regular: Vec<usize> = Vec::new();
    for &index in &indices {
        if tables[index].file_size() < config.min_table_bytes {
            small_bucket.push(index);
        } else {
            regular.push(index);
        }
    }

    let mut buckets: Vec<Vec<usize>> = Vec::new();
    if !small_bucket.is_empty() {
        buckets.push(small_bucket);
    }

    let mut current: Vec<usize> = Vec::new();
    let mut current_avg = 0.0f64;
    for &index in &regular {
        let size = tables[index].file_size() as f64;
        if current.is_empty() {
            current.push(index);
            current_avg = size;
            continue;
        }

        let low = current_avg * config.bucket_low;
        let high = current_avg * config.bucket_high;
        if size >= low && size <= high {
            current.push(index);
            let total: f64 = current.iter().map(|&i| tables[i].file_size() as f64).sum();
            current_avg = total / current.len() as f64;
        } else {
            buckets.push(std::mem::take(&mut current));
            current.push(index);
            current_avg = size;
        }
    }
    if !current.is_empty() {
        buckets.push(current);
    }

    buckets
}

/// Picks the fullest bucket meeting `min_compaction_tables`, capped at
/// `max_compaction_tables` members.
pub fn select_bucket(buckets: &[Vec<usize>], config: &Config) -> Option<Vec<usize>> {
    let mut best: Option<&Vec<usize>> = None;
    for bucket in buckets {
        if bucket.len() >= config.min_compaction_tables
            && bucket.len() > best.map_or(0, |b| b.len())
        {
            best = Some(bucket);
        }
    }
    best.map(|bucket| {
        bucket
            .iter()
            .take(config.max_compaction_tables)
            .copied()
            .collect()
    })
}
