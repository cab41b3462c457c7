//! Streaming table construction.
//!
//! A [`TableBuilder`] consumes tuples in strictly increasing key order
//! and writes a complete table file: record blocks as they fill, leaf
//! index records as blocks flush, higher index levels as leaf blocks
//! fill, and finally — in `finish()` — the tail block, the index levels
//! bottom-up, the single root block, the bloom filter, and the footer.
//!
//! # Atomicity
//!
//! Everything is written to `<generation>.table.tmp`, fsynced, and
//! renamed onto the final path. A crash mid-build leaves only a `.tmp`
//! file, which startup recovery discards; a crash after the rename
//! leaves a complete, committed table. The footer is therefore the
//! commit record and the rename the commit point.

use std::fs::{File, OpenOptions, rename};
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};

use tracing::debug;

use crate::block::{IndexBlockBuilder, IndexRecord, RecordBlockBuilder};
use crate::encoding;
use crate::filter::TableFilter;
use crate::table::{FOOTER_SIZE, Footer, TABLE_MAGIC, TableError};
use crate::tuple::{Key, Tuple};

/// Builds one immutable table file from a sorted tuple stream.
pub struct TableBuilder {
    final_path: PathBuf,
    tmp_path: PathBuf,
    writer: BufWriter<File>,
    /// Bytes written so far — the offset of the next block.
    offset: u64,
    record_builder: RecordBlockBuilder,
    /// Index levels, leaf first. Levels appear as their first entry
    /// propagates up.
    index_levels: Vec<IndexBlockBuilder>,
    filter: TableFilter,
    record_block_size: usize,
    index_block_size: usize,
    tuple_count: u64,
    max_snapshot: u64,
    last_key: Option<Key>,
}

impl TableBuilder {
    /// Creates a builder targeting `path` (`<generation>.table`).
    ///
    /// `expected_tuples` sizes the bloom filter; overshooting costs
    /// bits, undershooting costs false positives.
    pub fn new(
        path: impl AsRef<Path>,
        expected_tuples: usize,
        record_block_size: usize,
        index_block_size: usize,
        false_positive_rate: f64,
    ) -> Result<Self, TableError> {
        let final_path = path.as_ref().to_path_buf();
        let tmp_path = final_path.with_extension("table.tmp");
        let file = OpenOptions::new()
            .create(true)
            .write(true)
            .truncate(true)
            .open(&tmp_path)?;

        let filter = TableFilter::new(expected_tuples, false_positive_rate)
            .map_err(TableError::Internal)?;

        Ok(Self {
            final_path,
            tmp_path,
            writer: BufWriter::new(file),
            offset: 0,
            record_builder: RecordBlockBuilder::new(record_block_size),
            index_levels: Vec::new(),
            filter,
            record_block_size,
            index_block_size,
            tuple_count: 0,
            max_snapshot: 0,
            last_key: None,
        })
    }

    /// Appends one tuple. Input must arrive in strictly increasing key
    /// order; equal key bytes at distinct snapshots are distinct keys.
    pub fn add(&mut self, tuple: &Tuple) -> Result<(), TableError> {
        if let Some(last) = &self.last_key {
            if *last >= tuple.key {
                return Err(TableError::Internal(format!(
                    "table input out of order: {:?} then {:?}",
                    last, tuple.key
                )));
            }
        }
        self.last_key = Some(tuple.key.clone());

        self.filter.add(tuple.key.bytes());

        if !self.record_builder.add(tuple)? {
            self.flush_record_block()?;
            if !self.record_builder.add(tuple)? {
                return Err(TableError::Internal(
                    "fresh record block rejected a tuple".into(),
                ));
            }
        }
        self.tuple_count += 1;
        self.max_snapshot = self.max_snapshot.max(tuple.key.snapshot_id());
        Ok(())
    }

    /// Tuples appended so far.
    pub fn tuple_count(&self) -> u64 {
        self.tuple_count
    }

    /// Closes the table: tail record block, index levels bottom-up,
    /// root, filter, footer, fsync, rename.
    pub fn finish(mut self) -> Result<PathBuf, TableError> {
        if !self.record_builder.is_empty() {
            self.flush_record_block()?;
        }
        if self.index_levels.is_empty() {
            return Err(TableError::Internal("cannot build an empty table".into()));
        }

        // Close every level below the top, propagating each tail block
        // upward. Cascading overflow can create new levels; the `while`
        // re-reads the length. The top level never overflowed (an
        // overflow would have created a parent), so its single pending
        // block becomes the root.
        let mut level = 0;
        while level + 1 < self.index_levels.len() {
            self.flush_index_level(level)?;
            level += 1;
        }

        let root_builder = match self.index_levels.pop() {
            Some(builder) => builder,
            None => return Err(TableError::Internal("index levels vanished".into())),
        };
        let root_block = root_builder.build();
        let (root_offset, root_size) = self.write_block(&root_block.encode()?)?;

        // Filter region payload: the table's max snapshot id, then the
        // bloom bytes.
        let mut filter_payload = Vec::new();
        encoding::Encode::encode_to(&self.max_snapshot, &mut filter_payload)?;
        filter_payload.extend_from_slice(&self.filter.encode());
        let (filter_offset, filter_size) = self.write_block(&filter_payload)?;

        let footer = Footer {
            root_index_offset: root_offset,
            root_index_size: root_size,
            filter_offset,
            filter_size,
            tuple_count: self.tuple_count,
            magic: TABLE_MAGIC,
        };
        let footer_bytes = encoding::encode_to_vec(&footer)?;
        debug_assert_eq!(footer_bytes.len(), FOOTER_SIZE);
        self.writer.write_all(&footer_bytes)?;

        self.writer.flush()?;
        self.writer.get_ref().sync_all()?;

        rename(&self.tmp_path, &self.final_path)?;
        sync_parent_dir(&self.final_path)?;

        debug!(
            path = %self.final_path.display(),
            tuples = self.tuple_count,
            root_offset,
            "table committed"
        );
        Ok(self.final_path.clone())
    }

    /// Abandons the build, removing the temporary file.
    pub fn abort(self) {
        let _ = std::fs::remove_file(&self.tmp_path);
    }

    /// Flushes the current record block and records it in the leaf
    /// index level.
    fn flush_record_block(&mut self) -> Result<(), TableError> {
        let builder = std::mem::replace(
            &mut self.record_builder,
            RecordBlockBuilder::new(self.record_block_size),
        );
        let block = builder.build();
        let last_key = block.last_key()?;
        let (offset, size) = self.write_block(&block.encode()?)?;
        self.push_index_record(0, IndexRecord::new(last_key, offset, size))
    }

    /// Adds an index record at `level`, flushing the level first when
    /// full. Flushing propagates a summary record to `level + 1`,
    /// recursively.
    fn push_index_record(&mut self, level: usize, record: IndexRecord) -> Result<(), TableError> {
        if self.index_levels.len() == level {
            self.index_levels
                .push(IndexBlockBuilder::new(self.index_block_size));
        }
        if self.index_levels[level].is_full_for(&record) {
            self.flush_index_level(level)?;
        }
        self.index_levels[level].add(record);
        Ok(())
    }

    /// Flushes the pending block at `level` and records it one level
    /// up. The block's start key — the largest key it covers — becomes
    /// the parent record's start key.
    fn flush_index_level(&mut self, level: usize) -> Result<(), TableError> {
        let builder = std::mem::replace(
            &mut self.index_levels[level],
            IndexBlockBuilder::new(self.index_block_size),
        );
        let block = builder.build();
        let start_key = block.last_record().start_key.clone();
        let (offset, size) = self.write_block(&block.encode()?)?;
        self.push_index_record(level + 1, IndexRecord::new(start_key, offset, size))
    }

    /// Writes `[u32 len][payload][u32 crc32]`, returning the extent's
    /// (offset, total size).
    fn write_block(&mut self, payload: &[u8]) -> Result<(u64, u64), TableError> {
        let offset = self.offset;
        let len = u32::try_from(payload.len())
            .map_err(|_| TableError::Internal("block payload exceeds u32 length".into()))?;
        let checksum = crc32fast::hash(payload);

        self.writer.write_all(&len.to_le_bytes())?;
        self.writer.write_all(payload)?;
        self.writer.write_all(&checksum.to_le_bytes())?;

        let total = 4 + payload.len() as u64 + 4;
        self.offset += total;
        Ok((offset, total))
    }
}

/// Fsyncs the directory containing `path` so the rename itself is
/// durable.
fn sync_parent_dir(path: &Path) -> Result<(), TableError> {
    if let Some(parent) = path.parent() {
        File::open(parent)?.sync_all()?;
    }
    Ok(())
}
