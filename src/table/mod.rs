//! Immutable on-disk tables.
//!
//! A disk table is a single `<generation>.table` file holding sorted
//! tuples behind a tree of index blocks and a bloom filter:
//!
//! ```text
//! [ record block 0 ]
//! [ record block 1 ]
//! ...
//! [ leaf index blocks ]        one record per record block
//! [ internal index blocks … ]  optional higher levels
//! [ root index block ]         exactly one
//! [ bloom filter bytes ]
//! [ footer ]                   44 bytes, fixed
//! ```
//!
//! Record block 0 starts at file offset 0. Every block is wrapped as
//! `[u32 len][payload][u32 crc32]`; the footer is raw:
//! `u64 root_index_offset | u64 root_index_size | u64 filter_offset |
//! u64 filter_size | u64 tuple_count | u32 magic`. Openers seek to
//! `file_size - 44` first, so the footer doubles as the commit marker —
//! a file without a valid footer was never finished.
//!
//! The filter region's payload is `[u64 max_snapshot][bloom bytes]`:
//! the table's highest snapshot id rides ahead of the filter proper.
//! Startup recovery uses it to restore the snapshot counter above
//! anything on disk, and point lookups use it to stop probing tables
//! that cannot hold a newer version than the best match so far.
//!
//! # Reading
//!
//! The root index stays resident for the table's lifetime; every other
//! block loads through the shared byte-weighted cache. A point lookup
//! consults the bloom filter, descends the index tree, and binary
//! searches one record block. Scans walk the leaf index level through a
//! cursor, streaming record blocks in either direction.
//!
//! # Lifecycle
//!
//! Tables are immutable and reference counted. Compaction marks its
//! inputs obsolete; the backing file is unlinked only when the last
//! reference (including any open iterator) drops.

#[cfg(test)]
pub(crate) mod tests;

pub mod builder;

pub use builder::TableBuilder;

use std::fs::File;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use thiserror::Error;
use tracing::{debug, trace, warn};

use crate::block::{IndexBlock, IndexRecord, RecordBlock};
use crate::cache::BlockCache;
use crate::encoding::{Decode, Encode, EncodingError};
use crate::filter::TableFilter;
use crate::tuple::{Key, Tuple};

/// Footer magic: `b"HFTB"` read as little-endian u32.
pub const TABLE_MAGIC: u32 = u32::from_le_bytes(*b"HFTB");

/// Fixed footer size: five `u64` fields plus the `u32` magic.
pub const FOOTER_SIZE: usize = 5 * 8 + 4;

const BLOCK_LEN_SIZE: usize = 4;
const BLOCK_CRC_SIZE: usize = 4;

/// Overhead added to a payload by the checksummed block wrapper.
pub(crate) const BLOCK_WRAPPER_SIZE: usize = BLOCK_LEN_SIZE + BLOCK_CRC_SIZE;

/// Errors returned by table operations.
#[derive(Debug, Error)]
pub enum TableError {
    /// Underlying I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// Encoding / decoding error.
    #[error("encoding error: {0}")]
    Encoding(#[from] EncodingError),

    /// Footer magic mismatch, CRC failure, or out-of-bounds structure.
    #[error("corrupt table: {0}")]
    Corrupt(String),

    /// Internal invariant violation.
    #[error("internal error: {0}")]
    Internal(String),
}

impl TableError {
    /// Rebuilds an owned error from the shared error a coalesced cache
    /// load hands every waiter.
    pub(crate) fn from_shared(shared: Arc<TableError>) -> TableError {
        match &*shared {
            TableError::Io(e) => TableError::Io(io::Error::new(e.kind(), e.to_string())),
            TableError::Encoding(e) => TableError::Corrupt(e.to_string()),
            TableError::Corrupt(msg) => TableError::Corrupt(msg.clone()),
            TableError::Internal(msg) => TableError::Internal(msg.clone()),
        }
    }
}

/// Parses the generation id from a `<generation>.table` file name.
pub fn parse_generation(path: &Path) -> Option<u64> {
    if path.extension()?.to_str()? != "table" {
        return None;
    }
    path.file_stem()?.to_str()?.parse::<u64>().ok()
}

/// The fixed trailing footer of every table file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct Footer {
    pub(crate) root_index_offset: u64,
    pub(crate) root_index_size: u64,
    pub(crate) filter_offset: u64,
    pub(crate) filter_size: u64,
    pub(crate) tuple_count: u64,
    pub(crate) magic: u32,
}

impl Encode for Footer {
    fn encode_to(&self, buf: &mut Vec<u8>) -> Result<(), EncodingError> {
        self.root_index_offset.encode_to(buf)?;
        self.root_index_size.encode_to(buf)?;
        self.filter_offset.encode_to(buf)?;
        self.filter_size.encode_to(buf)?;
        self.tuple_count.encode_to(buf)?;
        self.magic.encode_to(buf)?;
        Ok(())
    }
}

impl Decode for Footer {
    fn decode_from(buf: &[u8]) -> Result<(Self, usize), EncodingError> {
        let mut off = 0;
        let (root_index_offset, n) = u64::decode_from(&buf[off..])?;
        off += n;
        let (root_index_size, n) = u64::decode_from(&buf[off..])?;
        off += n;
        let (filter_offset, n) = u64::decode_from(&buf[off..])?;
        off += n;
        let (filter_size, n) = u64::decode_from(&buf[off..])?;
        off += n;
        let (tuple_count, n) = u64::decode_from(&buf[off..])?;
        off += n;
        let (magic, n) = u32::decode_from(&buf[off..])?;
        off += n;
        Ok((
            Self {
                root_index_offset,
                root_index_size,
                filter_offset,
                filter_size,
                tuple_count,
                magic,
            },
            off,
        ))
    }
}

/// Reads `size` bytes at `offset` with a positional read.
fn read_extent(file: &File, offset: u64, size: u64) -> Result<Vec<u8>, TableError> {
    use std::os::unix::fs::FileExt;
    let size = usize::try_from(size)
        .map_err(|_| TableError::Corrupt("extent size exceeds addressable range".into()))?;
    let mut buf = vec![0u8; size];
    file.read_exact_at(&mut buf, offset)?;
    Ok(buf)
}

/// Unwraps a `[u32 len][payload][u32 crc32]` extent, verifying both the
/// framing and the checksum.
fn unwrap_checksummed(extent: &[u8]) -> Result<&[u8], TableError> {
    if extent.len() < BLOCK_WRAPPER_SIZE {
        return Err(TableError::Corrupt(format!(
            "block extent of {} bytes is shorter than its framing",
            extent.len()
        )));
    }
    let len_bytes: [u8; BLOCK_LEN_SIZE] = extent[..BLOCK_LEN_SIZE]
        .try_into()
        .map_err(|_| TableError::Corrupt("short block length".into()))?;
    let payload_len = u32::from_le_bytes(len_bytes) as usize;
    if BLOCK_LEN_SIZE + payload_len + BLOCK_CRC_SIZE != extent.len() {
        return Err(TableError::Corrupt(format!(
            "block framing disagrees: payload {} in extent {}",
            payload_len,
            extent.len()
        )));
    }
    let payload = &extent[BLOCK_LEN_SIZE..BLOCK_LEN_SIZE + payload_len];
    let crc_bytes: [u8; BLOCK_CRC_SIZE] = extent[BLOCK_LEN_SIZE + payload_len..]
        .try_into()
        .map_err(|_| TableError::Corrupt("short block checksum".into()))?;
    let stored = u32::from_le_bytes(crc_bytes);
    if crc32fast::hash(payload) != stored {
        return Err(TableError::Corrupt("block checksum mismatch".into()));
    }
    Ok(payload)
}

/// An immutable, sorted table file.
pub struct DiskTable {
    generation: u64,
    file: File,
    path: PathBuf,
    file_size: u64,
    footer: Footer,
    root_index: Arc<IndexBlock>,
    /// `None` when the stored filter bytes failed to parse — lookups
    /// then degrade to "maybe present".
    filter: Option<TableFilter>,
    /// Highest snapshot id of any tuple in the table.
    max_snapshot: u64,
    /// Index levels between root and record blocks, root included.
    index_height: usize,
    cache: Arc<BlockCache>,
    obsolete: AtomicBool,
}

impl DiskTable {
    /// Opens and validates the table at `path`.
    ///
    /// Reads the footer, checks the magic and commit criteria, loads
    /// the root index (resident from here on) and the bloom filter, and
    /// discovers the index tree height by walking the leftmost path
    /// until it reaches record block 0 at file offset 0.
    pub fn open(path: impl AsRef<Path>, cache: Arc<BlockCache>) -> Result<Self, TableError> {
        let path = path.as_ref();
        let generation = parse_generation(path)
            .ok_or_else(|| TableError::Internal(format!("bad table name: {}", path.display())))?;

        let file = File::open(path)?;
        let file_size = file.metadata()?.len();
        if file_size < FOOTER_SIZE as u64 {
            return Err(TableError::Corrupt(format!(
                "file of {file_size} bytes cannot hold a footer"
            )));
        }

        let footer_bytes = read_extent(&file, file_size - FOOTER_SIZE as u64, FOOTER_SIZE as u64)?;
        let (footer, _) = Footer::decode_from(&footer_bytes)?;

        if footer.magic != TABLE_MAGIC {
            return Err(TableError::Corrupt(format!(
                "footer magic {:08x}, expected {TABLE_MAGIC:08x}",
                footer.magic
            )));
        }
        let committed_size = footer
            .root_index_offset
            .saturating_add(footer.root_index_size)
            .saturating_add(footer.filter_size)
            .saturating_add(FOOTER_SIZE as u64);
        if file_size < committed_size {
            return Err(TableError::Corrupt(format!(
                "file of {file_size} bytes shorter than committed extent {committed_size}"
            )));
        }

        let root_extent = read_extent(&file, footer.root_index_offset, footer.root_index_size)?;
        let root_index = Arc::new(IndexBlock::decode(unwrap_checksummed(&root_extent)?)?);

        let filter_extent = read_extent(&file, footer.filter_offset, footer.filter_size)?;
        let filter_payload = unwrap_checksummed(&filter_extent)?;
        if filter_payload.len() < 8 {
            return Err(TableError::Corrupt(
                "filter region too short for max snapshot".into(),
            ));
        }
        let (max_snapshot, _) = u64::decode_from(&filter_payload[..8])?;
        let filter = TableFilter::decode(&filter_payload[8..]);
        if filter.is_none() {
            warn!(generation, "table filter unreadable, lookups degrade to maybe");
        }

        let mut table = Self {
            generation,
            file,
            path: path.to_path_buf(),
            file_size,
            footer,
            root_index,
            filter,
            max_snapshot,
            index_height: 1,
            cache,
            obsolete: AtomicBool::new(false),
        };
        table.index_height = table.discover_height()?;

        debug!(
            generation,
            file_size,
            tuples = table.footer.tuple_count,
            height = table.index_height,
            "table opened"
        );
        Ok(table)
    }

    /// Walks the leftmost index path counting levels until the first
    /// child at file offset 0 — record block 0 — is referenced.
    fn discover_height(&self) -> Result<usize, TableError> {
        let mut height = 1usize;
        let mut block = Arc::clone(&self.root_index);
        loop {
            let first = block.record_at(0).clone();
            if first.child_offset == 0 {
                return Ok(height);
            }
            if height > 64 {
                return Err(TableError::Corrupt("index tree impossibly deep".into()));
            }
            block = self.load_index_block(&first)?;
            height += 1;
        }
    }

    pub fn generation(&self) -> u64 {
        self.generation
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn file_size(&self) -> u64 {
        self.file_size
    }

    pub fn tuple_count(&self) -> u64 {
        self.footer.tuple_count
    }

    /// Highest snapshot id of any tuple in this table.
    pub fn max_snapshot(&self) -> u64 {
        self.max_snapshot
    }

    /// Whether the filter admits `key_bytes`. `false` is definitive;
    /// a missing filter admits everything.
    pub fn may_contain(&self, key_bytes: &[u8]) -> bool {
        match &self.filter {
            Some(filter) => filter.may_contain(key_bytes),
            None => true,
        }
    }

    /// Point lookup: newest version of `key_bytes` visible at
    /// `snapshot_id`, if this table holds one.
    pub fn get(&self, key_bytes: &[u8], snapshot_id: u64) -> Result<Option<Tuple>, TableError> {
        if !self.may_contain(key_bytes) {
            trace!(generation = self.generation, "filter excluded key");
            return Ok(None);
        }

        let key = Key::new(key_bytes, snapshot_id);
        let leaf_record = self.find_leaf_record(&key)?;
        let block = self.load_record_block(&leaf_record)?;
        block.get(&key).map_err(TableError::from)
    }

    /// Descends the index tree to the leaf index record for `key`.
    fn find_leaf_record(&self, key: &Key) -> Result<IndexRecord, TableError> {
        let mut block = Arc::clone(&self.root_index);
        for _ in 1..self.index_height {
            let child = block.get(key).clone();
            block = self.load_index_block(&child)?;
        }
        Ok(block.get(key).clone())
    }

    fn load_index_block(&self, record: &IndexRecord) -> Result<Arc<IndexBlock>, TableError> {
        let address = (self.generation, record.child_offset);
        let offset = record.child_offset;
        let size = record.child_size;
        self.cache
            .index_block(address, || {
                let extent = read_extent(&self.file, offset, size)?;
                Ok(Arc::new(IndexBlock::decode(unwrap_checksummed(&extent)?)?))
            })
            .map_err(TableError::from_shared)
    }

    fn load_record_block(&self, record: &IndexRecord) -> Result<Arc<RecordBlock>, TableError> {
        let address = (self.generation, record.child_offset);
        let offset = record.child_offset;
        let size = record.child_size;
        self.cache
            .record_block(address, || {
                let extent = read_extent(&self.file, offset, size)?;
                Ok(Arc::new(RecordBlock::decode(unwrap_checksummed(
                    &extent,
                )?)?))
            })
            .map_err(TableError::from_shared)
    }

    /// Ascending iterator over all tuples with key ≥ `start` (or the
    /// whole table for `None`).
    pub fn ascending_iter(self: &Arc<Self>, start: Option<Key>) -> DiskTableIter {
        DiskTableIter::new(Arc::clone(self), start, Direction::Ascending)
    }

    /// Descending iterator over all tuples with key ≤ `start` (or the
    /// whole table reversed for `None`).
    pub fn descending_iter(self: &Arc<Self>, start: Option<Key>) -> DiskTableIter {
        DiskTableIter::new(Arc::clone(self), start, Direction::Descending)
    }

    /// Marks the backing file for deletion once the last reference to
    /// this table drops.
    pub fn mark_obsolete(&self) {
        self.obsolete.store(true, Ordering::Release);
    }
}

impl Drop for DiskTable {
    fn drop(&mut self) {
        if self.obsolete.load(Ordering::Acquire) {
            self.cache.evict_generation(self.generation);
            if let Err(e) = std::fs::remove_file(&self.path) {
                warn!(
                    generation = self.generation,
                    path = %self.path.display(),
                    error = %e,
                    "failed to unlink obsolete table"
                );
            } else {
                debug!(generation = self.generation, "obsolete table unlinked");
            }
        }
    }
}

impl std::fmt::Debug for DiskTable {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DiskTable")
            .field("generation", &self.generation)
            .field("tuples", &self.footer.tuple_count)
            .field("height", &self.index_height)
            .finish()
    }
}

#[derive(Clone, Copy, PartialEq, Eq)]
enum Direction {
    Ascending,
    Descending,
}

/// A cursor over the leaf level of a table's index tree.
///
/// Holds the path from root to one leaf index position. Advancing past
/// the end of a leaf block pops to the parent, steps it, and descends
/// to the first (or last) position of the next subtree.
struct IndexCursor {
    /// (block, position) pairs from root down to the leaf level.
    stack: Vec<(Arc<IndexBlock>, usize)>,
}

impl IndexCursor {
    /// Positions the cursor at the leaf record routing `key`, or at the
    /// first/last leaf record when `key` is `None`.
    fn seek(table: &DiskTable, key: Option<&Key>, direction: Direction) -> Result<Self, TableError> {
        let mut stack = Vec::with_capacity(table.index_height);
        let mut block = Arc::clone(&table.root_index);
        loop {
            let position = match key {
                Some(k) => block.child_index(k),
                None => match direction {
                    Direction::Ascending => 0,
                    Direction::Descending => block.len() - 1,
                },
            };
            let at_leaf = stack.len() + 1 == table.index_height;
            stack.push((Arc::clone(&block), position));
            if at_leaf {
                return Ok(Self { stack });
            }
            let child = block.record_at(position).clone();
            block = table.load_index_block(&child)?;
        }
    }

    /// The leaf index record under the cursor.
    fn current(&self) -> Option<IndexRecord> {
        let (block, position) = self.stack.last()?;
        Some(block.record_at(*position).clone())
    }

    /// Steps to the next leaf record. Returns `false` at the end of the
    /// table.
    fn advance(&mut self, table: &DiskTable) -> Result<bool, TableError> {
        let mut level = self.stack.len();
        loop {
            if level == 0 {
                self.stack.clear();
                return Ok(false);
            }
            level -= 1;
            let (block, position) = &mut self.stack[level];
            if *position + 1 < block.len() {
                *position += 1;
                break;
            }
        }
        self.descend_from(table, level, Direction::Ascending)?;
        Ok(true)
    }

    /// Steps to the previous leaf record. Returns `false` at the start
    /// of the table.
    fn retreat(&mut self, table: &DiskTable) -> Result<bool, TableError> {
        let mut level = self.stack.len();
        loop {
            if level == 0 {
                self.stack.clear();
                return Ok(false);
            }
            level -= 1;
            let (_, position) = &mut self.stack[level];
            if *position > 0 {
                *position -= 1;
                break;
            }
        }
        self.descend_from(table, level, Direction::Descending)?;
        Ok(true)
    }

    /// Rebuilds the stack below `level` following first-child (or
    /// last-child) pointers.
    fn descend_from(
        &mut self,
        table: &DiskTable,
        level: usize,
        direction: Direction,
    ) -> Result<(), TableError> {
        self.stack.truncate(level + 1);
        while self.stack.len() < table.index_height {
            let (block, position) = match self.stack.last() {
                Some(top) => top,
                None => return Err(TableError::Internal("cursor stack underflow".into())),
            };
            let child = block.record_at(*position).clone();
            let child_block = table.load_index_block(&child)?;
            let position = match direction {
                Direction::Ascending => 0,
                Direction::Descending => child_block.len() - 1,
            };
            self.stack.push((child_block, position));
        }
        Ok(())
    }
}

/// Streaming iterator over a disk table's tuples.
///
/// Owns a reference to the table, so the backing file outlives the
/// iteration even if the table is swapped out of the registry and
/// marked obsolete mid-scan.
pub struct DiskTableIter {
    table: Arc<DiskTable>,
    direction: Direction,
    start: Option<Key>,
    cursor: Option<IndexCursor>,
    block: Option<Arc<RecordBlock>>,
    /// Position of the next tuple within `block`.
    position: usize,
    initialized: bool,
    done: bool,
}

impl DiskTableIter {
    fn new(table: Arc<DiskTable>, start: Option<Key>, direction: Direction) -> Self {
        Self {
            table,
            direction,
            start,
            cursor: None,
            block: None,
            position: 0,
            initialized: false,
            done: false,
        }
    }

    fn initialize(&mut self) -> Result<(), TableError> {
        self.initialized = true;
        let mut cursor = IndexCursor::seek(&self.table, self.start.as_ref(), self.direction)?;

        let leaf = match cursor.current() {
            Some(leaf) => leaf,
            None => {
                self.done = true;
                return Ok(());
            }
        };
        let block = self.table.load_record_block(&leaf)?;

        let position = match (&self.start, self.direction) {
            (None, Direction::Ascending) => Some(0),
            (None, Direction::Descending) => Some(block.len() - 1),
            (Some(key), Direction::Ascending) => block.ceiling_index(key)?,
            (Some(key), Direction::Descending) => block.floor_index(key)?,
        };

        match position {
            Some(position) => {
                self.block = Some(block);
                self.position = position;
                self.cursor = Some(cursor);
            }
            None => match self.direction {
                // Start key beyond this block: for an ascending scan
                // that means beyond the whole table (the index routed
                // us to the block with the largest last key ≥ start).
                Direction::Ascending => {
                    self.done = true;
                }
                // For a descending scan the predecessor lives in the
                // previous block, if any.
                Direction::Descending => {
                    if cursor.retreat(&self.table)? {
                        let leaf = cursor
                            .current()
                            .ok_or_else(|| TableError::Internal("cursor lost leaf".into()))?;
                        let block = self.table.load_record_block(&leaf)?;
                        self.position = block.len() - 1;
                        self.block = Some(block);
                        self.cursor = Some(cursor);
                    } else {
                        self.done = true;
                    }
                }
            },
        }
        Ok(())
    }

    fn step(&mut self) -> Result<Option<Tuple>, TableError> {
        if !self.initialized {
            self.initialize()?;
        }
        if self.done {
            return Ok(None);
        }

        let block = match &self.block {
            Some(block) => Arc::clone(block),
            None => {
                self.done = true;
                return Ok(None);
            }
        };
        let tuple = block.tuple_at(self.position)?;

        // Advance to the next position, crossing block boundaries
        // through the index cursor.
        match self.direction {
            Direction::Ascending => {
                if self.position + 1 < block.len() {
                    self.position += 1;
                } else {
                    self.load_adjacent_block(Direction::Ascending)?;
                }
            }
            Direction::Descending => {
                if self.position > 0 {
                    self.position -= 1;
                } else {
                    self.load_adjacent_block(Direction::Descending)?;
                }
            }
        }

        Ok(Some(tuple))
    }

    fn load_adjacent_block(&mut self, direction: Direction) -> Result<(), TableError> {
        let cursor = match &mut self.cursor {
            Some(cursor) => cursor,
            None => {
                self.done = true;
                return Ok(());
            }
        };
        let moved = match direction {
            Direction::Ascending => cursor.advance(&self.table)?,
            Direction::Descending => cursor.retreat(&self.table)?,
        };
        if !moved {
            self.done = true;
            self.block = None;
            return Ok(());
        }
        let leaf = cursor
            .current()
            .ok_or_else(|| TableError::Internal("cursor lost leaf".into()))?;
        let block = self.table.load_record_block(&leaf)?;
        self.position = match direction {
            Direction::Ascending => 0,
            Direction::Descending => block.len() - 1,
        };
        self.block = Some(block);
        Ok(())
    }
}

impl Iterator for DiskTableIter {
    type Item = Result<Tuple, TableError>;

    fn next(&mut self) -> Option<Self::Item> {
        match self.step() {
            Ok(Some(tuple)) => Some(Ok(tuple)),
            Ok(None) => None,
            Err(e) => {
                self.done = true;
                Some(Err(e))
            }
        }
    }
}
