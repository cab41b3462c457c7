//! Index blocks — routing tables over record blocks (or other index
//! blocks).
//!
//! Each [`IndexRecord`] names the **largest** key contained in its
//! child, so the child that may contain a search key is the leftmost
//! record whose start key is ≥ the search key. A search key past the
//! end of the block resolves to the last record: scans that run off the
//! end land on the final child and terminate there instead of erroring,
//! and point lookups that land on a non-matching child are rejected at
//! the record-block level.

use crate::encoding::{Decode, Encode, EncodingError};
use crate::tuple::Key;

const U32_SIZE: usize = size_of::<u32>();

/// Locates one child of an index block within the same table file.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct IndexRecord {
    /// The largest key contained in the child block or subtree.
    pub start_key: Key,

    /// Byte offset of the child within the table file.
    pub child_offset: u64,

    /// Size of the child's on-disk extent in bytes.
    pub child_size: u64,
}

impl IndexRecord {
    pub fn new(start_key: Key, child_offset: u64, child_size: u64) -> Self {
        Self {
            start_key,
            child_offset,
            child_size,
        }
    }

    fn encoded_size(&self) -> usize {
        self.start_key.encoded_size() + 8 + 8
    }
}

/// Wire format: `[u32 key_len][key bytes][u64 snapshot][u64 child_offset][u64 child_size]`.
impl Encode for IndexRecord {
    fn encode_to(&self, buf: &mut Vec<u8>) -> Result<(), EncodingError> {
        self.start_key.encode_to(buf)?;
        self.child_offset.encode_to(buf)?;
        self.child_size.encode_to(buf)?;
        Ok(())
    }
}

impl Decode for IndexRecord {
    fn decode_from(buf: &[u8]) -> Result<(Self, usize), EncodingError> {
        let mut off = 0;
        let (start_key, n) = Key::decode_from(&buf[off..])?;
        off += n;
        let (child_offset, n) = u64::decode_from(&buf[off..])?;
        off += n;
        let (child_size, n) = u64::decode_from(&buf[off..])?;
        off += n;
        Ok((
            Self {
                start_key,
                child_offset,
                child_size,
            },
            off,
        ))
    }
}

/// An immutable, sorted array of [`IndexRecord`]s.
///
/// Layout mirrors [`RecordBlock`](crate::block::RecordBlock):
/// `[u32 count][u32 offsets[count]][entries]` with offsets relative to
/// the entries region. Records are decoded eagerly — index blocks are
/// consulted on every lookup, and re-parsing entries per binary-search
/// probe would dominate the search itself.
pub struct IndexBlock {
    records: Vec<IndexRecord>,
}

impl IndexBlock {
    /// Number of child records. Never zero.
    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// In-memory footprint, used as the cache weight.
    pub fn size(&self) -> usize {
        self.records
            .iter()
            .map(|r| r.encoded_size() + U32_SIZE)
            .sum::<usize>()
            + U32_SIZE
    }

    pub fn record_at(&self, index: usize) -> &IndexRecord {
        &self.records[index]
    }

    pub fn last_record(&self) -> &IndexRecord {
        &self.records[self.records.len() - 1]
    }

    /// Position of the child that may contain `key`: the leftmost
    /// record with `start_key ≥ key`, or the last position when `key`
    /// is past the end of the block.
    pub fn child_index(&self, key: &Key) -> usize {
        let mut low = 0usize;
        let mut high = self.records.len();
        while low < high {
            let mid = low + (high - low) / 2;
            if self.records[mid].start_key < *key {
                low = mid + 1;
            } else {
                high = mid;
            }
        }
        low.min(self.records.len() - 1)
    }

    /// The child record that may contain `key` (past-end policy: the
    /// last record).
    pub fn get(&self, key: &Key) -> &IndexRecord {
        &self.records[self.child_index(key)]
    }

    /// Serialize the block: `[u32 count][u32 offsets][entries]`.
    pub fn encode(&self) -> Result<Vec<u8>, EncodingError> {
        let mut entries = Vec::new();
        let mut offsets = Vec::with_capacity(self.records.len());
        for record in &self.records {
            offsets.push(u32::try_from(entries.len()).map_err(|_| {
                EncodingError::LengthOverflow("index block exceeds u32 offsets".into())
            })?);
            record.encode_to(&mut entries)?;
        }

        let mut buf = Vec::with_capacity(U32_SIZE + offsets.len() * U32_SIZE + entries.len());
        u32::try_from(offsets.len())
            .map_err(|_| EncodingError::LengthOverflow("index record count exceeds u32".into()))?
            .encode_to(&mut buf)?;
        for offset in &offsets {
            offset.encode_to(&mut buf)?;
        }
        buf.extend_from_slice(&entries);
        Ok(buf)
    }

    /// Parse a block from its serialized form.
    pub fn decode(buf: &[u8]) -> Result<Self, EncodingError> {
        let (count, mut off) = u32::decode_from(buf)?;
        let count = count as usize;
        if count == 0 {
            return Err(EncodingError::Custom("index block with zero records".into()));
        }
        if count.saturating_mul(U32_SIZE) > buf.len().saturating_sub(off) {
            return Err(EncodingError::Custom(format!(
                "index record count {count} inconsistent with block of {} bytes",
                buf.len()
            )));
        }
        // The offsets table exists for random file access; decoding
        // walks the entries sequentially and only cross-checks it.
        let mut offsets = Vec::with_capacity(count);
        for _ in 0..count {
            let (offset, n) = u32::decode_from(&buf[off..])?;
            off += n;
            offsets.push(offset);
        }

        let entries = &buf[off..];
        let mut records = Vec::with_capacity(count);
        let mut cursor = 0usize;
        for expected in &offsets {
            if cursor != *expected as usize {
                return Err(EncodingError::Custom(format!(
                    "index offset table disagrees with entries: expected {expected}, at {cursor}"
                )));
            }
            let (record, n) = IndexRecord::decode_from(&entries[cursor..])?;
            cursor += n;
            records.push(record);
        }
        Ok(Self { records })
    }
}

/// Accumulates sorted [`IndexRecord`]s into an [`IndexBlock`].
pub struct IndexBlockBuilder {
    records: Vec<IndexRecord>,
    size: usize,
    block_size: usize,
}

impl IndexBlockBuilder {
    pub fn new(block_size: usize) -> Self {
        Self {
            records: Vec::new(),
            size: U32_SIZE,
            block_size,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// Current serialized size estimate.
    pub fn size(&self) -> usize {
        self.size
    }

    /// Whether adding `record` would push the block past its budget.
    pub fn is_full_for(&self, record: &IndexRecord) -> bool {
        !self.is_empty() && self.size + record.encoded_size() + U32_SIZE > self.block_size
    }

    /// Appends a record. Input must arrive in strictly increasing
    /// start-key order.
    pub fn add(&mut self, record: IndexRecord) {
        if let Some(last) = self.records.last() {
            assert!(
                last.start_key < record.start_key,
                "index block input out of order: {:?} then {:?}",
                last.start_key,
                record.start_key
            );
        }
        self.size += record.encoded_size() + U32_SIZE;
        self.records.push(record);
    }

    /// Finishes the block. At least one record must have been added.
    pub fn build(self) -> IndexBlock {
        assert!(!self.records.is_empty(), "index block must not be empty");
        IndexBlock {
            records: self.records,
        }
    }
}
