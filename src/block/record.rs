//! Record blocks — sorted runs of tuples with O(log n) point lookup.

use crate::encoding::{Decode, Encode, EncodingError};
use crate::tuple::{Key, Tuple};

const U32_SIZE: usize = size_of::<u32>();

/// An immutable, sorted block of tuples.
///
/// Layout: `[u32 count][u32 offsets[count]][entries]`, where each offset
/// is relative to the start of the entries region and each entry is an
/// encoded [`Tuple`]. The offsets table makes entry access O(1), which
/// in turn makes lookup a classic binary search.
pub struct RecordBlock {
    offsets: Vec<u32>,
    entries: Vec<u8>,
}

impl RecordBlock {
    /// Number of tuples in the block. Never zero.
    pub fn len(&self) -> usize {
        self.offsets.len()
    }

    pub fn is_empty(&self) -> bool {
        self.offsets.is_empty()
    }

    /// In-memory footprint, used as the cache weight.
    pub fn size(&self) -> usize {
        self.entries.len() + self.offsets.len() * U32_SIZE
    }

    /// Decode the tuple at position `index`.
    ///
    /// The offsets table is trusted only as far as the entries region;
    /// a corrupted offset surfaces as an [`EncodingError`].
    pub fn tuple_at(&self, index: usize) -> Result<Tuple, EncodingError> {
        let start = self.offsets[index] as usize;
        if start > self.entries.len() {
            return Err(EncodingError::Custom(format!(
                "record offset {start} beyond entries region ({})",
                self.entries.len()
            )));
        }
        let (tuple, _) = Tuple::decode_from(&self.entries[start..])?;
        Ok(tuple)
    }

    fn key_at(&self, index: usize) -> Result<Key, EncodingError> {
        let start = self.offsets[index] as usize;
        if start > self.entries.len() {
            return Err(EncodingError::Custom(format!(
                "record offset {start} beyond entries region ({})",
                self.entries.len()
            )));
        }
        let (key, _) = Key::decode_from(&self.entries[start..])?;
        Ok(key)
    }

    /// Index of the first tuple whose key is ≥ `key`, or `None` when
    /// every tuple in the block is smaller.
    pub fn ceiling_index(&self, key: &Key) -> Result<Option<usize>, EncodingError> {
        let mut low = 0usize;
        let mut high = self.len();
        while low < high {
            let mid = low + (high - low) / 2;
            if self.key_at(mid)? < *key {
                low = mid + 1;
            } else {
                high = mid;
            }
        }
        Ok((low < self.len()).then_some(low))
    }

    /// Index of the last tuple whose key is ≤ `key`, or `None` when
    /// every tuple in the block is greater.
    pub fn floor_index(&self, key: &Key) -> Result<Option<usize>, EncodingError> {
        let mut low = 0usize;
        let mut high = self.len();
        while low < high {
            let mid = low + (high - low) / 2;
            if self.key_at(mid)? <= *key {
                low = mid + 1;
            } else {
                high = mid;
            }
        }
        Ok(low.checked_sub(1))
    }

    /// Point lookup: the first tuple whose key is ≥ `key`, provided its
    /// key bytes match exactly.
    ///
    /// Under the inverted comparator the ceiling of `(bytes, s)` within
    /// a matching byte group is precisely the newest version with
    /// snapshot ≤ `s`. A ceiling landing on different bytes means no
    /// version of the key is visible here.
    pub fn get(&self, key: &Key) -> Result<Option<Tuple>, EncodingError> {
        match self.ceiling_index(key)? {
            Some(index) => {
                let tuple = self.tuple_at(index)?;
                if tuple.key.bytes() == key.bytes() {
                    Ok(Some(tuple))
                } else {
                    Ok(None)
                }
            }
            None => Ok(None),
        }
    }

    pub fn first_key(&self) -> Result<Key, EncodingError> {
        self.key_at(0)
    }

    pub fn last_key(&self) -> Result<Key, EncodingError> {
        self.key_at(self.len() - 1)
    }

    /// Serialize the block: `[u32 count][u32 offsets][entries]`.
    pub fn encode(&self) -> Result<Vec<u8>, EncodingError> {
        let mut buf =
            Vec::with_capacity(U32_SIZE + self.offsets.len() * U32_SIZE + self.entries.len());
        u32::try_from(self.offsets.len())
            .map_err(|_| EncodingError::LengthOverflow("record count exceeds u32".into()))?
            .encode_to(&mut buf)?;
        for offset in &self.offsets {
            offset.encode_to(&mut buf)?;
        }
        buf.extend_from_slice(&self.entries);
        Ok(buf)
    }

    /// Parse a block from its serialized form.
    pub fn decode(buf: &[u8]) -> Result<Self, EncodingError> {
        let (count, mut off) = u32::decode_from(buf)?;
        let count = count as usize;
        if count == 0 {
            return Err(EncodingError::Custom("record block with zero entries".into()));
        }
        if count.saturating_mul(U32_SIZE) > buf.len().saturating_sub(off) {
            return Err(EncodingError::Custom(format!(
                "record count {count} inconsistent with block of {} bytes",
                buf.len()
            )));
        }
        let mut offsets = Vec::with_capacity(count);
        for _ in 0..count {
            let (offset, n) = u32::decode_from(&buf[off..])?;
            off += n;
            offsets.push(offset);
        }
        Ok(Self {
            offsets,
            entries: buf[off..].to_vec(),
        })
    }
}

/// Accumulates sorted tuples into a [`RecordBlock`].
///
/// `add` refuses tuples once the configured byte budget is reached so a
/// streaming table build can rotate to a fresh block; the first tuple
/// is always accepted regardless of size.
pub struct RecordBlockBuilder {
    offsets: Vec<u32>,
    entries: Vec<u8>,
    block_size: usize,
    last_key: Option<Key>,
}

impl RecordBlockBuilder {
    pub fn new(block_size: usize) -> Self {
        Self {
            offsets: Vec::new(),
            entries: Vec::new(),
            block_size,
            last_key: None,
        }
    }

    /// Current serialized size estimate.
    pub fn size(&self) -> usize {
        U32_SIZE + self.offsets.len() * U32_SIZE + self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.offsets.is_empty()
    }

    /// Appends a tuple, returning `false` (without consuming it) when
    /// the block is full. Input must arrive in strictly increasing key
    /// order.
    #[must_use]
    pub fn add(&mut self, tuple: &Tuple) -> Result<bool, EncodingError> {
        if let Some(last) = &self.last_key {
            assert!(
                *last < tuple.key,
                "record block input out of order: {:?} then {:?}",
                last,
                tuple.key
            );
        }

        if !self.is_empty() && self.size() + tuple.encoded_size() + U32_SIZE > self.block_size {
            return Ok(false);
        }

        let offset = u32::try_from(self.entries.len())
            .map_err(|_| EncodingError::LengthOverflow("record block exceeds u32 offsets".into()))?;
        self.offsets.push(offset);
        tuple.encode_to(&mut self.entries)?;
        self.last_key = Some(tuple.key.clone());
        Ok(true)
    }

    /// The key of the most recently added tuple.
    pub fn last_key(&self) -> Option<&Key> {
        self.last_key.as_ref()
    }

    /// Finishes the block. At least one tuple must have been added.
    pub fn build(self) -> RecordBlock {
        assert!(!self.is_empty(), "record block must not be empty");
        RecordBlock {
            offsets: self.offsets,
            entries: self.entries,
        }
    }
}
