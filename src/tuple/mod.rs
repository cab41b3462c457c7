//! Core value types: [`Key`], [`Value`], and [`Tuple`].
//!
//! A key is an opaque byte sequence paired with the snapshot id under
//! which it was written. A value is an opaque byte sequence where
//! **empty means tombstone**. A tuple is the pair of both — the unit
//! that flows through the write-ahead log, memtables, record blocks,
//! and merge iterators.
//!
//! # Key ordering
//!
//! Keys order lexicographically by their bytes; for equal bytes the
//! **higher snapshot id compares less**. A forward scan over any sorted
//! container of keys therefore yields the newest version of each
//! logical key first. This inversion is the contract every binary
//! search, heap merge, and iterator in the crate relies on, and it is
//! implemented exactly once: in [`Ord`] for [`Key`].


use std::cmp::Ordering;
use std::fmt;

use crate::encoding::{Decode, Encode, EncodingError};

/// A versioned key: opaque bytes plus the snapshot id of the write.
#[derive(Clone, PartialEq, Eq, Hash)]
pub struct Key {
    bytes: Vec<u8>,
    snapshot_id: u64,
}

impl Key {
    /// Creates a key from raw bytes and a snapshot id.
    pub fn new(bytes: impl Into<Vec<u8>>, snapshot_id: u64) -> Self {
        Self {
            bytes: bytes.into(),
            snapshot_id,
        }
    }

    /// The raw key bytes.
    pub fn bytes(&self) -> &[u8] {
        &self.bytes
    }

    /// The snapshot id this version was written under.
    pub fn snapshot_id(&self) -> u64 {
        self.snapshot_id
    }

    /// The smallest possible key for these bytes — sorts before every
    /// stored version of the same logical key.
    pub fn first_version(bytes: impl Into<Vec<u8>>) -> Self {
        Self::new(bytes, u64::MAX)
    }

    /// The largest possible key for these bytes — sorts after every
    /// stored version of the same logical key.
    pub fn last_version(bytes: impl Into<Vec<u8>>) -> Self {
        Self::new(bytes, 0)
    }

    /// Encoded size in bytes: `[u32 len][bytes][u64 snapshot]`.
    pub fn encoded_size(&self) -> usize {
        4 + self.bytes.len() + 8
    }

    pub fn into_bytes(self) -> Vec<u8> {
        self.bytes
    }
}

impl Ord for Key {
    /// Bytes ascending; for equal bytes, snapshot id **descending**.
    fn cmp(&self, other: &Self) -> Ordering {
        match self.bytes.cmp(&other.bytes) {
            Ordering::Equal => other.snapshot_id.cmp(&self.snapshot_id),
            ord => ord,
        }
    }
}

impl PartialOrd for Key {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl fmt::Debug for Key {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Key({}@{})", HexBytes(&self.bytes), self.snapshot_id)
    }
}

impl Encode for Key {
    fn encode_to(&self, buf: &mut Vec<u8>) -> Result<(), EncodingError> {
        self.bytes.as_slice().encode_to(buf)?;
        self.snapshot_id.encode_to(buf)?;
        Ok(())
    }
}

impl Decode for Key {
    fn decode_from(buf: &[u8]) -> Result<(Self, usize), EncodingError> {
        let mut off = 0;
        let (bytes, n) = <Vec<u8>>::decode_from(&buf[off..])?;
        off += n;
        let (snapshot_id, n) = u64::decode_from(&buf[off..])?;
        off += n;
        Ok((Self { bytes, snapshot_id }, off))
    }
}

/// An opaque value. The empty value is the tombstone marker.
#[derive(Clone, PartialEq, Eq)]
pub struct Value(Vec<u8>);

impl Value {
    /// Wraps raw value bytes.
    pub fn new(bytes: impl Into<Vec<u8>>) -> Self {
        Self(bytes.into())
    }

    /// The tombstone marker for a logical delete.
    pub fn tombstone() -> Self {
        Self(Vec::new())
    }

    /// Whether this value marks a delete.
    pub fn is_tombstone(&self) -> bool {
        self.0.is_empty()
    }

    pub fn bytes(&self) -> &[u8] {
        &self.0
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn into_bytes(self) -> Vec<u8> {
        self.0
    }
}

impl fmt::Debug for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_tombstone() {
            write!(f, "Value(tombstone)")
        } else {
            write!(f, "Value({})", HexBytes(&self.0))
        }
    }
}

/// A versioned key paired with its value.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Tuple {
    pub key: Key,
    pub value: Value,
}

impl Tuple {
    pub fn new(key: Key, value: Value) -> Self {
        Self { key, value }
    }

    /// Approximate in-memory footprint, used for memtable accounting.
    pub fn size(&self) -> usize {
        self.key.bytes().len() + 8 + self.value.len()
    }

    /// Encoded size on the wire: `[key][u32 value_len][value]`.
    pub fn encoded_size(&self) -> usize {
        self.key.encoded_size() + 4 + self.value.len()
    }
}

/// Wire format: `[u32 key_len][key bytes][u64 snapshot][u32 value_len][value bytes]`.
impl Encode for Tuple {
    fn encode_to(&self, buf: &mut Vec<u8>) -> Result<(), EncodingError> {
        self.key.encode_to(buf)?;
        self.value.bytes().encode_to(buf)?;
        Ok(())
    }
}

impl Decode for Tuple {
    fn decode_from(buf: &[u8]) -> Result<(Self, usize), EncodingError> {
        let mut off = 0;
        let (key, n) = Key::decode_from(&buf[off..])?;
        off += n;
        let (value, n) = <Vec<u8>>::decode_from(&buf[off..])?;
        off += n;
        Ok((
            Self {
                key,
                value: Value::new(value),
            },
            off,
        ))
    }
}

/// Convenience constructor used throughout the crate's tests.
impl Tuple {
    pub fn put(bytes: impl Into<Vec<u8>>, value: impl Into<Vec<u8>>, snapshot_id: u64) -> Self {
        Self::new(Key::new(bytes, snapshot_id), Value::new(value))
    }

    pub fn delete(bytes: impl Into<Vec<u8>>, snapshot_id: u64) -> Self {
        Self::new(Key::new(bytes, snapshot_id), Value::tombstone())
    }
}

/// Compact hex rendering for keys and values in trace output.
struct HexBytes<'a>(&'a [u8]);

impl fmt::Display for HexBytes<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.0.len() <= 32 {
            for byte in self.0 {
                write!(f, "{byte:02x}")?;
            }
        } else {
            for byte in &self.0[..16] {
                write!(f, "{byte:02x}")?;
            }
            write!(f, "...[{} bytes]", self.0.len())?;
        }
        Ok(())
    }
}
