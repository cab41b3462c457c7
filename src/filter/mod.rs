//! Per-table bloom filters.
//!
//! Every disk table carries a bloom filter over its key bytes so point
//! lookups can skip tables that definitely do not contain the key. The
//! filter is sized from the expected tuple count and the configured
//! false-positive rate, and must answer "maybe" for every key actually
//! present — a corrupted or missing filter therefore degrades to
//! "maybe" rather than excluding anything.

use bloomfilter::Bloom;

/// Bloom filter over the key bytes of one table.
pub struct TableFilter {
    bloom: Bloom<[u8]>,
}

impl TableFilter {
    /// Creates a filter sized for `expected_keys` entries at the given
    /// false-positive rate.
    pub fn new(expected_keys: usize, false_positive_rate: f64) -> Result<Self, String> {
        let bloom = Bloom::new_for_fp_rate(expected_keys.max(1), false_positive_rate)
            .map_err(|e| e.to_string())?;
        Ok(Self { bloom })
    }

    /// Records a key's bytes. Versions share one entry — the filter is
    /// keyed by key bytes, not by (bytes, snapshot).
    pub fn add(&mut self, key_bytes: &[u8]) {
        self.bloom.set(key_bytes);
    }

    /// Whether the table may contain `key_bytes`. `false` is definitive.
    pub fn may_contain(&self, key_bytes: &[u8]) -> bool {
        self.bloom.check(key_bytes)
    }

    /// Serialized filter bytes for the table file.
    pub fn encode(&self) -> Vec<u8> {
        self.bloom.as_slice().to_vec()
    }

    /// Rebuilds a filter from its serialized bytes.
    ///
    /// Returns `None` for bytes that do not parse — the caller treats
    /// that as "no filter" and every lookup degrades to "maybe".
    pub fn decode(bytes: &[u8]) -> Option<Self> {
        match Bloom::from_slice(bytes) {
            Ok(bloom) => Some(Self { bloom }),
            Err(_) => None,
        }
    }
}
