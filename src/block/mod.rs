//! Sorted, binary-searchable blocks — the building material of a table.
//!
//! Two block kinds share one physical shape,
//! `[u32 count][u32 offsets[count]][entries]`:
//!
//! - [`RecordBlock`] holds a sorted run of [`Tuple`](crate::tuple::Tuple)s
//!   and answers point lookups with a ceiling binary search over the
//!   offsets table.
//! - [`IndexBlock`] holds a sorted run of [`IndexRecord`]s — each naming
//!   the largest key of a child block together with the child's
//!   location — and routes a search key to the child that may contain
//!   it. Index blocks chain into a tree; a leaf index block's children
//!   are record blocks.
//!
//! Both kinds are immutable once built and strictly ordered under the
//! central key comparator, duplicate key bytes (distinct snapshots)
//! included.


pub mod index;
pub mod record;

pub use index::{IndexBlock, IndexBlockBuilder, IndexRecord};
pub use record::{RecordBlock, RecordBlockBuilder};
