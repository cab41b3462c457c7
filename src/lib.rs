//! # HeftyDB
//!
//! An embeddable, snapshot-isolated, ordered key-value store built on a
//! **log-structured merge tree**. Writes land in a WAL-backed memtable,
//! flush into immutable sorted tables with block indexes and bloom
//! filters, and merge in the background under MVCC retention rules.
//!
//! ## Architecture
//!
//! ```text
//! ┌────────────────────────────────────────────────────────────┐
//! │                        Database                            │
//! │                                                            │
//! │  put/delete ──► TableWriter ──► WAL ──► writable memtable  │
//! │                     │ rotate                               │
//! │                     ▼                                      │
//! │              frozen memtables ──flush──► disk tables       │
//! │                                            │               │
//! │  get/scan ──► TableReader ◄── Tables registry (by gen)     │
//! │                                            │               │
//! │              Compactor ──merge+swap────────┘               │
//! │                                                            │
//! │  Snapshots: monotonic ids, retained-set, MVCC visibility   │
//! └────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Modules
//!
//! | Module | Purpose |
//! |--------|---------|
//! | [`db`] | The façade — open, put, get, delete, scan, compact, close |
//! | [`tuple`] | Keys, values, tuples, and the one central comparator |
//! | [`block`] | Record blocks and index blocks, binary-searchable |
//! | [`table`] | Immutable disk tables and their streaming builder |
//! | [`memtable`] | WAL-backed concurrent in-memory write buffer |
//! | [`wal`] | CRC-protected append-only logging |
//! | [`tables`] | Generation-ordered registry of live tables |
//! | [`snapshot`] | Snapshot id allocation and retention |
//! | [`read`] | Point lookups and heap-merged MVCC scans |
//! | [`write`] | The put pipeline, rotation, and flush |
//! | [`compact`] | Background merges and retention rules |
//! | [`cache`] | Byte-weighted record/index block caches |
//! | [`filter`] | Per-table bloom filters |
//! | [`encoding`] | The fixed little-endian wire format |
//! | [`task`] | Bounded background executors |
//! | [`metrics`] | Operation counters |
//!
//! ## Key model
//!
//! Every key carries the snapshot id of its write. Keys order by bytes
//! ascending, then snapshot id **descending** — the newest version of a
//! key sorts first, which makes point lookups a single ceiling search
//! and lets scans yield the newest visible version of each key without
//! backtracking. An empty value marks a delete (tombstone).
//!
//! ## Quick start
//!
//! ```rust,no_run
//! use heftydb::{Config, Database};
//!
//! let db = Database::open("/tmp/heftydb", Config::default()).unwrap();
//!
//! let s1 = db.put(b"planet", b"mars").unwrap();
//! assert_eq!(db.get(b"planet").unwrap().unwrap().value, b"mars");
//!
//! db.delete(b"planet").unwrap();
//! assert!(db.get(b"planet").unwrap().is_none());
//!
//! // Snapshot reads see history.
//! assert_eq!(db.get_at(b"planet", s1).unwrap().unwrap().value, b"mars");
//!
//! db.close().unwrap();
//! ```

pub mod block;
pub mod cache;
pub mod compact;
pub mod db;
pub mod encoding;
pub mod filter;
pub mod memtable;
pub mod metrics;
pub mod read;
pub mod snapshot;
pub mod table;
pub mod tables;
pub mod task;
pub mod tuple;
pub mod wal;
pub mod write;

pub use compact::CompactionStrategyType;
pub use db::{Config, Database, DbIterator, Error, Record};
