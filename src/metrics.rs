//! Lightweight operation counters.
//!
//! One [`observe_bytes`](Metrics::observe_bytes) hook per operation
//! kind, instead of wrapping every iterator in a metered decorator. The
//! counters are plain relaxed atomics — cheap enough to leave on — and
//! [`Metrics::log`] reports them through `tracing`.

use std::sync::atomic::{AtomicU64, Ordering};

use tracing::info;

/// The operation kinds the database accounts for.
#[derive(Debug, Clone, Copy)]
pub enum Operation {
    Write,
    Read,
    Scan,
}

/// Byte and call counters for one database instance.
#[derive(Default)]
pub struct Metrics {
    write_ops: AtomicU64,
    write_bytes: AtomicU64,
    read_ops: AtomicU64,
    read_bytes: AtomicU64,
    scan_ops: AtomicU64,
    scan_bytes: AtomicU64,
}

impl Metrics {
    pub fn new() -> Self {
        Self::default()
    }

    /// Accounts `bytes` against one operation of the given kind.
    pub fn observe_bytes(&self, operation: Operation, bytes: u64) {
        match operation {
            Operation::Write => {
                self.write_ops.fetch_add(1, Ordering::Relaxed);
                self.write_bytes.fetch_add(bytes, Ordering::Relaxed);
            }
            Operation::Read => {
                self.read_ops.fetch_add(1, Ordering::Relaxed);
                self.read_bytes.fetch_add(bytes, Ordering::Relaxed);
            }
            Operation::Scan => {
                self.scan_ops.fetch_add(1, Ordering::Relaxed);
                self.scan_bytes.fetch_add(bytes, Ordering::Relaxed);
            }
        }
    }

    /// Emits the current counters through `tracing`.
    pub fn log(&self) {
        info!(
            write_ops = self.write_ops.load(Ordering::Relaxed),
            write_bytes = self.write_bytes.load(Ordering::Relaxed),
            read_ops = self.read_ops.load(Ordering::Relaxed),
            read_bytes = self.read_bytes.load(Ordering::Relaxed),
            scan_ops = self.scan_ops.load(Ordering::Relaxed),
            scan_bytes = self.scan_bytes.load(Ordering::Relaxed),
            "database metrics"
        );
    }
}
