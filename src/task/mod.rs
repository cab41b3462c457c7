//! Background executors.
//!
//! Flush and compaction each run on an [`Executor`]: a fixed set of
//! worker threads draining a bounded channel. Submission blocks when
//! the queue is full, which back-pressures the foreground instead of
//! letting background work pile up unboundedly. `shutdown()` closes the
//! queue, lets the workers drain what was already accepted, and joins
//! them; it is idempotent.

use std::sync::Mutex;
use std::thread::JoinHandle;

use crossbeam::channel::{Receiver, Sender, bounded};
use thiserror::Error;
use tracing::{debug, error};

/// A unit of background work.
pub type Task = Box<dyn FnOnce() + Send + 'static>;

/// Errors returned by executor operations.
#[derive(Debug, Error)]
pub enum TaskError {
    /// The executor has been shut down.
    #[error("executor is shut down")]
    Shutdown,
}

/// A bounded-queue worker pool.
pub struct Executor {
    sender: Mutex<Option<Sender<Task>>>,
    workers: Mutex<Vec<JoinHandle<()>>>,
    name: &'static str,
}

impl Executor {
    /// Spawns `threads` workers behind a queue of `queue_depth` tasks.
    pub fn new(
        name: &'static str,
        threads: usize,
        queue_depth: usize,
    ) -> Result<Self, std::io::Error> {
        let (sender, receiver) = bounded::<Task>(queue_depth);
        let mut workers = Vec::with_capacity(threads);
        for index in 0..threads.max(1) {
            let receiver: Receiver<Task> = receiver.clone();
            let handle = std::thread::Builder::new()
                .name(format!("heftydb-{name}-{index}"))
                .spawn(move || {
                    // Channel disconnect is the shutdown signal; every
                    // task accepted before it still runs.
                    while let Ok(task) = receiver.recv() {
                        task();
                    }
                })?;
            workers.push(handle);
        }
        Ok(Self {
            sender: Mutex::new(Some(sender)),
            workers: Mutex::new(workers),
            name,
        })
    }

    /// Enqueues a task, blocking while the queue is full.
    pub fn submit(&self, task: Task) -> Result<(), TaskError> {
        let guard = match self.sender.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        match guard.as_ref() {
            Some(sender) => sender.send(task).map_err(|_| TaskError::Shutdown),
            None => Err(TaskError::Shutdown),
        }
    }

    /// Closes the queue, drains accepted work, and joins the workers.
    /// Safe to call more than once.
    pub fn shutdown(&self) {
        let sender = {
            let mut guard = match self.sender.lock() {
                Ok(guard) => guard,
                Err(poisoned) => poisoned.into_inner(),
            };
            guard.take()
        };
        drop(sender);

        let workers = {
            let mut guard = match self.workers.lock() {
                Ok(guard) => guard,
                Err(poisoned) => poisoned.into_inner(),
            };
            std::mem::take(&mut *guard)
        };
        for handle in workers {
            if handle.join().is_err() {
                error!(executor = self.name, "worker panicked during shutdown");
            }
        }
        debug!(executor = self.name, "executor drained");
    }
}

impl Drop for Executor {
    fn drop(&mut self) {
        self.shutdown();
    }
}
