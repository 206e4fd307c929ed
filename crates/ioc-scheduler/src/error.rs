//! Error types for the scheduler

use thiserror::Error;

/// Scheduler errors
///
/// Only operational failures end up here. Broken call sequences (running a
/// finished task, popping a task that was never activated, ...) are
/// programming errors and panic.
#[derive(Debug, Error)]
pub enum SchedulerError {
    /// A worker thread could not be spawned
    #[error("failed to spawn worker thread {index}: {source}")]
    WorkerSpawn {
        /// Index of the worker in the pool
        index: usize,
        /// Underlying OS error
        #[source]
        source: std::io::Error,
    },
}

/// Result type for scheduler operations
pub type SchedulerResult<T> = Result<T, SchedulerError>;
