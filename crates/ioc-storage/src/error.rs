//! Storage error types

use ioc_scheduler::ObjectId;
use thiserror::Error;

/// Storage errors
#[derive(Debug, Error)]
pub enum StorageError {
    /// Requested range is empty or overflows
    #[error("invalid range: offset {offset}, size {size}")]
    InvalidRange {
        /// Start of the range
        offset: usize,
        /// Length of the range
        size: usize,
    },

    /// Target of a copy-on-write already exists
    #[error("object {0} already exists")]
    ObjectExists(ObjectId),

    /// Object is not known to the container
    #[error("object {0} not found")]
    ObjectNotFound(ObjectId),

    /// A range copy-on-write would split a segment
    #[error("range [{offset}..{end}) of object {object} splits segment at {segment}")]
    UnalignedCow {
        /// Object holding the segment
        object: ObjectId,
        /// Start of the range
        offset: usize,
        /// End of the range
        end: usize,
        /// Offset of the straddling segment
        segment: usize,
    },

    /// IO error
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

/// Result type for storage operations
pub type StorageResult<T> = Result<T, StorageError>;
