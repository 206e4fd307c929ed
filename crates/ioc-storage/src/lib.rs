//! # ioc-storage
//!
//! Object layer of the IOCatcher server.
//!
//! Objects are held in memory as sparse sets of segments. Segments are
//! loaded from, and flushed to, a pluggable [`StorageBackend`] through
//! [`DeferredOperation`]s, which are prepared on the network thread and run
//! by workers. Objects can be cloned copy-on-write: segment buffers are
//! shared until one side writes to them.
//!
//! ```text
//! Container ─► Object ─► ObjectSegment ─► SegmentBuffer (shared on COW)
//!                 │
//!                 └─► DeferredOperationList ─► StorageBackend
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod backend;
pub mod container;
pub mod deferred;
pub mod error;
pub mod object;
pub mod segment;

pub use backend::{MemoryBackend, StorageBackend};
pub use container::{Container, SharedContainer};
pub use deferred::{DeferredKind, DeferredOperation, DeferredOperationList, DirtyAction};
pub use error::{StorageError, StorageResult};
pub use object::{read_slices, slices_mem_ranges, write_slices, AccessMode, Object};
pub use segment::{ObjectSegment, SegmentBuffer, SegmentSlice};
