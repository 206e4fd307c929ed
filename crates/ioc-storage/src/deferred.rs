//! Backend transfers prepared on the network thread and run by workers

use crate::backend::StorageBackend;
use crate::segment::SegmentSlice;
use ioc_scheduler::{MemRange, ObjectId, RangeSet};
use std::sync::atomic::Ordering;
use std::sync::Arc;
use tracing::warn;

/// Direction of a deferred transfer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeferredKind {
    /// Backend to memory
    Read,
    /// Memory to backend
    Write,
}

/// What to do with the segment dirty state once the transfer succeeded.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum DirtyAction {
    /// Leave it as is
    #[default]
    Ignore,
    /// Mark the segment dirty
    SetDirty,
    /// Mark the segment clean
    SetClean,
}

/// One pending backend transfer on a segment slice.
#[derive(Clone)]
pub struct DeferredOperation {
    kind: DeferredKind,
    object_id: ObjectId,
    slice: SegmentSlice,
    backend: Option<Arc<dyn StorageBackend>>,
    dirty_action: DirtyAction,
}

impl DeferredOperation {
    /// Transfer covering `slice` of `object_id`. The slice must not be empty.
    pub fn new(
        kind: DeferredKind,
        object_id: ObjectId,
        slice: SegmentSlice,
        backend: Option<Arc<dyn StorageBackend>>,
    ) -> Self {
        assert!(!slice.is_empty(), "deferred operation on an empty slice");
        Self {
            kind,
            object_id,
            slice,
            backend,
            dirty_action: DirtyAction::Ignore,
        }
    }

    /// Set the dirty-state update applied on success.
    pub fn with_dirty_action(mut self, action: DirtyAction) -> Self {
        self.dirty_action = action;
        self
    }

    /// Transfer direction.
    pub fn kind(&self) -> DeferredKind {
        self.kind
    }

    /// Bytes to move.
    pub fn size(&self) -> usize {
        self.slice.len()
    }

    /// Offset in the object (and in the backend).
    pub fn offset(&self) -> usize {
        self.slice.object_offset()
    }

    /// Object the transfer belongs to.
    pub fn object_id(&self) -> ObjectId {
        self.object_id
    }

    /// Run the transfer and return the number of bytes moved, or -1.
    ///
    /// Without a backend nothing moves and the full size is reported.
    pub fn run(&self) -> isize {
        let Some(backend) = &self.backend else {
            return self.size() as isize;
        };

        let offset = self.offset();
        let result = match self.kind {
            DeferredKind::Read => self
                .slice
                .with_bytes_mut(|buf| backend.pread(self.object_id, buf, offset)),
            DeferredKind::Write => self
                .slice
                .with_bytes(|buf| backend.pwrite(self.object_id, buf, offset)),
        };

        let moved = match result {
            Ok(moved) => moved as isize,
            Err(err) => {
                warn!(object = %self.object_id, offset, size = self.size(), error = %err, "backend transfer failed");
                -1
            }
        };

        if moved == self.size() as isize {
            match self.dirty_action {
                DirtyAction::Ignore => {}
                DirtyAction::SetDirty => self.slice.dirty_flag().store(true, Ordering::Release),
                DirtyAction::SetClean => self.slice.dirty_flag().store(false, Ordering::Release),
            }
        }
        moved
    }

    /// Memory touched by the transfer.
    pub fn mem_range(&self) -> MemRange {
        self.slice.mem_range()
    }
}

impl std::fmt::Debug for DeferredOperation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DeferredOperation")
            .field("kind", &self.kind)
            .field("object_id", &self.object_id)
            .field("offset", &self.offset())
            .field("size", &self.size())
            .field("backend", &self.backend.is_some())
            .field("dirty_action", &self.dirty_action)
            .finish()
    }
}

/// Ordered batch of deferred transfers.
#[derive(Debug, Clone, Default)]
pub struct DeferredOperationList {
    ops: Vec<DeferredOperation>,
}

impl DeferredOperationList {
    /// Create an empty batch.
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a transfer.
    pub fn push(&mut self, op: DeferredOperation) {
        self.ops.push(op);
    }

    /// Number of transfers.
    pub fn len(&self) -> usize {
        self.ops.len()
    }

    /// Whether the batch is empty.
    pub fn is_empty(&self) -> bool {
        self.ops.is_empty()
    }

    /// Transfers in order.
    pub fn iter(&self) -> std::slice::Iter<'_, DeferredOperation> {
        self.ops.iter()
    }

    /// Run every transfer. Returns 0, or -1 if any of them came up short.
    ///
    /// Every transfer is attempted even after a failure.
    pub fn run_all(&self) -> isize {
        self.ops.iter().fold(0, |status, op| {
            if op.run() == op.size() as isize {
                status
            } else {
                -1
            }
        })
    }

    /// Memory ranges of every transfer, as a complete set.
    pub fn build_mem_ranges(&self) -> RangeSet {
        RangeSet::from_ranges(self.ops.iter().map(DeferredOperation::mem_range))
    }
}

impl Extend<DeferredOperation> for DeferredOperationList {
    fn extend<I: IntoIterator<Item = DeferredOperation>>(&mut self, iter: I) {
        self.ops.extend(iter);
    }
}

impl IntoIterator for DeferredOperationList {
    type Item = DeferredOperation;
    type IntoIter = std::vec::IntoIter<DeferredOperation>;

    fn into_iter(self) -> Self::IntoIter {
        self.ops.into_iter()
    }
}
