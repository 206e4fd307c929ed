//! In-memory objects made of segments

use crate::backend::StorageBackend;
use crate::deferred::{DeferredKind, DeferredOperation, DeferredOperationList, DirtyAction};
use crate::error::{StorageError, StorageResult};
use crate::segment::{ObjectSegment, SegmentBuffer, SegmentSlice};
use ioc_scheduler::{ObjectId, RangeSet};
use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::trace;

/// Kind of access requested on object buffers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AccessMode {
    /// Read only, shared segments stay shared
    Read,
    /// Write, shared segments get a private copy first
    Write,
}

/// An object: a sparse set of non-overlapping segments keyed by offset.
pub struct Object {
    id: ObjectId,
    alignment: usize,
    segments: BTreeMap<usize, ObjectSegment>,
    backend: Option<Arc<dyn StorageBackend>>,
}

impl Object {
    /// Create an empty object. Segments are allocated on `alignment`
    /// boundaries when it is non-zero.
    pub fn new(id: ObjectId, backend: Option<Arc<dyn StorageBackend>>, alignment: usize) -> Self {
        Self {
            id,
            alignment,
            segments: BTreeMap::new(),
            backend,
        }
    }

    /// Object id.
    pub fn id(&self) -> ObjectId {
        self.id
    }

    /// Segment alignment, 0 when unaligned.
    pub fn alignment(&self) -> usize {
        self.alignment
    }

    /// Change the alignment of segments allocated from now on.
    pub fn force_alignment(&mut self, alignment: usize) {
        self.alignment = alignment;
    }

    /// Number of segments in memory.
    pub fn segment_count(&self) -> usize {
        self.segments.len()
    }

    /// Segments in offset order.
    pub fn segments(&self) -> impl Iterator<Item = &ObjectSegment> {
        self.segments.values()
    }

    /// Views covering `[offset, offset + size)`, in offset order.
    ///
    /// Missing segments are allocated; when `load` is set and a backend is
    /// attached, a deferred read filling them is appended to `ops`. With
    /// [`AccessMode::Write`], segments shared with another object are first
    /// replaced by a private copy.
    pub fn get_buffers(
        &mut self,
        ops: &mut DeferredOperationList,
        offset: usize,
        size: usize,
        mode: AccessMode,
        load: bool,
    ) -> StorageResult<Vec<SegmentSlice>> {
        let end = checked_end(offset, size)?;
        let mut slices = Vec::new();
        let mut cursor = offset;
        while cursor < end {
            let start = match self.segment_at(cursor) {
                Some(start) => start,
                None => self.allocate(ops, cursor, end, load),
            };
            let segment = match self.segments.get_mut(&start) {
                Some(segment) => segment,
                None => unreachable!("segment {start} vanished"),
            };
            if mode == AccessMode::Write && segment.ensure_private() {
                trace!(object = %self.id, segment = start, "copy-on-write relocation");
            }
            let slice_end = end.min(segment.end());
            slices.push(segment.slice(cursor, slice_end - cursor));
            cursor = slice_end;
        }
        Ok(slices)
    }

    /// Single contiguous view of `[offset, offset + size)`, if one segment
    /// covers the whole range.
    pub fn get_uniq_buffer(
        &mut self,
        ops: &mut DeferredOperationList,
        offset: usize,
        size: usize,
        mode: AccessMode,
        load: bool,
    ) -> StorageResult<Option<SegmentSlice>> {
        let mut slices = self.get_buffers(ops, offset, size, mode, load)?;
        Ok(if slices.len() == 1 { slices.pop() } else { None })
    }

    /// Flag every segment overlapping the range as dirty.
    pub fn mark_dirty(&self, offset: usize, size: usize) {
        let end = offset.saturating_add(size);
        for segment in self.overlapping(offset, end) {
            segment.set_dirty(true);
        }
    }

    /// Deferred writes of every dirty segment overlapping the range.
    ///
    /// A size of 0 flushes the whole object. Segments are marked clean once
    /// their write succeeds.
    pub fn flush(&self, offset: usize, size: usize) -> DeferredOperationList {
        let end = if size == 0 { usize::MAX } else { offset.saturating_add(size) };
        let mut ops = DeferredOperationList::new();
        for segment in self.overlapping(offset, end).filter(|s| s.is_dirty()) {
            let op = DeferredOperation::new(
                DeferredKind::Write,
                self.id,
                segment.slice(segment.offset(), segment.size()),
                self.backend.clone(),
            );
            ops.push(op.with_dirty_action(DirtyAction::SetClean));
        }
        ops
    }

    /// Memory ranges of the segments already in memory that overlap the range.
    pub fn mem_ranges(&self, offset: usize, size: usize) -> RangeSet {
        let end = offset.saturating_add(size);
        let slices: Vec<_> = self
            .overlapping(offset, end)
            .map(|segment| {
                let start = offset.max(segment.offset());
                segment.slice(start, end.min(segment.end()) - start).mem_range()
            })
            .collect();
        RangeSet::from_ranges(slices)
    }

    /// New object `target` sharing every segment of this one.
    pub fn make_copy_on_write(&self, target: ObjectId) -> Object {
        Object {
            id: target,
            alignment: self.alignment,
            segments: self
                .segments
                .iter()
                .map(|(&offset, segment)| (offset, segment.share()))
                .collect(),
            backend: self.backend.clone(),
        }
    }

    /// Share the segments of `source` lying in `[offset, end)` with this
    /// object, replacing whatever this object held there.
    ///
    /// Segments of either object straddling a range boundary are rejected.
    pub fn share_range_from(&mut self, source: &Object, offset: usize, end: usize) -> StorageResult<()> {
        for object in [&*self, source] {
            if let Some(segment) = object
                .overlapping(offset, end)
                .find(|s| s.offset() < offset || s.end() > end)
            {
                return Err(StorageError::UnalignedCow {
                    object: object.id,
                    offset,
                    end,
                    segment: segment.offset(),
                });
            }
        }

        let dropped: Vec<usize> = self
            .overlapping(offset, end)
            .map(ObjectSegment::offset)
            .collect();
        for start in dropped {
            self.segments.remove(&start);
        }
        for segment in source.overlapping(offset, end) {
            self.segments.insert(segment.offset(), segment.share());
        }
        Ok(())
    }

    /// Replace the backend used for loads and flushes.
    pub fn set_storage_backend(&mut self, backend: Option<Arc<dyn StorageBackend>>) {
        self.backend = backend;
    }

    fn overlapping(&self, offset: usize, end: usize) -> impl Iterator<Item = &ObjectSegment> {
        let before = self
            .segments
            .range(..offset)
            .next_back()
            .map(|(_, segment)| segment)
            .filter(|segment| segment.end() > offset);
        before
            .into_iter()
            .chain(self.segments.range(offset..end).map(|(_, segment)| segment))
    }

    fn segment_at(&self, offset: usize) -> Option<usize> {
        self.segments
            .range(..=offset)
            .next_back()
            .filter(|(_, segment)| segment.contains(offset))
            .map(|(&start, _)| start)
    }

    /// Allocate the segment covering `cursor`, bounded by its neighbours.
    fn allocate(&mut self, ops: &mut DeferredOperationList, cursor: usize, end: usize, load: bool) -> usize {
        let previous_end = self
            .segments
            .range(..cursor)
            .next_back()
            .map_or(0, |(_, segment)| segment.end());
        let next_start = self
            .segments
            .range(cursor..)
            .next()
            .map_or(usize::MAX, |(&start, _)| start);

        let (mut start, mut stop) = (cursor, end);
        if self.alignment > 0 {
            start -= start % self.alignment;
            stop = stop
                .checked_add(self.alignment - 1)
                .map_or(usize::MAX, |v| v - v % self.alignment);
        }
        let start = start.max(previous_end);
        let stop = stop.min(next_start);

        let segment = ObjectSegment::new(start, SegmentBuffer::zeroed(stop - start));
        if load {
            if let Some(backend) = &self.backend {
                ops.push(DeferredOperation::new(
                    DeferredKind::Read,
                    self.id,
                    segment.slice(start, stop - start),
                    Some(Arc::clone(backend)),
                ));
            }
        }
        trace!(object = %self.id, offset = start, size = stop - start, "segment allocated");
        self.segments.insert(start, segment);
        start
    }
}

impl std::fmt::Debug for Object {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Object")
            .field("id", &self.id)
            .field("alignment", &self.alignment)
            .field("segments", &self.segments.len())
            .field("backend", &self.backend.is_some())
            .finish()
    }
}

fn checked_end(offset: usize, size: usize) -> StorageResult<usize> {
    match offset.checked_add(size) {
        Some(end) if size > 0 => Ok(end),
        _ => Err(StorageError::InvalidRange { offset, size }),
    }
}

/// Copy `data` into consecutive slices, returning the bytes written.
pub fn write_slices(slices: &[SegmentSlice], data: &[u8]) -> usize {
    let mut written = 0;
    for slice in slices {
        let len = slice.len().min(data.len() - written);
        if len == 0 {
            break;
        }
        slice.with_bytes_mut(|buf| buf[..len].copy_from_slice(&data[written..written + len]));
        written += len;
    }
    written
}

/// Gather consecutive slices into `out`, returning the bytes read.
pub fn read_slices(slices: &[SegmentSlice], out: &mut [u8]) -> usize {
    let mut read = 0;
    for slice in slices {
        let len = slice.len().min(out.len() - read);
        if len == 0 {
            break;
        }
        slice.with_bytes(|buf| out[read..read + len].copy_from_slice(&buf[..len]));
        read += len;
    }
    read
}

/// Memory ranges of a list of slices, as a complete set.
pub fn slices_mem_ranges(slices: &[SegmentSlice]) -> RangeSet {
    RangeSet::from_ranges(slices.iter().map(SegmentSlice::mem_range))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::MemoryBackend;

    const OBJ: ObjectId = ObjectId::new(10, 20);

    fn object_with_backend() -> (Object, Arc<MemoryBackend>) {
        let backend = Arc::new(MemoryBackend::new());
        let shared: Arc<dyn StorageBackend> = backend.clone();
        (Object::new(OBJ, Some(shared), 0), backend)
    }

    // ==================== Buffers ====================

    #[test]
    fn test_get_buffers_allocates_once() {
        let mut object = Object::new(OBJ, None, 0);
        let mut ops = DeferredOperationList::new();
        let slices = object.get_buffers(&mut ops, 100, 50, AccessMode::Read, true).unwrap();
        assert_eq!(slices.len(), 1);
        assert_eq!(slices[0].object_offset(), 100);
        assert!(ops.is_empty());

        let again = object.get_buffers(&mut ops, 120, 10, AccessMode::Read, true).unwrap();
        assert_eq!(again[0].mem_range().offset, slices[0].mem_range().offset + 20);
        assert_eq!(object.segment_count(), 1);
    }

    #[test]
    fn test_get_buffers_fills_gaps() {
        let mut object = Object::new(OBJ, None, 0);
        let mut ops = DeferredOperationList::new();
        object.get_buffers(&mut ops, 10, 10, AccessMode::Write, true).unwrap();
        object.get_buffers(&mut ops, 40, 10, AccessMode::Write, true).unwrap();

        let slices = object.get_buffers(&mut ops, 0, 60, AccessMode::Read, true).unwrap();
        let layout: Vec<(usize, usize)> = slices.iter().map(|s| (s.object_offset(), s.len())).collect();
        assert_eq!(layout, vec![(0, 10), (10, 10), (20, 20), (40, 10), (50, 10)]);
        assert_eq!(object.segment_count(), 5);
    }

    #[test]
    fn test_aligned_allocation() {
        let mut object = Object::new(OBJ, None, 64);
        let mut ops = DeferredOperationList::new();
        let slices = object.get_buffers(&mut ops, 70, 10, AccessMode::Read, false).unwrap();
        assert_eq!(slices.len(), 1);
        let segment = object.segments().next().unwrap();
        assert_eq!((segment.offset(), segment.size()), (64, 64));
    }

    #[test]
    fn test_load_queues_deferred_reads() {
        let (mut object, backend) = object_with_backend();
        backend.pwrite(OBJ, b"persisted", 0).unwrap();

        let mut ops = DeferredOperationList::new();
        let slices = object.get_buffers(&mut ops, 0, 9, AccessMode::Read, true).unwrap();
        assert_eq!(ops.len(), 1);
        assert_eq!(ops.run_all(), 0);

        let mut out = [0u8; 9];
        assert_eq!(read_slices(&slices, &mut out), 9);
        assert_eq!(&out, b"persisted");

        let mut later = DeferredOperationList::new();
        object.get_buffers(&mut later, 0, 9, AccessMode::Read, true).unwrap();
        assert!(later.is_empty());
    }

    #[test]
    fn test_invalid_range() {
        let mut object = Object::new(OBJ, None, 0);
        let mut ops = DeferredOperationList::new();
        assert!(matches!(
            object.get_buffers(&mut ops, 0, 0, AccessMode::Read, false),
            Err(StorageError::InvalidRange { .. })
        ));
        assert!(object.get_buffers(&mut ops, usize::MAX, 2, AccessMode::Read, false).is_err());
    }

    #[test]
    fn test_uniq_buffer() {
        let mut object = Object::new(OBJ, None, 0);
        let mut ops = DeferredOperationList::new();
        object.get_buffers(&mut ops, 0, 10, AccessMode::Write, false).unwrap();
        assert!(object.get_uniq_buffer(&mut ops, 2, 5, AccessMode::Read, false).unwrap().is_some());
        assert!(object.get_uniq_buffer(&mut ops, 5, 10, AccessMode::Read, false).unwrap().is_none());
    }

    // ==================== Dirty & flush ====================

    #[test]
    fn test_flush_writes_dirty_segments() {
        let (mut object, backend) = object_with_backend();
        let mut ops = DeferredOperationList::new();
        let slices = object.get_buffers(&mut ops, 0, 4, AccessMode::Write, false).unwrap();
        object.get_buffers(&mut ops, 100, 4, AccessMode::Write, false).unwrap();
        write_slices(&slices, b"abcd");
        object.mark_dirty(0, 4);

        let flush = object.flush(0, 0);
        assert_eq!(flush.len(), 1);
        assert_eq!(flush.run_all(), 0);
        assert_eq!(backend.object_data(OBJ).unwrap(), b"abcd");
        assert!(object.segments().all(|s| !s.is_dirty()));
        assert!(object.flush(0, 0).is_empty());
    }

    #[test]
    fn test_flush_limited_to_range() {
        let mut object = Object::new(OBJ, None, 0);
        let mut ops = DeferredOperationList::new();
        object.get_buffers(&mut ops, 0, 10, AccessMode::Write, false).unwrap();
        object.get_buffers(&mut ops, 10, 10, AccessMode::Write, false).unwrap();
        object.mark_dirty(0, 20);
        assert_eq!(object.flush(12, 2).len(), 1);
        assert_eq!(object.flush(5, 10).len(), 2);
    }

    // ==================== Copy-on-write ====================

    #[test]
    fn test_full_cow_shares_until_written() {
        let mut source = Object::new(OBJ, None, 0);
        let mut ops = DeferredOperationList::new();
        let slices = source.get_buffers(&mut ops, 0, 8, AccessMode::Write, false).unwrap();
        write_slices(&slices, b"original");

        let mut copy = source.make_copy_on_write(ObjectId::new(1, 1));
        assert_eq!(source.mem_ranges(0, 8), copy.mem_ranges(0, 8));

        let copy_slices = copy.get_buffers(&mut ops, 0, 8, AccessMode::Write, false).unwrap();
        write_slices(&copy_slices, b"modified");
        assert_ne!(source.mem_ranges(0, 8), copy.mem_ranges(0, 8));

        let mut out = [0u8; 8];
        let source_slices = source.get_buffers(&mut ops, 0, 8, AccessMode::Read, false).unwrap();
        read_slices(&source_slices, &mut out);
        assert_eq!(&out, b"original");
        assert!(!source.segments().next().unwrap().buffer().is_shared());
    }

    #[test]
    fn test_range_share() {
        let mut source = Object::new(OBJ, None, 0);
        let mut target = Object::new(ObjectId::new(1, 1), None, 0);
        let mut ops = DeferredOperationList::new();
        for offset in [0, 10, 20] {
            let slices = source.get_buffers(&mut ops, offset, 10, AccessMode::Write, false).unwrap();
            write_slices(&slices, &[offset as u8; 10]);
        }
        target.get_buffers(&mut ops, 10, 10, AccessMode::Write, false).unwrap();

        target.share_range_from(&source, 10, 30).unwrap();
        assert_eq!(target.segment_count(), 2);
        let mut out = [0u8; 20];
        let slices = target.get_buffers(&mut ops, 10, 20, AccessMode::Read, false).unwrap();
        read_slices(&slices, &mut out);
        assert_eq!(&out[..10], &[10u8; 10]);
        assert_eq!(&out[10..], &[20u8; 10]);
    }

    #[test]
    fn test_range_share_rejects_straddling_segment() {
        let mut source = Object::new(OBJ, None, 0);
        let mut target = Object::new(ObjectId::new(1, 1), None, 0);
        let mut ops = DeferredOperationList::new();
        source.get_buffers(&mut ops, 0, 20, AccessMode::Write, false).unwrap();
        assert!(matches!(
            target.share_range_from(&source, 10, 30),
            Err(StorageError::UnalignedCow { segment: 0, .. })
        ));
    }

    #[test]
    fn test_mem_ranges_of_missing_segments_is_empty() {
        let object = Object::new(OBJ, None, 0);
        let ranges = object.mem_ranges(0, 100);
        assert!(ranges.is_ready());
        assert!(ranges.is_empty());
    }
}
