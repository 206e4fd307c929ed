//! Object segments and the buffers backing them

use ioc_scheduler::MemRange;
use parking_lot::RwLock;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

type SharedBytes = Arc<RwLock<Box<[u8]>>>;

/// Fixed-size, zero-initialized memory buffer.
///
/// The buffer can be shared between several objects after a copy-on-write;
/// [`SegmentBuffer::is_shared`] tells whether another object still points
/// to it. Its address never changes, which lets the scheduler protect it
/// through memory ranges.
#[derive(Debug)]
pub struct SegmentBuffer {
    data: SharedBytes,
    owners: Arc<()>,
}

impl SegmentBuffer {
    /// Allocate `size` zeroed bytes.
    pub fn zeroed(size: usize) -> Self {
        Self {
            data: Arc::new(RwLock::new(vec![0u8; size].into_boxed_slice())),
            owners: Arc::new(()),
        }
    }

    /// Give another object a reference to the same bytes.
    pub fn share(&self) -> Self {
        Self {
            data: Arc::clone(&self.data),
            owners: Arc::clone(&self.owners),
        }
    }

    /// Private copy of the bytes.
    pub fn duplicate(&self) -> Self {
        let copy = self.data.read().clone();
        Self {
            data: Arc::new(RwLock::new(copy)),
            owners: Arc::new(()),
        }
    }

    /// Whether another object holds the same bytes.
    pub fn is_shared(&self) -> bool {
        Arc::strong_count(&self.owners) > 1
    }

    /// Buffer size in bytes.
    pub fn len(&self) -> usize {
        self.data.read().len()
    }

    /// Whether the buffer holds no byte.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Address of the first byte.
    pub fn address(&self) -> usize {
        self.data.read().as_ptr() as usize
    }

    /// Whether both handles point to the same bytes.
    pub fn same_bytes(&self, other: &SegmentBuffer) -> bool {
        Arc::ptr_eq(&self.data, &other.data)
    }

    pub(crate) fn bytes(&self) -> SharedBytes {
        Arc::clone(&self.data)
    }
}

/// Contiguous part of an object held in memory.
#[derive(Debug)]
pub struct ObjectSegment {
    offset: usize,
    buffer: SegmentBuffer,
    dirty: Arc<AtomicBool>,
}

impl ObjectSegment {
    /// Segment at `offset` in the object, backed by `buffer`.
    pub fn new(offset: usize, buffer: SegmentBuffer) -> Self {
        Self {
            offset,
            buffer,
            dirty: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Offset of the first byte in the object.
    pub fn offset(&self) -> usize {
        self.offset
    }

    /// Number of bytes covered.
    pub fn size(&self) -> usize {
        self.buffer.len()
    }

    /// One past the last byte covered in the object.
    pub fn end(&self) -> usize {
        self.offset + self.size()
    }

    /// Whether the segment covers object byte `offset`.
    pub fn contains(&self, offset: usize) -> bool {
        offset >= self.offset && offset < self.end()
    }

    /// Whether the segment shares a byte with `[offset, end)`.
    pub fn overlaps(&self, offset: usize, end: usize) -> bool {
        self.offset < end && offset < self.end()
    }

    /// Backing buffer.
    pub fn buffer(&self) -> &SegmentBuffer {
        &self.buffer
    }

    /// Whether the segment holds data not yet flushed.
    pub fn is_dirty(&self) -> bool {
        self.dirty.load(Ordering::Acquire)
    }

    /// Set or clear the dirty state.
    pub fn set_dirty(&self, dirty: bool) {
        self.dirty.store(dirty, Ordering::Release);
    }

    pub(crate) fn dirty_flag(&self) -> Arc<AtomicBool> {
        Arc::clone(&self.dirty)
    }

    /// Same bytes, owned by another object. The dirty state is copied.
    pub fn share(&self) -> Self {
        Self {
            offset: self.offset,
            buffer: self.buffer.share(),
            dirty: Arc::new(AtomicBool::new(self.is_dirty())),
        }
    }

    /// Replace a shared buffer by a private copy before writing to it.
    ///
    /// Returns `true` if a copy was made.
    pub fn ensure_private(&mut self) -> bool {
        if !self.buffer.is_shared() {
            return false;
        }
        self.buffer = self.buffer.duplicate();
        true
    }

    /// View of `[offset, offset + len)`, which must lie in the segment.
    pub fn slice(&self, offset: usize, len: usize) -> SegmentSlice {
        assert!(
            offset >= self.offset && offset + len <= self.end(),
            "slice [{offset}..{}) outside segment [{}..{})",
            offset + len,
            self.offset,
            self.end()
        );
        SegmentSlice {
            object_offset: offset,
            buffer_offset: offset - self.offset,
            len,
            data: self.buffer.bytes(),
            dirty: self.dirty_flag(),
        }
    }
}

/// Part of a segment handed to a task.
///
/// Keeps the bytes alive even if the segment is later relocated or dropped.
#[derive(Debug, Clone)]
pub struct SegmentSlice {
    object_offset: usize,
    buffer_offset: usize,
    len: usize,
    data: SharedBytes,
    dirty: Arc<AtomicBool>,
}

impl SegmentSlice {
    /// Offset of the first byte in the object.
    pub fn object_offset(&self) -> usize {
        self.object_offset
    }

    /// Number of bytes covered.
    pub fn len(&self) -> usize {
        self.len
    }

    /// Whether the slice covers no byte.
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Process addresses covered.
    pub fn mem_range(&self) -> MemRange {
        let base = self.data.read().as_ptr() as usize;
        MemRange::new(base + self.buffer_offset, self.len)
    }

    /// Copy the slice content into `dst`, which must be `len()` bytes long.
    pub fn read_into(&self, dst: &mut [u8]) {
        let data = self.data.read();
        dst.copy_from_slice(&data[self.buffer_offset..self.buffer_offset + self.len]);
    }

    /// Overwrite the slice content with `src`, which must be `len()` bytes long.
    pub fn write_from(&self, src: &[u8]) {
        let mut data = self.data.write();
        data[self.buffer_offset..self.buffer_offset + self.len].copy_from_slice(src);
    }

    /// Run `f` on the bytes of the slice.
    pub fn with_bytes<R>(&self, f: impl FnOnce(&[u8]) -> R) -> R {
        let data = self.data.read();
        f(&data[self.buffer_offset..self.buffer_offset + self.len])
    }

    /// Run `f` on the bytes of the slice, mutably.
    pub fn with_bytes_mut<R>(&self, f: impl FnOnce(&mut [u8]) -> R) -> R {
        let mut data = self.data.write();
        f(&mut data[self.buffer_offset..self.buffer_offset + self.len])
    }

    /// Flag the owning segment as holding unflushed data.
    pub fn mark_dirty(&self) {
        self.dirty.store(true, Ordering::Release);
    }

    pub(crate) fn dirty_flag(&self) -> Arc<AtomicBool> {
        Arc::clone(&self.dirty)
    }
}
