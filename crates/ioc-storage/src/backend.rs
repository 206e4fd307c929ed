//! Storage backend abstraction

use ioc_scheduler::ObjectId;
use parking_lot::RwLock;
use std::collections::HashMap;
use std::io;

/// Persistent store objects are loaded from and flushed to.
///
/// Calls may come from any worker thread.
pub trait StorageBackend: Send + Sync {
    /// Read up to `buf.len()` bytes of `object` at `offset`.
    fn pread(&self, object: ObjectId, buf: &mut [u8], offset: usize) -> io::Result<usize>;

    /// Write `buf` into `object` at `offset`.
    fn pwrite(&self, object: ObjectId, buf: &[u8], offset: usize) -> io::Result<usize>;
}

/// Volatile backend keeping every object in a growable byte vector.
///
/// Reads past the end of an object return zeroes.
#[derive(Debug, Default)]
pub struct MemoryBackend {
    objects: RwLock<HashMap<ObjectId, Vec<u8>>>,
}

impl MemoryBackend {
    /// Create an empty backend.
    pub fn new() -> Self {
        Self::default()
    }

    /// Copy of the stored bytes of `object`.
    pub fn object_data(&self, object: ObjectId) -> Option<Vec<u8>> {
        self.objects.read().get(&object).cloned()
    }
}

impl StorageBackend for MemoryBackend {
    fn pread(&self, object: ObjectId, buf: &mut [u8], offset: usize) -> io::Result<usize> {
        let objects = self.objects.read();
        let data = objects.get(&object).map(Vec::as_slice).unwrap_or_default();
        let available = data.len().saturating_sub(offset).min(buf.len());
        if available > 0 {
            buf[..available].copy_from_slice(&data[offset..offset + available]);
        }
        buf[available..].fill(0);
        Ok(buf.len())
    }

    fn pwrite(&self, object: ObjectId, buf: &[u8], offset: usize) -> io::Result<usize> {
        let end = offset
            .checked_add(buf.len())
            .ok_or_else(|| io::Error::new(io::ErrorKind::InvalidInput, "write past address space"))?;
        let mut objects = self.objects.write();
        let data = objects.entry(object).or_default();
        if data.len() < end {
            data.resize(end, 0);
        }
        data[offset..end].copy_from_slice(buf);
        Ok(buf.len())
    }
}
