//! Registry of every object served

use crate::backend::StorageBackend;
use crate::error::{StorageError, StorageResult};
use crate::object::Object;
use ioc_scheduler::ObjectId;
use parking_lot::Mutex;
use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::debug;

/// Container shared by the network thread and the workers.
pub type SharedContainer = Arc<Mutex<Container>>;

/// Map of objects, created on first access.
pub struct Container {
    objects: BTreeMap<ObjectId, Object>,
    backend: Option<Arc<dyn StorageBackend>>,
    alignment: usize,
}

impl Container {
    /// Create an empty container. New objects use `backend` and allocate
    /// segments on `alignment` boundaries.
    pub fn new(backend: Option<Arc<dyn StorageBackend>>, alignment: usize) -> Self {
        Self {
            objects: BTreeMap::new(),
            backend,
            alignment,
        }
    }

    /// Wrap into a [`SharedContainer`].
    pub fn into_shared(self) -> SharedContainer {
        Arc::new(Mutex::new(self))
    }

    /// Object `id`, created empty if unknown.
    pub fn get_object(&mut self, id: ObjectId) -> &mut Object {
        let backend = &self.backend;
        let alignment = self.alignment;
        self.objects
            .entry(id)
            .or_insert_with(|| Object::new(id, backend.clone(), alignment))
    }

    /// Object `id`, if it exists.
    pub fn object(&self, id: ObjectId) -> Option<&Object> {
        self.objects.get(&id)
    }

    /// Whether object `id` exists.
    pub fn has_object(&self, id: ObjectId) -> bool {
        self.objects.contains_key(&id)
    }

    /// Number of objects.
    pub fn len(&self) -> usize {
        self.objects.len()
    }

    /// Whether the container holds no object.
    pub fn is_empty(&self) -> bool {
        self.objects.is_empty()
    }

    /// Make `dest` a copy-on-write clone of `source`.
    ///
    /// An existing `dest` is replaced when `allow_exist` is set.
    pub fn make_object_full_cow(&mut self, source: ObjectId, dest: ObjectId, allow_exist: bool) -> StorageResult<()> {
        if !allow_exist && self.has_object(dest) {
            return Err(StorageError::ObjectExists(dest));
        }
        let copy = self
            .objects
            .get(&source)
            .ok_or(StorageError::ObjectNotFound(source))?
            .make_copy_on_write(dest);
        self.objects.insert(dest, copy);
        debug!(%source, %dest, "full copy-on-write");
        Ok(())
    }

    /// Make `[offset, offset + size)` of `dest` a copy-on-write clone of the
    /// same range in `source`, creating `dest` if needed.
    ///
    /// An existing `dest` is only accepted when `allow_exist` is set.
    pub fn make_object_range_cow(
        &mut self,
        source: ObjectId,
        dest: ObjectId,
        allow_exist: bool,
        offset: usize,
        size: usize,
    ) -> StorageResult<()> {
        let end = match offset.checked_add(size) {
            Some(end) if size > 0 => end,
            _ => return Err(StorageError::InvalidRange { offset, size }),
        };
        if !allow_exist && self.has_object(dest) {
            return Err(StorageError::ObjectExists(dest));
        }
        if source == dest {
            return Ok(());
        }
        let source_object = self
            .objects
            .remove(&source)
            .ok_or(StorageError::ObjectNotFound(source))?;
        let result = self.get_object(dest).share_range_from(&source_object, offset, end);
        self.objects.insert(source, source_object);
        if result.is_ok() {
            debug!(%source, %dest, offset, size, "range copy-on-write");
        }
        result
    }
}

impl Default for Container {
    fn default() -> Self {
        Self::new(None, 0)
    }
}

impl std::fmt::Debug for Container {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Container")
            .field("objects", &self.objects.len())
            .field("backend", &self.backend.is_some())
            .field("alignment", &self.alignment)
            .finish()
    }
}
