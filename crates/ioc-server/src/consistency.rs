//! Object ranges mapped by clients
//!
//! A client registers a range before accessing it outside of read and write
//! requests. Readers share a range; a writer excludes every other
//! registration overlapping it. Registrations do not interact with the task
//! scheduler.

use crate::protocol::{ObjRangeRegister, ObjRangeUnregister};
use ioc_scheduler::{Collide, ObjectId, Range};
use std::collections::HashMap;
use tracing::{debug, warn};

/// Access a range is registered for.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConsistencyMode {
    /// Shared with other readers
    Read,
    /// Exclusive
    Write,
}

impl ConsistencyMode {
    /// Mode matching the `write` flag of a request.
    pub fn from_write(write: bool) -> Self {
        if write {
            ConsistencyMode::Write
        } else {
            ConsistencyMode::Read
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct Registration {
    id: i32,
    range: Range,
    mode: ConsistencyMode,
}

/// Registered ranges of one object.
#[derive(Debug, Default)]
pub struct ConsistencyTracker {
    registrations: Vec<Registration>,
}

impl ConsistencyTracker {
    /// Tracker with no registration.
    pub fn new() -> Self {
        Self::default()
    }

    /// Whether `range` cannot be registered for `mode`.
    pub fn has_collision(&self, range: &Range, mode: ConsistencyMode) -> bool {
        self.registrations.iter().any(|reg| {
            reg.range.collide(range) && (reg.mode == ConsistencyMode::Write || reg.mode != mode)
        })
    }

    /// Register `range` under `id`. Returns false, registering nothing, on a
    /// collision.
    pub fn register_range(&mut self, id: i32, range: Range, mode: ConsistencyMode) -> bool {
        if self.has_collision(&range, mode) {
            return false;
        }
        self.registrations.push(Registration { id, range, mode });
        true
    }

    /// Drop registration `id` if it was made for `mode` and lies inside
    /// `range`.
    pub fn unregister_range(&mut self, id: i32, range: &Range, mode: ConsistencyMode) -> bool {
        let found = self.registrations.iter().position(|reg| {
            reg.id == id && reg.mode == mode && reg.range.offset >= range.offset && reg.range.end() <= range.end()
        });
        match found {
            Some(index) => {
                self.registrations.remove(index);
                true
            }
            None => false,
        }
    }

    /// Number of live registrations.
    pub fn len(&self) -> usize {
        self.registrations.len()
    }

    /// Whether nothing is registered.
    pub fn is_empty(&self) -> bool {
        self.registrations.is_empty()
    }
}

/// Trackers of every object with a registration, and the id allocator.
///
/// Owned by the network thread.
#[derive(Debug, Default)]
pub struct ConsistencyRegistry {
    objects: HashMap<ObjectId, ConsistencyTracker>,
    next_id: i32,
}

impl ConsistencyRegistry {
    /// Empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Register the requested range. Returns its id, or `None` when the
    /// range is empty, overflows or collides.
    pub fn register(&mut self, req: &ObjRangeRegister) -> Option<i32> {
        let range = request_range(req.offset, req.size)?;
        let mode = ConsistencyMode::from_write(req.write);
        let id = self.next_id;
        if !self.objects.entry(req.object_id).or_default().register_range(id, range, mode) {
            debug!(object = %req.object_id, %range, ?mode, "range registration collides");
            return None;
        }
        self.next_id = self.next_id.checked_add(1).unwrap_or(0);
        debug!(object = %req.object_id, id, %range, ?mode, "range registered");
        Some(id)
    }

    /// Release a registration. Returns whether one matched.
    pub fn unregister(&mut self, req: &ObjRangeUnregister) -> bool {
        let Some(range) = request_range(req.offset, req.size) else {
            return false;
        };
        let Some(tracker) = self.objects.get_mut(&req.object_id) else {
            warn!(object = %req.object_id, id = req.id, "no range registered on object");
            return false;
        };
        let released = tracker.unregister_range(req.id, &range, ConsistencyMode::from_write(req.write));
        if tracker.is_empty() {
            self.objects.remove(&req.object_id);
        }
        released
    }

    /// Tracker of an object, if it holds any registration.
    pub fn tracker(&self, id: ObjectId) -> Option<&ConsistencyTracker> {
        self.objects.get(&id)
    }
}

fn request_range(offset: usize, size: usize) -> Option<Range> {
    if size == 0 {
        return None;
    }
    offset.checked_add(size).map(|_| Range::new(offset, size))
}
