//! Object identifiers and per-object byte ranges

use crate::range::{Collide, Range};
use crate::range_set::RangeList;
use std::fmt;

/// Identifier of a stored object.
///
/// Ordered by `high` first, then `low`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub struct ObjectId {
    /// High part
    pub high: i64,
    /// Low part
    pub low: i64,
}

impl ObjectId {
    /// Create an id from its two halves.
    pub const fn new(high: i64, low: i64) -> Self {
        Self { high, low }
    }
}

impl fmt::Display for ObjectId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.high, self.low)
    }
}

/// A byte range inside one object.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ObjectRange {
    /// Object the range belongs to
    pub object_id: ObjectId,
    /// Bytes covered inside the object
    pub range: Range,
}

impl ObjectRange {
    /// Create a range of `size` bytes at `offset` in `object_id`.
    pub fn new(object_id: ObjectId, offset: usize, size: usize) -> Self {
        Self {
            object_id,
            range: Range::new(offset, size),
        }
    }

    /// Range covering every byte from `offset` to the end of the object.
    ///
    /// `None` when no byte lies past `offset`.
    pub fn to_end(object_id: ObjectId, offset: usize) -> Option<Self> {
        (offset < usize::MAX).then(|| Self::new(object_id, offset, usize::MAX - offset))
    }

    /// Range named by a client request, where a `size` of 0 stands for the
    /// rest of the object.
    ///
    /// `None` when the range overflows or covers no byte.
    pub fn requested(object_id: ObjectId, offset: usize, size: usize) -> Option<Self> {
        match size {
            0 => Self::to_end(object_id, offset),
            _ => offset.checked_add(size).map(|_| Self::new(object_id, offset, size)),
        }
    }
}

impl Collide for ObjectRange {
    fn collide(&self, other: &ObjectRange) -> bool {
        self.object_id == other.object_id && self.range.collide(&other.range)
    }

    fn byte_range(&self) -> Range {
        self.range
    }
}

impl fmt::Display for ObjectRange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}{}", self.object_id, self.range)
    }
}

/// Set of object ranges touched by one task.
pub type ObjectRangeSet = RangeList<ObjectRange>;

impl ObjectRangeSet {
    /// Build a complete set holding a single range.
    pub fn single(range: ObjectRange) -> Self {
        let mut set = Self::new(1);
        set.push(range);
        set
    }
}

impl Default for ObjectRangeSet {
    fn default() -> Self {
        Self::new(0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const OBJ_A: ObjectId = ObjectId::new(10, 20);
    const OBJ_B: ObjectId = ObjectId::new(10, 21);

    #[test]
    fn test_object_id_ordering() {
        assert!(ObjectId::new(1, 100) < ObjectId::new(2, 0));
        assert!(ObjectId::new(1, 1) < ObjectId::new(1, 2));
        assert_eq!(ObjectId::new(5, 6), ObjectId::new(5, 6));
    }

    #[test]
    fn test_same_object_overlap_collides() {
        let a = ObjectRange::new(OBJ_A, 0, 100);
        let b = ObjectRange::new(OBJ_A, 50, 100);
        assert!(a.collide(&b));
        assert!(!a.collide(&ObjectRange::new(OBJ_A, 100, 10)));
    }

    #[test]
    fn test_different_objects_never_collide() {
        let a = ObjectRange::new(OBJ_A, 0, 100);
        let b = ObjectRange::new(OBJ_B, 0, 100);
        assert!(!a.collide(&b));
        assert!(!b.collide(&a));
    }

    #[test]
    fn test_to_end_covers_tail() {
        let whole = ObjectRange::to_end(OBJ_A, 0).unwrap();
        assert!(whole.collide(&ObjectRange::new(OBJ_A, usize::MAX - 2, 1)));
        let tail = ObjectRange::to_end(OBJ_A, 4096).unwrap();
        assert!(!tail.collide(&ObjectRange::new(OBJ_A, 0, 4096)));
    }

    #[test]
    fn test_to_end_past_last_byte_is_none() {
        assert!(ObjectRange::to_end(OBJ_A, usize::MAX).is_none());
        assert!(ObjectRange::to_end(OBJ_A, usize::MAX - 1).is_some());
    }

    #[test]
    fn test_requested_ranges() {
        assert_eq!(ObjectRange::requested(OBJ_A, 8, 4), Some(ObjectRange::new(OBJ_A, 8, 4)));
        assert_eq!(ObjectRange::requested(OBJ_A, 8, 0), ObjectRange::to_end(OBJ_A, 8));
        assert!(ObjectRange::requested(OBJ_A, usize::MAX, 0).is_none());
        assert!(ObjectRange::requested(OBJ_A, usize::MAX, 2).is_none());
    }

    #[test]
    fn test_set_collision() {
        let mut cow = ObjectRangeSet::new(2);
        cow.push(ObjectRange::to_end(OBJ_A, 0).unwrap());
        cow.push(ObjectRange::to_end(OBJ_B, 0).unwrap());

        let read_b = ObjectRangeSet::single(ObjectRange::new(OBJ_B, 10, 10));
        let other = ObjectRangeSet::single(ObjectRange::new(ObjectId::new(0, 0), 10, 10));
        assert!(cow.collide(&read_b));
        assert!(!cow.collide(&other));
    }

    #[test]
    #[should_panic(expected = "declared entries")]
    fn test_set_push_past_capacity_panics() {
        let mut set = ObjectRangeSet::single(ObjectRange::new(OBJ_A, 0, 1));
        set.push(ObjectRange::new(OBJ_A, 1, 1));
    }

    #[test]
    fn test_display() {
        let range = ObjectRange::new(OBJ_A, 0, 8);
        assert_eq!(range.to_string(), "10:20[0..8)");
    }
}
