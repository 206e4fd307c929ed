//! Fixed-capacity, append-then-freeze range collections

use crate::range::{Collide, Range};
use smallvec::SmallVec;

/// Ordered list of ranges with a capacity fixed at construction.
///
/// The list is filled once, then queried: collision checks are only valid
/// once exactly `capacity` elements have been pushed. The first two entries
/// are stored inline, which covers almost every I/O request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RangeList<T> {
    items: SmallVec<[T; 2]>,
    capacity: usize,
}

/// Set of byte or memory ranges owned by one task.
pub type RangeSet = RangeList<Range>;

impl<T> RangeList<T> {
    /// Create an empty list that will hold exactly `capacity` ranges.
    pub fn new(capacity: usize) -> Self {
        Self {
            items: SmallVec::with_capacity(capacity),
            capacity,
        }
    }

    /// Number of ranges pushed so far.
    pub fn len(&self) -> usize {
        self.items.len()
    }

    /// Whether nothing has been pushed yet.
    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    /// Declared capacity.
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Whether every declared slot has been filled.
    pub fn is_ready(&self) -> bool {
        self.items.len() == self.capacity
    }

    /// Iterate over the ranges in insertion order.
    pub fn iter(&self) -> std::slice::Iter<'_, T> {
        self.items.iter()
    }

    /// Ranges as a slice.
    pub fn as_slice(&self) -> &[T] {
        &self.items
    }
}

impl<T: Collide> RangeList<T> {
    /// Append an entry. Panics past capacity or on an empty range.
    pub fn push(&mut self, item: T) {
        assert!(!item.byte_range().is_empty(), "cannot register an empty range");
        assert!(
            self.items.len() < self.capacity,
            "range list already holds its {} declared entries",
            self.capacity
        );
        self.items.push(item);
    }

    /// Whether any range of `self` collides with any range of `other`.
    ///
    /// Both lists must be complete.
    pub fn collide(&self, other: &RangeList<T>) -> bool {
        assert!(self.is_ready(), "collision query on an incomplete range list");
        assert!(other.is_ready(), "collision query on an incomplete range list");
        self.items
            .iter()
            .any(|a| other.items.iter().any(|b| a.collide(b)))
    }
}

impl RangeSet {
    /// Build a complete set from the given ranges.
    pub fn from_ranges<I>(ranges: I) -> Self
    where
        I: IntoIterator<Item = Range>,
        I::IntoIter: ExactSizeIterator,
    {
        let ranges = ranges.into_iter();
        let mut set = Self::new(ranges.len());
        for range in ranges {
            set.push(range);
        }
        set
    }
}

impl<'a, T> IntoIterator for &'a RangeList<T> {
    type Item = &'a T;
    type IntoIter = std::slice::Iter<'a, T>;

    fn into_iter(self) -> Self::IntoIter {
        self.items.iter()
    }
}

impl Default for RangeSet {
    fn default() -> Self {
        Self::new(0)
    }
}
