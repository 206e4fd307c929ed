//! Byte ranges and the collision primitive shared by every range set

use std::fmt;

/// Anything that can be tested for overlap against a value of its own kind.
pub trait Collide {
    /// Whether the two values overlap.
    fn collide(&self, other: &Self) -> bool;

    /// Byte range covered, whatever address space it lives in.
    fn byte_range(&self) -> Range;
}

/// A half-open interval `[offset, offset + size)` in an address space.
///
/// Used both for object byte ranges and for memory ranges (buffer addresses).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct Range {
    /// First byte covered
    pub offset: usize,
    /// Number of bytes covered
    pub size: usize,
}

/// A range expressed in process addresses.
pub type MemRange = Range;

impl Range {
    /// Create a range. Panics if `offset + size` overflows.
    pub fn new(offset: usize, size: usize) -> Self {
        assert!(
            offset.checked_add(size).is_some(),
            "range {offset}+{size} overflows the address space"
        );
        Self { offset, size }
    }

    /// Range covering the bytes of a slice, keyed by its address.
    pub fn of_slice(data: &[u8]) -> Self {
        Self::new(data.as_ptr() as usize, data.len())
    }

    /// One past the last byte covered.
    pub fn end(&self) -> usize {
        self.offset + self.size
    }

    /// Whether the range covers no byte.
    pub fn is_empty(&self) -> bool {
        self.size == 0
    }

    /// Overlapping part of two colliding ranges.
    ///
    /// Panics if the ranges do not collide.
    pub fn intersect(&self, other: &Range) -> Range {
        assert!(
            self.collide(other),
            "cannot intersect disjoint ranges {self} and {other}"
        );
        let offset = self.offset.max(other.offset);
        let end = self.end().min(other.end());
        Range::new(offset, end - offset)
    }
}

impl Collide for Range {
    fn collide(&self, other: &Range) -> bool {
        !(other.end() <= self.offset || other.offset >= self.end())
    }

    fn byte_range(&self) -> Range {
        *self
    }
}

impl fmt::Display for Range {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}..{})", self.offset, self.end())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn test_collide_overlapping() {
        let a = Range::new(0, 100);
        let b = Range::new(50, 100);
        assert!(a.collide(&b));
        assert!(b.collide(&a));
    }

    #[test]
    fn test_touching_ranges_do_not_collide() {
        let a = Range::new(0, 100);
        let b = Range::new(100, 10);
        assert!(!a.collide(&b));
        assert!(!b.collide(&a));
    }

    #[test]
    fn test_contained_range_collides() {
        let outer = Range::new(10, 100);
        let inner = Range::new(20, 5);
        assert!(outer.collide(&inner));
        assert!(inner.collide(&outer));
    }

    #[test]
    fn test_intersect() {
        let a = Range::new(0, 100);
        let b = Range::new(50, 100);
        assert_eq!(a.intersect(&b), Range::new(50, 50));
        assert_eq!(b.intersect(&a), Range::new(50, 50));

        let inner = Range::new(20, 5);
        assert_eq!(a.intersect(&inner), inner);
    }

    #[test]
    #[should_panic(expected = "disjoint")]
    fn test_intersect_disjoint_panics() {
        Range::new(0, 10).intersect(&Range::new(20, 10));
    }

    #[test]
    #[should_panic(expected = "overflows")]
    fn test_overflow_panics() {
        Range::new(usize::MAX, 2);
    }

    #[test]
    fn test_full_address_space() {
        let all = Range::new(0, usize::MAX);
        assert_eq!(all.end(), usize::MAX);
        assert!(all.collide(&Range::new(usize::MAX - 10, 5)));
    }

    #[test]
    fn test_display() {
        assert_eq!(Range::new(4, 4).to_string(), "[4..8)");
    }

    proptest! {
        #[test]
        fn prop_collide_is_symmetric(
            a_off in 0usize..1000, a_len in 1usize..500,
            b_off in 0usize..1000, b_len in 1usize..500,
        ) {
            let a = Range::new(a_off, a_len);
            let b = Range::new(b_off, b_len);
            prop_assert_eq!(a.collide(&b), b.collide(&a));
        }

        #[test]
        fn prop_disjoint_when_separated(
            a_off in 0usize..1000, a_len in 1usize..500,
            b_off in 0usize..1000, b_len in 1usize..500,
        ) {
            let a = Range::new(a_off, a_len);
            let b = Range::new(b_off, b_len);
            let separated = a.end() <= b.offset || b.end() <= a.offset;
            prop_assert_eq!(a.collide(&b), !separated);
            if !separated {
                let i = a.intersect(&b);
                prop_assert!(i.size > 0);
                prop_assert!(i.offset >= a.offset && i.end() <= a.end());
                prop_assert!(i.offset >= b.offset && i.end() <= b.end());
            }
        }
    }
}
