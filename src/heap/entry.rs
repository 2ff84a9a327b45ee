//! Heap direction and tracked-object contract

use serde::{Deserialize, Serialize};
use std::cell::Cell;
use std::fmt;
use std::rc::Rc;
use std::sync::Arc;

/// Which end of the priority range sits at the root
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum HeapKind {
    /// Smallest priority first
    Min,
    /// Largest priority first
    Max,
}

impl HeapKind {
    /// Whether `a` is strictly more extreme than `b`
    #[inline]
    pub fn outranks(self, a: i64, b: i64) -> bool {
        match self {
            HeapKind::Min => a < b,
            HeapKind::Max => a > b,
        }
    }

    /// Value stored at index 0; no priority ever outranks it
    #[inline]
    pub fn sentinel(self) -> i64 {
        match self {
            HeapKind::Min => i64::MIN,
            HeapKind::Max => i64::MAX,
        }
    }
}

impl fmt::Display for HeapKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            HeapKind::Min => f.write_str("min"),
            HeapKind::Max => f.write_str("max"),
        }
    }
}

/// An object that remembers where it sits in a heap
///
/// Position `0` means the object is not in any heap. The heap writes the
/// position on every move, so it must be settable through a shared
/// reference.
pub trait HeapObject {
    fn heap_position(&self) -> usize;

    fn set_heap_position(&self, position: usize);

    /// Whether `self` and `other` denote the same tracked object
    ///
    /// Handle types compare what they point at.
    fn same_object(&self, other: &Self) -> bool {
        std::ptr::eq(self, other)
    }
}

/// Position field to embed in tracked objects
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct HeapPosition(Cell<usize>);

impl HeapPosition {
    pub fn new() -> Self {
        Self(Cell::new(0))
    }

    /// Whether the owner currently sits in a heap
    pub fn is_tracked(&self) -> bool {
        self.0.get() != 0
    }
}

impl HeapObject for HeapPosition {
    fn heap_position(&self) -> usize {
        self.0.get()
    }

    fn set_heap_position(&self, position: usize) {
        self.0.set(position);
    }
}

impl<T: HeapObject + ?Sized> HeapObject for &T {
    fn heap_position(&self) -> usize {
        (**self).heap_position()
    }

    fn set_heap_position(&self, position: usize) {
        (**self).set_heap_position(position)
    }

    fn same_object(&self, other: &Self) -> bool {
        std::ptr::eq(*self, *other)
    }
}

impl<T: HeapObject + ?Sized> HeapObject for Rc<T> {
    fn heap_position(&self) -> usize {
        (**self).heap_position()
    }

    fn set_heap_position(&self, position: usize) {
        (**self).set_heap_position(position)
    }

    fn same_object(&self, other: &Self) -> bool {
        Rc::ptr_eq(self, other)
    }
}

impl<T: HeapObject + ?Sized> HeapObject for Arc<T> {
    fn heap_position(&self) -> usize {
        (**self).heap_position()
    }

    fn set_heap_position(&self, position: usize) {
        (**self).set_heap_position(position)
    }

    fn same_object(&self, other: &Self) -> bool {
        Arc::ptr_eq(self, other)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_outranks() {
        assert!(HeapKind::Max.outranks(9, 5));
        assert!(!HeapKind::Max.outranks(5, 5));
        assert!(HeapKind::Min.outranks(1, 5));
        assert!(!HeapKind::Min.outranks(5, 5));
    }

    #[test]
    fn test_sentinel_never_outranked() {
        for kind in [HeapKind::Min, HeapKind::Max] {
            for p in [i64::MIN, -1, 0, 1, i64::MAX] {
                assert!(!kind.outranks(p, kind.sentinel()), "{} {}", kind, p);
            }
        }
    }

    #[test]
    fn test_position_through_rc() {
        let pos = Rc::new(HeapPosition::new());
        assert!(!pos.is_tracked());
        let alias = Rc::clone(&pos);
        alias.set_heap_position(4);
        assert_eq!(pos.heap_position(), 4);
        assert!(pos.is_tracked());
    }

    #[test]
    fn test_same_object_through_handles() {
        let a = Rc::new(HeapPosition::new());
        let b = Rc::new(HeapPosition::new());
        assert!(Rc::clone(&a).same_object(&a));
        assert!(!a.same_object(&b));

        let shared = Arc::new(HeapPosition::new());
        assert!(Arc::clone(&shared).same_object(&shared));
        let (first, second): (&HeapPosition, &HeapPosition) = (&a, &a);
        assert!(HeapObject::same_object(&first, &second));
        assert!(!HeapObject::same_object(&first, &&*b));
    }
}
