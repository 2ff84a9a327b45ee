//! Binary Priority Heap
//!
//! # Layout
//!
//! ```text
//! index:     0         1    2    3    4    5
//! priority: [+inf]    [9]  [7]  [5]  [3]  [1]      (max heap)
//!            sentinel  │    │    └─ children of 1: 2, 3
//!                      root └─ children of 2: 4, 5
//! ```
//!
//! Objects carry their own slot index ([`HeapObject`]), which the heap
//! rewrites on every move. That makes changing the priority of an
//! arbitrary entry O(log n): read the position, update, swim or sink.

pub mod binary;
pub mod entry;

pub use binary::{PriorityHeap, START_SIZE};
pub use entry::{HeapKind, HeapObject, HeapPosition};
