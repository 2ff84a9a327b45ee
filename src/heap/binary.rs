//! Array-backed binary heap with position tracking

use super::entry::{HeapKind, HeapObject};
use crate::error::{Error, Result};
use std::mem;
use tracing::trace;

/// Slots allocated at creation, not counting the sentinel
pub const START_SIZE: usize = 16;

#[derive(Debug)]
struct HeapEntry<T> {
    priority: i64,
    object: Option<T>,
}

impl<T> HeapEntry<T> {
    fn vacant() -> Self {
        Self {
            priority: 0,
            object: None,
        }
    }
}

/// Binary min- or max-heap over objects carrying their own position
///
/// Entries live at indices `1..=count`; index 0 holds a sentinel no
/// priority outranks. Every time an entry moves, its object's position is
/// rewritten, so any tracked object can have its priority changed in
/// O(log n) without a search. Objects leaving the heap get position 0.
#[derive(Debug)]
pub struct PriorityHeap<T: HeapObject> {
    kind: HeapKind,
    count: usize,
    /// `capacity` slots, sentinel included
    entries: Vec<HeapEntry<T>>,
}

impl<T: HeapObject> PriorityHeap<T> {
    pub fn new(kind: HeapKind) -> Result<Self> {
        let mut entries = Vec::new();
        entries
            .try_reserve_exact(START_SIZE + 1)
            .map_err(|_| Error::OutOfMemory("heap backing array".to_string()))?;
        entries.push(HeapEntry {
            priority: kind.sentinel(),
            object: None,
        });
        entries.resize_with(START_SIZE + 1, HeapEntry::vacant);
        Ok(Self {
            kind,
            count: 0,
            entries,
        })
    }

    pub fn kind(&self) -> HeapKind {
        self.kind
    }

    /// Entries in the heap
    pub fn count(&self) -> usize {
        self.count
    }

    pub fn is_empty(&self) -> bool {
        self.count == 0
    }

    /// Allocated slots, sentinel included
    pub fn capacity(&self) -> usize {
        self.entries.len()
    }

    /// Add `object` with `priority`
    ///
    /// Capacity is grown before the entry is counted, so a failed grow
    /// leaves the heap untouched.
    pub fn insert(&mut self, priority: i64, object: T) -> Result<()> {
        if self.count + 1 >= self.capacity() {
            self.grow()?;
        }

        self.count += 1;
        let loc = self.count;
        object.set_heap_position(loc);
        self.entries[loc] = HeapEntry {
            priority,
            object: Some(object),
        };
        self.swim(loc);
        trace!(kind = %self.kind, priority, count = self.count, "Heap insert");
        Ok(())
    }

    /// Priority at the root
    pub fn peek(&self) -> Result<i64> {
        self.peek_entry().map(|(priority, _)| priority)
    }

    /// Priority and object at the root
    pub fn peek_entry(&self) -> Result<(i64, &T)> {
        if self.count == 0 {
            return Err(Error::EmptyHeap);
        }
        let root = &self.entries[1];
        root.object
            .as_ref()
            .map(|object| (root.priority, object))
            .ok_or_else(|| Error::CorruptState("heap root has no object".to_string()))
    }

    /// Remove the root, returning its priority and object
    pub fn extract(&mut self) -> Result<(i64, T)> {
        if self.count == 0 {
            return Err(Error::EmptyHeap);
        }

        let last = self.count;
        self.entries.swap(1, last);
        let root = mem::replace(&mut self.entries[last], HeapEntry::vacant());
        self.count -= 1;

        if self.count > 0 {
            self.sink(1);
        }

        let object = root
            .object
            .ok_or_else(|| Error::CorruptState("heap root has no object".to_string()))?;
        object.set_heap_position(0);
        trace!(kind = %self.kind, priority = root.priority, count = self.count, "Heap extract");
        Ok((root.priority, object))
    }

    /// Set the priority of a tracked object
    pub fn change_priority(&mut self, object: &T, priority: i64) -> Result<()> {
        let loc = self.position_of(object)?;
        let old = mem::replace(&mut self.entries[loc].priority, priority);

        if self.kind.outranks(priority, old) {
            self.swim(loc);
        } else if self.kind.outranks(old, priority) {
            self.sink(loc);
        }
        Ok(())
    }

    /// Raise a tracked object's priority by `amount`
    pub fn increase_priority(&mut self, object: &T, amount: u64) -> Result<()> {
        let loc = self.position_of(object)?;
        let old = self.entries[loc].priority;
        self.entries[loc].priority = old.checked_add_unsigned(amount).ok_or_else(|| {
            Error::InvalidArgument(format!("priority {} + {} overflows", old, amount))
        })?;

        match self.kind {
            HeapKind::Max => self.swim(loc),
            HeapKind::Min => self.sink(loc),
        }
        Ok(())
    }

    /// Lower a tracked object's priority by `amount`
    pub fn decrease_priority(&mut self, object: &T, amount: u64) -> Result<()> {
        let loc = self.position_of(object)?;
        let old = self.entries[loc].priority;
        self.entries[loc].priority = old.checked_sub_unsigned(amount).ok_or_else(|| {
            Error::InvalidArgument(format!("priority {} - {} overflows", old, amount))
        })?;

        match self.kind {
            HeapKind::Max => self.sink(loc),
            HeapKind::Min => self.swim(loc),
        }
        Ok(())
    }

    /// Priority and object at `position`, for `1 <= position <= count`
    pub fn entry(&self, position: usize) -> Option<(i64, &T)> {
        if position == 0 || position > self.count {
            return None;
        }
        let entry = &self.entries[position];
        entry.object.as_ref().map(|object| (entry.priority, object))
    }

    /// Priorities in array order
    pub fn priorities(&self) -> Vec<i64> {
        self.entries[1..=self.count]
            .iter()
            .map(|e| e.priority)
            .collect()
    }

    /// Verify the heap property, position tracking and capacity bound
    pub fn check_invariants(&self) -> Result<()> {
        if self.count >= self.capacity() {
            return Err(Error::CorruptState(format!(
                "count {} not below capacity {}",
                self.count,
                self.capacity()
            )));
        }
        if self.entries[0].priority != self.kind.sentinel() || self.entries[0].object.is_some() {
            return Err(Error::CorruptState("heap sentinel overwritten".to_string()));
        }

        for loc in 1..=self.count {
            let entry = &self.entries[loc];
            let object = entry
                .object
                .as_ref()
                .ok_or_else(|| Error::CorruptState(format!("heap slot {} is empty", loc)))?;
            if object.heap_position() != loc {
                return Err(Error::CorruptState(format!(
                    "object at slot {} records position {}",
                    loc,
                    object.heap_position()
                )));
            }
            for child in [2 * loc, 2 * loc + 1] {
                if child > self.count {
                    break;
                }
                let priority = self.entries[child].priority;
                if self.kind.outranks(priority, entry.priority) {
                    return Err(Error::CorruptState(format!(
                        "slot {} ({}) outranks its parent {} ({})",
                        child, priority, loc, entry.priority
                    )));
                }
            }
        }
        Ok(())
    }

    /// Release the heap, dropping the handles it still holds
    ///
    /// Objects are not touched; a position they still record names no
    /// entry of any live heap.
    pub fn close(self) {
        trace!(kind = %self.kind, count = self.count, "Heap closed");
    }

    fn position_of(&self, object: &T) -> Result<usize> {
        let loc = object.heap_position();
        if loc == 0 || loc > self.count {
            return Err(Error::InvalidArgument(format!(
                "heap position {} outside [1, {}]",
                loc, self.count
            )));
        }
        match &self.entries[loc].object {
            Some(held) if held.same_object(object) => Ok(loc),
            _ => Err(Error::InvalidArgument(format!(
                "object at heap position {} is not tracked by this heap",
                loc
            ))),
        }
    }

    fn grow(&mut self) -> Result<()> {
        let capacity = self.capacity();
        let new_capacity = START_SIZE.max(2 * (capacity - 1)) + 1;
        self.entries
            .try_reserve_exact(new_capacity - capacity)
            .map_err(|_| Error::OutOfMemory(format!("heap growth to {} slots", new_capacity)))?;
        self.entries.resize_with(new_capacity, HeapEntry::vacant);
        trace!(capacity = new_capacity, "Heap grown");
        Ok(())
    }

    /// Move the entry at `loc` toward the root while it outranks its parent
    fn swim(&mut self, mut loc: usize) {
        let priority = self.entries[loc].priority;
        while self.kind.outranks(priority, self.entries[loc / 2].priority) {
            self.entries.swap(loc, loc / 2);
            self.track(loc);
            loc /= 2;
        }
        self.track(loc);
    }

    /// Move the entry at `loc` away from the root while a child outranks it
    fn sink(&mut self, mut loc: usize) {
        loop {
            let left = 2 * loc;
            if left > self.count {
                break;
            }
            let right = left + 1;
            let child = if right <= self.count
                && self
                    .kind
                    .outranks(self.entries[right].priority, self.entries[left].priority)
            {
                right
            } else {
                left
            };

            if !self
                .kind
                .outranks(self.entries[child].priority, self.entries[loc].priority)
            {
                break;
            }
            self.entries.swap(loc, child);
            self.track(loc);
            loc = child;
        }
        self.track(loc);
    }

    fn track(&self, loc: usize) {
        if let Some(object) = &self.entries[loc].object {
            object.set_heap_position(loc);
        }
    }
}
