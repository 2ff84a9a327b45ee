//! Array free lists
//!
//! Blocks hold a header of `base_size` bytes followed by `n` elements of
//! `element_size` bytes, `n` in `[0, max_elements]`. Each element count has
//! its own free stack, so a bucket only ever returns blocks of its size.

use super::raw::RawAllocator;
use super::registry::{FreeList, GcRegistry, ListKind, Recycle, Registries};
use super::slot::{SlotArena, SlotId};
use crate::error::{Error, Result};
use std::mem;

#[derive(Debug)]
pub struct ArrayFreeList {
    name: String,
    base_size: usize,
    element_size: usize,
    max_elements: usize,
    initialized: bool,
    /// Free stacks indexed by element count, grown on demand
    buckets: Vec<Vec<u32>>,
    arena: SlotArena,
}

impl ArrayFreeList {
    pub fn new(
        name: impl Into<String>,
        base_size: usize,
        element_size: usize,
        max_elements: usize,
    ) -> Self {
        Self {
            name: name.into(),
            base_size,
            element_size,
            max_elements,
            initialized: false,
            buckets: Vec::new(),
            arena: SlotArena::new(),
        }
    }
}

impl FreeList for ArrayFreeList {
    const KIND: ListKind = ListKind::Array;
    const DISCARD_ON_TERMINATE: bool = false;

    fn name(&self) -> &str {
        &self.name
    }

    fn element_size(&self) -> Option<usize> {
        Some(self.element_size)
    }

    fn arena(&self) -> &SlotArena {
        &self.arena
    }

    fn arena_mut(&mut self) -> &mut SlotArena {
        &mut self.arena
    }

    fn is_registered(&self) -> bool {
        self.initialized
    }

    fn deregister(&mut self) {
        self.initialized = false;
    }

    fn collect(&mut self, raw: &mut dyn RawAllocator) -> Result<usize> {
        let mut reclaimed = 0;
        for bucket in &mut self.buckets {
            while let Some(index) = bucket.pop() {
                let block = self.arena.reclaim(index)?;
                reclaimed += block.len();
                raw.release(block);
            }
        }
        Ok(reclaimed)
    }

    fn registry(lists: &Registries) -> &GcRegistry<Self> {
        &lists.array
    }

    fn registry_mut(lists: &mut Registries) -> &mut GcRegistry<Self> {
        &mut lists.array
    }
}

impl Recycle for ArrayFreeList {
    fn register(&mut self) -> bool {
        !mem::replace(&mut self.initialized, true)
    }

    fn block_size(&self, n: usize) -> Result<usize> {
        if n > self.max_elements {
            return Err(Error::InvalidArgument(format!(
                "{} elements requested from '{}' which holds at most {}",
                n, self.name, self.max_elements
            )));
        }
        let size = self
            .element_size
            .checked_mul(n)
            .and_then(|bytes| bytes.checked_add(self.base_size))
            .ok_or_else(|| {
                Error::InvalidArgument(format!("array of {} elements overflows usize", n))
            })?;
        if size == 0 {
            return Err(Error::InvalidArgument(format!(
                "array of {} elements from '{}' would be empty",
                n, self.name
            )));
        }
        Ok(size)
    }

    fn pop_free(&mut self, n: usize) -> Result<Option<u32>> {
        Ok(self.buckets.get_mut(n).and_then(Vec::pop))
    }

    fn push_free(&mut self, slot: SlotId) -> Result<usize> {
        let (n, size) = self.arena.release(slot)?;
        if self.buckets.len() <= n {
            self.buckets
                .try_reserve(n + 1 - self.buckets.len())
                .map_err(|_| Error::OutOfMemory(format!("bucket table of '{}'", self.name)))?;
            self.buckets.resize_with(n + 1, Vec::new);
        }
        self.buckets[n].push(slot.index);
        Ok(size)
    }
}
