//! Fixed-size free lists

use super::raw::RawAllocator;
use super::registry::{FreeList, GcRegistry, ListKind, Recycle, Registries};
use super::slot::{SlotArena, SlotId};
use crate::error::Result;
use std::mem;

/// Smallest element a fixed-size list hands out
pub(crate) const MIN_ELEMENT_SIZE: usize = mem::size_of::<usize>();

/// One free stack of equally sized blocks
#[derive(Debug)]
pub(crate) struct FixedPool {
    element_size: usize,
    free: Vec<u32>,
    arena: SlotArena,
}

impl FixedPool {
    pub(crate) fn new(element_size: usize) -> Self {
        Self {
            element_size: element_size.max(MIN_ELEMENT_SIZE),
            free: Vec::new(),
            arena: SlotArena::new(),
        }
    }

    pub(crate) fn element_size(&self) -> usize {
        self.element_size
    }

    pub(crate) fn arena(&self) -> &SlotArena {
        &self.arena
    }

    pub(crate) fn arena_mut(&mut self) -> &mut SlotArena {
        &mut self.arena
    }

    pub(crate) fn pop_free(&mut self) -> Option<u32> {
        self.free.pop()
    }

    pub(crate) fn push_free(&mut self, slot: SlotId) -> Result<usize> {
        let (_, size) = self.arena.release(slot)?;
        self.free.push(slot.index);
        Ok(size)
    }

    pub(crate) fn collect(&mut self, raw: &mut dyn RawAllocator) -> Result<usize> {
        let mut reclaimed = 0;
        while let Some(index) = self.free.pop() {
            let block = self.arena.reclaim(index)?;
            reclaimed += block.len();
            raw.release(block);
        }
        Ok(reclaimed)
    }
}

/// Free list for one fixed element size, declared up front
///
/// The list joins the regular GC registry on its first allocation and
/// leaves it again at teardown when nothing is outstanding.
#[derive(Debug)]
pub struct RegularFreeList {
    name: String,
    initialized: bool,
    pool: FixedPool,
}

impl RegularFreeList {
    /// Element sizes below a machine word are rounded up
    pub fn new(name: impl Into<String>, element_size: usize) -> Self {
        Self {
            name: name.into(),
            initialized: false,
            pool: FixedPool::new(element_size),
        }
    }
}

impl FreeList for RegularFreeList {
    const KIND: ListKind = ListKind::Regular;
    const DISCARD_ON_TERMINATE: bool = false;

    fn name(&self) -> &str {
        &self.name
    }

    fn element_size(&self) -> Option<usize> {
        Some(self.pool.element_size())
    }

    fn arena(&self) -> &SlotArena {
        self.pool.arena()
    }

    fn arena_mut(&mut self) -> &mut SlotArena {
        self.pool.arena_mut()
    }

    fn is_registered(&self) -> bool {
        self.initialized
    }

    fn deregister(&mut self) {
        self.initialized = false;
    }

    fn collect(&mut self, raw: &mut dyn RawAllocator) -> Result<usize> {
        self.pool.collect(raw)
    }

    fn registry(lists: &Registries) -> &GcRegistry<Self> {
        &lists.regular
    }

    fn registry_mut(lists: &mut Registries) -> &mut GcRegistry<Self> {
        &mut lists.regular
    }
}

impl Recycle for RegularFreeList {
    fn register(&mut self) -> bool {
        !mem::replace(&mut self.initialized, true)
    }

    fn block_size(&self, _key: usize) -> Result<usize> {
        Ok(self.pool.element_size())
    }

    fn pop_free(&mut self, _key: usize) -> Result<Option<u32>> {
        Ok(self.pool.pop_free())
    }

    fn push_free(&mut self, slot: SlotId) -> Result<usize> {
        self.pool.push_free(slot)
    }
}
