//! Runtime-sized free lists
//!
//! A factory is a fixed-size list whose element size is picked at run
//! time. It is registered as soon as it is created and can be destroyed on
//! its own once nothing allocated from it is outstanding.

use super::raw::RawAllocator;
use super::registry::{FreeList, GcRegistry, ListKind, Recycle, Registries};
use super::regular::FixedPool;
use super::slot::{SlotArena, SlotId};
use crate::error::{Error, Result};

#[derive(Debug)]
pub struct FactoryFreeList {
    name: String,
    pool: FixedPool,
}

impl FactoryFreeList {
    pub fn new(element_size: usize) -> Result<Self> {
        if element_size == 0 {
            return Err(Error::InvalidArgument(
                "factory element size must be non-zero".to_string(),
            ));
        }
        let pool = FixedPool::new(element_size);
        Ok(Self {
            name: format!("factory({}B)", pool.element_size()),
            pool,
        })
    }
}

impl FreeList for FactoryFreeList {
    const KIND: ListKind = ListKind::Factory;
    const DISCARD_ON_TERMINATE: bool = true;

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
        true
    }

    fn deregister(&mut self) {}

    fn collect(&mut self, raw: &mut dyn RawAllocator) -> Result<usize> {
        self.pool.collect(raw)
    }

    fn registry(lists: &Registries) -> &GcRegistry<Self> {
        &lists.factory
    }

    fn registry_mut(lists: &mut Registries) -> &mut GcRegistry<Self> {
        &mut lists.factory
    }
}

impl Recycle for FactoryFreeList {
    fn register(&mut self) -> bool {
        false
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
