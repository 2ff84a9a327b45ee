//! Garbage-collection registries
//!
//! One [`GcRegistry`] per list kind owns the lists of that kind and keeps
//! the running total of bytes they cache (`mem_freed`). The global
//! ceiling of a kind is checked against that total.

use super::array::ArrayFreeList;
use super::block::BlockFreeList;
use super::factory::FactoryFreeList;
use super::raw::RawAllocator;
use super::regular::RegularFreeList;
use super::slot::{SlotArena, SlotId};
use crate::error::{Error, Result};
use serde::Serialize;
use std::fmt;
use std::hash::{Hash, Hasher};
use std::marker::PhantomData;
use tracing::{debug, info, warn};

/// The four free-list flavours
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ListKind {
    Regular,
    Array,
    Block,
    Factory,
}

impl ListKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ListKind::Regular => "regular",
            ListKind::Array => "array",
            ListKind::Block => "block",
            ListKind::Factory => "factory",
        }
    }
}

impl fmt::Display for ListKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Generation-checked handle to a list inside a registry
pub struct ListId<L> {
    index: u32,
    generation: u32,
    marker: PhantomData<fn() -> L>,
}

impl<L> ListId<L> {
    fn new(index: u32, generation: u32) -> Self {
        Self {
            index,
            generation,
            marker: PhantomData,
        }
    }

    pub fn index(&self) -> u32 {
        self.index
    }

    pub fn generation(&self) -> u32 {
        self.generation
    }
}

impl<L> Clone for ListId<L> {
    fn clone(&self) -> Self {
        *self
    }
}

impl<L> Copy for ListId<L> {}

impl<L> PartialEq for ListId<L> {
    fn eq(&self, other: &Self) -> bool {
        self.index == other.index && self.generation == other.generation
    }
}

impl<L> Eq for ListId<L> {}

impl<L> Hash for ListId<L> {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.index.hash(state);
        self.generation.hash(state);
    }
}

impl<L: FreeList> fmt::Debug for ListId<L> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}List({}/{})", L::KIND, self.index, self.generation)
    }
}

/// A block checked out of a free list
///
/// Move-only: freeing or reallocating consumes it. Dropping it without
/// freeing leaves the block outstanding, which teardown reports.
#[must_use = "dropping an allocation leaks it until teardown"]
pub struct Allocation<L> {
    list: ListId<L>,
    slot: SlotId,
}

impl<L> Allocation<L> {
    pub(crate) fn new(list: ListId<L>, slot: SlotId) -> Self {
        Self { list, slot }
    }

    /// List the block came from
    pub fn list(&self) -> ListId<L> {
        self.list
    }

    pub fn slot(&self) -> SlotId {
        self.slot
    }
}

impl<L: FreeList> fmt::Debug for Allocation<L> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Allocation")
            .field("list", &self.list)
            .field("slot", &self.slot)
            .finish()
    }
}

/// Snapshot of one list's counters
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ListStats {
    pub name: String,
    pub kind: ListKind,
    /// Fixed element size, for kinds that have one
    pub element_size: Option<usize>,
    /// Blocks cached on the free stacks
    pub on_list: usize,
    /// Raw blocks held: outstanding plus cached
    pub allocated: usize,
    /// Blocks checked out to callers
    pub outstanding: usize,
    /// Bytes cached on the free stacks
    pub cached_bytes: usize,
    /// Whether the list is on its kind's GC registry
    pub registered: bool,
}

/// Snapshot of one registry
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct KindStats {
    pub kind: ListKind,
    /// Bytes cached across every list of the kind
    pub mem_freed: usize,
    pub lists: Vec<ListStats>,
}

mod sealed {
    pub trait Sealed {}
    impl Sealed for super::RegularFreeList {}
    impl Sealed for super::ArrayFreeList {}
    impl Sealed for super::BlockFreeList {}
    impl Sealed for super::FactoryFreeList {}
}

/// Behaviour shared by the four list kinds
pub trait FreeList: sealed::Sealed + Sized + 'static {
    const KIND: ListKind;

    /// Whether teardown drops the list entirely instead of deregistering it
    const DISCARD_ON_TERMINATE: bool;

    fn name(&self) -> &str;

    fn element_size(&self) -> Option<usize>;

    fn arena(&self) -> &SlotArena;

    fn arena_mut(&mut self) -> &mut SlotArena;

    fn is_registered(&self) -> bool;

    /// Drop off the GC registry; the next allocation registers again
    fn deregister(&mut self);

    /// Return every cached buffer to `raw`, returning the bytes reclaimed
    fn collect(&mut self, raw: &mut dyn RawAllocator) -> Result<usize>;

    fn registry(lists: &Registries) -> &GcRegistry<Self>;

    fn registry_mut(lists: &mut Registries) -> &mut GcRegistry<Self>;

    fn stats(&self) -> ListStats {
        let arena = self.arena();
        ListStats {
            name: self.name().to_string(),
            kind: Self::KIND,
            element_size: self.element_size(),
            on_list: arena.cached(),
            allocated: arena.live() + arena.cached(),
            outstanding: arena.live(),
            cached_bytes: arena.cached_bytes(),
            registered: self.is_registered(),
        }
    }
}

/// Free-stack operations the manager drives
pub(crate) trait Recycle: FreeList {
    /// Join the GC registry; true when the list was not registered yet
    fn register(&mut self) -> bool;

    /// Size in bytes of a block for `key` (element count, byte size, or
    /// ignored for fixed-size lists)
    fn block_size(&self, key: usize) -> Result<usize>;

    /// Pop a cached slot index for `key`
    fn pop_free(&mut self, key: usize) -> Result<Option<u32>>;

    /// Park a live slot on its free stack; returns the bytes cached
    fn push_free(&mut self, slot: SlotId) -> Result<usize>;
}

struct RegistryEntry<L> {
    generation: u32,
    list: Option<L>,
}

/// Lists of one kind plus their cached-byte total
pub struct GcRegistry<L> {
    entries: Vec<RegistryEntry<L>>,
    vacant: Vec<u32>,
    mem_freed: usize,
}

impl<L: FreeList> GcRegistry<L> {
    pub(crate) fn new() -> Self {
        Self {
            entries: Vec::new(),
            vacant: Vec::new(),
            mem_freed: 0,
        }
    }

    /// Bytes cached across every list of this kind
    pub fn mem_freed(&self) -> usize {
        self.mem_freed
    }

    pub(crate) fn note_cached(&mut self, bytes: usize) {
        self.mem_freed += bytes;
    }

    pub(crate) fn note_recycled(&mut self, bytes: usize) {
        self.mem_freed = self.mem_freed.saturating_sub(bytes);
    }

    /// Store a list, reusing a vacated entry when one exists
    pub(crate) fn insert(&mut self, list: L) -> Result<ListId<L>> {
        if let Some(index) = self.vacant.pop() {
            let entry = &mut self.entries[index as usize];
            entry.list = Some(list);
            return Ok(ListId::new(index, entry.generation));
        }

        let index = u32::try_from(self.entries.len())
            .map_err(|_| Error::OutOfMemory(format!("{} registry exhausted", L::KIND)))?;
        self.entries
            .try_reserve(1)
            .map_err(|_| Error::OutOfMemory(format!("{} registry entry", L::KIND)))?;
        self.entries.push(RegistryEntry {
            generation: 0,
            list: Some(list),
        });
        Ok(ListId::new(index, 0))
    }

    /// Drop a list; its handle and every copy of it go stale
    pub(crate) fn remove(&mut self, id: ListId<L>) -> Result<L> {
        self.get(id)?;
        let entry = &mut self.entries[id.index as usize];
        let list = entry.list.take().ok_or_else(|| unknown::<L>(id))?;
        entry.generation = entry.generation.wrapping_add(1);
        self.vacant.push(id.index);
        Ok(list)
    }

    pub fn get(&self, id: ListId<L>) -> Result<&L> {
        match self.entries.get(id.index as usize) {
            Some(RegistryEntry {
                generation,
                list: Some(list),
            }) if *generation == id.generation => Ok(list),
            _ => Err(unknown::<L>(id)),
        }
    }

    pub(crate) fn get_mut(&mut self, id: ListId<L>) -> Result<&mut L> {
        match self.entries.get_mut(id.index as usize) {
            Some(RegistryEntry {
                generation,
                list: Some(list),
            }) if *generation == id.generation => Ok(list),
            _ => Err(unknown::<L>(id)),
        }
    }

    /// Every list, registered or not
    pub fn lists(&self) -> impl Iterator<Item = &L> {
        self.entries.iter().filter_map(|e| e.list.as_ref())
    }

    /// Collect one list
    pub(crate) fn collect_list(
        &mut self,
        id: ListId<L>,
        raw: &mut dyn RawAllocator,
    ) -> Result<usize> {
        let list = self.get_mut(id)?;
        let reclaimed = list.collect(raw)?;
        debug!(
            kind = %L::KIND,
            list = list.name(),
            reclaimed,
            "Collected free list"
        );
        self.note_recycled(reclaimed);
        record_gc(L::KIND, reclaimed);
        Ok(reclaimed)
    }

    /// Collect every registered list of this kind
    pub(crate) fn collect_all(&mut self, raw: &mut dyn RawAllocator) -> Result<usize> {
        let mut reclaimed = 0;
        for list in self
            .entries
            .iter_mut()
            .filter_map(|e| e.list.as_mut())
            .filter(|l| l.is_registered())
        {
            reclaimed += list.collect(raw)?;
        }
        self.note_recycled(reclaimed);
        record_gc(L::KIND, reclaimed);

        if self.mem_freed != 0 {
            return Err(Error::CorruptState(format!(
                "{} lists still account {} cached bytes after collection",
                L::KIND,
                self.mem_freed
            )));
        }
        if reclaimed > 0 {
            info!(kind = %L::KIND, reclaimed, "Collected all free lists of kind");
        }
        Ok(reclaimed)
    }

    /// Retire every idle registered list; returns how many lists were
    /// kept because blocks are still checked out of them
    pub(crate) fn terminate(&mut self) -> usize {
        let mut retained = 0;
        for index in 0..self.entries.len() {
            let entry = &mut self.entries[index];
            let Some(list) = entry.list.as_mut() else {
                continue;
            };
            if !list.is_registered() {
                continue;
            }

            let outstanding = list.arena().live();
            if outstanding > 0 {
                warn!(
                    kind = %L::KIND,
                    list = list.name(),
                    outstanding,
                    "Free list still has blocks allocated at teardown"
                );
                retained += 1;
            } else if L::DISCARD_ON_TERMINATE {
                entry.list = None;
                entry.generation = entry.generation.wrapping_add(1);
                self.vacant.push(index as u32);
            } else {
                list.deregister();
            }
        }
        retained
    }

    pub fn stats(&self) -> KindStats {
        KindStats {
            kind: L::KIND,
            mem_freed: self.mem_freed,
            lists: self.lists().map(|l| l.stats()).collect(),
        }
    }
}

/// Every registry, one per kind
pub struct Registries {
    pub(crate) regular: GcRegistry<RegularFreeList>,
    pub(crate) array: GcRegistry<ArrayFreeList>,
    pub(crate) block: GcRegistry<BlockFreeList>,
    pub(crate) factory: GcRegistry<FactoryFreeList>,
}

impl Registries {
    pub(crate) fn new() -> Self {
        Self {
            regular: GcRegistry::new(),
            array: GcRegistry::new(),
            block: GcRegistry::new(),
            factory: GcRegistry::new(),
        }
    }
}

fn unknown<L: FreeList>(id: ListId<L>) -> Error {
    Error::InvalidArgument(format!("{:?} does not name a live {} list", id, L::KIND))
}

fn record_gc(kind: ListKind, reclaimed: usize) {
    metrics::counter!("photon_fl_gc_runs_total", "kind" => kind.as_str()).increment(1);
    metrics::counter!("photon_fl_gc_reclaimed_bytes_total", "kind" => kind.as_str())
        .increment(reclaimed as u64);
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::freelist::raw::SystemAllocator;

    fn regular(name: &str, size: usize) -> RegularFreeList {
        let mut list = RegularFreeList::new(name, size);
        list.register();
        list
    }

    #[test]
    fn test_registry_insert_get_remove() -> Result<()> {
        let mut reg: GcRegistry<RegularFreeList> = GcRegistry::new();
        let a = reg.insert(regular("a", 8))?;
        let b = reg.insert(regular("b", 16))?;
        assert_ne!(a, b);
        assert_eq!(reg.get(b)?.name(), "b");

        reg.remove(a)?;
        assert!(reg.get(a).is_err());

        // Vacated entry is reused under a new generation
        let c = reg.insert(regular("c", 32))?;
        assert_eq!(c.index(), a.index());
        assert_ne!(c.generation(), a.generation());
        assert!(reg.get(a).is_err());
        assert_eq!(reg.get(c)?.name(), "c");
        Ok(())
    }

    #[test]
    fn test_collect_all_resets_mem_freed() -> Result<()> {
        let mut raw = SystemAllocator;
        let mut reg: GcRegistry<RegularFreeList> = GcRegistry::new();
        let id = reg.insert(regular("nodes", 16))?;

        let list = reg.get_mut(id)?;
        let block = raw.allocate(list.block_size(0)?).expect("alloc");
        let slot = list.arena_mut().insert(block, 0)?;
        let size = list.push_free(slot)?;
        reg.note_cached(size);
        assert_eq!(reg.mem_freed(), 16);

        assert_eq!(reg.collect_all(&mut raw)?, 16);
        assert_eq!(reg.mem_freed(), 0);
        assert_eq!(reg.get(id)?.stats().on_list, 0);
        Ok(())
    }

    #[test]
    fn test_kind_names() {
        assert_eq!(ListKind::Regular.to_string(), "regular");
        assert_eq!(ListKind::Factory.as_str(), "factory");
    }
}
