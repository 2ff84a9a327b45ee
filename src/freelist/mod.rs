//! Free-List Allocator
//!
//! A recycling allocator in front of a [`RawAllocator`]. Freed blocks are
//! parked on per-list free stacks and handed out again before the raw
//! allocator is asked for more memory.
//!
//! # Architecture
//!
//! ```text
//! FreeListManager
//!   ├─→ GcRegistry<RegularFreeList>  mem_freed=192
//!   │     ├─→ "btree-node"(48B)   → Free: [3, 7, 12]
//!   │     └─→ "txn-entry"(32B)    → Free: []
//!   ├─→ GcRegistry<ArrayFreeList>
//!   │     └─→ "keys"(16B + 8B*n)  → n=0: [] n=1: [4] n=2: [1, 9]
//!   ├─→ GcRegistry<BlockFreeList>
//!   │     └─→ "pages" → 4096B: [2] ⇄ 512B: [5, 6] ⇄ 64B: []   (MRU first)
//!   └─→ GcRegistry<FactoryFreeList>
//!         └─→ factory(24B)        → Free: [0]
//! ```
//!
//! Each list keeps its buffers in a slot arena and its free stacks hold
//! slot indices. Freeing past the per-list ceiling collects that list;
//! freeing past the kind's global ceiling collects every list of the kind.

mod array;
mod block;
mod factory;
mod manager;
mod raw;
mod registry;
mod regular;
mod slot;

pub use array::ArrayFreeList;
pub use block::{BlockFreeList, BucketId};
pub use factory::FactoryFreeList;
pub use manager::{FreeListManager, FreeListStats};
pub use raw::{BoundedAllocator, RawAllocator, SystemAllocator};
pub use registry::{
    Allocation, FreeList, GcRegistry, KindStats, ListId, ListKind, ListStats, Registries,
};
pub use regular::RegularFreeList;
pub use slot::{SlotArena, SlotId};

/// Handle to a declared fixed-size list
pub type RegularListId = ListId<RegularFreeList>;
/// Handle to a declared array list
pub type ArrayListId = ListId<ArrayFreeList>;
/// Handle to a declared block list
pub type BlockListId = ListId<BlockFreeList>;
/// Handle to a runtime-created factory
pub type FactoryId = ListId<FactoryFreeList>;

/// Block list used for runs of equally sized elements
///
/// A run of `n` elements is a block of `element_size * n` bytes on the
/// underlying block list.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SequenceList {
    queue: BlockListId,
    element_size: usize,
}

impl SequenceList {
    pub(crate) fn new(queue: BlockListId, element_size: usize) -> Self {
        Self {
            queue,
            element_size,
        }
    }

    /// Block list backing this sequence list
    pub fn queue(&self) -> BlockListId {
        self.queue
    }

    pub fn element_size(&self) -> usize {
        self.element_size
    }
}
