// PhotonDB - Free-list allocator and priority heap
// Recycling allocator core used by the storage layer

#![warn(rust_2018_idioms)]

pub mod config;
pub mod freelist;
pub mod heap;
pub mod sync;

// Re-exports for convenience
pub use config::{FreeListLimits, KindLimits, Limit};
pub use freelist::{
    Allocation, ArrayListId, BlockListId, BoundedAllocator, FactoryId, FreeListManager,
    FreeListStats, ListKind, ListStats, RawAllocator, RegularListId, SequenceList,
    SystemAllocator,
};
pub use heap::{HeapKind, HeapObject, HeapPosition, PriorityHeap};
pub use sync::SharedFreeLists;

/// Free-list error types
pub mod error {
    use thiserror::Error;

    #[derive(Error, Debug, Clone, PartialEq, Eq)]
    pub enum Error {
        #[error("Out of memory: {0}")]
        OutOfMemory(String),

        #[error("Resource busy: {0}")]
        ResourceBusy(String),

        #[error("Invalid argument: {0}")]
        InvalidArgument(String),

        #[error("Heap is empty")]
        EmptyHeap,

        #[error("Corrupt state: {0}")]
        CorruptState(String),

        #[error("Configuration error: {0}")]
        Config(String),
    }

    pub type Result<T> = std::result::Result<T, Error>;
}

/// Version information
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
