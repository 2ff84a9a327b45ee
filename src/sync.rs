//! Shared free lists
//!
//! The manager has no internal locking. Threads that need to share one
//! wrap it here and hold the lock for the whole of each operation.

use crate::config::FreeListLimits;
use crate::freelist::{FreeListManager, RawAllocator, SystemAllocator};
use parking_lot::{Mutex, MutexGuard};
use std::sync::Arc;

/// A free-list manager behind one mutex
pub struct SharedFreeLists<A: RawAllocator = SystemAllocator> {
    inner: Arc<Mutex<FreeListManager<A>>>,
}

impl SharedFreeLists<SystemAllocator> {
    pub fn new(limits: FreeListLimits) -> Self {
        Self::from_manager(FreeListManager::with_limits(limits))
    }
}

impl<A: RawAllocator> SharedFreeLists<A> {
    pub fn from_manager(manager: FreeListManager<A>) -> Self {
        Self {
            inner: Arc::new(Mutex::new(manager)),
        }
    }

    /// Lock the manager
    pub fn lock(&self) -> MutexGuard<'_, FreeListManager<A>> {
        self.inner.lock()
    }

    /// Run `f` with the manager locked
    pub fn with<R>(&self, f: impl FnOnce(&mut FreeListManager<A>) -> R) -> R {
        f(&mut self.inner.lock())
    }
}

impl<A: RawAllocator> Clone for SharedFreeLists<A> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}
