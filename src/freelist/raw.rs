//! Raw allocator seam
//!
//! The free lists never talk to the platform allocator directly. Every
//! buffer they hand out or reclaim goes through a [`RawAllocator`], so a
//! caller can swap in a budgeted allocator (tests, memory-capped hosts).

use tracing::trace;

/// Source of raw byte buffers
///
/// Failures are reported as `None`; implementations must not panic on
/// exhaustion. Zero-size requests are never issued by the free lists.
pub trait RawAllocator {
    /// Allocate `size` bytes
    fn allocate(&mut self, size: usize) -> Option<Box<[u8]>>;

    /// Allocate `size` zeroed bytes
    fn allocate_zeroed(&mut self, size: usize) -> Option<Box<[u8]>> {
        let mut block = self.allocate(size)?;
        block.fill(0);
        Some(block)
    }

    /// Resize `block` to `size` bytes, keeping the common prefix
    ///
    /// On failure the original block is handed back untouched.
    fn reallocate(&mut self, block: Box<[u8]>, size: usize) -> Result<Box<[u8]>, Box<[u8]>> {
        if block.len() == size {
            return Ok(block);
        }
        match self.allocate(size) {
            Some(mut new_block) => {
                let keep = block.len().min(size);
                new_block[..keep].copy_from_slice(&block[..keep]);
                self.release(block);
                Ok(new_block)
            }
            None => Err(block),
        }
    }

    /// Give a buffer back
    fn release(&mut self, block: Box<[u8]>);
}

/// Platform heap, with allocation failure surfaced instead of aborting
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemAllocator;

impl RawAllocator for SystemAllocator {
    fn allocate(&mut self, size: usize) -> Option<Box<[u8]>> {
        let mut buf: Vec<u8> = Vec::new();
        buf.try_reserve_exact(size).ok()?;
        buf.resize(size, 0);
        Some(buf.into_boxed_slice())
    }

    fn allocate_zeroed(&mut self, size: usize) -> Option<Box<[u8]>> {
        // `allocate` already zero-fills
        self.allocate(size)
    }

    fn release(&mut self, block: Box<[u8]>) {
        drop(block);
    }
}

/// Allocator with a fixed byte budget
///
/// Requests that would push the bytes in use past the budget fail. Used
/// to drive the collect-and-retry path deterministically.
#[derive(Debug, Clone)]
pub struct BoundedAllocator {
    budget: usize,
    in_use: usize,
    allocations: u64,
    releases: u64,
    failures: u64,
}

impl BoundedAllocator {
    pub fn new(budget: usize) -> Self {
        Self {
            budget,
            in_use: 0,
            allocations: 0,
            releases: 0,
            failures: 0,
        }
    }

    /// Bytes currently handed out
    pub fn in_use(&self) -> usize {
        self.in_use
    }

    pub fn budget(&self) -> usize {
        self.budget
    }

    /// New ceiling, checked on the next request
    pub fn set_budget(&mut self, budget: usize) {
        self.budget = budget;
    }

    /// Successful allocations so far
    pub fn allocations(&self) -> u64 {
        self.allocations
    }

    /// Buffers given back so far
    pub fn releases(&self) -> u64 {
        self.releases
    }

    /// Refused allocations so far
    pub fn failures(&self) -> u64 {
        self.failures
    }
}

impl RawAllocator for BoundedAllocator {
    fn allocate(&mut self, size: usize) -> Option<Box<[u8]>> {
        let fits = self
            .in_use
            .checked_add(size)
            .is_some_and(|total| total <= self.budget);
        if !fits {
            self.failures += 1;
            trace!(size, in_use = self.in_use, budget = self.budget, "Bounded allocation refused");
            return None;
        }
        let block = SystemAllocator.allocate(size)?;
        self.in_use += size;
        self.allocations += 1;
        Some(block)
    }

    fn release(&mut self, block: Box<[u8]>) {
        self.in_use = self.in_use.saturating_sub(block.len());
        self.releases += 1;
        drop(block);
    }
}
