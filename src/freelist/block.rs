//! Block free lists
//!
//! Blocks of arbitrary size are cached in per-size buckets. The buckets
//! form a queue ordered by recency of use: a lookup that finds a bucket
//! moves it to the front, and a new bucket is created at the front.

use super::raw::RawAllocator;
use super::registry::{FreeList, GcRegistry, ListKind, Recycle, Registries};
use super::slot::{SlotArena, SlotId};
use crate::error::{Error, Result};
use serde::Serialize;
use std::collections::VecDeque;
use std::fmt;
use std::mem;

/// Identity of a bucket, stable while the bucket exists
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub struct BucketId(u64);

impl fmt::Display for BucketId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Bucket({})", self.0)
    }
}

#[derive(Debug)]
struct BlockBucket {
    id: BucketId,
    size: usize,
    free: Vec<u32>,
}

#[derive(Debug)]
pub struct BlockFreeList {
    name: String,
    initialized: bool,
    buckets: VecDeque<BlockBucket>,
    next_bucket: u64,
    arena: SlotArena,
}

impl BlockFreeList {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            initialized: false,
            buckets: VecDeque::new(),
            next_bucket: 0,
            arena: SlotArena::new(),
        }
    }

    /// Find the bucket for `size`, moving it to the front
    pub fn find_bucket(&mut self, size: usize) -> Option<BucketId> {
        let pos = self.buckets.iter().position(|b| b.size == size)?;
        if pos != 0 {
            let bucket = self.buckets.remove(pos)?;
            self.buckets.push_front(bucket);
        }
        self.buckets.front().map(|b| b.id)
    }

    /// Whether a cached block of exactly `size` bytes is available
    pub fn free_block_avail(&mut self, size: usize) -> bool {
        self.find_bucket(size).is_some()
            && self.buckets.front().is_some_and(|b| !b.free.is_empty())
    }

    /// Bucket sizes, most recently used first
    pub fn bucket_sizes(&self) -> Vec<usize> {
        self.buckets.iter().map(|b| b.size).collect()
    }

    /// Front bucket for `size`, created there if missing
    fn bucket_for(&mut self, size: usize) -> Result<&mut BlockBucket> {
        if self.find_bucket(size).is_none() {
            self.buckets
                .try_reserve(1)
                .map_err(|_| Error::OutOfMemory(format!("bucket for {}B blocks", size)))?;
            let id = BucketId(self.next_bucket);
            self.next_bucket += 1;
            self.buckets.push_front(BlockBucket {
                id,
                size,
                free: Vec::new(),
            });
        }
        self.buckets
            .front_mut()
            .ok_or_else(|| Error::CorruptState(format!("bucket for {}B blocks vanished", size)))
    }
}

impl FreeList for BlockFreeList {
    const KIND: ListKind = ListKind::Block;
    const DISCARD_ON_TERMINATE: bool = false;

    fn name(&self) -> &str {
        &self.name
    }

    fn element_size(&self) -> Option<usize> {
        None
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

    /// Drops every bucket along with its cached blocks
    fn collect(&mut self, raw: &mut dyn RawAllocator) -> Result<usize> {
        let mut reclaimed = 0;
        while let Some(bucket) = self.buckets.pop_front() {
            for index in bucket.free {
                let block = self.arena.reclaim(index)?;
                reclaimed += block.len();
                raw.release(block);
            }
        }
        Ok(reclaimed)
    }

    fn registry(lists: &Registries) -> &GcRegistry<Self> {
        &lists.block
    }

    fn registry_mut(lists: &mut Registries) -> &mut GcRegistry<Self> {
        &mut lists.block
    }
}

impl Recycle for BlockFreeList {
    fn register(&mut self) -> bool {
        !mem::replace(&mut self.initialized, true)
    }

    fn block_size(&self, size: usize) -> Result<usize> {
        if size == 0 {
            return Err(Error::InvalidArgument(format!(
                "zero-size block requested from '{}'",
                self.name
            )));
        }
        Ok(size)
    }

    fn pop_free(&mut self, size: usize) -> Result<Option<u32>> {
        Ok(self.bucket_for(size)?.free.pop())
    }

    fn push_free(&mut self, slot: SlotId) -> Result<usize> {
        let size = self.arena.tag(slot)?;
        self.bucket_for(size)?;
        let (_, bytes) = self.arena.release(slot)?;
        match self.buckets.front_mut() {
            Some(bucket) => bucket.free.push(slot.index),
            None => {
                return Err(Error::CorruptState(format!(
                    "bucket for {}B blocks vanished",
                    size
                )))
            }
        }
        Ok(bytes)
    }
}
