//! Slot management for free lists
//!
//! Every free list keeps its buffers in a [`SlotArena`]. A slot is either
//! checked out to a caller (`Live`), parked on a free stack (`Cached`), or
//! empty (`Vacant`, its buffer already returned to the raw allocator).
//! Free stacks hold slot indices, never pointers into freed memory.

use crate::error::{Error, Result};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Identifier of a slot inside one arena
///
/// The generation changes every time the slot is handed out, so a handle
/// kept past its free is detected instead of aliasing the next owner.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct SlotId {
    /// Position in the slot table
    pub index: u32,
    /// Hand-out generation
    pub generation: u32,
}

impl SlotId {
    pub fn new(index: u32, generation: u32) -> Self {
        Self { index, generation }
    }

    fn position(&self) -> usize {
        self.index as usize
    }
}

impl fmt::Display for SlotId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Slot(index={}, gen={})", self.index, self.generation)
    }
}

#[derive(Debug)]
enum SlotState {
    Vacant,
    Live(Box<[u8]>),
    Cached(Box<[u8]>),
}

#[derive(Debug)]
struct SlotEntry {
    generation: u32,
    /// Bucket key recorded at hand-out (element count or block size)
    tag: usize,
    state: SlotState,
}

/// Slot table backing one free list
#[derive(Debug, Default)]
pub struct SlotArena {
    slots: Vec<SlotEntry>,
    vacant: Vec<u32>,
    live: usize,
    cached: usize,
    cached_bytes: usize,
}

impl SlotArena {
    pub fn new() -> Self {
        Self::default()
    }

    /// Store a freshly allocated buffer as a live slot
    pub fn insert(&mut self, block: Box<[u8]>, tag: usize) -> Result<SlotId> {
        if let Some(index) = self.vacant.pop() {
            let entry = &mut self.slots[index as usize];
            entry.generation = entry.generation.wrapping_add(1);
            entry.tag = tag;
            entry.state = SlotState::Live(block);
            self.live += 1;
            return Ok(SlotId::new(index, entry.generation));
        }

        let index = u32::try_from(self.slots.len())
            .map_err(|_| Error::OutOfMemory("slot table exhausted".to_string()))?;
        self.slots.push(SlotEntry {
            generation: 0,
            tag,
            state: SlotState::Live(block),
        });
        self.live += 1;
        Ok(SlotId::new(index, 0))
    }

    /// Turn a cached slot back into a live one
    pub fn checkout(&mut self, index: u32, tag: usize) -> Result<SlotId> {
        let entry = self
            .slots
            .get_mut(index as usize)
            .ok_or_else(|| Error::CorruptState(format!("free stack names missing slot {}", index)))?;

        match std::mem::replace(&mut entry.state, SlotState::Vacant) {
            SlotState::Cached(block) => {
                self.cached -= 1;
                self.cached_bytes -= block.len();
                self.live += 1;
                entry.generation = entry.generation.wrapping_add(1);
                entry.tag = tag;
                entry.state = SlotState::Live(block);
                Ok(SlotId::new(index, entry.generation))
            }
            other => {
                entry.state = other;
                Err(Error::CorruptState(format!(
                    "free stack names slot {} which is not cached",
                    index
                )))
            }
        }
    }

    /// Park a live slot; returns its tag and size in bytes
    pub fn release(&mut self, id: SlotId) -> Result<(usize, usize)> {
        let entry = self.live_entry_mut(id)?;
        let tag = entry.tag;
        let state = std::mem::replace(&mut entry.state, SlotState::Vacant);
        let block = match state {
            SlotState::Live(block) => block,
            other => {
                entry.state = other;
                return Err(stale(id));
            }
        };
        let size = block.len();
        entry.state = SlotState::Cached(block);

        self.live -= 1;
        self.cached += 1;
        self.cached_bytes += size;
        Ok((tag, size))
    }

    /// Take the buffer out of a cached slot, leaving it vacant
    pub fn reclaim(&mut self, index: u32) -> Result<Box<[u8]>> {
        let entry = self
            .slots
            .get_mut(index as usize)
            .ok_or_else(|| Error::CorruptState(format!("free stack names missing slot {}", index)))?;

        match std::mem::replace(&mut entry.state, SlotState::Vacant) {
            SlotState::Cached(block) => {
                self.cached -= 1;
                self.cached_bytes -= block.len();
                self.vacant.push(index);
                Ok(block)
            }
            other => {
                entry.state = other;
                Err(Error::CorruptState(format!(
                    "cannot reclaim slot {}: not cached",
                    index
                )))
            }
        }
    }

    /// Bytes of a live slot
    pub fn get(&self, id: SlotId) -> Result<&[u8]> {
        match self.slots.get(id.position()) {
            Some(SlotEntry {
                generation,
                state: SlotState::Live(block),
                ..
            }) if *generation == id.generation => Ok(&block[..]),
            _ => Err(stale(id)),
        }
    }

    /// Mutable bytes of a live slot
    pub fn get_mut(&mut self, id: SlotId) -> Result<&mut [u8]> {
        match self.live_entry_mut(id)?.state {
            SlotState::Live(ref mut block) => Ok(&mut block[..]),
            _ => Err(stale(id)),
        }
    }

    /// Tag recorded for a live slot
    pub fn tag(&self, id: SlotId) -> Result<usize> {
        match self.slots.get(id.position()) {
            Some(entry)
                if entry.generation == id.generation
                    && matches!(entry.state, SlotState::Live(_)) =>
            {
                Ok(entry.tag)
            }
            _ => Err(stale(id)),
        }
    }

    /// Copy the first `len` bytes of one live slot into another
    pub fn copy_prefix(&mut self, from: SlotId, to: SlotId, len: usize) -> Result<()> {
        if from.index == to.index {
            return Err(Error::InvalidArgument(format!(
                "cannot copy {} onto itself",
                from
            )));
        }
        self.get(from)?;
        self.get(to)?;

        let (src, dst) = if from.index < to.index {
            let (head, tail) = self.slots.split_at_mut(to.position());
            (&head[from.position()], &mut tail[0])
        } else {
            let (head, tail) = self.slots.split_at_mut(from.position());
            (&tail[0], &mut head[to.position()])
        };

        match (&src.state, &mut dst.state) {
            (SlotState::Live(src), SlotState::Live(dst)) => {
                let len = len.min(src.len()).min(dst.len());
                dst[..len].copy_from_slice(&src[..len]);
                Ok(())
            }
            _ => Err(Error::CorruptState("copy between non-live slots".to_string())),
        }
    }

    /// Slots checked out to callers
    pub fn live(&self) -> usize {
        self.live
    }

    /// Slots parked on free stacks
    pub fn cached(&self) -> usize {
        self.cached
    }

    /// Bytes parked on free stacks
    pub fn cached_bytes(&self) -> usize {
        self.cached_bytes
    }

    fn live_entry_mut(&mut self, id: SlotId) -> Result<&mut SlotEntry> {
        match self.slots.get_mut(id.position()) {
            Some(entry)
                if entry.generation == id.generation
                    && matches!(entry.state, SlotState::Live(_)) =>
            {
                Ok(entry)
            }
            _ => Err(stale(id)),
        }
    }
}

fn stale(id: SlotId) -> Error {
    Error::InvalidArgument(format!("{} is not a live allocation of this list", id))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn buf(len: usize) -> Box<[u8]> {
        vec![0u8; len].into_boxed_slice()
    }

    #[test]
    fn test_slot_lifecycle() -> Result<()> {
        let mut arena = SlotArena::new();
        let id = arena.insert(buf(16), 0)?;
        assert_eq!(arena.live(), 1);
        assert_eq!(arena.get(id)?.len(), 16);

        let (tag, size) = arena.release(id)?;
        assert_eq!((tag, size), (0, 16));
        assert_eq!(arena.cached(), 1);
        assert_eq!(arena.cached_bytes(), 16);
        assert!(arena.get(id).is_err());

        let again = arena.checkout(id.index, 0)?;
        assert_eq!(again.index, id.index);
        assert_ne!(again.generation, id.generation);
        assert_eq!(arena.cached_bytes(), 0);
        Ok(())
    }

    #[test]
    fn test_stale_handle_rejected() -> Result<()> {
        let mut arena = SlotArena::new();
        let id = arena.insert(buf(8), 3)?;
        arena.release(id)?;
        assert!(matches!(arena.release(id), Err(Error::InvalidArgument(_))));

        let block = arena.reclaim(id.index)?;
        assert_eq!(block.len(), 8);
        assert!(matches!(arena.reclaim(id.index), Err(Error::CorruptState(_))));

        // Vacant index is reused with a new generation
        let next = arena.insert(buf(8), 3)?;
        assert_eq!(next.index, id.index);
        assert!(arena.get(id).is_err());
        assert_eq!(arena.tag(next)?, 3);
        Ok(())
    }

    #[test]
    fn test_copy_prefix() -> Result<()> {
        let mut arena = SlotArena::new();
        let a = arena.insert(buf(4), 0)?;
        let b = arena.insert(buf(8), 0)?;
        arena.get_mut(a)?.copy_from_slice(b"wxyz");

        arena.copy_prefix(a, b, 4)?;
        assert_eq!(&arena.get(b)?[..4], b"wxyz");

        arena.get_mut(b)?[0] = b'q';
        arena.copy_prefix(b, a, 8)?;
        assert_eq!(arena.get(a)?, b"qxyz");
        Ok(())
    }
}
