//! Live entity handles and their allocation.
//!
//! A [`LiveEntityId`] is a 64-bit handle that packs a *generation* counter in
//! the high 32 bits and an *index* in the low 32 bits. The generation is
//! bumped every time an index is recycled, so a handle kept past its entity's
//! despawn is detected as stale instead of silently addressing whatever
//! entity reused the slot.

use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use std::fmt;

// ---------------------------------------------------------------------------
// LiveEntityId
// ---------------------------------------------------------------------------

/// Handle of a rendered entity in a playback world.
///
/// Layout: `[generation: u32 | index: u32]`
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct LiveEntityId(u64);

impl LiveEntityId {
    #[inline]
    pub fn new(index: u32, generation: u32) -> Self {
        Self((generation as u64) << 32 | index as u64)
    }

    #[inline]
    pub fn index(self) -> u32 {
        self.0 as u32
    }

    #[inline]
    pub fn generation(self) -> u32 {
        (self.0 >> 32) as u32
    }

    #[inline]
    pub fn to_raw(self) -> u64 {
        self.0
    }

    #[inline]
    pub fn from_raw(raw: u64) -> Self {
        Self(raw)
    }
}

impl fmt::Debug for LiveEntityId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "LiveEntityId({}v{})", self.index(), self.generation())
    }
}

impl fmt::Display for LiveEntityId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}v{}", self.index(), self.generation())
    }
}

// ---------------------------------------------------------------------------
// LiveEntityAllocator
// ---------------------------------------------------------------------------

/// Hands out [`LiveEntityId`]s, recycling freed indices FIFO.
#[derive(Debug, Default)]
pub struct LiveEntityAllocator {
    generations: Vec<u32>,
    alive: Vec<bool>,
    free_indices: VecDeque<u32>,
}

impl LiveEntityAllocator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Allocate a handle, reusing the oldest freed index if there is one.
    pub fn allocate(&mut self) -> LiveEntityId {
        if let Some(index) = self.free_indices.pop_front() {
            // Generation was already bumped on release.
            self.alive[index as usize] = true;
            LiveEntityId::new(index, self.generations[index as usize])
        } else {
            let index = self.generations.len() as u32;
            self.generations.push(0);
            self.alive.push(true);
            LiveEntityId::new(index, 0)
        }
    }

    /// Release a handle. Returns `false` if it was already released or stale.
    pub fn release(&mut self, id: LiveEntityId) -> bool {
        if !self.is_alive(id) {
            return false;
        }
        let idx = id.index() as usize;
        self.alive[idx] = false;
        self.generations[idx] = self.generations[idx].wrapping_add(1);
        self.free_indices.push_back(id.index());
        true
    }

    pub fn is_alive(&self, id: LiveEntityId) -> bool {
        let idx = id.index() as usize;
        idx < self.generations.len() && self.alive[idx] && self.generations[idx] == id.generation()
    }

    pub fn alive_count(&self) -> usize {
        self.alive.iter().filter(|&&a| a).count()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn allocate_unique_ids() {
        let mut alloc = LiveEntityAllocator::new();
        let mut indices: Vec<u32> = (0..50).map(|_| alloc.allocate().index()).collect();
        indices.sort();
        indices.dedup();
        assert_eq!(indices.len(), 50);
    }

    #[test]
    fn released_handle_is_stale_after_recycle() {
        let mut alloc = LiveEntityAllocator::new();
        let first = alloc.allocate();
        assert!(alloc.release(first));
        let second = alloc.allocate();
        assert_eq!(second.index(), first.index());
        assert_eq!(second.generation(), 1);
        assert!(!alloc.is_alive(first));
        assert!(alloc.is_alive(second));
    }

    #[test]
    fn double_release_returns_false() {
        let mut alloc = LiveEntityAllocator::new();
        let e = alloc.allocate();
        assert!(alloc.release(e));
        assert!(!alloc.release(e));
        assert_eq!(alloc.alive_count(), 0);
    }

    #[test]
    fn raw_roundtrip_and_display() {
        let id = LiveEntityId::new(42, 7);
        assert_eq!(LiveEntityId::from_raw(id.to_raw()), id);
        assert_eq!(id.to_string(), "42v7");
    }
}
