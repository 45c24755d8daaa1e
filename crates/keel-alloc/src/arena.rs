//! Arena records, the arena bank, and order-list surgery.
//!
//! An [`Arena`] is one contiguous region carved into blocks. The physical
//! left-to-right layout is a doubly-linked order list threaded through the
//! block bank ([`Banks::insert_after`] / [`Banks::unlink`]); the arena
//! itself only remembers the list's first and last block.

use std::fmt;
use std::ops::{Index, IndexMut};

use crate::block::{Block, BlockBank, BlockIndex};
use crate::source::ArenaMemory;

/// Stable handle to an arena record in an [`ArenaBank`].
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct ArenaIndex(pub(crate) u32);

impl fmt::Display for ArenaIndex {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// One contiguous memory region carved into blocks.
pub struct Arena {
    /// The owned backing region.
    pub(crate) memory: ArenaMemory,
    /// Total size in bytes (equals `memory.len()`, kept in the size type
    /// of the block model).
    pub(crate) size: u32,
    /// First block in physical order (offset 0).
    pub(crate) first: BlockIndex,
    /// Last block in physical order.
    pub(crate) last: BlockIndex,
    /// Pre-reserved arenas are exempt from automatic release.
    pub(crate) pre_reserved: bool,
}

impl Arena {
    /// Total size of the arena in bytes.
    pub fn size(&self) -> u32 {
        self.size
    }

    /// Base address of the backing region.
    pub fn base_addr(&self) -> usize {
        self.memory.base_addr()
    }

    /// Whether the caller pre-reserved this arena.
    pub fn is_pre_reserved(&self) -> bool {
        self.pre_reserved
    }
}

enum Slot {
    Occupied(Arena),
    Vacant { next_free: Option<u32> },
}

/// Stable-indexed pool of arena records; same slot-chain discipline as
/// [`BlockBank`].
pub struct ArenaBank {
    slots: Vec<Slot>,
    free_head: Option<u32>,
    live: u32,
}

impl ArenaBank {
    /// Create an empty bank.
    pub fn new() -> Self {
        Self {
            slots: Vec::new(),
            free_head: None,
            live: 0,
        }
    }

    /// Number of live arenas.
    pub fn len(&self) -> usize {
        self.live as usize
    }

    /// Whether the bank holds no live arenas.
    pub fn is_empty(&self) -> bool {
        self.live == 0
    }

    pub(crate) fn insert(&mut self, arena: Arena) -> ArenaIndex {
        self.live += 1;
        match self.free_head {
            Some(idx) => {
                let slot = &mut self.slots[idx as usize];
                self.free_head = match slot {
                    Slot::Vacant { next_free } => *next_free,
                    Slot::Occupied(_) => unreachable!("free chain points at occupied slot"),
                };
                *slot = Slot::Occupied(arena);
                ArenaIndex(idx)
            }
            None => {
                let idx = self.slots.len() as u32;
                self.slots.push(Slot::Occupied(arena));
                ArenaIndex(idx)
            }
        }
    }

    pub(crate) fn remove(&mut self, index: ArenaIndex) -> Arena {
        let slot = std::mem::replace(
            &mut self.slots[index.0 as usize],
            Slot::Vacant {
                next_free: self.free_head,
            },
        );
        match slot {
            Slot::Occupied(arena) => {
                self.free_head = Some(index.0);
                self.live -= 1;
                arena
            }
            Slot::Vacant { .. } => panic!("removing vacant arena slot {index}"),
        }
    }

    /// Iterate live arenas with their indices.
    pub(crate) fn iter(&self) -> impl Iterator<Item = (ArenaIndex, &Arena)> {
        self.slots.iter().enumerate().filter_map(|(i, slot)| match slot {
            Slot::Occupied(arena) => Some((ArenaIndex(i as u32), arena)),
            Slot::Vacant { .. } => None,
        })
    }

    /// Drain every live arena out of the bank.
    pub(crate) fn drain(&mut self) -> Vec<Arena> {
        let mut out = Vec::with_capacity(self.live as usize);
        for slot in self.slots.drain(..) {
            if let Slot::Occupied(arena) = slot {
                out.push(arena);
            }
        }
        self.free_head = None;
        self.live = 0;
        out
    }
}

impl Default for ArenaBank {
    fn default() -> Self {
        Self::new()
    }
}

impl Index<ArenaIndex> for ArenaBank {
    type Output = Arena;

    fn index(&self, index: ArenaIndex) -> &Arena {
        match &self.slots[index.0 as usize] {
            Slot::Occupied(arena) => arena,
            Slot::Vacant { .. } => panic!("accessing vacant arena slot {index}"),
        }
    }
}

impl IndexMut<ArenaIndex> for ArenaBank {
    fn index_mut(&mut self, index: ArenaIndex) -> &mut Arena {
        match &mut self.slots[index.0 as usize] {
            Slot::Occupied(arena) => arena,
            Slot::Vacant { .. } => panic!("accessing vacant arena slot {index}"),
        }
    }
}

/// The arena and block banks a placement strategy operates on.
pub struct Banks {
    /// Live arenas.
    pub arenas: ArenaBank,
    /// Live blocks across all arenas.
    pub blocks: BlockBank,
}

impl Banks {
    /// Create empty banks.
    pub fn new() -> Self {
        Self {
            arenas: ArenaBank::new(),
            blocks: BlockBank::new(),
        }
    }

    /// Link `node` into the order list immediately after `after`,
    /// updating the owning arena's `last` when `after` was the tail.
    pub(crate) fn insert_after(&mut self, after: BlockIndex, node: BlockIndex) {
        let (arena, old_next) = {
            let a = &self.blocks[after];
            (a.arena, a.next)
        };
        self.blocks[node].prev = Some(after);
        self.blocks[node].next = old_next;
        self.blocks[node].arena = arena;
        self.blocks[after].next = Some(node);
        match old_next {
            Some(next) => self.blocks[next].prev = Some(node),
            None => self.arenas[arena].last = node,
        }
    }

    /// Unlink `node` from its arena's order list, repairing neighbor
    /// links and the arena's `first`/`last`.
    pub(crate) fn unlink(&mut self, node: BlockIndex) {
        let (arena, prev, next) = {
            let b = &self.blocks[node];
            (b.arena, b.prev, b.next)
        };
        match prev {
            Some(p) => self.blocks[p].next = next,
            None => {
                if let Some(n) = next {
                    self.arenas[arena].first = n;
                }
            }
        }
        match next {
            Some(n) => self.blocks[n].prev = prev,
            None => {
                if let Some(p) = prev {
                    self.arenas[arena].last = p;
                }
            }
        }
        self.blocks[node].prev = None;
        self.blocks[node].next = None;
    }

    /// Install a fresh arena holding one spanning block.
    ///
    /// The spanning block is created free; registering it with the
    /// placement strategy is the caller's job.
    pub(crate) fn install_arena(
        &mut self,
        memory: ArenaMemory,
        pre_reserved: bool,
    ) -> (ArenaIndex, BlockIndex) {
        let size = memory.len() as u32;
        // Reserve the arena slot first so the block can name its owner.
        let arena_idx = self.arenas.insert(Arena {
            memory,
            size,
            // Patched right below once the spanning block exists.
            first: BlockIndex(u32::MAX),
            last: BlockIndex(u32::MAX),
            pre_reserved,
        });
        let span = self.blocks.insert(Block {
            offset: 0,
            size,
            arena: arena_idx,
            prev: None,
            next: None,
            is_free: true,
        });
        let arena = &mut self.arenas[arena_idx];
        arena.first = span;
        arena.last = span;
        (arena_idx, span)
    }
}

impl Default for Banks {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::source::{MemorySource, SystemSource};

    fn banks_with_arena(size: usize) -> (Banks, ArenaIndex, BlockIndex) {
        let mut banks = Banks::new();
        let memory = SystemSource.reserve(size).unwrap();
        let (arena, span) = banks.install_arena(memory, false);
        (banks, arena, span)
    }

    fn release(banks: &mut Banks, arena: ArenaIndex) {
        let arena = banks.arenas.remove(arena);
        SystemSource.release(arena.memory);
    }

    #[test]
    fn install_arena_creates_spanning_block() {
        let (mut banks, arena, span) = banks_with_arena(1024);
        assert_eq!(banks.arenas[arena].size(), 1024);
        assert_eq!(banks.arenas[arena].first, span);
        assert_eq!(banks.arenas[arena].last, span);
        let block = &banks.blocks[span];
        assert_eq!(block.offset(), 0);
        assert_eq!(block.size(), 1024);
        assert!(block.is_free());
        release(&mut banks, arena);
    }

    #[test]
    fn insert_after_updates_tail() {
        let (mut banks, arena, span) = banks_with_arena(1024);
        banks.blocks[span].size = 256;
        let tail = banks.blocks.insert(Block {
            offset: 256,
            size: 768,
            arena,
            prev: None,
            next: None,
            is_free: true,
        });
        banks.insert_after(span, tail);

        assert_eq!(banks.blocks[span].next, Some(tail));
        assert_eq!(banks.blocks[tail].prev, Some(span));
        assert_eq!(banks.arenas[arena].last, tail);
        release(&mut banks, arena);
    }

    #[test]
    fn unlink_middle_block_repairs_links() {
        let (mut banks, arena, a) = banks_with_arena(300);
        banks.blocks[a].size = 100;
        let b = banks.blocks.insert(Block {
            offset: 100,
            size: 100,
            arena,
            prev: None,
            next: None,
            is_free: true,
        });
        banks.insert_after(a, b);
        let c = banks.blocks.insert(Block {
            offset: 200,
            size: 100,
            arena,
            prev: None,
            next: None,
            is_free: true,
        });
        banks.insert_after(b, c);

        banks.unlink(b);
        banks.blocks.remove(b);
        assert_eq!(banks.blocks[a].next, Some(c));
        assert_eq!(banks.blocks[c].prev, Some(a));
        assert_eq!(banks.arenas[arena].first, a);
        assert_eq!(banks.arenas[arena].last, c);
        release(&mut banks, arena);
    }
}
