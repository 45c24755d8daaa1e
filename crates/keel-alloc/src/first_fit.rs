//! First-fit placement strategy with a bounded scan window.
//!
//! Keeps free blocks in insertion order and takes the first one large
//! enough, scanning at most `search_window` candidates. Simpler and
//! cheaper per operation than [`BestFit`](crate::best_fit::BestFit) at
//! the cost of more fragmentation; mainly useful for workloads with
//! uniform request sizes.

use std::collections::HashSet;

use crate::arena::Banks;
use crate::block::{Block, BlockBank, BlockIndex};
use crate::strategy::{FreeSlot, PlacementStrategy};

/// First-fit placement over an insertion-ordered free list.
pub struct FirstFit {
    free: Vec<BlockIndex>,
    /// Maximum candidates examined per query; `0` means unbounded.
    window: usize,
}

impl FirstFit {
    /// Create an empty free list scanning at most `search_window`
    /// candidates per query (`0` = unbounded).
    pub fn new(search_window: u32) -> Self {
        Self {
            free: Vec::new(),
            window: search_window as usize,
        }
    }

    fn position_of(&self, block: BlockIndex) -> usize {
        match self.free.iter().position(|&b| b == block) {
            Some(at) => at,
            None => panic!("block {block} missing from free list"),
        }
    }
}

impl Default for FirstFit {
    fn default() -> Self {
        Self::new(0)
    }
}

impl PlacementStrategy for FirstFit {
    fn try_allocate(&self, banks: &Banks, size: u32) -> Option<FreeSlot> {
        let limit = if self.window == 0 {
            self.free.len()
        } else {
            self.window.min(self.free.len())
        };
        self.free[..limit]
            .iter()
            .position(|&b| banks.blocks[b].size() >= size)
            .map(FreeSlot)
    }

    fn commit(&mut self, banks: &mut Banks, slot: FreeSlot, size: u32) -> BlockIndex {
        let at = slot.0;
        let node = self.free[at];
        let found = banks.blocks[node].size();
        debug_assert!(found >= size, "committing undersized block {node}");

        let remaining = found - size;
        {
            let block = &mut banks.blocks[node];
            block.is_free = false;
            block.size = size;
        }
        if remaining > 0 {
            let (offset, arena) = {
                let block = &banks.blocks[node];
                (block.offset, block.arena)
            };
            let rest = banks.blocks.insert(Block {
                offset: offset + size,
                size: remaining,
                arena,
                prev: None,
                next: None,
                is_free: true,
            });
            banks.insert_after(node, rest);
            // The remainder takes over the committed block's list slot.
            self.free[at] = rest;
        } else {
            self.free.remove(at);
        }
        node
    }

    fn add_free(&mut self, blocks: &mut BlockBank, block: BlockIndex) {
        blocks[block].is_free = true;
        self.free.push(block);
    }

    fn add_free_arena(&mut self, blocks: &mut BlockBank, block: BlockIndex) {
        debug_assert!(blocks[block].is_free());
        // Front insertion: a fresh arena's spanning block must be visible
        // within any scan window, or the allocator's single retry after
        // reserving an arena could miss.
        self.free.insert(0, block);
    }

    fn grow(&mut self, blocks: &mut BlockBank, block: BlockIndex, new_size: u32) {
        // The list is not size-ordered; only the record changes.
        blocks[block].size = new_size;
    }

    fn replace_and_grow(
        &mut self,
        blocks: &mut BlockBank,
        old: BlockIndex,
        new: BlockIndex,
        new_size: u32,
    ) {
        let at = self.position_of(old);
        blocks[new].size = new_size;
        self.free[at] = new;
    }

    fn erase(&mut self, _blocks: &mut BlockBank, block: BlockIndex) {
        let at = self.position_of(block);
        self.free.remove(at);
    }

    fn free_count(&self) -> usize {
        self.free.len()
    }

    fn total_free_size(&self, blocks: &BlockBank) -> u64 {
        self.free.iter().map(|&b| u64::from(blocks[b].size())).sum()
    }

    fn validate(&self, blocks: &BlockBank) -> bool {
        let mut seen = HashSet::with_capacity(self.free.len());
        for &block in &self.free {
            match blocks.get(block) {
                Some(record) if record.is_free() => {}
                _ => return false,
            }
            if !seen.insert(block) {
                return false;
            }
        }
        blocks.iter().filter(|(_, b)| b.is_free()).count() == self.free.len()
    }
}
