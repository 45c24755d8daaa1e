//! The coalescing arena allocator.
//!
//! Composes the arena substrate ([`Banks`]) with a placement strategy
//! into an `allocate`/`deallocate` facade. Arenas are reserved from the
//! memory source on demand, blocks are split on commit and re-merged
//! with free neighbors on release, and fully-free arenas are returned to
//! the source (policy: immediately, unless pre-reserved or configured
//! otherwise).
//!
//! Not internally synchronized — the caller serializes access, typically
//! by embedding the allocator behind a lock or in a thread-local context.

use std::ptr::NonNull;

use indexmap::IndexMap;
use keel_core::AllocError;

use crate::arena::{ArenaIndex, Banks};
use crate::best_fit::BestFit;
use crate::block::BlockIndex;
use crate::config::{AllocConfig, ConfigError};
use crate::source::{MemorySource, SystemSource};
use crate::stats::{StatSnapshot, StatTracker};
use crate::strategy::PlacementStrategy;

/// A live allocation handed out by [`CoalescingAllocator::allocate`].
///
/// Holds the aligned pointer and the owning block. Pass it back to
/// [`CoalescingAllocator::deallocate`]; it is deliberately neither
/// `Clone` nor `Copy`.
#[derive(Debug)]
pub struct Allocation {
    block: Option<BlockIndex>,
    ptr: NonNull<u8>,
}

impl Allocation {
    fn zero_sized(align: usize) -> Self {
        Self {
            block: None,
            // A non-null, well-aligned sentinel; never dereferenced and
            // never owned by any arena.
            ptr: NonNull::new(align.max(1) as *mut u8).expect("alignment is nonzero"),
        }
    }

    /// The aligned pointer.
    pub fn ptr(&self) -> NonNull<u8> {
        self.ptr
    }

    /// Whether this is the zero-size sentinel.
    pub fn is_zero_sized(&self) -> bool {
        self.block.is_none()
    }
}

/// Arena-backed coalescing allocator with a pluggable placement strategy.
///
/// `S` is fixed at construction; the allocator depends only on the
/// [`PlacementStrategy`] capability set. `M` supplies arena memory.
pub struct CoalescingAllocator<S: PlacementStrategy = BestFit, M: MemorySource = SystemSource> {
    banks: Banks,
    strategy: S,
    source: M,
    config: AllocConfig,
    stats: StatTracker,
    /// Live pointer → block table, kept when `track_memory` is on.
    tracked: Option<IndexMap<usize, BlockIndex>>,
}

impl CoalescingAllocator<BestFit, SystemSource> {
    /// Create an allocator with the best-fit strategy over the system
    /// heap source.
    pub fn new(config: AllocConfig) -> Result<Self, ConfigError> {
        let strategy = BestFit::new(config.bsearch_algo);
        Self::with_parts(config, strategy, SystemSource)
    }
}

impl<S: PlacementStrategy, M: MemorySource> CoalescingAllocator<S, M> {
    /// Create an allocator from explicit parts.
    pub fn with_parts(config: AllocConfig, strategy: S, source: M) -> Result<Self, ConfigError> {
        config.validate()?;
        let stats = StatTracker::new(config.stats);
        let tracked = config.track_memory.then(IndexMap::new);
        Ok(Self {
            banks: Banks::new(),
            strategy,
            source,
            config,
            stats,
            tracked,
        })
    }

    /// Allocate `size` bytes aligned to `align` (a power of two; `0` is
    /// treated as `1`).
    ///
    /// `size == 0` returns the non-null zero-size sentinel; deallocating
    /// it is a no-op. Fails with [`AllocError::SourceExhausted`] when a
    /// needed fresh arena cannot be reserved.
    pub fn allocate(&mut self, size: usize, align: usize) -> Result<Allocation, AllocError> {
        let align = self.effective_align(align);
        if size == 0 {
            return Ok(Allocation::zero_sized(align));
        }
        let effective = self.effective_size(size, align)?;

        // Oversized requests bypass the free index and get an arena of
        // their own, returned to the source as soon as they are freed.
        if self.config.max_bucket != 0 && effective > self.config.max_bucket {
            let arena = self.reserve_arena_sized(effective, false)?;
            let span = self.banks.arenas[arena].first;
            self.strategy.erase(&mut self.banks.blocks, span);
            self.banks.blocks[span].is_free = false;
            return Ok(self.finish_alloc(span, align));
        }

        let slot = match self.strategy.try_allocate(&self.banks, effective) {
            Some(slot) => slot,
            None => {
                let min = effective.max(self.config.default_arena_size);
                self.reserve_arena_sized(min, false)?;
                // Exactly one retry: the fresh arena's spanning block must
                // satisfy the request.
                self.strategy
                    .try_allocate(&self.banks, effective)
                    .expect("fresh arena cannot satisfy the request it was sized for")
            }
        };
        let block = self.strategy.commit(&mut self.banks, slot, effective);
        Ok(self.finish_alloc(block, align))
    }

    /// Release an allocation, coalescing with free neighbors.
    pub fn deallocate(&mut self, allocation: Allocation) {
        let Some(block) = allocation.block else {
            return; // zero-size sentinel
        };
        if let Some(map) = &mut self.tracked {
            map.swap_remove(&(allocation.ptr.as_ptr() as usize));
        }
        self.release_block(block);
    }

    /// Release by raw pointer, size, and alignment.
    ///
    /// With `track_memory` the owning block is found in O(1); otherwise
    /// the arena is located by base-range lookup and its order list is
    /// walked.
    ///
    /// # Panics
    ///
    /// Panics if the pointer does not belong to this allocator.
    pub fn deallocate_ptr(&mut self, ptr: NonNull<u8>, size: usize, _align: usize) {
        if size == 0 {
            return;
        }
        let addr = ptr.as_ptr() as usize;
        if let Some(map) = &mut self.tracked {
            match map.swap_remove(&addr) {
                Some(block) => return self.release_block(block),
                None => panic!("pointer {addr:#x} is not a live tracked allocation"),
            }
        }
        match self.find_block_by_addr(addr) {
            Some(block) => self.release_block(block),
            None => panic!("pointer {addr:#x} does not belong to this allocator"),
        }
    }

    /// Pre-reserve an arena of at least `min_size` bytes.
    ///
    /// Pre-reserved arenas are exempt from automatic release when they
    /// become fully free.
    pub fn reserve(&mut self, min_size: usize) -> Result<(), AllocError> {
        let min = u32::try_from(min_size)
            .map_err(|_| AllocError::RequestTooLarge { requested: min_size })?
            .max(self.config.default_arena_size);
        self.reserve_arena_sized(min, true)?;
        Ok(())
    }

    /// Verify every structural invariant: block sizes sum to arena
    /// sizes, offsets are contiguous, no two order-adjacent free blocks,
    /// order-list links are consistent, and the strategy's index matches
    /// the bank.
    pub fn validate(&self) -> bool {
        let mut walked = 0usize;
        for (arena_idx, arena) in self.banks.arenas.iter() {
            let mut sum = 0u64;
            let mut expect_offset = 0u32;
            let mut prev: Option<BlockIndex> = None;
            let mut prev_free = false;
            let mut last_seen = arena.first;
            let mut cursor = Some(arena.first);
            while let Some(idx) = cursor {
                let block = match self.banks.blocks.get(idx) {
                    Some(b) => b,
                    None => return false,
                };
                if block.arena() != arena_idx
                    || block.offset() != expect_offset
                    || block.prev != prev
                {
                    return false;
                }
                if prev_free && block.is_free() {
                    return false; // un-coalesced neighbors
                }
                sum += u64::from(block.size());
                expect_offset = expect_offset.wrapping_add(block.size());
                prev_free = block.is_free();
                prev = Some(idx);
                last_seen = idx;
                walked += 1;
                cursor = block.next;
            }
            if sum != u64::from(arena.size()) || last_seen != arena.last {
                return false;
            }
        }
        if walked != self.banks.blocks.len() {
            return false; // orphaned block records
        }
        self.strategy.validate(&self.banks.blocks)
    }

    /// Number of live arenas.
    pub fn arena_count(&self) -> usize {
        self.banks.arenas.len()
    }

    /// Total free bytes across all arenas.
    pub fn total_free_bytes(&self) -> u64 {
        self.strategy.total_free_size(&self.banks.blocks)
    }

    /// Total bytes across all arenas, free or allocated.
    pub fn total_arena_bytes(&self) -> u64 {
        self.banks.arenas.iter().map(|(_, a)| u64::from(a.size())).sum()
    }

    /// A copy of the accumulated statistics (zeroes when disabled).
    pub fn stats(&self) -> StatSnapshot {
        self.stats.snapshot()
    }

    /// Number of live tracked allocations, when `track_memory` is on.
    pub fn tracked_live(&self) -> Option<usize> {
        self.tracked.as_ref().map(IndexMap::len)
    }

    /// Forward a usage hint for an allocation to the memory source.
    pub fn advise(&self, allocation: &Allocation, advice: crate::source::Advice) -> bool {
        match allocation.block {
            Some(block) => {
                let len = self.banks.blocks[block].size() as usize;
                self.source.advise(allocation.ptr, len, advice)
            }
            None => true,
        }
    }

    // ── Internals ────────────────────────────────────────────────

    fn effective_align(&self, align: usize) -> usize {
        let align = align.max(1);
        debug_assert!(align.is_power_of_two(), "alignment must be a power of two");
        align.max(self.config.min_alignment as usize)
    }

    /// Granularity-rounded size plus alignment slack. Slack is needed
    /// only when the natural alignment of `arena_base + offset` (the
    /// smaller of source base alignment and granularity) cannot satisfy
    /// the request.
    fn effective_size(&self, size: usize, align: usize) -> Result<u32, AllocError> {
        let granularity = self.config.granularity as usize;
        let natural = granularity.min(self.source.base_align());
        let slack = if align > natural { align } else { 0 };
        let effective = round_up(size, granularity)
            .and_then(|s| s.checked_add(slack))
            .and_then(|s| round_up(s, granularity));
        match effective.and_then(|s| u32::try_from(s).ok()) {
            Some(s) => Ok(s),
            None => Err(AllocError::RequestTooLarge { requested: size }),
        }
    }

    fn reserve_arena_sized(
        &mut self,
        min_size: u32,
        pre_reserved: bool,
    ) -> Result<ArenaIndex, AllocError> {
        let memory = self.source.reserve(min_size as usize)?;
        let (arena, span) = self.banks.install_arena(memory, pre_reserved);
        self.strategy.add_free_arena(&mut self.banks.blocks, span);
        self.stats.record_region_reserved();
        Ok(arena)
    }

    fn finish_alloc(&mut self, block: BlockIndex, align: usize) -> Allocation {
        let (arena, offset, size) = {
            let b = &self.banks.blocks[block];
            (b.arena(), b.offset(), b.size())
        };
        let base = self.banks.arenas[arena].memory.ptr();
        let addr = base.as_ptr() as usize + offset as usize;
        let aligned = addr + (addr.wrapping_neg() & (align - 1));
        debug_assert!(aligned + 1 <= addr + size as usize, "alignment slack exhausted");
        let delta = aligned - (base.as_ptr() as usize);
        let ptr = NonNull::new(base.as_ptr().wrapping_add(delta))
            .expect("aligned pointer within a live arena is non-null");

        self.stats.record_alloc(u64::from(size));
        if let Some(map) = &mut self.tracked {
            map.insert(aligned, block);
        }
        Allocation {
            block: Some(block),
            ptr,
        }
    }

    fn release_block(&mut self, block: BlockIndex) {
        self.stats
            .record_dealloc(u64::from(self.banks.blocks[block].size()));
        let survivor = self.coalesce_on_free(block);

        let (arena, whole) = {
            let b = &self.banks.blocks[survivor];
            let arena = b.arena();
            (arena, b.offset() == 0 && b.size() == self.banks.arenas[arena].size())
        };
        if whole
            && self.config.release_empty_arenas
            && !self.banks.arenas[arena].is_pre_reserved()
        {
            self.release_arena(arena, survivor);
        }
    }

    /// Mark `node` free and absorb free neighbors into it, left first,
    /// then right; the freed block's handle survives both merges.
    fn coalesce_on_free(&mut self, node: BlockIndex) -> BlockIndex {
        debug_assert!(!self.banks.blocks[node].is_free(), "double free of block {node}");

        if let Some(left) = self.banks.blocks[node].prev {
            if self.banks.blocks[left].is_free() {
                let (offset, size) = {
                    let l = &self.banks.blocks[left];
                    (l.offset(), l.size())
                };
                self.strategy.erase(&mut self.banks.blocks, left);
                self.banks.unlink(left);
                self.banks.blocks.remove(left);
                let b = &mut self.banks.blocks[node];
                b.offset = offset;
                b.size += size;
            }
        }
        if let Some(right) = self.banks.blocks[node].next {
            if self.banks.blocks[right].is_free() {
                let size = self.banks.blocks[right].size();
                self.strategy.erase(&mut self.banks.blocks, right);
                self.banks.unlink(right);
                self.banks.blocks.remove(right);
                self.banks.blocks[node].size += size;
            }
        }
        self.strategy.add_free(&mut self.banks.blocks, node);
        node
    }

    fn release_arena(&mut self, arena: ArenaIndex, span: BlockIndex) {
        self.strategy.erase(&mut self.banks.blocks, span);
        self.banks.blocks.remove(span);
        let record = self.banks.arenas.remove(arena);
        self.stats.record_region_released();
        self.source.release(record.memory);
    }

    fn find_block_by_addr(&self, addr: usize) -> Option<BlockIndex> {
        let (arena_idx, arena) = self
            .banks
            .arenas
            .iter()
            .find(|(_, a)| a.memory.contains(addr))?;
        let rel = (addr - arena.base_addr()) as u32;
        let mut cursor = Some(arena.first);
        while let Some(idx) = cursor {
            let block = &self.banks.blocks[idx];
            debug_assert_eq!(block.arena(), arena_idx);
            if rel >= block.offset() && rel < block.offset() + block.size() {
                return (!block.is_free()).then_some(idx);
            }
            cursor = block.next;
        }
        None
    }
}

impl<S: PlacementStrategy, M: MemorySource> Drop for CoalescingAllocator<S, M> {
    fn drop(&mut self) {
        for arena in self.banks.arenas.drain() {
            self.source.release(arena.memory);
        }
    }
}

/// `x` rounded up to a multiple of power-of-two `a`, or `None` on overflow.
fn round_up(x: usize, a: usize) -> Option<usize> {
    debug_assert!(a.is_power_of_two());
    Some(x.checked_add(a - 1)? & !(a - 1))
}
