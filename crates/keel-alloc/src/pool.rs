//! Fixed-slot pool allocator.
//!
//! Pages are drawn from the memory source and carved into `atom_count`
//! slots of `atom_size` bytes. Allocation finds a run of `k` consecutive
//! free slots in an existing page, appending a new page only when no page
//! has such a run. Sub-atom requests round up to one atom.
//!
//! Like the coalescing allocator, the pool is single-writer; callers
//! serialize access.

use std::ptr::NonNull;

use keel_core::AllocError;

use crate::config::{ConfigError, PoolConfig};
use crate::source::{ArenaMemory, MemorySource, SystemSource};
use crate::stats::{StatSnapshot, StatTracker};

struct Page {
    memory: ArenaMemory,
    /// One bit per slot; set = occupied.
    bits: Box<[u64]>,
    free_count: u32,
}

impl Page {
    fn new(memory: ArenaMemory, atom_count: u32) -> Self {
        let words = (atom_count as usize + 63) / 64;
        Self {
            memory,
            bits: vec![0u64; words].into_boxed_slice(),
            free_count: atom_count,
        }
    }

    fn is_set(&self, slot: u32) -> bool {
        self.bits[(slot / 64) as usize] & (1u64 << (slot % 64)) != 0
    }

    fn set_range(&mut self, slot: u32, count: u32) {
        for s in slot..slot + count {
            debug_assert!(!self.is_set(s), "slot {s} double-allocated");
            self.bits[(s / 64) as usize] |= 1u64 << (s % 64);
        }
        self.free_count -= count;
    }

    fn clear_range(&mut self, slot: u32, count: u32) {
        for s in slot..slot + count {
            debug_assert!(self.is_set(s), "slot {s} double-freed");
            self.bits[(s / 64) as usize] &= !(1u64 << (s % 64));
        }
        self.free_count += count;
    }

    /// First `step`-aligned run of `count` free slots, or `None`.
    fn find_run(&self, atom_count: u32, count: u32, step: u32) -> Option<u32> {
        let mut slot = 0u32;
        while slot + count <= atom_count {
            match (0..count).position(|i| self.is_set(slot + i)) {
                None => return Some(slot),
                Some(hit) => {
                    let next = slot + hit as u32 + 1;
                    slot = next.div_ceil(step) * step;
                }
            }
        }
        None
    }

    fn occupied(&self) -> u32 {
        self.bits.iter().map(|w| w.count_ones()).sum()
    }
}

/// Fixed-slot pool allocator over source-backed pages.
pub struct PoolAllocator<M: MemorySource = SystemSource> {
    pages: Vec<Page>,
    config: PoolConfig,
    source: M,
    stats: StatTracker,
}

impl PoolAllocator<SystemSource> {
    /// Create a pool over the system heap source.
    pub fn new(config: PoolConfig) -> Result<Self, ConfigError> {
        Self::with_source(config, SystemSource)
    }
}

impl<M: MemorySource> PoolAllocator<M> {
    /// Create a pool over an explicit memory source.
    pub fn with_source(config: PoolConfig, source: M) -> Result<Self, ConfigError> {
        config.validate()?;
        let stats = StatTracker::new(config.stats);
        Ok(Self {
            pages: Vec::new(),
            config,
            source,
            stats,
        })
    }

    /// Allocate `size` bytes aligned to `align`.
    ///
    /// Alignment is honored up to the page base alignment; sub-atom
    /// requests occupy one atom.
    pub fn allocate(&mut self, size: usize, align: usize) -> Result<NonNull<u8>, AllocError> {
        let atoms = self.atoms_for(size)?;
        let step = self.slot_step(align);

        for page in &mut self.pages {
            if page.free_count < atoms {
                continue;
            }
            if let Some(slot) = page.find_run(self.config.atom_count, atoms, step) {
                page.set_range(slot, atoms);
                let ptr = Self::slot_ptr(page, slot, self.config.atom_size);
                self.stats
                    .record_alloc(u64::from(atoms) * u64::from(self.config.atom_size));
                return Ok(ptr);
            }
        }

        // No existing page has the run; start a fresh one.
        let memory = self.source.reserve(self.config.page_bytes())?;
        let mut page = Page::new(memory, self.config.atom_count);
        page.set_range(0, atoms);
        let ptr = Self::slot_ptr(&page, 0, self.config.atom_size);
        self.pages.push(page);
        self.stats.record_region_reserved();
        self.stats
            .record_alloc(u64::from(atoms) * u64::from(self.config.atom_size));
        Ok(ptr)
    }

    /// Release `size` bytes at `ptr`.
    ///
    /// # Panics
    ///
    /// Panics if the pointer does not belong to any page of this pool.
    pub fn deallocate(&mut self, ptr: NonNull<u8>, size: usize, _align: usize) {
        let addr = ptr.as_ptr() as usize;
        let atoms = self
            .atoms_for(size)
            .expect("a live allocation's size is always representable");
        let index = match self.pages.iter().position(|p| p.memory.contains(addr)) {
            Some(i) => i,
            None => panic!("pointer {addr:#x} does not belong to this pool"),
        };

        let page = &mut self.pages[index];
        let rel = addr - page.memory.base_addr();
        debug_assert_eq!(rel % self.config.atom_size as usize, 0);
        let slot = (rel / self.config.atom_size as usize) as u32;
        page.clear_range(slot, atoms);
        self.stats
            .record_dealloc(u64::from(atoms) * u64::from(self.config.atom_size));

        if page.free_count == self.config.atom_count
            && self.pages.len() > 1
            && self.config.release_empty_pages
        {
            let page = self.pages.swap_remove(index);
            self.stats.record_region_released();
            self.source.release(page.memory);
        }
    }

    /// Number of pages currently held.
    pub fn page_count(&self) -> usize {
        self.pages.len()
    }

    /// Free slots across all pages.
    pub fn free_atoms(&self) -> u64 {
        self.pages.iter().map(|p| u64::from(p.free_count)).sum()
    }

    /// A copy of the accumulated statistics (zeroes when disabled).
    pub fn stats(&self) -> StatSnapshot {
        self.stats.snapshot()
    }

    /// Check bitmap/free-count consistency for every page.
    pub fn validate(&self) -> bool {
        self.pages.iter().all(|p| {
            p.free_count <= self.config.atom_count
                && p.occupied() == self.config.atom_count - p.free_count
        })
    }

    fn atoms_for(&self, size: usize) -> Result<u32, AllocError> {
        let atom = self.config.atom_size as usize;
        let atoms = size.div_ceil(atom).max(1);
        match u32::try_from(atoms) {
            Ok(a) if a <= self.config.atom_count => Ok(a),
            _ => Err(AllocError::RequestTooLarge { requested: size }),
        }
    }

    /// Slot stride that keeps `base + slot * atom_size` aligned to the
    /// requested alignment, capped at the page base alignment.
    fn slot_step(&self, align: usize) -> u32 {
        let align = align.max(1).min(self.source.base_align()) as u32;
        if align <= self.config.atom_size {
            1
        } else {
            align / self.config.atom_size
        }
    }

    fn slot_ptr(page: &Page, slot: u32, atom_size: u32) -> NonNull<u8> {
        let delta = slot as usize * atom_size as usize;
        NonNull::new(page.memory.ptr().as_ptr().wrapping_add(delta))
            .expect("slot pointer within a live page is non-null")
    }
}

impl<M: MemorySource> Drop for PoolAllocator<M> {
    fn drop(&mut self) {
        for page in self.pages.drain(..) {
            self.source.release(page.memory);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn pool(atom_size: u32, atom_count: u32) -> PoolAllocator {
        PoolAllocator::new(PoolConfig {
            atom_size,
            atom_count,
            ..PoolConfig::default()
        })
        .unwrap()
    }

    #[test]
    fn sub_atom_requests_round_up() {
        let mut p = pool(64, 16);
        let a = p.allocate(1, 1).unwrap();
        let b = p.allocate(63, 1).unwrap();
        // Two distinct atoms.
        assert_eq!(
            (b.as_ptr() as usize).abs_diff(a.as_ptr() as usize),
            64
        );
        assert_eq!(p.free_atoms(), 14);
        p.deallocate(a, 1, 1);
        p.deallocate(b, 63, 1);
        assert!(p.validate());
    }

    #[test]
    fn multi_atom_runs_are_contiguous() {
        let mut p = pool(64, 16);
        let a = p.allocate(64 * 3, 1).unwrap();
        assert_eq!(p.free_atoms(), 13);
        p.deallocate(a, 64 * 3, 1);
        assert_eq!(p.free_atoms(), 16);
        assert!(p.validate());
    }

    #[test]
    fn freed_run_is_reused() {
        let mut p = pool(64, 8);
        let a = p.allocate(64 * 2, 1).unwrap();
        let _b = p.allocate(64 * 2, 1).unwrap();
        let c = p.allocate(64 * 2, 1).unwrap();
        p.deallocate(a, 64 * 2, 1);
        // The freed leading run satisfies the next 2-atom request
        // without growing past one page.
        let d = p.allocate(64 * 2, 1).unwrap();
        assert_eq!(d.as_ptr(), c.as_ptr().wrapping_sub(64 * 4));
        assert_eq!(p.page_count(), 1);
        assert!(p.validate());
    }

    #[test]
    fn full_page_overflows_into_new_page() {
        let mut p = pool(64, 4);
        let ptrs: Vec<_> = (0..4).map(|_| p.allocate(64, 1).unwrap()).collect();
        assert_eq!(p.page_count(), 1);
        let e = p.allocate(64, 1).unwrap();
        assert_eq!(p.page_count(), 2);
        for ptr in ptrs {
            p.deallocate(ptr, 64, 1);
        }
        // First page is now empty and is released; the pool keeps the
        // page holding the live allocation.
        assert_eq!(p.page_count(), 1);
        p.deallocate(e, 64, 1);
        // The last page is never released.
        assert_eq!(p.page_count(), 1);
        assert!(p.validate());
    }

    #[test]
    fn request_beyond_page_capacity_fails() {
        let mut p = pool(64, 4);
        let err = p.allocate(64 * 5, 1).unwrap_err();
        assert!(matches!(err, AllocError::RequestTooLarge { .. }));
    }

    #[test]
    fn alignment_is_honored_up_to_base() {
        let mut p = pool(16, 64);
        let a = p.allocate(16, 1).unwrap();
        let b = p.allocate(16, 64).unwrap();
        assert_eq!(b.as_ptr() as usize % 64, 0);
        p.deallocate(a, 16, 1);
        p.deallocate(b, 16, 64);
        assert!(p.validate());
    }

    #[test]
    fn exhausted_source_propagates() {
        struct DrySource;
        impl MemorySource for DrySource {
            fn reserve(&mut self, size: usize) -> Result<ArenaMemory, AllocError> {
                Err(AllocError::SourceExhausted { requested: size })
            }
            fn release(&mut self, _memory: ArenaMemory) {
                unreachable!("DrySource never hands out memory")
            }
        }
        let mut p = PoolAllocator::with_source(PoolConfig::default(), DrySource).unwrap();
        assert!(matches!(
            p.allocate(64, 1),
            Err(AllocError::SourceExhausted { .. })
        ));
    }
}
