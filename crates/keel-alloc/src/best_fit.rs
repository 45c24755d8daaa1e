//! Sorted best-fit placement strategy.
//!
//! Keeps two parallel vectors: `sizes` (non-decreasing) and `order` (the
//! matching block handles). Placement is a lower-bound binary search over
//! `sizes`; index maintenance is contiguous `copy_within` shifts, never a
//! re-sort and never a tree. Three equivalent search variants are provided
//! as a tuning knob; they always produce identical results.

use std::collections::HashSet;

use crate::arena::Banks;
use crate::block::{Block, BlockBank, BlockIndex};
use crate::strategy::{FreeSlot, PlacementStrategy};

/// Selects one of the three equivalent lower-bound search variants.
///
/// Purely a tuning knob: all variants return the same index for the same
/// input, and the choice never affects allocator behavior.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum BsearchAlgo {
    /// Classical halving with a terminal two-step linear correction.
    #[default]
    Halving = 0,
    /// Step loop that always halves until at most two candidates remain.
    Stepped = 1,
    /// Two halving steps per loop iteration.
    Unrolled = 2,
}

impl BsearchAlgo {
    /// Map the numeric configuration surface (`0`, `1`, `2`) to a variant.
    pub fn from_index(index: u32) -> Option<Self> {
        match index {
            0 => Some(Self::Halving),
            1 => Some(Self::Stepped),
            2 => Some(Self::Unrolled),
            _ => None,
        }
    }
}

/// Leftmost index with `s[i] >= key` — halving with terminal correction.
fn lower_bound_halving(s: &[u32], key: u32) -> usize {
    let mut base = 0usize;
    let mut size = s.len();
    while size > 2 {
        let mid = base + (size >> 1);
        size = (size + 1) >> 1;
        if s[mid] < key {
            base = mid;
        }
    }
    base += usize::from(size > 1 && s[base] < key);
    base += usize::from(size > 0 && s[base] < key);
    base
}

/// Leftmost index with `s[i] >= key` — single step per iteration.
fn lower_bound_stepped(s: &[u32], key: u32) -> usize {
    if s.is_empty() {
        return 0;
    }
    let mut base = 0usize;
    let mut size = s.len();
    loop {
        let mid = base + (size >> 1);
        size = (size + 1) >> 1;
        if s[mid] < key {
            base = mid;
        }
        if size <= 2 {
            break;
        }
    }
    base += usize::from(size > 1 && s[base] < key);
    base += usize::from(size > 0 && s[base] < key);
    base
}

/// Leftmost index with `s[i] >= key` — two steps per iteration.
fn lower_bound_unrolled(s: &[u32], key: u32) -> usize {
    if s.is_empty() {
        return 0;
    }
    let mut base = 0usize;
    let mut size = s.len();
    loop {
        let mid = base + (size >> 1);
        size = (size + 1) >> 1;
        if s[mid] < key {
            base = mid;
        }
        let mid = base + (size >> 1);
        size = (size + 1) >> 1;
        if s[mid] < key {
            base = mid;
        }
        if size <= 2 {
            break;
        }
    }
    base += usize::from(size > 1 && s[base] < key);
    base += usize::from(size > 0 && s[base] < key);
    base
}

/// Best-fit placement over a sorted free index.
pub struct BestFit {
    sizes: Vec<u32>,
    order: Vec<BlockIndex>,
    algo: BsearchAlgo,
}

impl BestFit {
    /// Create an empty index using the given search variant.
    pub fn new(algo: BsearchAlgo) -> Self {
        Self {
            sizes: Vec::new(),
            order: Vec::new(),
            algo,
        }
    }

    /// Leftmost index into the free index with size `>= key`; equals
    /// [`free_count`](PlacementStrategy::free_count) when every free
    /// block is smaller.
    pub fn find_ge(&self, key: u32) -> usize {
        Self::lower_bound(self.algo, &self.sizes, key)
    }

    fn lower_bound(algo: BsearchAlgo, s: &[u32], key: u32) -> usize {
        match algo {
            BsearchAlgo::Halving => lower_bound_halving(s, key),
            BsearchAlgo::Stepped => lower_bound_stepped(s, key),
            BsearchAlgo::Unrolled => lower_bound_unrolled(s, key),
        }
    }

    /// Locate `block` in the free index: lower-bound on its size, then a
    /// linear walk through the equal-size run.
    fn position_of(&self, size: u32, block: BlockIndex) -> usize {
        let mut i = Self::lower_bound(self.algo, &self.sizes, size);
        while i < self.order.len() && self.order[i] != block {
            i += 1;
        }
        debug_assert!(i < self.order.len(), "block {block} missing from free index");
        i
    }

    fn insert_sorted(&mut self, size: u32, block: BlockIndex) {
        let at = Self::lower_bound(self.algo, &self.sizes, size);
        self.sizes.insert(at, size);
        self.order.insert(at, block);
    }

    /// Re-home the entry at `of` to a smaller `size`: the destination is
    /// left of `of`, so the in-between entries shift right by one.
    fn reinsert_left(&mut self, of: usize, size: u32, block: BlockIndex) {
        let at = Self::lower_bound(self.algo, &self.sizes[..of], size);
        if at != of {
            self.sizes.copy_within(at..of, at + 1);
            self.order.copy_within(at..of, at + 1);
        }
        self.sizes[at] = size;
        self.order[at] = block;
    }

    /// Re-home the entry at `of` to a larger `size`: the destination is
    /// right of `of`, so the in-between entries shift left by one.
    fn reinsert_right(&mut self, of: usize, size: u32, block: BlockIndex) {
        let next = of + 1;
        let shift = Self::lower_bound(self.algo, &self.sizes[next..], size);
        if shift > 0 {
            self.sizes.copy_within(next..next + shift, of);
            self.order.copy_within(next..next + shift, of);
        }
        self.sizes[of + shift] = size;
        self.order[of + shift] = block;
    }
}

impl Default for BestFit {
    fn default() -> Self {
        Self::new(BsearchAlgo::default())
    }
}

impl PlacementStrategy for BestFit {
    fn try_allocate(&self, _banks: &Banks, size: u32) -> Option<FreeSlot> {
        match self.sizes.last() {
            Some(&largest) if largest >= size => Some(FreeSlot(self.find_ge(size))),
            _ => None,
        }
    }

    fn commit(&mut self, banks: &mut Banks, slot: FreeSlot, size: u32) -> BlockIndex {
        let at = slot.0;
        let node = self.order[at];
        let found = self.sizes[at];
        debug_assert!(found >= size, "committing undersized block {node}");
        debug_assert_eq!(banks.blocks[node].size(), found);

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
            // The remainder is no larger than the committed entry, so its
            // slot moves left within the ordering.
            self.reinsert_left(at, remaining, rest);
        } else {
            self.sizes.remove(at);
            self.order.remove(at);
        }
        node
    }

    fn add_free(&mut self, blocks: &mut BlockBank, block: BlockIndex) {
        blocks[block].is_free = true;
        let size = blocks[block].size();
        self.insert_sorted(size, block);
    }

    fn add_free_arena(&mut self, blocks: &mut BlockBank, block: BlockIndex) {
        debug_assert!(blocks[block].is_free());
        let size = blocks[block].size();
        self.insert_sorted(size, block);
    }

    fn grow(&mut self, blocks: &mut BlockBank, block: BlockIndex, new_size: u32) {
        let at = self.position_of(blocks[block].size(), block);
        blocks[block].size = new_size;
        self.reinsert_right(at, new_size, block);
    }

    fn replace_and_grow(
        &mut self,
        blocks: &mut BlockBank,
        old: BlockIndex,
        new: BlockIndex,
        new_size: u32,
    ) {
        let at = self.position_of(blocks[old].size(), old);
        blocks[new].size = new_size;
        self.reinsert_right(at, new_size, new);
    }

    fn erase(&mut self, blocks: &mut BlockBank, block: BlockIndex) {
        let at = self.position_of(blocks[block].size(), block);
        self.sizes.remove(at);
        self.order.remove(at);
    }

    fn free_count(&self) -> usize {
        self.order.len()
    }

    fn total_free_size(&self, _blocks: &BlockBank) -> u64 {
        self.sizes.iter().map(|&s| u64::from(s)).sum()
    }

    fn validate(&self, blocks: &BlockBank) -> bool {
        if self.sizes.len() != self.order.len() {
            return false;
        }
        if self.sizes.windows(2).any(|w| w[0] > w[1]) {
            return false;
        }
        let mut seen = HashSet::with_capacity(self.order.len());
        for (i, &block) in self.order.iter().enumerate() {
            let record = match blocks.get(block) {
                Some(r) => r,
                None => return false,
            };
            if !record.is_free() || record.size() != self.sizes[i] {
                return false;
            }
            if !seen.insert(block) {
                return false;
            }
        }
        // Every free block in the bank appears in the index.
        blocks.iter().filter(|(_, b)| b.is_free()).count() == self.order.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::source::{MemorySource, SystemSource};

    const ALGOS: [BsearchAlgo; 3] = [
        BsearchAlgo::Halving,
        BsearchAlgo::Stepped,
        BsearchAlgo::Unrolled,
    ];

    fn lower_bound(algo: BsearchAlgo, s: &[u32], key: u32) -> usize {
        BestFit::lower_bound(algo, s, key)
    }

    #[test]
    fn variants_agree_on_reference_keys() {
        let sizes = [4, 8, 8, 16, 32, 64];
        let expected = [(3, 0), (4, 0), (5, 1), (8, 1), (9, 3), (64, 5), (65, 6)];
        for algo in ALGOS {
            for (key, want) in expected {
                assert_eq!(
                    lower_bound(algo, &sizes, key),
                    want,
                    "algo {algo:?} key {key}"
                );
            }
        }
    }

    #[test]
    fn variants_agree_on_edge_inputs() {
        for algo in ALGOS {
            assert_eq!(lower_bound(algo, &[], 1), 0);
            assert_eq!(lower_bound(algo, &[5], 4), 0);
            assert_eq!(lower_bound(algo, &[5], 5), 0);
            assert_eq!(lower_bound(algo, &[5], 6), 1);
            assert_eq!(lower_bound(algo, &[3, 7], 7), 1);
            assert_eq!(lower_bound(algo, &[3, 7], 8), 2);
        }
    }

    #[test]
    fn variants_agree_exhaustively() {
        // Dense duplicate runs across lengths 0..=33 and every key in range.
        for len in 0..=33usize {
            let sizes: Vec<u32> = (0..len).map(|i| ((i / 3) * 2 + 2) as u32).collect();
            for key in 0..=((len as u32 / 3) * 2 + 4) {
                let want = sizes.partition_point(|&s| s < key);
                for algo in ALGOS {
                    assert_eq!(
                        lower_bound(algo, &sizes, key),
                        want,
                        "len {len} key {key} algo {algo:?}"
                    );
                }
            }
        }
    }

    // ── Index maintenance against a live bank ─────────────────────

    struct Fixture {
        banks: Banks,
        strat: BestFit,
        arena: crate::arena::ArenaIndex,
    }

    impl Fixture {
        fn new(arena_size: usize) -> Self {
            let mut banks = Banks::new();
            let memory = SystemSource.reserve(arena_size).unwrap();
            let (arena, span) = banks.install_arena(memory, false);
            let mut strat = BestFit::default();
            strat.add_free_arena(&mut banks.blocks, span);
            Self { banks, strat, arena }
        }

        fn alloc(&mut self, size: u32) -> BlockIndex {
            let slot = self.strat.try_allocate(&self.banks, size).unwrap();
            self.strat.commit(&mut self.banks, slot, size)
        }
    }

    impl Drop for Fixture {
        fn drop(&mut self) {
            let arena = self.banks.arenas.remove(self.arena);
            SystemSource.release(arena.memory);
        }
    }

    #[test]
    fn commit_splits_and_reinserts_left() {
        let mut f = Fixture::new(1024);
        let a = f.alloc(100);
        assert_eq!(f.banks.blocks[a].offset(), 0);
        assert_eq!(f.banks.blocks[a].size(), 100);
        assert!(!f.banks.blocks[a].is_free());
        // One remainder block of 924 remains indexed.
        assert_eq!(f.strat.free_count(), 1);
        assert_eq!(f.strat.total_free_size(&f.banks.blocks), 924);
        assert!(f.strat.validate(&f.banks.blocks));
    }

    #[test]
    fn exact_fit_commit_removes_entry() {
        let mut f = Fixture::new(256);
        let a = f.alloc(256);
        assert_eq!(f.banks.blocks[a].size(), 256);
        assert_eq!(f.strat.free_count(), 0);
        assert!(f.strat.validate(&f.banks.blocks));
    }

    #[test]
    fn add_free_restores_order() {
        let mut f = Fixture::new(1024);
        let a = f.alloc(100);
        let b = f.alloc(200);
        let _c = f.alloc(50);
        f.strat.add_free(&mut f.banks.blocks, b);
        f.strat.add_free(&mut f.banks.blocks, a);
        assert_eq!(f.strat.free_count(), 3);
        assert!(f.strat.validate(&f.banks.blocks));

        // Best fit for 150 is the freed 200-byte block, not the tail.
        let slot = f.strat.try_allocate(&f.banks, 150).unwrap();
        let hit = f.strat.commit(&mut f.banks, slot, 150);
        assert_eq!(hit, b);
        assert!(f.strat.validate(&f.banks.blocks));
    }

    #[test]
    fn grow_moves_entry_right() {
        let mut f = Fixture::new(1024);
        let a = f.alloc(64);
        let _b = f.alloc(64);
        f.strat.add_free(&mut f.banks.blocks, a);
        // a (64) grows past the 896 tail block.
        f.strat.grow(&mut f.banks.blocks, a, 1000);
        assert!(f.strat.validate(&f.banks.blocks));
        let slot = f.strat.try_allocate(&f.banks, 950).unwrap();
        assert_eq!(f.strat.commit(&mut f.banks, slot, 950), a);
    }

    #[test]
    fn replace_and_grow_swaps_handle() {
        let mut f = Fixture::new(1024);
        let a = f.alloc(64);
        let b = f.alloc(64);
        f.strat.add_free(&mut f.banks.blocks, a);
        // Pretend b absorbed a: the index entry for a is replaced by b.
        f.banks.blocks[a].is_free = false;
        f.banks.blocks[b].is_free = true;
        f.strat.replace_and_grow(&mut f.banks.blocks, a, b, 128);
        assert_eq!(f.banks.blocks[b].size(), 128);
        // Repair the bank shape for validate: a is gone from the index.
        assert_eq!(f.strat.free_count(), 2);
    }

    #[test]
    fn erase_removes_single_entry() {
        let mut f = Fixture::new(1024);
        let a = f.alloc(100);
        f.strat.add_free(&mut f.banks.blocks, a);
        assert_eq!(f.strat.free_count(), 2);
        f.strat.erase(&mut f.banks.blocks, a);
        f.banks.blocks[a].is_free = false;
        assert_eq!(f.strat.free_count(), 1);
        assert!(f.strat.validate(&f.banks.blocks));
    }

    #[test]
    fn tie_breaking_is_deterministic() {
        // Two runs of the same operation sequence pick the same blocks.
        let pick = |_: ()| {
            let mut f = Fixture::new(4096);
            let blocks: Vec<BlockIndex> = (0..8).map(|_| f.alloc(64)).collect();
            for &b in &blocks {
                f.strat.add_free(&mut f.banks.blocks, b);
            }
            let slot = f.strat.try_allocate(&f.banks, 64).unwrap();
            let hit = f.strat.commit(&mut f.banks, slot, 64);
            blocks.iter().position(|&b| b == hit).unwrap()
        };
        assert_eq!(pick(()), pick(()));
    }
}
