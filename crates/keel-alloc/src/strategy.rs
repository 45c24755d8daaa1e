//! The placement-strategy capability set.
//!
//! A [`PlacementStrategy`] owns the free index over the block bank and
//! answers placement queries for the coalescing allocator. The allocator
//! depends only on this capability set; concrete strategies are chosen at
//! construction as a type parameter.

use crate::arena::Banks;
use crate::block::{BlockBank, BlockIndex};

/// Opaque position of a hit in a strategy's free index, as returned by
/// [`PlacementStrategy::try_allocate`] and consumed by
/// [`PlacementStrategy::commit`].
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct FreeSlot(pub(crate) usize);

/// The capability set shared by all placement strategies.
///
/// Mutating operations must uphold the strategy's own index invariants
/// (for the best-fit family: `sizes` non-decreasing, entries matching the
/// block bank). The allocator serializes all access.
pub trait PlacementStrategy {
    /// Find a free block of at least `size` bytes, or `None`.
    fn try_allocate(&self, banks: &Banks, size: u32) -> Option<FreeSlot>;

    /// Consume the hit: mark the block allocated at exactly `size` bytes,
    /// splitting off a free remainder into the order list and the free
    /// index when the block was larger. Returns the allocated block.
    fn commit(&mut self, banks: &mut Banks, slot: FreeSlot, size: u32) -> BlockIndex;

    /// Mark `block` free and add it to the free index.
    fn add_free(&mut self, blocks: &mut BlockBank, block: BlockIndex);

    /// Add the already-free spanning block of a freshly reserved arena to
    /// the free index.
    fn add_free_arena(&mut self, blocks: &mut BlockBank, block: BlockIndex);

    /// A free block grew in place (coalescing): update its record to
    /// `new_size` and restore index ordering.
    fn grow(&mut self, blocks: &mut BlockBank, block: BlockIndex, new_size: u32);

    /// Replace the indexed block `old` with `new` at `new_size`, restoring
    /// index ordering. `old`'s record is left untouched.
    fn replace_and_grow(
        &mut self,
        blocks: &mut BlockBank,
        old: BlockIndex,
        new: BlockIndex,
        new_size: u32,
    );

    /// Remove `block` from the free index without touching its record.
    fn erase(&mut self, blocks: &mut BlockBank, block: BlockIndex);

    /// Number of free blocks currently indexed.
    fn free_count(&self) -> usize;

    /// Total bytes across all indexed free blocks.
    fn total_free_size(&self, blocks: &BlockBank) -> u64;

    /// Check the strategy's own invariants against the block bank.
    fn validate(&self, blocks: &BlockBank) -> bool;
}
