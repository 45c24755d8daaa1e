//! Allocator configuration parameters.
//!
//! [`AllocConfig`] tunes the coalescing arena allocator, [`PoolConfig`]
//! the fixed-slot pool allocator. Both are validated at construction;
//! all values are immutable after creation.

use std::error::Error;
use std::fmt;

use crate::best_fit::BsearchAlgo;
use crate::stats::StatsMode;

/// Configuration for the coalescing arena allocator.
#[derive(Clone, Debug)]
pub struct AllocConfig {
    /// Alignment floor and size quantum in bytes. Every request is rounded
    /// up to a multiple of this value. Must be a power of two.
    ///
    /// Default: 8.
    pub granularity: u32,

    /// Size of a freshly reserved arena when the request itself does not
    /// demand more. Default: 256 KiB.
    pub default_arena_size: u32,

    /// Requests larger than this bypass the free index and receive a
    /// dedicated arena sized to the request. `0` disables the bypass.
    ///
    /// Default: 0.
    pub max_bucket: u32,

    /// Bounded window for scan-based placement strategies (first-fit).
    /// Binary-search strategies ignore it. `0` means unbounded.
    ///
    /// Default: 32.
    pub search_window: u32,

    /// Which of the three equivalent binary-search variants the best-fit
    /// strategy uses. A tuning knob only; never affects results.
    pub bsearch_algo: BsearchAlgo,

    /// Every returned pointer is aligned to at least this. Must be a
    /// power of two. Default: 1 (no floor beyond `granularity`).
    pub min_alignment: u32,

    /// Keep a live table of pointer → allocation records, enabling O(1)
    /// pointer-based deallocation and leak reporting. Default: false.
    pub track_memory: bool,

    /// Statistics accumulation mode. Default: [`StatsMode::Disabled`].
    pub stats: StatsMode,

    /// Release an arena back to the memory source as soon as it becomes
    /// a single whole-arena free block. Arenas reserved explicitly via
    /// [`reserve`](crate::coalescing::CoalescingAllocator::reserve) are
    /// exempt regardless. Default: true.
    pub release_empty_arenas: bool,
}

impl AllocConfig {
    /// Default size quantum.
    pub const DEFAULT_GRANULARITY: u32 = 8;

    /// Default arena size: 256 KiB.
    pub const DEFAULT_ARENA_SIZE: u32 = 256 * 1024;

    /// Default scan window for bounded strategies.
    pub const DEFAULT_SEARCH_WINDOW: u32 = 32;

    /// Validate structural invariants of the configuration.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.granularity == 0 || !self.granularity.is_power_of_two() {
            return Err(ConfigError::NotPowerOfTwo {
                field: "granularity",
                value: self.granularity,
            });
        }
        if self.min_alignment == 0 || !self.min_alignment.is_power_of_two() {
            return Err(ConfigError::NotPowerOfTwo {
                field: "min_alignment",
                value: self.min_alignment,
            });
        }
        if self.default_arena_size == 0 {
            return Err(ConfigError::ZeroField {
                field: "default_arena_size",
            });
        }
        if self.default_arena_size < self.granularity {
            return Err(ConfigError::ArenaSmallerThanGranularity {
                arena: self.default_arena_size,
                granularity: self.granularity,
            });
        }
        Ok(())
    }
}

impl Default for AllocConfig {
    fn default() -> Self {
        Self {
            granularity: Self::DEFAULT_GRANULARITY,
            default_arena_size: Self::DEFAULT_ARENA_SIZE,
            max_bucket: 0,
            search_window: Self::DEFAULT_SEARCH_WINDOW,
            bsearch_algo: BsearchAlgo::default(),
            min_alignment: 1,
            track_memory: false,
            stats: StatsMode::Disabled,
            release_empty_arenas: true,
        }
    }
}

/// Configuration for the fixed-slot pool allocator.
#[derive(Clone, Debug)]
pub struct PoolConfig {
    /// Size of one atom (slot) in bytes. Must be a power of two.
    /// Sub-atom requests are rounded up to one atom. Default: 64.
    pub atom_size: u32,

    /// Number of atoms per page. Default: 1024.
    pub atom_count: u32,

    /// Release a page back to the memory source when it becomes fully
    /// free and the pool still holds at least one other page.
    /// Default: true.
    pub release_empty_pages: bool,

    /// Statistics accumulation mode. Default: [`StatsMode::Disabled`].
    pub stats: StatsMode,
}

impl PoolConfig {
    /// Default atom size in bytes.
    pub const DEFAULT_ATOM_SIZE: u32 = 64;

    /// Default atoms per page.
    pub const DEFAULT_ATOM_COUNT: u32 = 1024;

    /// Total bytes of one page.
    pub fn page_bytes(&self) -> usize {
        self.atom_size as usize * self.atom_count as usize
    }

    /// Validate structural invariants of the configuration.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.atom_size == 0 || !self.atom_size.is_power_of_two() {
            return Err(ConfigError::NotPowerOfTwo {
                field: "atom_size",
                value: self.atom_size,
            });
        }
        if self.atom_count == 0 {
            return Err(ConfigError::ZeroField { field: "atom_count" });
        }
        Ok(())
    }
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            atom_size: Self::DEFAULT_ATOM_SIZE,
            atom_count: Self::DEFAULT_ATOM_COUNT,
            release_empty_pages: true,
            stats: StatsMode::Disabled,
        }
    }
}

/// Errors detected during config validation.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ConfigError {
    /// A field that must be a nonzero power of two is not.
    NotPowerOfTwo {
        /// Name of the offending field.
        field: &'static str,
        /// The rejected value.
        value: u32,
    },
    /// A field that must be nonzero is zero.
    ZeroField {
        /// Name of the offending field.
        field: &'static str,
    },
    /// `default_arena_size` is below the size quantum.
    ArenaSmallerThanGranularity {
        /// The configured arena size.
        arena: u32,
        /// The configured granularity.
        granularity: u32,
    },
}

impl fmt::Display for ConfigError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::NotPowerOfTwo { field, value } => {
                write!(f, "{field} must be a nonzero power of two, got {value}")
            }
            Self::ZeroField { field } => write!(f, "{field} must be nonzero"),
            Self::ArenaSmallerThanGranularity { arena, granularity } => {
                write!(
                    f,
                    "default_arena_size {arena} is below granularity {granularity}"
                )
            }
        }
    }
}

impl Error for ConfigError {}
