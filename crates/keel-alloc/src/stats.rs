//! Optional allocation statistics.
//!
//! Both allocators carry a [`StatTracker`] selected by
//! [`StatsMode`]: disabled (zero cost), plain counters, or atomic
//! counters for allocators embedded behind a lock whose readers sample
//! concurrently via shared references.

use std::sync::atomic::{AtomicU64, Ordering};

/// Statistics accumulation mode.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum StatsMode {
    /// No accumulation.
    #[default]
    Disabled,
    /// Plain counters updated through the allocator's `&mut` methods.
    Compute,
    /// Atomic counters, safely readable while another thread holds the
    /// allocator behind a lock.
    ComputeAtomic,
}

/// A point-in-time copy of the accumulated counters.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct StatSnapshot {
    /// Number of successful allocations.
    pub alloc_calls: u64,
    /// Number of deallocations.
    pub dealloc_calls: u64,
    /// Bytes currently handed out (effective sizes).
    pub bytes_in_use: u64,
    /// High-water mark of `bytes_in_use`.
    pub peak_bytes: u64,
    /// Arenas (or pages) reserved from the memory source.
    pub regions_reserved: u64,
    /// Arenas (or pages) returned to the memory source.
    pub regions_released: u64,
}

#[derive(Debug, Default)]
struct AtomicCounters {
    alloc_calls: AtomicU64,
    dealloc_calls: AtomicU64,
    bytes_in_use: AtomicU64,
    peak_bytes: AtomicU64,
    regions_reserved: AtomicU64,
    regions_released: AtomicU64,
}

/// Internal statistics sink selected by [`StatsMode`].
#[derive(Debug)]
pub(crate) enum StatTracker {
    Disabled,
    Plain(StatSnapshot),
    Atomic(AtomicCounters),
}

impl StatTracker {
    pub(crate) fn new(mode: StatsMode) -> Self {
        match mode {
            StatsMode::Disabled => Self::Disabled,
            StatsMode::Compute => Self::Plain(StatSnapshot::default()),
            StatsMode::ComputeAtomic => Self::Atomic(AtomicCounters::default()),
        }
    }

    pub(crate) fn record_alloc(&mut self, bytes: u64) {
        match self {
            Self::Disabled => {}
            Self::Plain(s) => {
                s.alloc_calls += 1;
                s.bytes_in_use += bytes;
                s.peak_bytes = s.peak_bytes.max(s.bytes_in_use);
            }
            Self::Atomic(c) => {
                c.alloc_calls.fetch_add(1, Ordering::Relaxed);
                let now = c.bytes_in_use.fetch_add(bytes, Ordering::Relaxed) + bytes;
                c.peak_bytes.fetch_max(now, Ordering::Relaxed);
            }
        }
    }

    pub(crate) fn record_dealloc(&mut self, bytes: u64) {
        match self {
            Self::Disabled => {}
            Self::Plain(s) => {
                s.dealloc_calls += 1;
                s.bytes_in_use = s.bytes_in_use.saturating_sub(bytes);
            }
            Self::Atomic(c) => {
                c.dealloc_calls.fetch_add(1, Ordering::Relaxed);
                c.bytes_in_use.fetch_sub(bytes, Ordering::Relaxed);
            }
        }
    }

    pub(crate) fn record_region_reserved(&mut self) {
        match self {
            Self::Disabled => {}
            Self::Plain(s) => s.regions_reserved += 1,
            Self::Atomic(c) => {
                c.regions_reserved.fetch_add(1, Ordering::Relaxed);
            }
        }
    }

    pub(crate) fn record_region_released(&mut self) {
        match self {
            Self::Disabled => {}
            Self::Plain(s) => s.regions_released += 1,
            Self::Atomic(c) => {
                c.regions_released.fetch_add(1, Ordering::Relaxed);
            }
        }
    }

    pub(crate) fn snapshot(&self) -> StatSnapshot {
        match self {
            Self::Disabled => StatSnapshot::default(),
            Self::Plain(s) => *s,
            Self::Atomic(c) => StatSnapshot {
                alloc_calls: c.alloc_calls.load(Ordering::Relaxed),
                dealloc_calls: c.dealloc_calls.load(Ordering::Relaxed),
                bytes_in_use: c.bytes_in_use.load(Ordering::Relaxed),
                peak_bytes: c.peak_bytes.load(Ordering::Relaxed),
                regions_reserved: c.regions_reserved.load(Ordering::Relaxed),
                regions_released: c.regions_released.load(Ordering::Relaxed),
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn disabled_stays_zero() {
        let mut t = StatTracker::new(StatsMode::Disabled);
        t.record_alloc(100);
        t.record_dealloc(100);
        assert_eq!(t.snapshot(), StatSnapshot::default());
    }

    #[test]
    fn plain_tracks_peak() {
        let mut t = StatTracker::new(StatsMode::Compute);
        t.record_alloc(100);
        t.record_alloc(50);
        t.record_dealloc(100);
        t.record_alloc(10);
        let s = t.snapshot();
        assert_eq!(s.alloc_calls, 3);
        assert_eq!(s.dealloc_calls, 1);
        assert_eq!(s.bytes_in_use, 60);
        assert_eq!(s.peak_bytes, 150);
    }

    #[test]
    fn atomic_matches_plain() {
        let mut plain = StatTracker::new(StatsMode::Compute);
        let mut atomic = StatTracker::new(StatsMode::ComputeAtomic);
        for t in [&mut plain, &mut atomic] {
            t.record_alloc(64);
            t.record_region_reserved();
            t.record_dealloc(64);
            t.record_region_released();
        }
        assert_eq!(plain.snapshot(), atomic.snapshot());
    }
}
