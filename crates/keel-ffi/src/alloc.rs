//! Allocator FFI: lifecycle, alloc/dealloc, validation, memory advice.
//!
//! Each allocator lives behind its own `Mutex` so the global handle
//! table is only locked for lookups; the mutex also provides the
//! serialization the coalescing allocator requires of its callers.

use std::panic::{catch_unwind, AssertUnwindSafe};
use std::ptr::NonNull;
use std::sync::{Arc, Mutex};

use keel_alloc::{
    Advice, AllocConfig, BsearchAlgo, CoalescingAllocator, MemorySource, Protection, StatsMode,
    SystemSource,
};

use crate::handle::HandleTable;
use crate::status::KeelStatus;

type AllocatorArc = Arc<Mutex<CoalescingAllocator>>;

static ALLOCATORS: Mutex<HandleTable<AllocatorArc>> = Mutex::new(HandleTable::new());

fn get_allocator(handle: u64) -> Option<AllocatorArc> {
    ALLOCATORS.lock().ok()?.get(handle).cloned()
}

/// C mirror of [`AllocConfig`]. Zeroed fields select defaults where a
/// zero value would be invalid.
#[repr(C)]
#[derive(Clone, Copy, Debug)]
pub struct KeelAllocConfig {
    /// Alignment floor and size quantum (power of two; 0 = default).
    pub granularity: u32,
    /// Fresh-arena size (0 = default).
    pub default_arena_size: u32,
    /// Direct-allocation threshold (0 = disabled).
    pub max_bucket: u32,
    /// Scan window for bounded strategies (0 = unbounded).
    pub search_window: u32,
    /// Binary search variant: 0, 1, or 2.
    pub bsearch_algo: u32,
    /// Minimum alignment of returned pointers (power of two; 0 = 1).
    pub min_alignment: u32,
    /// Nonzero: keep the live-pointer table.
    pub track_memory: u8,
    /// 0 = no stats, 1 = plain counters, 2 = atomic counters.
    pub stats_mode: u8,
    /// Nonzero: release fully-free arenas eagerly.
    pub release_empty_arenas: u8,
}

impl KeelAllocConfig {
    fn to_rust(self) -> Option<AllocConfig> {
        let defaults = AllocConfig::default();
        Some(AllocConfig {
            granularity: if self.granularity == 0 {
                defaults.granularity
            } else {
                self.granularity
            },
            default_arena_size: if self.default_arena_size == 0 {
                defaults.default_arena_size
            } else {
                self.default_arena_size
            },
            max_bucket: self.max_bucket,
            search_window: self.search_window,
            bsearch_algo: BsearchAlgo::from_index(self.bsearch_algo)?,
            min_alignment: if self.min_alignment == 0 {
                1
            } else {
                self.min_alignment
            },
            track_memory: self.track_memory != 0,
            stats: match self.stats_mode {
                0 => StatsMode::Disabled,
                1 => StatsMode::Compute,
                2 => StatsMode::ComputeAtomic,
                _ => return None,
            },
            release_empty_arenas: self.release_empty_arenas != 0,
        })
    }
}

/// Write the default configuration to `out`.
#[no_mangle]
#[allow(unsafe_code)]
pub extern "C" fn keel_alloc_config_default(out: *mut KeelAllocConfig) -> i32 {
    if out.is_null() {
        return KeelStatus::InvalidArgument as i32;
    }
    let defaults = AllocConfig::default();
    let config = KeelAllocConfig {
        granularity: defaults.granularity,
        default_arena_size: defaults.default_arena_size,
        max_bucket: defaults.max_bucket,
        search_window: defaults.search_window,
        bsearch_algo: 0,
        min_alignment: defaults.min_alignment,
        track_memory: 0,
        stats_mode: 0,
        release_empty_arenas: 1,
    };
    // SAFETY: out is non-null and valid per caller contract.
    unsafe { *out = config };
    KeelStatus::Ok as i32
}

/// Create an allocator. Writes the handle to `out` on success.
#[no_mangle]
#[allow(unsafe_code)]
pub extern "C" fn keel_allocator_create(config: *const KeelAllocConfig, out: *mut u64) -> i32 {
    if config.is_null() || out.is_null() {
        return KeelStatus::InvalidArgument as i32;
    }
    // SAFETY: config is non-null and valid per caller contract.
    let c_config = unsafe { *config };
    let rust_config = match c_config.to_rust() {
        Some(c) => c,
        None => return KeelStatus::ConfigError as i32,
    };
    let allocator = match CoalescingAllocator::new(rust_config) {
        Ok(a) => a,
        Err(e) => return KeelStatus::from(&e) as i32,
    };
    let handle = match ALLOCATORS.lock() {
        Ok(mut table) => table.insert(Arc::new(Mutex::new(allocator))),
        Err(_) => return KeelStatus::InternalError as i32,
    };
    // SAFETY: out is non-null and valid per caller contract.
    unsafe { *out = handle };
    KeelStatus::Ok as i32
}

/// Destroy an allocator, returning all its arenas to the source.
#[no_mangle]
#[allow(unsafe_code)]
pub extern "C" fn keel_allocator_destroy(handle: u64) -> i32 {
    match ALLOCATORS.lock() {
        Ok(mut table) => match table.remove(handle) {
            Some(_) => KeelStatus::Ok as i32,
            None => KeelStatus::InvalidHandle as i32,
        },
        Err(_) => KeelStatus::InternalError as i32,
    }
}

/// Allocate `bytes` aligned to `align`. Returns null on failure; a
/// `bytes == 0` request returns the non-null zero-size sentinel.
#[no_mangle]
#[allow(unsafe_code)]
pub extern "C" fn keel_alloc(handle: u64, bytes: usize, align: usize) -> *mut u8 {
    let Some(arc) = get_allocator(handle) else {
        return std::ptr::null_mut();
    };
    let result = catch_unwind(AssertUnwindSafe(|| {
        let mut allocator = arc.lock().ok()?;
        allocator.allocate(bytes, align.max(1)).ok()
    }));
    match result {
        Ok(Some(allocation)) => {
            let ptr = allocation.ptr().as_ptr();
            // The C side releases by pointer; forget the typed handle.
            std::mem::forget(allocation);
            ptr
        }
        _ => std::ptr::null_mut(),
    }
}

/// Release `bytes` at `ptr`. Deallocating the zero-size sentinel
/// (any pointer with `bytes == 0`) is a no-op.
#[no_mangle]
#[allow(unsafe_code)]
pub extern "C" fn keel_dealloc(handle: u64, ptr: *mut u8, bytes: usize, align: usize) -> i32 {
    if bytes == 0 {
        return KeelStatus::Ok as i32;
    }
    let Some(non_null) = NonNull::new(ptr) else {
        return KeelStatus::InvalidArgument as i32;
    };
    let Some(arc) = get_allocator(handle) else {
        return KeelStatus::InvalidHandle as i32;
    };
    let result = catch_unwind(AssertUnwindSafe(|| {
        let mut allocator = match arc.lock() {
            Ok(a) => a,
            Err(_) => return KeelStatus::InternalError,
        };
        allocator.deallocate_ptr(non_null, bytes, align.max(1));
        KeelStatus::Ok
    }));
    match result {
        Ok(status) => status as i32,
        Err(_) => KeelStatus::Panicked as i32,
    }
}

/// Run the allocator's invariant checks. Returns 1 when they hold,
/// 0 when broken, negative status on lookup failure.
#[no_mangle]
#[allow(unsafe_code)]
pub extern "C" fn keel_validate(handle: u64) -> i32 {
    let Some(arc) = get_allocator(handle) else {
        return KeelStatus::InvalidHandle as i32;
    };
    let status = match arc.lock() {
        Ok(allocator) => i32::from(allocator.validate()),
        Err(_) => KeelStatus::InternalError as i32,
    };
    status
}

/// Advise the host about the usage pattern of `[ptr, ptr + bytes)`.
///
/// `kind`: 0 normal, 1 random, 2 sequential, 3 will-need, 4 dont-need.
/// Best-effort; returns `Ok` even when the host ignores the hint.
#[no_mangle]
#[allow(unsafe_code)]
pub extern "C" fn keel_advise(ptr: *mut u8, bytes: usize, kind: u32) -> i32 {
    let Some(non_null) = NonNull::new(ptr) else {
        return KeelStatus::InvalidArgument as i32;
    };
    let advice = match kind {
        0 => Advice::Normal,
        1 => Advice::Random,
        2 => Advice::Sequential,
        3 => Advice::WillNeed,
        4 => Advice::DontNeed,
        _ => return KeelStatus::InvalidArgument as i32,
    };
    let _ = SystemSource.advise(non_null, bytes, advice);
    KeelStatus::Ok as i32
}

/// Change the protection of `[ptr, ptr + bytes)`.
///
/// `protection` is a bitset: 1 read, 2 write, 0 none. Best-effort.
#[no_mangle]
#[allow(unsafe_code)]
pub extern "C" fn keel_protect(ptr: *mut u8, bytes: usize, protection: u32) -> i32 {
    let Some(non_null) = NonNull::new(ptr) else {
        return KeelStatus::InvalidArgument as i32;
    };
    let protection = match protection {
        0 => Protection::None,
        1 => Protection::Read,
        2 => Protection::Write,
        3 => Protection::ReadWrite,
        _ => return KeelStatus::InvalidArgument as i32,
    };
    let _ = SystemSource.protect(non_null, bytes, protection);
    KeelStatus::Ok as i32
}
