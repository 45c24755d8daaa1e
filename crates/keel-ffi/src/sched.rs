//! Scheduler FFI: lifecycle and work submission.
//!
//! C callbacks are `extern "C" fn(u64)`; each submission boxes the
//! callback/argument pair and a trampoline unboxes and invokes it on
//! the executing worker. The scheduler guarantees every accepted item
//! runs (workers drain on shutdown, `keel_scheduler_end` drains the
//! rest), so the box is always reclaimed.

use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::{Arc, Mutex};

use keel_core::{GroupId, WorkerId};
use keel_sched::{ExecutionContext, Scheduler, SchedulerConfig, WorkItem, WorkgroupDesc};

use crate::handle::HandleTable;
use crate::status::KeelStatus;

type SchedulerArc = Arc<Mutex<Scheduler>>;

static SCHEDULERS: Mutex<HandleTable<SchedulerArc>> = Mutex::new(HandleTable::new());

fn get_scheduler(handle: u64) -> Option<SchedulerArc> {
    SCHEDULERS.lock().ok()?.get(handle).cloned()
}

/// C mirror of [`WorkgroupDesc`].
#[repr(C)]
#[derive(Clone, Copy, Debug)]
pub struct KeelWorkgroupDesc {
    /// Number of worker threads in the group.
    pub thread_count: u32,
    /// Priority rank; 0 is the highest.
    pub priority: u32,
}

/// The C work callback: receives the submission's argument word.
pub type KeelWorkFn = extern "C" fn(arg: u64);

struct CTask {
    func: KeelWorkFn,
    arg: u64,
}

/// Trampoline bridging ring-borne work items to C callbacks.
fn c_trampoline(arg: u64, _ctx: &ExecutionContext<'_>) {
    // SAFETY: `arg` is a Box::into_raw pointer produced by keel_submit
    // and consumed exactly once here (every accepted item runs once).
    #[allow(unsafe_code)]
    let task = unsafe { Box::from_raw(arg as usize as *mut CTask) };
    // A panicking C callback must not unwind across the worker loop.
    let _ = catch_unwind(AssertUnwindSafe(|| (task.func)(task.arg)));
}

/// Create a scheduler from `count` workgroup descriptors and write its
/// handle to `out`. `ring_capacity` of 0 selects the default. Worker
/// threads are not started until [`keel_scheduler_begin`].
#[no_mangle]
#[allow(unsafe_code)]
pub extern "C" fn keel_scheduler_create(
    descriptors: *const KeelWorkgroupDesc,
    count: usize,
    ring_capacity: usize,
    out: *mut u64,
) -> i32 {
    if descriptors.is_null() || count == 0 || out.is_null() {
        return KeelStatus::InvalidArgument as i32;
    }
    // SAFETY: descriptors points to `count` valid entries per contract.
    let c_descs = unsafe { std::slice::from_raw_parts(descriptors, count) };
    let descs: Vec<WorkgroupDesc> = c_descs
        .iter()
        .map(|d| WorkgroupDesc::new(d.thread_count, d.priority))
        .collect();
    let config = SchedulerConfig {
        ring_capacity: if ring_capacity == 0 {
            SchedulerConfig::DEFAULT_RING_CAPACITY
        } else {
            ring_capacity
        },
        ..SchedulerConfig::default()
    };
    let scheduler = match Scheduler::new(config, &descs) {
        Ok(s) => s,
        Err(e) => return KeelStatus::from(&e) as i32,
    };
    let handle = match SCHEDULERS.lock() {
        Ok(mut table) => table.insert(Arc::new(Mutex::new(scheduler))),
        Err(_) => return KeelStatus::InternalError as i32,
    };
    // SAFETY: out is non-null and valid per caller contract.
    unsafe { *out = handle };
    KeelStatus::Ok as i32
}

/// Start the worker threads.
#[no_mangle]
#[allow(unsafe_code)]
pub extern "C" fn keel_scheduler_begin(handle: u64) -> i32 {
    let Some(arc) = get_scheduler(handle) else {
        return KeelStatus::InvalidHandle as i32;
    };
    let mut scheduler = match arc.lock() {
        Ok(s) => s,
        Err(_) => return KeelStatus::InternalError as i32,
    };
    match scheduler.begin() {
        Ok(()) => KeelStatus::Ok as i32,
        Err(e) => KeelStatus::from(&e) as i32,
    }
}

/// Stop the workers, drain all queues, and join the threads. Every
/// accepted submission has run when this returns.
#[no_mangle]
#[allow(unsafe_code)]
pub extern "C" fn keel_scheduler_end(handle: u64) -> i32 {
    let Some(arc) = get_scheduler(handle) else {
        return KeelStatus::InvalidHandle as i32;
    };
    let status = match arc.lock() {
        Ok(mut scheduler) => {
            scheduler.end();
            KeelStatus::Ok as i32
        }
        Err(_) => KeelStatus::InternalError as i32,
    };
    status
}

/// Destroy a scheduler. Ends it first if still running.
#[no_mangle]
#[allow(unsafe_code)]
pub extern "C" fn keel_scheduler_destroy(handle: u64) -> i32 {
    match SCHEDULERS.lock() {
        Ok(mut table) => match table.remove(handle) {
            Some(_) => KeelStatus::Ok as i32,
            None => KeelStatus::InvalidHandle as i32,
        },
        Err(_) => KeelStatus::InternalError as i32,
    }
}

/// Submit `func(arg)` to `group`, preferring worker `hint`'s ring.
#[no_mangle]
#[allow(unsafe_code)]
pub extern "C" fn keel_submit(
    handle: u64,
    group: u32,
    hint: u32,
    func: Option<KeelWorkFn>,
    arg: u64,
) -> i32 {
    let Some(func) = func else {
        return KeelStatus::InvalidArgument as i32;
    };
    let Some(arc) = get_scheduler(handle) else {
        return KeelStatus::InvalidHandle as i32;
    };
    let scheduler = match arc.lock() {
        Ok(s) => s,
        Err(_) => return KeelStatus::InternalError as i32,
    };
    let raw = Box::into_raw(Box::new(CTask { func, arg })) as usize as u64;
    match scheduler.submit(GroupId(group), WorkerId(hint), WorkItem::new(c_trampoline, raw)) {
        Ok(()) => KeelStatus::Ok as i32,
        Err(e) => {
            // The item never entered a ring; reclaim the box.
            // SAFETY: raw was produced by Box::into_raw just above and
            // the trampoline will never see it.
            #[allow(unsafe_code)]
            drop(unsafe { Box::from_raw(raw as usize as *mut CTask) });
            KeelStatus::from(&e) as i32
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    static HITS: AtomicU32 = AtomicU32::new(0);

    extern "C" fn record_hit(arg: u64) {
        HITS.fetch_add(arg as u32, Ordering::SeqCst);
    }

    #[test]
    fn full_lifecycle_through_the_c_surface() {
        HITS.store(0, Ordering::SeqCst);
        let descs = [
            KeelWorkgroupDesc {
                thread_count: 2,
                priority: 0,
            },
            KeelWorkgroupDesc {
                thread_count: 1,
                priority: 1,
            },
        ];
        let mut handle = 0u64;
        assert_eq!(
            keel_scheduler_create(descs.as_ptr(), descs.len(), 0, &mut handle),
            0
        );
        assert_eq!(keel_scheduler_begin(handle), 0);
        for _ in 0..10 {
            assert_eq!(keel_submit(handle, 0, 0, Some(record_hit), 1), 0);
        }
        assert_eq!(keel_scheduler_end(handle), 0);
        assert_eq!(HITS.load(Ordering::SeqCst), 10);
        assert_eq!(keel_scheduler_destroy(handle), 0);
    }

    #[test]
    fn submit_without_begin_runs_at_end() {
        static LATE: AtomicU32 = AtomicU32::new(0);
        extern "C" fn late(_arg: u64) {
            LATE.fetch_add(1, Ordering::SeqCst);
        }
        let descs = [KeelWorkgroupDesc {
            thread_count: 1,
            priority: 0,
        }];
        let mut handle = 0u64;
        keel_scheduler_create(descs.as_ptr(), 1, 0, &mut handle);
        assert_eq!(keel_submit(handle, 0, 0, Some(late), 0), 0);
        assert_eq!(keel_scheduler_end(handle), 0);
        assert_eq!(LATE.load(Ordering::SeqCst), 1);
        keel_scheduler_destroy(handle);
    }

    #[test]
    fn invalid_arguments_are_reported() {
        let mut handle = 0u64;
        assert_eq!(
            keel_scheduler_create(std::ptr::null(), 1, 0, &mut handle),
            KeelStatus::InvalidArgument as i32
        );
        assert_eq!(
            keel_submit(0, 0, 0, None, 0),
            KeelStatus::InvalidArgument as i32
        );
        assert_eq!(keel_scheduler_begin(0), KeelStatus::InvalidHandle as i32);
        extern "C" fn nop(_arg: u64) {}
        assert_eq!(
            keel_submit(123_456, 0, 0, Some(nop), 0),
            KeelStatus::InvalidHandle as i32
        );
    }

    #[test]
    fn unknown_group_surfaces_through_submit() {
        let descs = [KeelWorkgroupDesc {
            thread_count: 1,
            priority: 0,
        }];
        let mut handle = 0u64;
        keel_scheduler_create(descs.as_ptr(), 1, 0, &mut handle);
        extern "C" fn nop(_arg: u64) {}
        assert_eq!(
            keel_submit(handle, 5, 0, Some(nop), 0),
            KeelStatus::UnknownGroup as i32
        );
        keel_scheduler_destroy(handle);
    }
}
