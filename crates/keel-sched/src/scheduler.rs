//! The scheduler: construction, submission, the worker loop, shutdown.
//!
//! Workers drain their own rings in priority order, then steal from
//! group peers (rotating start position), then spin briefly, then park
//! on their wake event. Producers notify a parked eligible worker after
//! every successful enqueue, so a ring transitioning empty→non-empty is
//! always followed by either a consumer observing the item or a wake.
//!
//! The scheduler is an explicit object owned by the caller; work items
//! reach it through their [`ExecutionContext`], never via ambient
//! lookup.

use std::error::Error;
use std::fmt;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};

use smallvec::SmallVec;

use keel_core::{GroupId, SubmitError, WorkerId};

use crate::queue::BlockQueue;
use crate::task::{package_sync, ExecutionContext, TaskHandle, WorkFn, WorkItem};
use crate::worker::WorkerShared;
use crate::workgroup::{Workgroup, WorkgroupDesc};

/// Most workers a scheduler can hold: the width of the steal mask.
pub const MAX_WORKERS: u32 = 64;

/// Most workgroups a scheduler can hold.
pub const MAX_GROUPS: usize = 32;

// ── Configuration ─────────────────────────────────────────────────

/// Tunables for the scheduler.
#[derive(Clone, Debug)]
pub struct SchedulerConfig {
    /// Capacity of every per-worker ring. Power of two, at least 2.
    /// Default: 64.
    pub ring_capacity: usize,
    /// Rounds of own-queue/steal retries before a worker parks.
    /// Default: 64.
    pub spin_budget: u32,
}

impl SchedulerConfig {
    /// Default per-worker ring capacity.
    pub const DEFAULT_RING_CAPACITY: usize = 64;

    /// Default spin budget before parking.
    pub const DEFAULT_SPIN_BUDGET: u32 = 64;
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            ring_capacity: Self::DEFAULT_RING_CAPACITY,
            spin_budget: Self::DEFAULT_SPIN_BUDGET,
        }
    }
}

/// Errors detected while building a scheduler.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ConfigError {
    /// No workgroup descriptors were supplied.
    NoWorkgroups,
    /// A workgroup declared zero threads.
    ZeroThreadGroup {
        /// Index of the offending descriptor.
        group: usize,
    },
    /// The descriptors add up to more workers than the steal mask holds.
    TooManyWorkers {
        /// The requested total.
        count: u32,
    },
    /// More workgroups than supported.
    TooManyGroups {
        /// The requested count.
        count: usize,
    },
    /// Ring capacity is not a power of two of at least 2.
    InvalidRingCapacity {
        /// The rejected value.
        value: usize,
    },
    /// A worker thread could not be spawned.
    ThreadSpawnFailed {
        /// Host error description.
        reason: String,
    },
}

impl fmt::Display for ConfigError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::NoWorkgroups => write!(f, "at least one workgroup is required"),
            Self::ZeroThreadGroup { group } => {
                write!(f, "workgroup {group} declares zero threads")
            }
            Self::TooManyWorkers { count } => {
                write!(f, "{count} workers exceed the maximum of {MAX_WORKERS}")
            }
            Self::TooManyGroups { count } => {
                write!(f, "{count} workgroups exceed the maximum of {MAX_GROUPS}")
            }
            Self::InvalidRingCapacity { value } => {
                write!(f, "ring capacity must be a power of two >= 2, got {value}")
            }
            Self::ThreadSpawnFailed { reason } => {
                write!(f, "worker thread spawn failed: {reason}")
            }
        }
    }
}

impl Error for ConfigError {}

// ── Metrics ───────────────────────────────────────────────────────

/// Monotonic counters accumulated over the scheduler's lifetime.
///
/// After [`Scheduler::end`] has drained, `submitted == executed`
/// (the quiescence law); while running, the difference is the number of
/// items still queued in rings.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct SchedulerMetrics {
    /// Successful submissions.
    pub submitted: u64,
    /// Work items executed.
    pub executed: u64,
    /// Executions that popped a peer's ring rather than the worker's own.
    pub stolen: u64,
    /// Submissions rejected with saturated queues.
    pub rejected: u64,
}

// ── Core ──────────────────────────────────────────────────────────

/// State shared by the owning [`Scheduler`] handle and every worker
/// thread. Workgroup metadata is immutable after construction.
pub(crate) struct SchedulerCore {
    groups: Box<[Workgroup]>,
    workers: Box<[WorkerShared]>,
    stop: AtomicBool,
    submitted: AtomicU64,
    executed: AtomicU64,
    stolen: AtomicU64,
    rejected: AtomicU64,
}

impl SchedulerCore {
    pub(crate) fn submit(
        &self,
        group: GroupId,
        hint: WorkerId,
        item: WorkItem,
    ) -> Result<(), SubmitError> {
        if self.stop.load(Ordering::Acquire) {
            return Err(SubmitError::Shutdown);
        }
        let wg = self
            .groups
            .get(group.index())
            .ok_or(SubmitError::UnknownGroup { group })?;
        let count = wg.thread_count();
        let preferred = if wg.contains(hint) {
            hint.0 - wg.start
        } else {
            hint.0 % count
        };

        // Hinted ring first, then the group's other rings in order; one
        // full cycle bounds the fallback.
        for attempt in 0..count {
            let lane = (preferred + attempt) % count;
            if wg.ring_at(lane).push(item).is_ok() {
                self.submitted.fetch_add(1, Ordering::Relaxed);
                self.wake_one(wg, lane);
                return Ok(());
            }
        }
        self.rejected.fetch_add(1, Ordering::Relaxed);
        Err(SubmitError::Rejected { group })
    }

    /// Wake one parked worker of the group, preferring the ring owner.
    /// The SeqCst pairing with the worker's pre-park re-check guarantees
    /// the enqueue is never lost: either a worker sees the item, or the
    /// producer sees `parked` and notifies.
    fn wake_one(&self, wg: &Workgroup, preferred: u32) {
        let count = wg.thread_count();
        for attempt in 0..count {
            let w = wg.start + (preferred + attempt) % count;
            let shared = &self.workers[w as usize];
            if shared.parked.load(Ordering::SeqCst) {
                shared.wake.notify();
                return;
            }
        }
    }

    fn execute(&self, item: WorkItem, worker: WorkerId, group: GroupId) {
        let ctx = ExecutionContext {
            core: self,
            worker,
            group,
            cancel: None,
        };
        item.run(&ctx);
        self.executed.fetch_add(1, Ordering::Relaxed);
    }

    /// Pop one item from the worker's own rings, highest-priority group
    /// first. Returns whether something was executed.
    fn run_own(&self, id: WorkerId) -> bool {
        let me = &self.workers[id.index()];
        for &group in &me.priority_order {
            let wg = &self.groups[group.index()];
            if let Some(item) = wg.ring_of(id).pop() {
                self.execute(item, id, group);
                return true;
            }
        }
        false
    }

    /// Steal one item from an eligible peer, scanning from a rotating
    /// start position. Only rings of groups that contain this worker are
    /// touched.
    fn run_steal(&self, id: WorkerId) -> bool {
        let me = &self.workers[id.index()];
        if me.steal_mask == 0 {
            return false;
        }
        let span = me.steal_range_end - me.steal_range_start;
        let start = me.next_steal.fetch_add(1, Ordering::Relaxed) % span;
        for k in 0..span {
            let j = me.steal_range_start + (start + k) % span;
            if j == id.0 || me.steal_mask & (1u64 << j) == 0 {
                continue;
            }
            let victim = WorkerId(j);
            for &group in &me.priority_order {
                let wg = &self.groups[group.index()];
                if !wg.contains(victim) {
                    continue;
                }
                if let Some(item) = wg.ring_of(victim).pop() {
                    self.stolen.fetch_add(1, Ordering::Relaxed);
                    self.execute(item, id, group);
                    return true;
                }
            }
        }
        false
    }

    fn has_own_work(&self, id: WorkerId) -> bool {
        let me = &self.workers[id.index()];
        me.priority_order
            .iter()
            .any(|&g| !self.groups[g.index()].ring_of(id).is_empty())
    }

    fn metrics(&self) -> SchedulerMetrics {
        SchedulerMetrics {
            submitted: self.submitted.load(Ordering::Relaxed),
            executed: self.executed.load(Ordering::Relaxed),
            stolen: self.stolen.load(Ordering::Relaxed),
            rejected: self.rejected.load(Ordering::Relaxed),
        }
    }
}

/// The per-thread loop: own rings → steal → bounded spin → park.
fn worker_loop(core: Arc<SchedulerCore>, id: WorkerId, spin_budget: u32) {
    'main: loop {
        if core.stop.load(Ordering::Acquire) {
            // Shutdown: drain own rings, no further stealing.
            while core.run_own(id) {}
            return;
        }
        if core.run_own(id) || core.run_steal(id) {
            continue;
        }
        for _ in 0..spin_budget {
            if core.run_own(id) || core.run_steal(id) {
                continue 'main;
            }
            std::hint::spin_loop();
        }

        let me = &core.workers[id.index()];
        me.parked.store(true, Ordering::SeqCst);
        // Re-check after publishing the park flag: a producer that
        // missed the flag must be caught here, and vice versa.
        if core.has_own_work(id) || core.stop.load(Ordering::SeqCst) {
            me.parked.store(false, Ordering::SeqCst);
            continue;
        }
        me.wake.wait();
        me.parked.store(false, Ordering::SeqCst);
    }
}

// ── Scheduler ─────────────────────────────────────────────────────

/// Fixed-size work-stealing scheduler partitioned into priority
/// workgroups.
///
/// Built with [`new`](Scheduler::new), started with
/// [`begin`](Scheduler::begin), stopped (and drained) with
/// [`end`](Scheduler::end). Dropping the scheduler ends it.
pub struct Scheduler {
    core: Arc<SchedulerCore>,
    threads: Vec<JoinHandle<()>>,
    spin_budget: u32,
    running: bool,
}

impl fmt::Debug for Scheduler {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Scheduler")
            .field("running", &self.running)
            .finish_non_exhaustive()
    }
}

impl Scheduler {
    /// Build a scheduler from workgroup descriptors. Worker ranges are
    /// assigned contiguously in declaration order; no threads run until
    /// [`begin`](Scheduler::begin).
    pub fn new(config: SchedulerConfig, descriptors: &[WorkgroupDesc]) -> Result<Self, ConfigError> {
        if descriptors.is_empty() {
            return Err(ConfigError::NoWorkgroups);
        }
        if descriptors.len() > MAX_GROUPS {
            return Err(ConfigError::TooManyGroups {
                count: descriptors.len(),
            });
        }
        if config.ring_capacity < 2 || !config.ring_capacity.is_power_of_two() {
            return Err(ConfigError::InvalidRingCapacity {
                value: config.ring_capacity,
            });
        }

        let mut groups = Vec::with_capacity(descriptors.len());
        let mut cursor = 0u32;
        for (i, desc) in descriptors.iter().enumerate() {
            if desc.thread_count == 0 {
                return Err(ConfigError::ZeroThreadGroup { group: i });
            }
            let count = cursor
                .checked_add(desc.thread_count)
                .filter(|&c| c <= MAX_WORKERS)
                .ok_or(ConfigError::TooManyWorkers {
                    count: cursor.saturating_add(desc.thread_count),
                })?;
            groups.push(Workgroup::new(
                cursor,
                desc.thread_count,
                desc.priority,
                config.ring_capacity,
            ));
            cursor = count;
        }
        let worker_count = cursor;

        let workers = (0..worker_count)
            .map(|w| {
                let worker = WorkerId(w);
                // Every group containing this worker, highest priority
                // first, declaration order on ties.
                let mut member: SmallVec<[(u32, GroupId); 8]> = groups
                    .iter()
                    .enumerate()
                    .filter(|(_, g)| g.contains(worker))
                    .map(|(i, g)| (g.priority, GroupId(i as u32)))
                    .collect();
                member.sort_by_key(|&(priority, group)| (priority, group.0));
                let priority_order = member.iter().map(|&(_, g)| g).collect();

                let mut mask = 0u64;
                let mut range_start = u32::MAX;
                let mut range_end = 0u32;
                for group in groups.iter().filter(|g| g.contains(worker)) {
                    for j in group.start..group.end {
                        mask |= 1u64 << j;
                    }
                    range_start = range_start.min(group.start);
                    range_end = range_end.max(group.end);
                }
                mask &= !(1u64 << w);

                WorkerShared::new(priority_order, range_start, range_end, mask)
            })
            .collect();

        let core = Arc::new(SchedulerCore {
            groups: groups.into_boxed_slice(),
            workers,
            stop: AtomicBool::new(false),
            submitted: AtomicU64::new(0),
            executed: AtomicU64::new(0),
            stolen: AtomicU64::new(0),
            rejected: AtomicU64::new(0),
        });
        Ok(Self {
            core,
            threads: Vec::new(),
            spin_budget: config.spin_budget,
            running: false,
        })
    }

    /// Spawn the worker threads. Idempotent while running.
    pub fn begin(&mut self) -> Result<(), ConfigError> {
        if self.running {
            return Ok(());
        }
        self.core.stop.store(false, Ordering::SeqCst);
        for w in 0..self.core.workers.len() as u32 {
            let core = Arc::clone(&self.core);
            let spin_budget = self.spin_budget;
            let handle = thread::Builder::new()
                .name(format!("keel-worker-{w}"))
                .spawn(move || worker_loop(core, WorkerId(w), spin_budget))
                .map_err(|e| ConfigError::ThreadSpawnFailed {
                    reason: e.to_string(),
                })?;
            self.threads.push(handle);
        }
        self.running = true;
        Ok(())
    }

    /// Stop and join every worker, then drain and execute anything left
    /// in the rings on the calling thread, so completion handles always
    /// fire. After this, `submitted == executed`.
    pub fn end(&mut self) {
        self.core.stop.store(true, Ordering::SeqCst);
        for worker in self.core.workers.iter() {
            worker.wake.notify();
        }
        for handle in self.threads.drain(..) {
            let _ = handle.join();
        }

        // Stage leftovers in a block queue, then run them; an item that
        // tries to submit more work during the drain is rejected with
        // `Shutdown`, so this terminates.
        let mut leftovers = BlockQueue::new(64);
        for (i, group) in self.core.groups.iter().enumerate() {
            for lane in 0..group.thread_count() {
                let owner = WorkerId(group.start + lane);
                while let Some(item) = group.ring_at(lane).pop() {
                    leftovers.push_back((GroupId(i as u32), owner, item));
                }
            }
        }
        while let Some((group, owner, item)) = leftovers.pop_front() {
            self.core.execute(item, owner, group);
        }
        self.running = false;
    }

    /// Submit a work item to `group`, preferring the ring of `hint`.
    ///
    /// On a full ring the submission falls back to the next worker in
    /// the group with space; after one full cycle it fails with
    /// [`SubmitError::Rejected`] and no side effects.
    pub fn submit(
        &self,
        group: GroupId,
        hint: WorkerId,
        item: WorkItem,
    ) -> Result<(), SubmitError> {
        self.core.submit(group, hint, item)
    }

    /// Submit a work item and receive a completion handle.
    ///
    /// The handle's [`wait`](TaskHandle::wait) blocks the caller until
    /// the item has run; [`busy_wait`](TaskHandle::busy_wait) runs other
    /// work meanwhile. Cancellation is cooperative via
    /// [`cancel`](TaskHandle::cancel).
    pub fn submit_sync(
        &self,
        group: GroupId,
        hint: WorkerId,
        func: WorkFn,
        arg: u64,
    ) -> Result<TaskHandle, SubmitError> {
        let (item, handle, reclaim) = package_sync(func, arg);
        match self.core.submit(group, hint, item) {
            Ok(()) => Ok(handle),
            Err(e) => {
                reclaim.reclaim();
                Err(e)
            }
        }
    }

    /// Execute one pending item on `worker`'s queues (own rings first,
    /// then steal). Returns whether anything ran. The backbone of
    /// [`TaskHandle::busy_wait`].
    pub fn try_run_one(&self, worker: WorkerId) -> bool {
        debug_assert!(worker.index() < self.core.workers.len());
        self.core.run_own(worker) || self.core.run_steal(worker)
    }

    /// Total number of workers across all groups.
    pub fn worker_count(&self) -> usize {
        self.core.workers.len()
    }

    /// Number of workgroups.
    pub fn group_count(&self) -> usize {
        self.core.groups.len()
    }

    /// A copy of the lifetime counters.
    pub fn metrics(&self) -> SchedulerMetrics {
        self.core.metrics()
    }

    #[cfg(test)]
    pub(crate) fn steal_mask_of(&self, worker: WorkerId) -> u64 {
        self.core.workers[worker.index()].steal_mask
    }

    #[cfg(test)]
    pub(crate) fn priority_order_of(&self, worker: WorkerId) -> Vec<GroupId> {
        self.core.workers[worker.index()].priority_order.to_vec()
    }
}

impl Drop for Scheduler {
    fn drop(&mut self) {
        self.end();
    }
}
