//! Work items, execution contexts, and completion handles.
//!
//! A [`WorkItem`] is an opaque invocable plus one argument word —
//! copy-trivial and two machine words wide, so it moves through the MPMC
//! rings by value. The executing worker hands the invocable an
//! [`ExecutionContext`] carrying the scheduler, so work items reach the
//! scheduler through their invocation context and never through ambient
//! lookup.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use keel_core::{GroupId, SubmitError, WorkerId};

use crate::scheduler::{Scheduler, SchedulerCore};

/// The invocable of a work item: the argument word plus the execution
/// context of the worker running it.
pub type WorkFn = fn(u64, &ExecutionContext<'_>);

/// An opaque invocable plus an argument word; copy-trivial and bounded
/// in size.
#[derive(Clone, Copy, Debug)]
pub struct WorkItem {
    func: WorkFn,
    arg: u64,
}

impl WorkItem {
    /// Package an invocable and its argument word.
    pub fn new(func: WorkFn, arg: u64) -> Self {
        Self { func, arg }
    }

    pub(crate) fn run(self, ctx: &ExecutionContext<'_>) {
        (self.func)(self.arg, ctx);
    }
}

/// What a running work item knows about its surroundings.
pub struct ExecutionContext<'a> {
    pub(crate) core: &'a SchedulerCore,
    pub(crate) worker: WorkerId,
    pub(crate) group: GroupId,
    pub(crate) cancel: Option<&'a AtomicBool>,
}

impl ExecutionContext<'_> {
    /// The worker executing this item.
    pub fn worker(&self) -> WorkerId {
        self.worker
    }

    /// The workgroup whose ring this item was popped from.
    pub fn group(&self) -> GroupId {
        self.group
    }

    /// Whether cooperative cancellation was requested for this item.
    ///
    /// Always `false` for plain submissions; sync tasks observe their
    /// handle's [`cancel`](TaskHandle::cancel).
    pub fn is_cancel_requested(&self) -> bool {
        self.cancel.is_some_and(|flag| flag.load(Ordering::Acquire))
    }

    /// Submit further work from inside a work item. The new item may be
    /// executed by any worker of the group, including this one.
    pub fn submit(
        &self,
        group: GroupId,
        hint: WorkerId,
        item: WorkItem,
    ) -> Result<(), SubmitError> {
        self.core.submit(group, hint, item)
    }
}

/// Shared state between a sync task in flight and its [`TaskHandle`].
pub(crate) struct SyncTask {
    func: WorkFn,
    arg: u64,
    done_tx: crossbeam_channel::Sender<()>,
    cancel: AtomicBool,
}

/// Completion handle returned by
/// [`Scheduler::submit_sync`](crate::scheduler::Scheduler::submit_sync).
pub struct TaskHandle {
    done_rx: crossbeam_channel::Receiver<()>,
    shared: Arc<SyncTask>,
    completed: bool,
}

impl std::fmt::Debug for TaskHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TaskHandle")
            .field("completed", &self.completed)
            .finish_non_exhaustive()
    }
}

impl TaskHandle {
    /// Block the calling thread until the task has run.
    pub fn wait(&mut self) {
        if !self.completed {
            let _ = self.done_rx.recv();
            self.completed = true;
        }
    }

    /// Whether the task has run, without blocking.
    pub fn is_complete(&mut self) -> bool {
        if !self.completed && self.done_rx.try_recv().is_ok() {
            self.completed = true;
        }
        self.completed
    }

    /// Run other work on `worker`'s queues until the task has run.
    ///
    /// Intended for worker threads that must not park while a dependency
    /// is outstanding; spins when no other work is available.
    pub fn busy_wait(&mut self, scheduler: &Scheduler, worker: WorkerId) {
        while !self.is_complete() {
            if !scheduler.try_run_one(worker) {
                std::hint::spin_loop();
            }
        }
    }

    /// Request cooperative cancellation: the flag is visible to the task
    /// through [`ExecutionContext::is_cancel_requested`]. In-flight work
    /// is never interrupted.
    pub fn cancel(&self) {
        self.shared.cancel.store(true, Ordering::Release);
    }
}

/// Trampoline installed as the [`WorkFn`] of sync tasks. The argument
/// word is a raw `Arc<SyncTask>` produced by [`package_sync`].
fn sync_trampoline(arg: u64, ctx: &ExecutionContext<'_>) {
    // SAFETY: `arg` was produced by `Arc::into_raw` in `package_sync`
    // and this trampoline runs exactly once per packaged task.
    #[allow(unsafe_code)]
    let task = unsafe { Arc::from_raw(arg as usize as *const SyncTask) };
    let inner = ExecutionContext {
        core: ctx.core,
        worker: ctx.worker,
        group: ctx.group,
        cancel: Some(&task.cancel),
    };
    (task.func)(task.arg, &inner);
    // The handle may already have been dropped; a dead receiver is fine.
    let _ = task.done_tx.send(());
}

/// Package a sync task: the ring-borne [`WorkItem`] plus the caller's
/// [`TaskHandle`]. The returned reclaim token releases the item's Arc
/// reference if submission fails and the trampoline will never run.
pub(crate) fn package_sync(func: WorkFn, arg: u64) -> (WorkItem, TaskHandle, SyncReclaim) {
    let (done_tx, done_rx) = crossbeam_channel::bounded(1);
    let shared = Arc::new(SyncTask {
        func,
        arg,
        done_tx,
        cancel: AtomicBool::new(false),
    });
    let raw = Arc::into_raw(Arc::clone(&shared)) as usize as u64;
    let item = WorkItem::new(sync_trampoline, raw);
    let handle = TaskHandle {
        done_rx,
        shared,
        completed: false,
    };
    (item, handle, SyncReclaim { raw })
}

/// Token that can undo the `Arc::into_raw` of a packaged sync task.
pub(crate) struct SyncReclaim {
    raw: u64,
}

impl SyncReclaim {
    /// Release the reference held by a work item that was never
    /// enqueued. Must not be called once the item is in a ring.
    pub(crate) fn reclaim(self) {
        // SAFETY: the caller guarantees the paired trampoline will never
        // run, so this is the only consumer of the raw reference.
        #[allow(unsafe_code)]
        let task = unsafe { Arc::from_raw(self.raw as usize as *const SyncTask) };
        drop(task);
    }
}
