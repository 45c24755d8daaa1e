//! Bounded multi-producer/multi-consumer ring buffer.
//!
//! Each cell carries a sequence counter initialized to its own index.
//! A producer may claim cell `p mod C` only while its sequence equals
//! `p`; after writing the payload it publishes sequence `p + 1`, which
//! is exactly what a consumer at position `p` expects. Consumed cells
//! publish `p + C`, handing the cell to the producer one lap ahead.
//! Push and pop never block: a full or empty ring is reported to the
//! caller immediately.

use std::cell::UnsafeCell;
use std::mem::MaybeUninit;
use std::sync::atomic::{AtomicUsize, Ordering};

use crossbeam_utils::CachePadded;

struct Cell<T> {
    sequence: AtomicUsize,
    value: UnsafeCell<MaybeUninit<T>>,
}

/// Bounded lock-free MPMC ring with power-of-two capacity.
pub struct MpmcRing<T> {
    buffer: Box<[Cell<T>]>,
    mask: usize,
    enqueue_pos: CachePadded<AtomicUsize>,
    dequeue_pos: CachePadded<AtomicUsize>,
}

// SAFETY: cells are handed between threads through the sequence
// protocol; a cell's payload is only touched by the thread that won the
// position CAS for it, and publication is release/acquire through the
// sequence counter.
#[allow(unsafe_code)]
unsafe impl<T: Send> Send for MpmcRing<T> {}
#[allow(unsafe_code)]
unsafe impl<T: Send> Sync for MpmcRing<T> {}

impl<T> MpmcRing<T> {
    /// Create a ring with the given capacity.
    ///
    /// # Panics
    ///
    /// Panics if `capacity` is not a power of two or is below 2.
    pub fn new(capacity: usize) -> Self {
        assert!(
            capacity >= 2 && capacity.is_power_of_two(),
            "MpmcRing capacity must be a power of two >= 2, got {capacity}"
        );
        let buffer = (0..capacity)
            .map(|i| Cell {
                sequence: AtomicUsize::new(i),
                value: UnsafeCell::new(MaybeUninit::uninit()),
            })
            .collect();
        Self {
            buffer,
            mask: capacity - 1,
            enqueue_pos: CachePadded::new(AtomicUsize::new(0)),
            dequeue_pos: CachePadded::new(AtomicUsize::new(0)),
        }
    }

    /// Enqueue `value`, or hand it back when the ring is full.
    ///
    /// Never blocks.
    #[allow(unsafe_code)]
    pub fn push(&self, value: T) -> Result<(), T> {
        let mut pos = self.enqueue_pos.load(Ordering::Relaxed);
        loop {
            let cell = &self.buffer[pos & self.mask];
            let seq = cell.sequence.load(Ordering::Acquire);
            let diff = seq as isize - pos as isize;
            if diff == 0 {
                match self.enqueue_pos.compare_exchange_weak(
                    pos,
                    pos + 1,
                    Ordering::Relaxed,
                    Ordering::Relaxed,
                ) {
                    Ok(_) => {
                        // SAFETY: winning the CAS gives this thread sole
                        // ownership of the cell until the sequence store.
                        unsafe { (*cell.value.get()).write(value) };
                        cell.sequence.store(pos + 1, Ordering::Release);
                        return Ok(());
                    }
                    Err(current) => pos = current,
                }
            } else if diff < 0 {
                return Err(value); // a full lap behind: ring is full
            } else {
                pos = self.enqueue_pos.load(Ordering::Relaxed);
            }
        }
    }

    /// Dequeue the oldest value, or `None` when the ring is empty.
    ///
    /// Never blocks. A returned value happens-after its `push`.
    #[allow(unsafe_code)]
    pub fn pop(&self) -> Option<T> {
        let mut pos = self.dequeue_pos.load(Ordering::Relaxed);
        loop {
            let cell = &self.buffer[pos & self.mask];
            let seq = cell.sequence.load(Ordering::Acquire);
            let diff = seq as isize - (pos + 1) as isize;
            if diff == 0 {
                match self.dequeue_pos.compare_exchange_weak(
                    pos,
                    pos + 1,
                    Ordering::Relaxed,
                    Ordering::Relaxed,
                ) {
                    Ok(_) => {
                        // SAFETY: winning the CAS gives this thread sole
                        // ownership of the initialized payload.
                        let value = unsafe { (*cell.value.get()).assume_init_read() };
                        cell.sequence
                            .store(pos + self.mask + 1, Ordering::Release);
                        return Some(value);
                    }
                    Err(current) => pos = current,
                }
            } else if diff < 0 {
                return None; // nothing published at this position yet
            } else {
                pos = self.dequeue_pos.load(Ordering::Relaxed);
            }
        }
    }

    /// Ring capacity.
    pub fn capacity(&self) -> usize {
        self.mask + 1
    }

    /// Approximate number of queued items; exact only when quiescent.
    pub fn len(&self) -> usize {
        let enq = self.enqueue_pos.load(Ordering::Acquire);
        let deq = self.dequeue_pos.load(Ordering::Acquire);
        enq.saturating_sub(deq)
    }

    /// Whether the ring appears empty; exact only when quiescent.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl<T> Drop for MpmcRing<T> {
    fn drop(&mut self) {
        // Drain so non-trivial payloads run their destructors.
        while self.pop().is_some() {}
    }
}
