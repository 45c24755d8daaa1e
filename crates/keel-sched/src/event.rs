//! The coalescing wake event workers park on.

use std::sync::{Condvar, Mutex};

/// A coalescing binary signal: single-waiter [`wait`](WakeEvent::wait),
/// any-thread [`notify`](WakeEvent::notify), at most one notification
/// pending. Notifying an already-notified event is a no-op, so a parked
/// worker is woken exactly once however many producers raced to wake it.
pub struct WakeEvent {
    pending: Mutex<bool>,
    cv: Condvar,
}

impl WakeEvent {
    /// Create an event with no notification pending.
    pub fn new() -> Self {
        Self {
            pending: Mutex::new(false),
            cv: Condvar::new(),
        }
    }

    /// Block until a notification is pending, then consume it.
    pub fn wait(&self) {
        let mut pending = self.pending.lock().unwrap();
        while !*pending {
            pending = self.cv.wait(pending).unwrap();
        }
        *pending = false;
    }

    /// Make a notification pending and wake the waiter, coalescing with
    /// any notification already pending.
    pub fn notify(&self) {
        let mut pending = self.pending.lock().unwrap();
        if !*pending {
            *pending = true;
            self.cv.notify_one();
        }
    }
}

impl Default for WakeEvent {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Arc;
    use std::thread;
    use std::time::Duration;

    #[test]
    fn notify_before_wait_is_consumed() {
        let event = WakeEvent::new();
        event.notify();
        event.wait(); // returns immediately
    }

    #[test]
    fn notifications_coalesce() {
        let event = Arc::new(WakeEvent::new());
        let wakes = Arc::new(AtomicU32::new(0));

        let waiter_event = Arc::clone(&event);
        let waiter_wakes = Arc::clone(&wakes);
        let waiter = thread::spawn(move || {
            waiter_event.wait();
            waiter_wakes.fetch_add(1, Ordering::SeqCst);
            waiter_event.wait();
            waiter_wakes.fetch_add(1, Ordering::SeqCst);
        });

        // Two notifies before the waiter consumes: they coalesce to one.
        event.notify();
        event.notify();
        thread::sleep(Duration::from_millis(50));
        assert_eq!(wakes.load(Ordering::SeqCst), 1);

        event.notify();
        waiter.join().unwrap();
        assert_eq!(wakes.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn notify_wakes_a_parked_waiter() {
        let event = Arc::new(WakeEvent::new());
        let waiter_event = Arc::clone(&event);
        let waiter = thread::spawn(move || waiter_event.wait());
        thread::sleep(Duration::from_millis(10));
        event.notify();
        waiter.join().unwrap();
    }
}
