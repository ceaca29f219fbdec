//! Manual-reset completion event.

use std::time::{Duration, Instant};

use parking_lot::{Condvar, Mutex};

/// Externally owned signal object set when an update completes.
///
/// Behaves like a manual-reset event: once set it stays set until
/// [`reset`](CompletionEvent::reset) is called, and any number of waiters
/// observe it.
#[derive(Default)]
pub struct CompletionEvent {
    signaled: Mutex<bool>,
    cv: Condvar,
}

impl CompletionEvent {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set(&self) {
        let mut signaled = self.signaled.lock();
        *signaled = true;
        self.cv.notify_all();
    }

    pub fn reset(&self) {
        *self.signaled.lock() = false;
    }

    pub fn is_set(&self) -> bool {
        *self.signaled.lock()
    }

    pub fn wait(&self) {
        let mut signaled = self.signaled.lock();
        while !*signaled {
            self.cv.wait(&mut signaled);
        }
    }

    /// Waits up to `timeout`; returns whether the event was set.
    pub fn wait_for(&self, timeout: Duration) -> bool {
        let deadline = Instant::now() + timeout;
        let mut signaled = self.signaled.lock();
        while !*signaled {
            if self.cv.wait_until(&mut signaled, deadline).timed_out() {
                break;
            }
        }
        *signaled
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    #[test]
    fn set_releases_waiter() {
        let event = Arc::new(CompletionEvent::new());
        let waiter = {
            let event = Arc::clone(&event);
            std::thread::spawn(move || event.wait())
        };
        event.set();
        waiter.join().unwrap();
        assert!(event.is_set());
        event.reset();
        assert!(!event.is_set());
    }

    #[test]
    fn wait_for_times_out() {
        let event = CompletionEvent::new();
        assert!(!event.wait_for(Duration::from_millis(10)));
        event.set();
        assert!(event.wait_for(Duration::from_millis(10)));
    }
}
