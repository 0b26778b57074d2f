//! Resettable one-shot wake edge for the reclaimer

use std::time::{Duration, Instant};

use parking_lot::{Condvar, Mutex};

/// Outcome of a timed wait on an [`Event`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Wake {
    /// The event was set before or during the wait.
    Signaled,
    /// The timeout elapsed with the event still clear.
    TimedOut,
}

/// A latched one-shot event.
///
/// `set` latches the event and wakes every waiter; waits return
/// immediately while the latch is up, until `reset` clears it. Spurious
/// condvar wakeups are absorbed by re-checking the latch, so a waiter can
/// trust the returned [`Wake`].
pub(crate) struct Event {
    flag: Mutex<bool>,
    cond: Condvar,
}

impl Event {
    pub(crate) const fn new() -> Self {
        Self {
            flag: Mutex::new(false),
            cond: Condvar::new(),
        }
    }

    /// Latch the event and wake all waiters.
    pub(crate) fn set(&self) {
        let mut flag = self.flag.lock();
        *flag = true;
        self.cond.notify_all();
    }

    /// Clear the latch.
    pub(crate) fn reset(&self) {
        *self.flag.lock() = false;
    }

    /// Wait until the event is set or `timeout` elapses.
    pub(crate) fn wait_timeout(&self, timeout: Duration) -> Wake {
        let deadline = Instant::now() + timeout;
        let mut flag = self.flag.lock();
        loop {
            if *flag {
                return Wake::Signaled;
            }
            if self.cond.wait_until(&mut flag, deadline).timed_out() {
                return if *flag { Wake::Signaled } else { Wake::TimedOut };
            }
        }
    }

    /// Wait until the event is set.
    pub(crate) fn wait(&self) {
        let mut flag = self.flag.lock();
        while !*flag {
            self.cond.wait(&mut flag);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::thread;

    #[test]
    fn timeout_without_signal() {
        let event = Event::new();
        assert_eq!(event.wait_timeout(Duration::from_millis(5)), Wake::TimedOut);
    }

    #[test]
    fn set_latches_until_reset() {
        let event = Event::new();
        event.set();
        assert_eq!(event.wait_timeout(Duration::ZERO), Wake::Signaled);
        assert_eq!(event.wait_timeout(Duration::ZERO), Wake::Signaled);

        event.reset();
        assert_eq!(event.wait_timeout(Duration::ZERO), Wake::TimedOut);
    }

    #[test]
    fn set_wakes_a_blocked_waiter() {
        let event = Arc::new(Event::new());
        let waiter = {
            let event = Arc::clone(&event);
            thread::spawn(move || event.wait_timeout(Duration::from_secs(10)))
        };

        thread::sleep(Duration::from_millis(10));
        event.set();
        assert_eq!(waiter.join().unwrap(), Wake::Signaled);
    }
}
