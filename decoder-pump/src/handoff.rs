//! Counting wakeup between producers committing slots and the pump thread.
//!
//! Shutdown is a sticky flag under the same lock as the counter, so a stop
//! request can never be lost between the pump's check and its wait.

use std::time::{Duration, Instant};

use parking_lot::{Condvar, Mutex};

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Wakeup {
    /// One commit signal was consumed.
    Submit,
    Shutdown,
    /// The bounded wait elapsed without a signal.
    Timeout,
}

#[derive(Default)]
struct HandoffState {
    pending: usize,
    shutdown: bool,
}

#[derive(Default)]
pub struct SubmissionHandoff {
    state: Mutex<HandoffState>,
    cond: Condvar,
}

impl SubmissionHandoff {
    pub fn new() -> Self {
        Self::default()
    }

    /// Post one wakeup. Never blocks.
    pub fn signal(&self) {
        let mut state = self.state.lock();
        state.pending += 1;
        self.cond.notify_one();
    }

    /// Wake every waiter and make all further waits return immediately.
    pub fn shutdown(&self) {
        let mut state = self.state.lock();
        state.shutdown = true;
        self.cond.notify_all();
    }

    pub fn is_shutdown(&self) -> bool {
        self.state.lock().shutdown
    }

    /// Signals posted and not yet consumed.
    pub fn pending(&self) -> usize {
        self.state.lock().pending
    }

    /// Block until a signal is available (consuming it) or shutdown is requested.
    pub fn wait_one(&self) -> Wakeup {
        let mut state = self.state.lock();
        loop {
            if let Some(wakeup) = Self::take(&mut state) {
                return wakeup;
            }
            self.cond.wait(&mut state);
        }
    }

    /// Like [`SubmissionHandoff::wait_one`] but gives up after `timeout`.
    pub fn wait_one_timeout(&self, timeout: Duration) -> Wakeup {
        let deadline = Instant::now() + timeout;
        let mut state = self.state.lock();
        loop {
            if let Some(wakeup) = Self::take(&mut state) {
                return wakeup;
            }
            if self.cond.wait_until(&mut state, deadline).timed_out() {
                return Self::take(&mut state).unwrap_or(Wakeup::Timeout);
            }
        }
    }

    // Shutdown wins over pending work.
    fn take(state: &mut HandoffState) -> Option<Wakeup> {
        if state.shutdown {
            return Some(Wakeup::Shutdown);
        }
        if state.pending > 0 {
            state.pending -= 1;
            return Some(Wakeup::Submit);
        }
        None
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::thread;

    use super::*;

    #[test]
    fn test_signal_then_wait_consumes_one() {
        let handoff = SubmissionHandoff::new();
        handoff.signal();
        handoff.signal();
        assert_eq!(handoff.wait_one(), Wakeup::Submit);
        assert_eq!(handoff.pending(), 1);
        assert_eq!(handoff.wait_one(), Wakeup::Submit);
        assert_eq!(handoff.pending(), 0);
    }

    #[test]
    fn test_timeout_without_signal() {
        let handoff = SubmissionHandoff::new();
        let started = Instant::now();
        assert_eq!(
            handoff.wait_one_timeout(Duration::from_millis(20)),
            Wakeup::Timeout
        );
        assert!(started.elapsed() >= Duration::from_millis(20));
    }

    #[test]
    fn test_shutdown_takes_priority_over_pending() {
        let handoff = SubmissionHandoff::new();
        handoff.signal();
        handoff.shutdown();
        assert_eq!(handoff.wait_one(), Wakeup::Shutdown);
        // Sticky, and the pending signal is left untouched
        assert_eq!(handoff.wait_one(), Wakeup::Shutdown);
        assert_eq!(handoff.pending(), 1);
    }

    #[test]
    fn test_shutdown_unblocks_waiter() {
        let handoff = Arc::new(SubmissionHandoff::new());
        let waiter = {
            let handoff = handoff.clone();
            thread::spawn(move || handoff.wait_one())
        };
        thread::sleep(Duration::from_millis(30));
        handoff.shutdown();
        assert_eq!(waiter.join().unwrap(), Wakeup::Shutdown);
    }

    #[test]
    fn test_signal_wakes_blocked_waiter() {
        let handoff = Arc::new(SubmissionHandoff::new());
        let waiter = {
            let handoff = handoff.clone();
            thread::spawn(move || handoff.wait_one_timeout(Duration::from_secs(5)))
        };
        thread::sleep(Duration::from_millis(30));
        handoff.signal();
        assert_eq!(waiter.join().unwrap(), Wakeup::Submit);
        assert_eq!(handoff.pending(), 0);
    }
}
