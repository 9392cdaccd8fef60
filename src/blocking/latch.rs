use std::time::{Duration, Instant};

use parking_lot::{Condvar, Mutex};

#[derive(Debug, Default)]
struct LatchState {
    era: u64,
    open: bool,
}

/// A resettable one-shot gate used for blocking retry.
///
/// A latch goes through eras. Waiters and openers name the era they care about, so a
/// commit that wakes an old registration can't open a latch that has been reset and
/// re-registered in the meantime.
#[derive(Debug, Default)]
pub struct RetryLatch {
    state: Mutex<LatchState>,
    opened: Condvar,
}

impl RetryLatch {
    pub fn new() -> Self {
        Self::default()
    }

    /// The current era.
    pub fn era(&self) -> u64 {
        self.state.lock().era
    }

    pub fn is_open(&self) -> bool {
        self.state.lock().open
    }

    /// Opens the latch if it is still in `era`, waking every waiter.
    ///
    /// Returns `true` if this call opened it.
    pub fn open(&self, era: u64) -> bool {
        let mut state = self.state.lock();
        if state.era != era || state.open {
            return false;
        }
        state.open = true;
        self.opened.notify_all();
        true
    }

    /// Blocks until the latch is opened or leaves `era`.
    pub fn await_open(&self, era: u64) {
        let mut state = self.state.lock();
        while state.era == era && !state.open {
            self.opened.wait(&mut state);
        }
    }

    /// Blocks until the latch is opened, leaves `era`, or `timeout` elapses.
    ///
    /// # Returns
    ///
    /// The part of `timeout` that is left, or `None` if the wait timed out.
    pub fn try_await(&self, era: u64, timeout: Duration) -> Option<Duration> {
        let deadline = Instant::now() + timeout;
        let mut state = self.state.lock();
        loop {
            if state.era != era || state.open {
                return Some(deadline.saturating_duration_since(Instant::now()));
            }
            if self.opened.wait_until(&mut state, deadline).timed_out() {
                return if state.era != era || state.open {
                    Some(Duration::ZERO)
                } else {
                    None
                };
            }
        }
    }

    /// Closes the latch and moves it to the next era.
    pub fn reset(&self) {
        let mut state = self.state.lock();
        state.era += 1;
        state.open = false;
    }
}
