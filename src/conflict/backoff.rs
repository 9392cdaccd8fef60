use std::thread;
use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Delays below this are served by yielding instead of sleeping.
const MIN_SLEEP: Duration = Duration::from_micros(1);

/// Defines how an atomic block waits between attempts that failed on a conflict.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum BackoffPolicy {
    /// Retry immediately.
    None,
    /// Spin for a fixed number of iterations.
    Spin { spins: u32 },
    /// Double the delay on every attempt, starting at `min_delay`, capped at `max_delay`.
    Exponential {
        min_delay: Duration,
        max_delay: Duration,
    },
}

impl Default for BackoffPolicy {
    fn default() -> Self {
        BackoffPolicy::Exponential {
            min_delay: Duration::from_nanos(100),
            max_delay: Duration::from_millis(100),
        }
    }
}

impl BackoffPolicy {
    /// The delay applied after failed attempt number `attempt` (1-based).
    pub fn delay_for(&self, attempt: usize) -> Duration {
        match *self {
            BackoffPolicy::None | BackoffPolicy::Spin { .. } => Duration::ZERO,
            BackoffPolicy::Exponential {
                min_delay,
                max_delay,
            } => {
                let shift = attempt.saturating_sub(1).min(31) as u32;
                min_delay
                    .checked_mul(1u32 << shift)
                    .unwrap_or(max_delay)
                    .min(max_delay)
            }
        }
    }

    /// Waits according to the policy.
    pub fn backoff(&self, attempt: usize) {
        match *self {
            BackoffPolicy::None => {}
            BackoffPolicy::Spin { spins } => {
                for _ in 0..spins {
                    std::hint::spin_loop();
                }
            }
            BackoffPolicy::Exponential { .. } => {
                let delay = self.delay_for(attempt);
                if delay < MIN_SLEEP {
                    thread::yield_now();
                } else {
                    thread::sleep(delay);
                }
            }
        }
    }
}
