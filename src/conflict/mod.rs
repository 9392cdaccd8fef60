/// This module contains the global and per-transaction conflict counters.
pub mod counter;
/// This module contains logic for detecting transaction conflicts.
pub mod detection;
/// This module contains the backoff policies applied between conflicting attempts.
pub mod backoff;
