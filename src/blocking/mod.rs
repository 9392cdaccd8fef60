/// One-shot gate a blocked transaction waits on.
pub mod latch;
/// Chains of latches registered on a cell.
pub mod listeners;

pub use latch::RetryLatch;
pub use listeners::{Listeners, Registration};
