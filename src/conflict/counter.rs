use std::sync::atomic::{AtomicU64, Ordering};

/// Process-wide counter bumped once for every dirty write that gets committed.
///
/// Transactions remember the value they started with. As long as the counter did not move,
/// nothing they read can have changed and full read-set revalidation can be skipped.
#[derive(Debug, Default)]
pub struct GlobalConflictCounter {
    count: AtomicU64,
}

impl GlobalConflictCounter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Current value of the counter.
    pub fn count(&self) -> u64 {
        self.count.load(Ordering::SeqCst)
    }

    /// Records one committed dirty write and returns the new counter value.
    pub fn signal_conflict(&self) -> u64 {
        self.count.fetch_add(1, Ordering::SeqCst) + 1
    }
}

/// A transaction's view of the [`GlobalConflictCounter`], its read version.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct LocalConflictCounter {
    local: u64,
}

impl LocalConflictCounter {
    pub fn new(global: &GlobalConflictCounter) -> Self {
        Self {
            local: global.count(),
        }
    }

    /// The counter value this transaction is consistent with.
    pub fn read_version(&self) -> u64 {
        self.local
    }

    /// Re-samples the global counter, forgetting everything seen before.
    pub fn reset(&mut self, global: &GlobalConflictCounter) {
        self.local = global.count();
    }

    /// Returns `true` if the global counter moved since the last sync.
    pub fn has_changed(&self, global: &GlobalConflictCounter) -> bool {
        global.count() != self.local
    }

    /// Adopts a counter value sampled before a successful revalidation.
    pub fn extend_to(&mut self, sampled: u64) {
        debug_assert!(sampled >= self.local);
        self.local = sampled;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn local_counter_detects_global_movement() {
        let global = GlobalConflictCounter::new();
        let mut local = LocalConflictCounter::new(&global);
        assert!(!local.has_changed(&global));

        assert_eq!(global.signal_conflict(), 1);
        assert!(local.has_changed(&global));

        local.extend_to(global.count());
        assert!(!local.has_changed(&global));
        assert_eq!(local.read_version(), 1);
    }
}
