use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};

use log::trace;

use crate::isolation::LockMode;

// Layout of the orec word, from the most significant bit down:
// [63..62] lock mode | [61] read biased | [60..10] surplus | [9..0] readonly count
const LOCK_SHIFT: u32 = 62;
const LOCK_MASK: u64 = 0b11 << LOCK_SHIFT;
const READ_BIASED_MASK: u64 = 1 << 61;
const SURPLUS_SHIFT: u32 = 10;
const SURPLUS_MAX: u64 = (1 << 51) - 1;
const SURPLUS_MASK: u64 = SURPLUS_MAX << SURPLUS_SHIFT;
const READONLY_COUNT_MASK: u64 = (1 << SURPLUS_SHIFT) - 1;

/// Largest read-biased threshold the readonly-count field can represent.
pub const MAX_READ_BIASED_THRESHOLD: u32 = READONLY_COUNT_MASK as u32;

/// Number of consecutive readonly departures that turn an orec read-biased.
pub const DEFAULT_READ_BIASED_THRESHOLD: u32 = 3;

/// Outcome of arriving at an orec.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ArriveStatus {
    /// The surplus was incremented; the caller must depart later.
    Normal,
    /// The orec is read-biased; nothing to depart from.
    ReadBiased,
    /// The orec is locked in a mode that excludes the caller.
    LockNotFree,
}

impl ArriveStatus {
    pub fn has_depart_obligation(self) -> bool {
        self == ArriveStatus::Normal
    }
}

#[inline]
fn lock_mode_of(state: u64) -> LockMode {
    LockMode::from_bits((state & LOCK_MASK) >> LOCK_SHIFT)
}

#[inline]
fn surplus_of(state: u64) -> u64 {
    (state & SURPLUS_MASK) >> SURPLUS_SHIFT
}

#[inline]
fn readonly_count_of(state: u64) -> u32 {
    (state & READONLY_COUNT_MASK) as u32
}

#[inline]
fn is_read_biased_of(state: u64) -> bool {
    state & READ_BIASED_MASK != 0
}

#[inline]
fn with_lock_mode(state: u64, mode: LockMode) -> u64 {
    (state & !LOCK_MASK) | (mode.to_bits() << LOCK_SHIFT)
}

#[inline]
fn with_surplus(state: u64, surplus: u64) -> u64 {
    debug_assert!(surplus <= SURPLUS_MAX, "orec surplus overflow");
    (state & !SURPLUS_MASK) | ((surplus & SURPLUS_MAX) << SURPLUS_SHIFT)
}

#[inline]
fn with_readonly_count(state: u64, count: u32) -> u64 {
    (state & !READONLY_COUNT_MASK) | (count as u64 & READONLY_COUNT_MASK)
}

#[inline]
fn with_read_biased(state: u64, read_biased: bool) -> u64 {
    if read_biased {
        state | READ_BIASED_MASK
    } else {
        state & !READ_BIASED_MASK
    }
}

/// The ownership record guarding a single transactional cell.
///
/// All of the orec's bookkeeping lives in one atomic word so every transition is a single
/// compare-and-swap:
///
/// * the lock mode (`None`, `Update` or `Commit`),
/// * the surplus, the number of transactions that arrived and still have to depart,
/// * the read-biased flag and the readonly counter that drives promotion into it.
///
/// The lock owner is kept next to the word as a transaction id (`0` means nobody). It is
/// written by the lock holder right after the lock is acquired and cleared before release.
///
/// Lock operations never block. They spin a bounded number of times and then report
/// failure; callers turn a failed acquisition into a conflict.
pub struct Orec {
    state: AtomicU64,
    owner: AtomicU64,
    read_biased_threshold: u32,
}

impl Orec {
    /// Creates a free orec.
    ///
    /// # Arguments
    ///
    /// * `read_biased_threshold` - Readonly departures (with no write in between) after
    ///   which the orec becomes read-biased. Clamped to `1..=MAX_READ_BIASED_THRESHOLD`.
    pub fn new(read_biased_threshold: u32) -> Self {
        Self {
            state: AtomicU64::new(0),
            owner: AtomicU64::new(0),
            read_biased_threshold: read_biased_threshold.clamp(1, MAX_READ_BIASED_THRESHOLD),
        }
    }

    /// Creates an orec that is already locked by `owner`, with the owner's arrival counted.
    ///
    /// Used for cells created inside a transaction: nobody can see the cell until the
    /// constructing transaction commits it.
    pub fn new_locked(read_biased_threshold: u32, owner: u64, mode: LockMode) -> Self {
        let state = with_lock_mode(with_surplus(0, 1), mode);
        Self {
            state: AtomicU64::new(state),
            owner: AtomicU64::new(owner),
            read_biased_threshold: read_biased_threshold.clamp(1, MAX_READ_BIASED_THRESHOLD),
        }
    }

    /// Registers a reader.
    ///
    /// Readers may arrive while an update lock is held; a commit lock excludes them.
    ///
    /// # Arguments
    ///
    /// * `spin_count` - How many times to spin while the orec is commit-locked before
    ///   giving up.
    pub fn arrive(&self, spin_count: usize) -> ArriveStatus {
        let mut spins = spin_count;
        loop {
            let current = self.state.load(Ordering::SeqCst);
            if lock_mode_of(current) == LockMode::Commit {
                if spins == 0 {
                    return ArriveStatus::LockNotFree;
                }
                spins -= 1;
                std::hint::spin_loop();
                continue;
            }

            let (next, status) = if is_read_biased_of(current) {
                if surplus_of(current) > 0 {
                    return ArriveStatus::ReadBiased;
                }
                (with_surplus(current, 1), ArriveStatus::ReadBiased)
            } else {
                (
                    with_surplus(current, surplus_of(current) + 1),
                    ArriveStatus::Normal,
                )
            };

            if self
                .state
                .compare_exchange_weak(current, next, Ordering::SeqCst, Ordering::SeqCst)
                .is_ok()
            {
                return status;
            }
        }
    }

    /// Arrives and acquires the lock in one step.
    ///
    /// Fails with `LockNotFree` if any lock is held, after spinning `spin_count` times.
    pub fn try_lock_and_arrive(&self, spin_count: usize, mode: LockMode, owner: u64) -> ArriveStatus {
        debug_assert!(mode.is_locked());
        let mut spins = spin_count;
        loop {
            let current = self.state.load(Ordering::SeqCst);
            if lock_mode_of(current).is_locked() {
                if spins == 0 {
                    trace!("orec lock for transaction {} not free", owner);
                    return ArriveStatus::LockNotFree;
                }
                spins -= 1;
                std::hint::spin_loop();
                continue;
            }

            let (arrived, status) = if is_read_biased_of(current) {
                let surplus = surplus_of(current).max(1);
                (with_surplus(current, surplus), ArriveStatus::ReadBiased)
            } else {
                (
                    with_surplus(current, surplus_of(current) + 1),
                    ArriveStatus::Normal,
                )
            };
            let next = with_lock_mode(arrived, mode);

            if self
                .state
                .compare_exchange_weak(current, next, Ordering::SeqCst, Ordering::SeqCst)
                .is_ok()
            {
                self.owner.store(owner, Ordering::SeqCst);
                return status;
            }
        }
    }

    /// Acquires the lock for a caller that already arrived normally.
    pub fn try_lock_after_normal_arrive(&self, spin_count: usize, mode: LockMode, owner: u64) -> bool {
        debug_assert!(mode.is_locked());
        let mut spins = spin_count;
        loop {
            let current = self.state.load(Ordering::SeqCst);
            if lock_mode_of(current).is_locked() {
                if spins == 0 {
                    trace!("orec lock for transaction {} not free", owner);
                    return false;
                }
                spins -= 1;
                std::hint::spin_loop();
                continue;
            }
            debug_assert!(surplus_of(current) > 0, "locking without an arrival");

            let next = with_lock_mode(current, mode);
            if self
                .state
                .compare_exchange_weak(current, next, Ordering::SeqCst, Ordering::SeqCst)
                .is_ok()
            {
                self.owner.store(owner, Ordering::SeqCst);
                return true;
            }
        }
    }

    /// Turns an update lock held by the caller into a commit lock.
    pub fn upgrade_to_commit_lock(&self) {
        loop {
            let current = self.state.load(Ordering::SeqCst);
            debug_assert!(lock_mode_of(current).is_locked(), "upgrading a free orec");
            if lock_mode_of(current) == LockMode::Commit {
                return;
            }
            let next = with_lock_mode(current, LockMode::Commit);
            if self
                .state
                .compare_exchange_weak(current, next, Ordering::SeqCst, Ordering::SeqCst)
                .is_ok()
            {
                return;
            }
        }
    }

    /// Departs after a successful readonly use of the cell.
    ///
    /// Returns `true` if this departure promoted the orec to read-biased mode.
    pub fn depart_after_reading(&self) -> bool {
        loop {
            let current = self.state.load(Ordering::SeqCst);
            debug_assert!(!is_read_biased_of(current), "departing from a read-biased orec");
            debug_assert!(surplus_of(current) > 0, "departing without an arrival");

            let (next, promoted) = self.departed_reader(current, lock_mode_of(current));
            if self
                .state
                .compare_exchange_weak(current, next, Ordering::SeqCst, Ordering::SeqCst)
                .is_ok()
            {
                if promoted {
                    trace!("orec became read biased");
                }
                return promoted;
            }
        }
    }

    /// Departs after a readonly use of a cell the caller had locked, releasing the lock.
    pub fn depart_after_reading_and_unlock(&self) -> bool {
        self.owner.store(0, Ordering::SeqCst);
        loop {
            let current = self.state.load(Ordering::SeqCst);
            debug_assert!(lock_mode_of(current).is_locked(), "unlocking a free orec");

            let (next, promoted) = self.departed_reader(current, LockMode::None);
            if self
                .state
                .compare_exchange_weak(current, next, Ordering::SeqCst, Ordering::SeqCst)
                .is_ok()
            {
                if promoted {
                    trace!("orec became read biased");
                }
                return promoted;
            }
        }
    }

    fn departed_reader(&self, current: u64, lock_after: LockMode) -> (u64, bool) {
        let surplus = surplus_of(current).saturating_sub(1);
        let mut readonly_count = (readonly_count_of(current) + 1).min(MAX_READ_BIASED_THRESHOLD);
        let promote = surplus == 0
            && !lock_after.is_locked()
            && !is_read_biased_of(current)
            && readonly_count >= self.read_biased_threshold;
        if promote {
            readonly_count = 0;
        }

        let mut next = with_surplus(current, surplus);
        next = with_readonly_count(next, readonly_count);
        next = with_lock_mode(next, lock_after);
        if promote {
            next = with_read_biased(next, true);
        }
        (next, promote)
    }

    /// Departs after publishing a write and releases the lock.
    ///
    /// A committed write resets the readonly counter and leaves read-biased mode. Returns
    /// the surplus that remains, the transactions that still hold a reference to the old
    /// value.
    pub fn depart_after_update_and_unlock(&self) -> u64 {
        self.owner.store(0, Ordering::SeqCst);
        loop {
            let current = self.state.load(Ordering::SeqCst);
            debug_assert!(lock_mode_of(current).is_locked(), "publishing without a lock");

            let remaining = if is_read_biased_of(current) {
                0
            } else {
                surplus_of(current).saturating_sub(1)
            };

            let mut next = with_surplus(current, remaining);
            next = with_readonly_count(next, 0);
            next = with_read_biased(next, false);
            next = with_lock_mode(next, LockMode::None);

            if self
                .state
                .compare_exchange_weak(current, next, Ordering::SeqCst, Ordering::SeqCst)
                .is_ok()
            {
                return remaining;
            }
        }
    }

    /// Departs without having used the cell successfully (the transaction aborted).
    pub fn depart_after_failure(&self) {
        loop {
            let current = self.state.load(Ordering::SeqCst);
            debug_assert!(!is_read_biased_of(current), "departing from a read-biased orec");
            debug_assert!(surplus_of(current) > 0, "departing without an arrival");

            let next = with_surplus(current, surplus_of(current).saturating_sub(1));
            if self
                .state
                .compare_exchange_weak(current, next, Ordering::SeqCst, Ordering::SeqCst)
                .is_ok()
            {
                return;
            }
        }
    }

    /// Departs after a failure and releases the lock the caller holds.
    pub fn depart_after_failure_and_unlock(&self) {
        self.owner.store(0, Ordering::SeqCst);
        loop {
            let current = self.state.load(Ordering::SeqCst);
            debug_assert!(lock_mode_of(current).is_locked(), "unlocking a free orec");

            let next = with_lock_mode(
                with_surplus(current, surplus_of(current).saturating_sub(1)),
                LockMode::None,
            );
            if self
                .state
                .compare_exchange_weak(current, next, Ordering::SeqCst, Ordering::SeqCst)
                .is_ok()
            {
                return;
            }
        }
    }

    /// Releases the lock without touching the surplus.
    ///
    /// For holders that locked a read-biased orec and so have nothing to depart from.
    pub fn unlock(&self) {
        self.owner.store(0, Ordering::SeqCst);
        loop {
            let current = self.state.load(Ordering::SeqCst);
            let next = with_lock_mode(current, LockMode::None);
            if self
                .state
                .compare_exchange_weak(current, next, Ordering::SeqCst, Ordering::SeqCst)
                .is_ok()
            {
                return;
            }
        }
    }

    pub fn lock_mode(&self) -> LockMode {
        lock_mode_of(self.state.load(Ordering::SeqCst))
    }

    pub fn is_locked(&self) -> bool {
        self.lock_mode().is_locked()
    }

    /// Returns the id of the transaction holding the lock, if any.
    pub fn owner(&self) -> Option<u64> {
        if !self.is_locked() {
            return None;
        }
        match self.owner.load(Ordering::SeqCst) {
            0 => None,
            id => Some(id),
        }
    }

    pub fn is_locked_by(&self, owner: u64) -> bool {
        self.is_locked() && self.owner.load(Ordering::SeqCst) == owner
    }

    pub fn surplus(&self) -> u64 {
        surplus_of(self.state.load(Ordering::SeqCst))
    }

    pub fn is_read_biased(&self) -> bool {
        is_read_biased_of(self.state.load(Ordering::SeqCst))
    }

    pub fn readonly_count(&self) -> u32 {
        readonly_count_of(self.state.load(Ordering::SeqCst))
    }

    pub fn read_biased_threshold(&self) -> u32 {
        self.read_biased_threshold
    }
}

impl Default for Orec {
    fn default() -> Self {
        Self::new(DEFAULT_READ_BIASED_THRESHOLD)
    }
}

impl fmt::Debug for Orec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = self.state.load(Ordering::SeqCst);
        f.debug_struct("Orec")
            .field("lock_mode", &lock_mode_of(state))
            .field("owner", &self.owner.load(Ordering::SeqCst))
            .field("surplus", &surplus_of(state))
            .field("read_biased", &is_read_biased_of(state))
            .field("readonly_count", &readonly_count_of(state))
            .finish()
    }
}
