use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use log::trace;
use parking_lot::{Mutex, RwLock};

use crate::atomic_block::AtomicBlock;
use crate::blocking::{Listeners, Registration, RetryLatch};
use crate::conflict::detection::ConflictType;
use crate::data_store::versioned_value::VersionedValue;
use crate::errors::{Result, ThothError};
use crate::isolation::LockMode;
use crate::orec::{ArriveStatus, Orec};
use crate::thoth::StmInner;
use crate::tranlocal::{DirtyState, Tranlocal, TranlocalStatus};
use crate::transaction::Transaction;
use crate::value::TxnValue;

/// A committed value handed out by a cell together with what the transaction now holds
/// on the cell's orec.
#[derive(Debug)]
pub(crate) struct Loaded<T> {
    pub read: Arc<VersionedValue<T>>,
    pub has_depart_obligation: bool,
    pub lock_mode: LockMode,
}

pub(crate) struct CellInner<T> {
    id: u64,
    stm: Arc<StmInner>,
    orec: Orec,
    committed: RwLock<Option<Arc<VersionedValue<T>>>>,
    version: AtomicU64,
    listeners: Mutex<Option<Box<Listeners>>>,
}

impl<T: TxnValue> CellInner<T> {
    fn new_committed(stm: Arc<StmInner>, id: u64, value: T) -> Self {
        let orec = Orec::new(stm.config().read_biased_threshold);
        Self {
            id,
            stm,
            orec,
            committed: RwLock::new(Some(Arc::new(VersionedValue::new(value, 1, 0)))),
            version: AtomicU64::new(1),
            listeners: Mutex::new(None),
        }
    }

    fn new_uncommitted(stm: Arc<StmInner>, id: u64, owner: u64) -> Self {
        let orec = Orec::new_locked(stm.config().read_biased_threshold, owner, LockMode::Commit);
        Self {
            id,
            stm,
            orec,
            committed: RwLock::new(None),
            version: AtomicU64::new(0),
            listeners: Mutex::new(None),
        }
    }

    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn stm(&self) -> &Arc<StmInner> {
        &self.stm
    }

    pub fn orec(&self) -> &Orec {
        &self.orec
    }

    pub fn version(&self) -> u64 {
        self.version.load(Ordering::SeqCst)
    }

    fn committed(&self) -> Option<Arc<VersionedValue<T>>> {
        self.committed.read().clone()
    }

    /// Loads the committed value without locking.
    ///
    /// Fails with `TooOldVersion` if the committed value was published after
    /// `max_stamp`, the caller's read version.
    pub fn load(&self, spin_count: usize, max_stamp: u64) -> std::result::Result<Loaded<T>, ConflictType> {
        loop {
            let Some(read) = self.committed() else {
                return Err(ConflictType::Uncommitted);
            };

            let status = self.orec.arrive(spin_count);
            if status == ArriveStatus::LockNotFree {
                return Err(ConflictType::Locked);
            }

            let unchanged = self
                .committed()
                .is_some_and(|current| Arc::ptr_eq(&current, &read));
            if !unchanged {
                if status.has_depart_obligation() {
                    self.orec.depart_after_failure();
                }
                continue;
            }

            if read.stamp() > max_stamp {
                if status.has_depart_obligation() {
                    self.orec.depart_after_failure();
                }
                return Err(ConflictType::TooOldVersion);
            }

            return Ok(Loaded {
                read,
                has_depart_obligation: status.has_depart_obligation(),
                lock_mode: LockMode::None,
            });
        }
    }

    /// Locks the cell for `owner` and loads the committed value under the lock.
    ///
    /// Without a `max_stamp` the latest committed value is returned no matter when it was
    /// published; commuting functions are evaluated that way.
    pub fn lock_and_load(
        &self,
        spin_count: usize,
        owner: u64,
        mode: LockMode,
        max_stamp: Option<u64>,
    ) -> std::result::Result<Loaded<T>, ConflictType> {
        let status = self.orec.try_lock_and_arrive(spin_count, mode, owner);
        if status == ArriveStatus::LockNotFree {
            return Err(if self.committed.read().is_none() {
                ConflictType::Uncommitted
            } else {
                ConflictType::Locked
            });
        }

        let release = |orec: &Orec| {
            if status.has_depart_obligation() {
                orec.depart_after_failure_and_unlock();
            } else {
                orec.unlock();
            }
        };

        let Some(read) = self.committed() else {
            release(&self.orec);
            return Err(ConflictType::Uncommitted);
        };
        if max_stamp.is_some_and(|max| read.stamp() > max) {
            release(&self.orec);
            return Err(ConflictType::TooOldVersion);
        }

        Ok(Loaded {
            read,
            has_depart_obligation: status.has_depart_obligation(),
            lock_mode: mode,
        })
    }

    /// Locks the cell on behalf of `tranlocal` and checks that nobody committed to it
    /// since the snapshot was taken.
    ///
    /// On a version mismatch the lock stays held and is released when the transaction
    /// aborts.
    pub fn try_lock_and_check_conflict(
        &self,
        tranlocal: &mut Tranlocal<T>,
        owner: u64,
        spin_count: usize,
        mode: LockMode,
    ) -> bool {
        let held = tranlocal.lock_mode();
        if held.is_locked() {
            if mode == LockMode::Commit && held == LockMode::Update {
                self.orec.upgrade_to_commit_lock();
                tranlocal.set_lock_mode(LockMode::Commit);
            }
            return true;
        }

        let expected = tranlocal.version();
        if self.version() != expected {
            return false;
        }

        if tranlocal.has_depart_obligation() {
            if !self.orec.try_lock_after_normal_arrive(spin_count, mode, owner) {
                return false;
            }
        } else {
            match self.orec.try_lock_and_arrive(spin_count, mode, owner) {
                ArriveStatus::LockNotFree => return false,
                status => tranlocal.set_depart_obligation(status.has_depart_obligation()),
            }
        }
        tranlocal.set_lock_mode(mode);

        self.version() == expected
    }

    /// Publishes a dirty snapshot and releases the cell.
    ///
    /// A clean snapshot only releases what it holds: no version bump, no conflict counter
    /// increment. Returns the listeners that were waiting for this cell to change.
    pub fn commit_dirty(&self, tranlocal: &mut Tranlocal<T>, owner: u64) -> Option<Box<Listeners>> {
        let publish = match tranlocal.status() {
            TranlocalStatus::Construction => true,
            TranlocalStatus::Write => tranlocal.dirty_state() == DirtyState::True,
            TranlocalStatus::Readonly | TranlocalStatus::Commuting => false,
        };
        if !publish {
            self.release_after_reading(tranlocal);
            return None;
        }
        debug_assert_eq!(tranlocal.lock_mode(), LockMode::Commit);

        let Some(value) = tranlocal.take_value() else {
            self.release_after_reading(tranlocal);
            return None;
        };

        let version = self.version() + 1;
        let stamp = self.stm.global_conflict_counter().signal_conflict();
        *self.committed.write() = Some(Arc::new(VersionedValue::new(value, version, stamp)));
        self.version.store(version, Ordering::SeqCst);

        let listeners = self.listeners.lock().take();
        self.orec.depart_after_update_and_unlock();
        trace!(
            "transaction {} published cell {} at version {} (stamp {})",
            owner, self.id, version, stamp
        );
        listeners
    }

    fn release_after_reading(&self, tranlocal: &Tranlocal<T>) {
        match (tranlocal.lock_mode().is_locked(), tranlocal.has_depart_obligation()) {
            (true, true) => {
                self.orec.depart_after_reading_and_unlock();
            }
            (true, false) => self.orec.unlock(),
            (false, true) => {
                self.orec.depart_after_reading();
            }
            (false, false) => {}
        }
    }

    /// Departs right after loading, for reads the transaction doesn't track.
    pub fn release_untracked(&self, tranlocal: &mut Tranlocal<T>) {
        if tranlocal.lock_mode().is_locked() || !tranlocal.has_depart_obligation() {
            return;
        }
        self.orec.depart_after_reading();
        tranlocal.set_depart_obligation(false);
    }

    /// Releases everything `tranlocal` holds on the cell. The committed value is never
    /// touched.
    pub fn abort(&self, tranlocal: &Tranlocal<T>, owner: u64) {
        match (tranlocal.lock_mode().is_locked(), tranlocal.has_depart_obligation()) {
            (true, true) => self.orec.depart_after_failure_and_unlock(),
            (true, false) => self.orec.unlock(),
            (false, true) => self.orec.depart_after_failure(),
            (false, false) => {}
        }
        trace!("transaction {} released cell {}", owner, self.id);
    }

    pub fn has_read_conflict(&self, tranlocal: &Tranlocal<T>, owner: u64) -> bool {
        if tranlocal.lock_mode().is_locked() {
            return false;
        }
        if matches!(
            tranlocal.status(),
            TranlocalStatus::Construction | TranlocalStatus::Commuting
        ) {
            return false;
        }
        if self.orec.lock_mode() == LockMode::Commit && !self.orec.is_locked_by(owner) {
            return true;
        }
        self.version() != tranlocal.version()
    }

    /// Classifies a failed lock attempt.
    pub fn conflict_kind(&self, owner: u64) -> ConflictType {
        if self.orec.is_locked() && !self.orec.is_locked_by(owner) {
            ConflictType::Locked
        } else {
            ConflictType::TooOldVersion
        }
    }

    pub fn register_change_listener(
        &self,
        latch: &Arc<RetryLatch>,
        tranlocal: &Tranlocal<T>,
        era: u64,
    ) -> Registration {
        if matches!(
            tranlocal.status(),
            TranlocalStatus::Construction | TranlocalStatus::Commuting
        ) {
            return Registration::None;
        }

        let mut head = self.listeners.lock();
        // The committer bumps the version before draining the chain, so checking under
        // the chain lock can't miss a commit.
        if self.version() != tranlocal.version() {
            drop(head);
            latch.open(era);
            return Registration::NotNeeded;
        }
        let live = Listeners::prune(head.take());
        *head = Some(Listeners::new(Arc::clone(latch), era, live));
        Registration::Registered
    }

    pub fn listener_count(&self) -> usize {
        self.listeners.lock().as_ref().map_or(0, |chain| chain.len())
    }
}

/// A transactional cell holding a value of type `T`.
///
/// Cells are cheap handles; cloning one gives another handle to the same cell. All
/// transactional access goes through a [`Transaction`], the `atomic_*` methods run a
/// single-operation transaction of their own.
///
/// # Examples
///
/// ```no_run
/// use thoth::prelude::*;
///
/// let stm = Thoth::new();
/// let balance = stm.new_cell(100_i64);
///
/// stm.atomically(|tx| {
///     let current = balance.get(tx)?;
///     balance.set(tx, current - 30)
/// })
/// .unwrap();
///
/// assert_eq!(balance.atomic_get().unwrap(), 70);
/// ```
pub struct TxnCell<T> {
    inner: Arc<CellInner<T>>,
}

impl<T> Clone for TxnCell<T> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<T: TxnValue> TxnCell<T> {
    pub(crate) fn new_committed(stm: Arc<StmInner>, id: u64, value: T) -> Self {
        Self {
            inner: Arc::new(CellInner::new_committed(stm, id, value)),
        }
    }

    pub(crate) fn new_uncommitted(stm: Arc<StmInner>, id: u64, owner: u64) -> Self {
        Self {
            inner: Arc::new(CellInner::new_uncommitted(stm, id, owner)),
        }
    }

    pub(crate) fn inner(&self) -> &Arc<CellInner<T>> {
        &self.inner
    }

    /// The cell's id, unique within its STM instance. Locks are taken in id order.
    pub fn id(&self) -> u64 {
        self.inner.id()
    }

    /// The committed version; 0 while the cell is under construction.
    pub fn version(&self) -> u64 {
        self.inner.version()
    }

    pub fn is_committed(&self) -> bool {
        self.inner.committed.read().is_some()
    }

    pub fn orec(&self) -> &Orec {
        self.inner.orec()
    }

    /// Number of blocked transactions waiting for this cell to change.
    pub fn listener_count(&self) -> usize {
        self.inner.listener_count()
    }

    /// Opens the cell for reading.
    ///
    /// # Arguments
    ///
    /// * `tx` - The transaction to open the cell in.
    /// * `lock_mode` - The lock to take at open time; raised to the transaction's
    ///   configured read lock mode.
    ///
    /// # Errors
    ///
    /// Read conflicts abort the transaction. See [`Transaction::open_for_read`].
    pub fn open_for_read<'t>(&self, tx: &'t mut Transaction, lock_mode: LockMode) -> Result<&'t Tranlocal<T>> {
        tx.open_for_read(self, lock_mode)
    }

    /// Opens the cell for writing. See [`Transaction::open_for_write`].
    pub fn open_for_write<'t>(
        &self,
        tx: &'t mut Transaction,
        lock_mode: LockMode,
    ) -> Result<&'t mut Tranlocal<T>> {
        tx.open_for_write(self, lock_mode)
    }

    /// Opens a cell created by `tx` that has not been committed yet.
    pub fn open_for_construction<'t>(&self, tx: &'t mut Transaction) -> Result<&'t mut Tranlocal<T>> {
        tx.open_for_construction(self)
    }

    /// Registers a function applied to the cell's value when `tx` commits.
    ///
    /// The cell is not read, so concurrent commuting updates don't conflict with each
    /// other.
    pub fn commute<F>(&self, tx: &mut Transaction, function: F) -> Result<()>
    where
        F: FnOnce(T) -> T + Send + 'static,
    {
        tx.commute(self, function)
    }

    /// Reads the value inside `tx`.
    pub fn get(&self, tx: &mut Transaction) -> Result<T> {
        Ok(tx.open_for_read(self, LockMode::None)?.value().clone())
    }

    /// Writes the value inside `tx`.
    pub fn set(&self, tx: &mut Transaction, value: T) -> Result<()> {
        tx.open_for_write(self, LockMode::None)?.set_value(value);
        Ok(())
    }

    /// Replaces the value with `function(current)` inside `tx` and returns the new value.
    pub fn alter<F>(&self, tx: &mut Transaction, function: F) -> Result<T>
    where
        F: FnOnce(&T) -> T,
    {
        let tranlocal = tx.open_for_write(self, LockMode::None)?;
        let altered = function(tranlocal.value());
        tranlocal.set_value(altered.clone());
        Ok(altered)
    }

    /// Writes `value` inside `tx` and returns the value it replaced.
    pub fn get_and_set(&self, tx: &mut Transaction, value: T) -> Result<T> {
        let tranlocal = tx.open_for_write(self, LockMode::None)?;
        Ok(std::mem::replace(tranlocal.value_mut(), value))
    }

    /// Replaces the value with `function(current)` inside `tx` and returns the value it
    /// replaced.
    pub fn get_and_alter<F>(&self, tx: &mut Transaction, function: F) -> Result<T>
    where
        F: FnOnce(&T) -> T,
    {
        let tranlocal = tx.open_for_write(self, LockMode::None)?;
        let altered = function(tranlocal.value());
        Ok(std::mem::replace(tranlocal.value_mut(), altered))
    }

    /// Takes an update lock: others can still read, but nobody else can commit a write
    /// until `tx` finishes.
    pub fn ensure(&self, tx: &mut Transaction) -> Result<()> {
        tx.open_for_read(self, LockMode::Update).map(|_| ())
    }

    /// Takes a commit lock: nobody else can read or write the cell until `tx` finishes.
    pub fn privatize(&self, tx: &mut Transaction) -> Result<()> {
        tx.open_for_read(self, LockMode::Commit).map(|_| ())
    }

    /// Reads the value and blocks (via retry) until `predicate` holds.
    ///
    /// Returns `Err(ThothError::Retry)` while the predicate is false; an atomic block
    /// turns that into a wait for one of the cells read so far to change.
    pub fn await_until<P>(&self, tx: &mut Transaction, predicate: P) -> Result<T>
    where
        P: FnOnce(&T) -> bool,
    {
        let value = tx.open_for_read(self, LockMode::None)?.value();
        if predicate(value) {
            Ok(value.clone())
        } else {
            Err(ThothError::Retry)
        }
    }

    /// Blocks (via retry) until the cell holds `value`, compared with
    /// [`TxnValue::same_value`].
    pub fn await_value(&self, tx: &mut Transaction, value: &T) -> Result<()> {
        self.await_until(tx, |current| current.same_value(value))
            .map(|_| ())
    }

    pub fn is_free(&self) -> bool {
        !self.inner.orec.is_locked()
    }

    pub fn is_ensured(&self) -> bool {
        self.inner.orec.lock_mode() == LockMode::Update
    }

    pub fn is_privatized(&self) -> bool {
        self.inner.orec.lock_mode() == LockMode::Commit
    }

    pub fn is_ensured_by(&self, tx: &Transaction) -> bool {
        self.is_ensured() && self.inner.orec.is_locked_by(tx.id())
    }

    pub fn is_privatized_by(&self, tx: &Transaction) -> bool {
        self.is_privatized() && self.inner.orec.is_locked_by(tx.id())
    }

    pub fn is_ensured_by_other(&self, tx: &Transaction) -> bool {
        self.is_ensured() && !self.inner.orec.is_locked_by(tx.id())
    }

    pub fn is_privatized_by_other(&self, tx: &Transaction) -> bool {
        self.is_privatized() && !self.inner.orec.is_locked_by(tx.id())
    }

    fn single_operation_block(&self, readonly: bool) -> AtomicBlock {
        let config = self
            .inner
            .stm
            .config()
            .default_transaction
            .clone()
            .with_family_name(format!("cell-{}", self.id()))
            .with_readonly(readonly);
        AtomicBlock::new(Arc::clone(&self.inner.stm), config)
    }

    /// Reads the committed value in a transaction of its own.
    pub fn atomic_get(&self) -> Result<T> {
        self.single_operation_block(true).execute(|tx| self.get(tx))
    }

    /// Writes `value` in a transaction of its own.
    pub fn atomic_set(&self, value: T) -> Result<()> {
        self.single_operation_block(false)
            .execute(|tx| self.set(tx, value.clone()))
    }

    /// Reads the committed value without arriving at the orec and without a
    /// transaction.
    ///
    /// Nothing is validated: the value may be replaced right after it was read, and a
    /// commit lock held by a writer is ignored. Returns `None` while the cell is under
    /// construction.
    pub fn atomic_weak_get(&self) -> Option<T> {
        self.inner.committed().map(|read| read.value().clone())
    }

    /// Writes `value` in a transaction of its own and returns the value it replaced.
    pub fn atomic_get_and_set(&self, value: T) -> Result<T> {
        self.single_operation_block(false)
            .execute(|tx| self.get_and_set(tx, value.clone()))
    }

    /// Writes `update` in a transaction of its own if the cell holds `expected`.
    ///
    /// Returns whether the write happened. The comparison uses
    /// [`TxnValue::same_value`].
    pub fn atomic_compare_and_set(&self, expected: &T, update: T) -> Result<bool> {
        self.single_operation_block(false).execute(|tx| {
            let matches = tx
                .open_for_read(self, LockMode::None)?
                .value()
                .same_value(expected);
            if matches {
                self.set(tx, update.clone())?;
            }
            Ok(matches)
        })
    }

    /// Applies `function` in a transaction of its own and returns the value it replaced.
    pub fn atomic_get_and_alter<F>(&self, function: F) -> Result<T>
    where
        F: Fn(&T) -> T,
    {
        self.single_operation_block(false)
            .execute(|tx| self.get_and_alter(tx, &function))
    }

    /// Applies `function` in a transaction of its own and returns the new value.
    pub fn atomic_alter<F>(&self, function: F) -> Result<T>
    where
        F: Fn(&T) -> T,
    {
        self.single_operation_block(false)
            .execute(|tx| self.alter(tx, &function))
    }
}

impl<T: TxnValue> fmt::Debug for TxnCell<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TxnCell")
            .field("id", &self.id())
            .field("version", &self.version())
            .field("orec", self.orec())
            .finish()
    }
}
