use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use log::debug;
use serde::{Deserialize, Serialize};

use crate::blocking::{Listeners, Registration, RetryLatch};
use crate::cell::TxnCell;
use crate::config::TransactionConfig;
use crate::conflict::counter::LocalConflictCounter;
use crate::conflict::detection::{ConflictType, detect_read_conflicts};
use crate::data_store::txn_buffer::{TxnBuffer, TxnBufferKind};
use crate::errors::{Result, ThothError};
use crate::isolation::LockMode;
use crate::thoth::StmInner;
use crate::tranlocal::{Tranlocal, TranlocalStatus};
use crate::value::TxnValue;

/// Lifecycle of a transaction.
///
/// `Active -> Prepared -> Committed | Aborted`, or straight from `Active` to
/// `Committed` / `Aborted`. Committed and aborted transactions are dead until they are
/// restarted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum TransactionStatus {
    Active,
    Prepared,
    Committed,
    Aborted,
}

impl TransactionStatus {
    pub fn is_alive(self) -> bool {
        matches!(self, TransactionStatus::Active | TransactionStatus::Prepared)
    }
}

/// Lifecycle events delivered to [`TransactionListener`]s.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TransactionEvent {
    PrePrepare,
    PostCommit,
    PostAbort,
}

/// Observer of a transaction's lifecycle.
pub trait TransactionListener: Send + Sync {
    fn notify(&self, transaction_id: u64, event: TransactionEvent);
}

impl<F> TransactionListener for F
where
    F: Fn(u64, TransactionEvent) + Send + Sync,
{
    fn notify(&self, transaction_id: u64, event: TransactionEvent) {
        self(transaction_id, event)
    }
}

/// A transaction over a set of [`TxnCell`]s.
///
/// A transaction is used by one thread at a time. Cells are opened through it, which
/// creates a [`Tranlocal`] snapshot per cell; reads are consistent with the transaction's
/// read version and writes stay private until [`Transaction::commit`] publishes them.
///
/// Every failing operation that reports a conflict aborts the transaction. Dropping an
/// active transaction aborts it as well.
pub struct Transaction {
    id: u64,
    stm: Arc<StmInner>,
    config: Arc<TransactionConfig>,
    status: TransactionStatus,
    buffer: TxnBuffer,
    local_conflict_counter: LocalConflictCounter,
    has_updates: bool,
    abort_only: bool,
    attempt: usize,
    remaining_timeout: Option<Duration>,
    listeners: Vec<Arc<dyn TransactionListener>>,
}

impl Transaction {
    pub(crate) fn new(
        id: u64,
        stm: Arc<StmInner>,
        config: Arc<TransactionConfig>,
        kind: TxnBufferKind,
    ) -> Self {
        let local_conflict_counter = LocalConflictCounter::new(stm.global_conflict_counter());
        let remaining_timeout = config.timeout;
        Self {
            id,
            stm,
            config,
            status: TransactionStatus::Active,
            buffer: TxnBuffer::new(kind),
            local_conflict_counter,
            has_updates: false,
            abort_only: false,
            attempt: 1,
            remaining_timeout,
            listeners: Vec::new(),
        }
    }

    /// Returns the unique ID of the transaction. Locks are owned by this id.
    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn status(&self) -> TransactionStatus {
        self.status
    }

    pub fn config(&self) -> &TransactionConfig {
        &self.config
    }

    /// The attempt this transaction is on, starting at 1.
    pub fn attempt(&self) -> usize {
        self.attempt
    }

    /// The global conflict counter value all reads are consistent with.
    pub fn read_version(&self) -> u64 {
        self.local_conflict_counter.read_version()
    }

    /// The opened-cell table in use.
    pub fn buffer_kind(&self) -> TxnBufferKind {
        self.buffer.kind()
    }

    /// Number of opened cells.
    pub fn opened_count(&self) -> usize {
        self.buffer.len()
    }

    pub fn has_updates(&self) -> bool {
        self.has_updates
    }

    pub fn is_abort_only(&self) -> bool {
        self.abort_only
    }

    /// Time left for blocking retries, if the configuration has a timeout.
    pub fn remaining_timeout(&self) -> Option<Duration> {
        self.remaining_timeout
    }

    pub(crate) fn set_remaining_timeout(&mut self, remaining: Option<Duration>) {
        self.remaining_timeout = remaining;
    }

    /// Looks up the snapshot of a cell that was already opened.
    ///
    /// Returns `None` for cells that were not opened, and for cells that only have
    /// commuting functions registered: those have no value until they are opened or the
    /// transaction commits.
    pub fn get<T: TxnValue>(&self, cell: &TxnCell<T>) -> Option<&Tranlocal<T>> {
        self.opened::<T>(cell.id())
            .filter(|tranlocal| tranlocal.status() != TranlocalStatus::Commuting)
    }

    fn opened<T: TxnValue>(&self, cell_id: u64) -> Option<&Tranlocal<T>> {
        self.buffer
            .get(cell_id)
            .and_then(|entry| entry.as_any().downcast_ref::<Tranlocal<T>>())
    }

    fn opened_mut<T: TxnValue>(&mut self, cell_id: u64) -> Result<&mut Tranlocal<T>> {
        self.buffer
            .get_mut(cell_id)
            .and_then(|entry| entry.as_any_mut().downcast_mut::<Tranlocal<T>>())
            .ok_or_else(|| ThothError::BadReference(format!("cell {} is not opened", cell_id)))
    }

    /// Opens a cell for reading.
    ///
    /// The first open loads the committed value, which must be consistent with the read
    /// version; if the cell changed since, the transaction tries to move its read version
    /// forward by revalidating everything read so far. Opening an already opened cell
    /// after another transaction committed revalidates as well.
    ///
    /// # Arguments
    ///
    /// * `cell` - The cell to open.
    /// * `lock_mode` - The lock to take right away; raised to the configured read lock
    ///   mode.
    ///
    /// # Errors
    ///
    /// * `ThothError::ReadConflict` if the cell is uncommitted, locked by another
    ///   transaction, or the read set can't be revalidated. The transaction is aborted.
    /// * `ThothError::SpeculativeConfigurationFailure` if the opened-cell table is full.
    ///   The transaction is aborted.
    /// * `ThothError::PreparedTransaction` / `ThothError::DeadTransaction` if the
    ///   transaction is no longer active.
    ///
    /// # Examples
    ///
    /// ```no_run
    /// use thoth::prelude::*;
    ///
    /// let stm = Thoth::new();
    /// let cell = stm.new_cell(42_u32);
    ///
    /// let mut tx = stm.start_transaction();
    /// let tranlocal = tx.open_for_read(&cell, LockMode::None).unwrap();
    /// assert_eq!(*tranlocal.value(), 42);
    /// tx.commit().unwrap();
    /// ```
    pub fn open_for_read<T: TxnValue>(&mut self, cell: &TxnCell<T>, lock_mode: LockMode) -> Result<&Tranlocal<T>> {
        self.check_open_allowed()?;
        self.check_owner(cell)?;
        let lock_mode = lock_mode.max(self.config.read_lock_mode);
        let cell_id = cell.id();

        if self.buffer.contains(cell_id) {
            self.reopen(cell, lock_mode)?;
            return self.opened_mut::<T>(cell_id).map(|tranlocal| &*tranlocal);
        }

        self.check_room()?;
        let loaded = self.load_cell(cell, lock_mode)?;
        let tracked = self.config.track_reads || lock_mode.is_locked();
        let mut tranlocal = Tranlocal::for_read(Arc::clone(cell.inner()), loaded, tracked);
        if !tracked {
            cell.inner().release_untracked(&mut tranlocal);
        }
        self.insert(tranlocal)?;
        self.opened_mut::<T>(cell_id).map(|tranlocal| &*tranlocal)
    }

    /// Opens a cell for writing.
    ///
    /// The returned snapshot holds a private copy of the value. Nothing is published
    /// before commit, and only if the value actually changed.
    ///
    /// # Errors
    ///
    /// Same as [`Transaction::open_for_read`], plus `ThothError::ReadonlyViolation` for
    /// readonly transactions.
    pub fn open_for_write<T: TxnValue>(
        &mut self,
        cell: &TxnCell<T>,
        lock_mode: LockMode,
    ) -> Result<&mut Tranlocal<T>> {
        self.check_open_allowed()?;
        self.check_owner(cell)?;
        self.check_writable()?;
        let lock_mode = lock_mode.max(self.config.write_lock_mode);
        let cell_id = cell.id();

        if self.buffer.contains(cell_id) {
            self.reopen(cell, lock_mode)?;
            self.has_updates = true;
            let tranlocal = self.opened_mut::<T>(cell_id)?;
            tranlocal.upgrade_to_write();
            return Ok(tranlocal);
        }

        self.check_room()?;
        let loaded = self.load_cell(cell, lock_mode)?;
        let tranlocal = Tranlocal::for_write(Arc::clone(cell.inner()), loaded);
        self.insert(tranlocal)?;
        self.has_updates = true;
        self.opened_mut::<T>(cell_id)
    }

    /// Creates a new cell owned by this transaction.
    ///
    /// The cell stays commit-locked and invisible to everybody else until the transaction
    /// commits. If the transaction aborts, the cell is never committed and other
    /// transactions opening it get an `Uncommitted` read conflict.
    pub fn new_cell<T: TxnValue>(&mut self, initial: T) -> Result<TxnCell<T>> {
        self.check_open_allowed()?;
        self.check_writable()?;
        self.check_room()?;

        let cell = TxnCell::new_uncommitted(Arc::clone(&self.stm), self.stm.next_cell_id(), self.id);
        let tranlocal = Tranlocal::for_construction(Arc::clone(cell.inner()), initial);
        self.insert(tranlocal)?;
        self.has_updates = true;
        Ok(cell)
    }

    /// Opens a cell created by this transaction.
    ///
    /// # Errors
    ///
    /// `ThothError::BadReference` if the cell was not created by this transaction.
    pub fn open_for_construction<T: TxnValue>(&mut self, cell: &TxnCell<T>) -> Result<&mut Tranlocal<T>> {
        self.check_open_allowed()?;
        self.check_owner(cell)?;
        self.check_writable()?;
        let cell_id = cell.id();

        let constructing = self
            .opened::<T>(cell_id)
            .is_some_and(|tranlocal| tranlocal.status() == TranlocalStatus::Construction);
        if !constructing {
            self.abort_internal();
            return Err(ThothError::BadReference(format!(
                "cell {} was not created by transaction {}",
                cell_id, self.id
            )));
        }
        self.opened_mut::<T>(cell_id)
    }

    /// Registers `function` to be applied to the cell's value at commit.
    ///
    /// If the cell was not opened yet, nothing is read now: the functions are folded over
    /// the latest committed value while the cell is commit-locked, so concurrent commuting
    /// transactions don't conflict. If the cell is already open, the function is applied
    /// to the local value right away, and the cell is locked as it would be for a write.
    pub fn commute<T, F>(&mut self, cell: &TxnCell<T>, function: F) -> Result<()>
    where
        T: TxnValue,
        F: FnOnce(T) -> T + Send + 'static,
    {
        self.check_open_allowed()?;
        self.check_owner(cell)?;
        self.check_writable()?;
        let cell_id = cell.id();

        if self.buffer.contains(cell_id) {
            if self.opened_mut::<T>(cell_id)?.status() == TranlocalStatus::Commuting {
                self.opened_mut::<T>(cell_id)?
                    .add_commuting_function(Box::new(function));
            } else {
                let lock_mode = self.config.write_lock_mode;
                self.reopen(cell, lock_mode)?;
                self.opened_mut::<T>(cell_id)?.apply(Box::new(function));
            }
            self.has_updates = true;
            return Ok(());
        }

        self.check_room()?;
        let tranlocal = Tranlocal::for_commute(Arc::clone(cell.inner()), Box::new(function));
        self.insert(tranlocal)?;
        self.has_updates = true;
        Ok(())
    }

    fn reopen<T: TxnValue>(&mut self, cell: &TxnCell<T>, lock_mode: LockMode) -> Result<()> {
        let cell_id = cell.id();
        let owner = self.id;
        let spin_count = self.config.spin_count;

        let status = self.opened_mut::<T>(cell_id)?.status();
        match status {
            TranlocalStatus::Construction => Ok(()),
            TranlocalStatus::Commuting => {
                let loaded = self.load_cell(cell, lock_mode)?;
                self.opened_mut::<T>(cell_id)?
                    .evaluate_commuting_functions(loaded);
                Ok(())
            }
            TranlocalStatus::Readonly | TranlocalStatus::Write => {
                let tranlocal = self.opened_mut::<T>(cell_id)?;
                if tranlocal.lock_mode() < lock_mode
                    && !cell
                        .inner()
                        .try_lock_and_check_conflict(tranlocal, owner, spin_count, lock_mode)
                {
                    let kind = cell.inner().conflict_kind(owner);
                    self.abort_internal();
                    return Err(ThothError::ReadConflict(kind));
                }
                self.sync_read_version()
            }
        }
    }

    fn load_cell<T: TxnValue>(
        &mut self,
        cell: &TxnCell<T>,
        lock_mode: LockMode,
    ) -> Result<crate::cell::Loaded<T>> {
        let spin_count = self.config.spin_count;
        let mut extensions = spin_count.max(1);
        loop {
            let max_stamp = self.local_conflict_counter.read_version();
            let loaded = if lock_mode.is_locked() {
                cell.inner()
                    .lock_and_load(spin_count, self.id, lock_mode, Some(max_stamp))
            } else {
                cell.inner().load(spin_count, max_stamp)
            };

            match loaded {
                Ok(loaded) => return Ok(loaded),
                Err(ConflictType::TooOldVersion) if extensions > 0 && self.extend_read_version() => {
                    extensions -= 1;
                }
                Err(kind) => {
                    self.abort_internal();
                    return Err(ThothError::ReadConflict(kind));
                }
            }
        }
    }

    /// Moves the read version to the current global counter value if nothing read so far
    /// changed in between.
    fn extend_read_version(&mut self) -> bool {
        let sampled = self.stm.global_conflict_counter().count();
        if detect_read_conflicts(self.id, self.buffer.iter()) {
            return false;
        }
        self.local_conflict_counter.extend_to(sampled);
        true
    }

    fn sync_read_version(&mut self) -> Result<()> {
        if !self
            .local_conflict_counter
            .has_changed(self.stm.global_conflict_counter())
        {
            return Ok(());
        }
        if self.extend_read_version() {
            return Ok(());
        }
        self.abort_internal();
        Err(ThothError::ReadConflict(ConflictType::TooOldVersion))
    }

    fn check_open_allowed(&mut self) -> Result<()> {
        match self.status {
            TransactionStatus::Active => Ok(()),
            TransactionStatus::Prepared => {
                self.abort_internal();
                Err(ThothError::PreparedTransaction { id: self.id })
            }
            status => Err(ThothError::DeadTransaction {
                id: self.id,
                status,
            }),
        }
    }

    fn check_owner<T: TxnValue>(&mut self, cell: &TxnCell<T>) -> Result<()> {
        if Arc::ptr_eq(cell.inner().stm(), &self.stm) {
            return Ok(());
        }
        self.abort_internal();
        Err(ThothError::BadReference(format!(
            "cell {} belongs to another STM instance",
            cell.id()
        )))
    }

    fn check_writable(&mut self) -> Result<()> {
        if !self.config.readonly {
            return Ok(());
        }
        self.abort_internal();
        Err(ThothError::ReadonlyViolation { id: self.id })
    }

    fn check_room(&mut self) -> Result<()> {
        if self.buffer.has_room() {
            return Ok(());
        }
        let required = self.buffer.len() + 1;
        debug!(
            "transaction {} outgrew its {:?} table, needs {} cells",
            self.id,
            self.buffer.kind(),
            required
        );
        self.abort_internal();
        Err(ThothError::SpeculativeConfigurationFailure { required })
    }

    fn insert<T: TxnValue>(&mut self, tranlocal: Tranlocal<T>) -> Result<()> {
        if let Err(mut rejected) = self.buffer.insert(Box::new(tranlocal)) {
            let required = self.buffer.len() + 1;
            rejected.abort(self.id);
            self.abort_internal();
            return Err(ThothError::SpeculativeConfigurationFailure { required });
        }
        Ok(())
    }

    /// Marks the transaction so that it can only abort.
    pub fn set_abort_only(&mut self) -> Result<()> {
        self.check_open_allowed()?;
        self.abort_only = true;
        Ok(())
    }

    /// Adds a listener that is told about prepare, commit and abort. Listeners are
    /// dropped when the transaction is reset.
    pub fn register_listener(&mut self, listener: Arc<dyn TransactionListener>) -> Result<()> {
        self.check_open_allowed()?;
        self.listeners.push(listener);
        Ok(())
    }

    fn notify(&self, event: TransactionEvent) {
        for listener in &self.listeners {
            listener.notify(self.id, event);
        }
    }

    /// Runs the first phase of commit and leaves the transaction prepared.
    ///
    /// 1. Pending commuting functions are evaluated against the latest committed value.
    /// 2. Every cell that is going to be published is commit-locked, in cell id order.
    /// 3. Cells that are only read are validated (or update-locked when write skew is
    ///    not allowed).
    ///
    /// Locks stay held until [`Transaction::commit`] or [`Transaction::abort`].
    ///
    /// # Errors
    ///
    /// `ThothError::ReadWriteConflict` if a lock can't be taken or a read is stale. The
    /// transaction is aborted.
    pub fn prepare(&mut self) -> Result<()> {
        match self.status {
            TransactionStatus::Active => {}
            TransactionStatus::Prepared => return Ok(()),
            status => {
                return Err(ThothError::DeadTransaction {
                    id: self.id,
                    status,
                });
            }
        }

        self.notify(TransactionEvent::PrePrepare);
        if self.abort_only {
            debug!("transaction {} is abort only", self.id);
            self.abort_internal();
            return Err(ThothError::ReadWriteConflict { id: self.id });
        }

        if self.has_updates && !self.prepare_updates() {
            debug!("transaction {} failed to prepare", self.id);
            self.abort_internal();
            return Err(ThothError::ReadWriteConflict { id: self.id });
        }

        self.status = TransactionStatus::Prepared;
        Ok(())
    }

    fn prepare_updates(&mut self) -> bool {
        let owner = self.id;
        let spin_count = self.config.spin_count;
        let dirty_check = self.config.dirty_check;

        for entry in self.buffer.sorted_mut() {
            if entry.prepare_dirty_update(owner, spin_count, dirty_check).is_err() {
                return false;
            }
        }

        if !self.config.write_skew_allowed {
            return self
                .buffer
                .sorted_mut()
                .into_iter()
                .all(|entry| entry.lock_for_validation(owner, spin_count));
        }

        if self
            .local_conflict_counter
            .has_changed(self.stm.global_conflict_counter())
        {
            return !detect_read_conflicts(owner, self.buffer.iter());
        }
        true
    }

    /// Commits the transaction.
    ///
    /// A transaction without updates commits right away: its reads were consistent when
    /// they were made. Otherwise it is prepared first, then every dirty snapshot is
    /// published, every lock released and every transaction blocked on a published cell
    /// woken up.
    ///
    /// Committing a committed transaction does nothing.
    ///
    /// # Errors
    ///
    /// * `ThothError::ReadWriteConflict` if preparing fails; the transaction is aborted.
    /// * `ThothError::DeadTransaction` if the transaction was aborted.
    ///
    /// # Examples
    ///
    /// ```no_run
    /// use thoth::prelude::*;
    ///
    /// let stm = Thoth::new();
    /// let cell = stm.new_cell(0_i64);
    ///
    /// let mut tx = stm.start_transaction();
    /// tx.open_for_write(&cell, LockMode::None).unwrap().set_value(5);
    /// tx.commit().unwrap();
    ///
    /// assert_eq!(cell.version(), 2);
    /// ```
    pub fn commit(&mut self) -> Result<()> {
        match self.status {
            TransactionStatus::Committed => return Ok(()),
            TransactionStatus::Aborted => {
                return Err(ThothError::DeadTransaction {
                    id: self.id,
                    status: self.status,
                });
            }
            TransactionStatus::Active => {
                if self.has_updates || self.abort_only {
                    self.prepare()?;
                } else {
                    self.notify(TransactionEvent::PrePrepare);
                }
            }
            TransactionStatus::Prepared => {}
        }

        let owner = self.id;
        let to_wake: Vec<Box<Listeners>> = self
            .buffer
            .drain_sorted()
            .into_iter()
            .filter_map(|mut entry| entry.commit(owner))
            .collect();
        self.status = TransactionStatus::Committed;

        let woken: usize = to_wake.into_iter().map(Listeners::open_all).sum();
        debug!("transaction {} committed, woke {} listeners", self.id, woken);
        self.notify(TransactionEvent::PostCommit);
        Ok(())
    }

    /// Aborts the transaction, releasing every lock and discarding all local changes.
    ///
    /// Aborting an aborted transaction does nothing.
    ///
    /// # Errors
    ///
    /// `ThothError::DeadTransaction` if the transaction already committed.
    pub fn abort(&mut self) -> Result<()> {
        match self.status {
            TransactionStatus::Aborted => Ok(()),
            TransactionStatus::Committed => Err(ThothError::DeadTransaction {
                id: self.id,
                status: self.status,
            }),
            TransactionStatus::Active | TransactionStatus::Prepared => {
                self.abort_internal();
                Ok(())
            }
        }
    }

    pub(crate) fn abort_internal(&mut self) {
        if !self.status.is_alive() {
            return;
        }
        let owner = self.id;
        for mut entry in self.buffer.drain_sorted() {
            entry.abort(owner);
        }
        self.status = TransactionStatus::Aborted;
        debug!("transaction {} aborted", self.id);
        self.notify(TransactionEvent::PostAbort);
    }

    /// Registers `latch` on every cell this transaction read and aborts the transaction.
    ///
    /// The latch opens as soon as one of those cells gets a new committed value; if one
    /// already has, it is opened immediately.
    ///
    /// # Errors
    ///
    /// * `ThothError::NoBlockingAllowed` if the configuration forbids blocking.
    /// * `ThothError::NoRetryPossible` if nothing was read, reads are not tracked, or no
    ///   opened cell can be waited on.
    ///
    /// The transaction is aborted in every case.
    pub fn register_retry_latch(&mut self, latch: &Arc<RetryLatch>) -> Result<()> {
        self.check_open_allowed()?;

        if !self.config.blocking_allowed {
            self.abort_internal();
            return Err(ThothError::NoBlockingAllowed { id: self.id });
        }
        if !self.config.track_reads || self.buffer.is_empty() {
            self.abort_internal();
            return Err(ThothError::NoRetryPossible { id: self.id });
        }

        let era = latch.era();
        let mut registered = false;
        for entry in self.buffer.iter().filter(|entry| entry.is_tracked()) {
            match entry.register_change_listener(latch, era) {
                Registration::None => {}
                Registration::Registered | Registration::NotNeeded => registered = true,
            }
        }
        self.abort_internal();

        if registered {
            Ok(())
        } else {
            Err(ThothError::NoRetryPossible { id: self.id })
        }
    }

    fn reset(&mut self, kind: TxnBufferKind) {
        self.abort_internal();
        self.buffer = TxnBuffer::new(kind);
        self.status = TransactionStatus::Active;
        self.local_conflict_counter
            .reset(self.stm.global_conflict_counter());
        self.has_updates = false;
        self.abort_only = false;
        self.listeners.clear();
    }

    /// Resets the transaction for another attempt and counts the attempt.
    ///
    /// Returns `false`, without resetting, once `max_retries` attempts were made.
    pub fn soft_reset(&mut self) -> bool {
        if self.attempt >= self.config.max_retries {
            return false;
        }
        self.reset(self.buffer.kind());
        self.attempt += 1;
        true
    }

    /// Resets the transaction as if it was just started.
    pub fn restart(&mut self) {
        self.reset(self.buffer.kind());
        self.attempt = 1;
        self.remaining_timeout = self.config.timeout;
    }

    /// Resets without counting an attempt, optionally with a different table.
    pub(crate) fn reinit(&mut self, kind: TxnBufferKind) {
        self.reset(kind);
    }
}

impl Drop for Transaction {
    fn drop(&mut self) {
        self.abort_internal();
    }
}

impl fmt::Debug for Transaction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Transaction")
            .field("id", &self.id)
            .field("family", &self.config.family_name)
            .field("status", &self.status)
            .field("attempt", &self.attempt)
            .field("read_version", &self.read_version())
            .field("buffer_kind", &self.buffer.kind())
            .field("opened", &self.buffer.len())
            .field("has_updates", &self.has_updates)
            .finish()
    }
}
