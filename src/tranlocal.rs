use std::any::Any;
use std::fmt;
use std::sync::Arc;

use crate::blocking::{Listeners, Registration, RetryLatch};
use crate::cell::{CellInner, Loaded};
use crate::conflict::detection::ConflictType;
use crate::data_store::versioned_value::VersionedValue;
use crate::isolation::LockMode;
use crate::value::TxnValue;

/// A deferred update applied to the committed value at commit time.
pub type CommutingFunction<T> = Box<dyn FnOnce(T) -> T + Send>;

/// How a transaction uses an opened cell.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TranlocalStatus {
    /// Opened for reading only.
    Readonly,
    /// Opened for writing; the value is a private copy.
    Write,
    /// The cell was created by this transaction and has never been committed.
    Construction,
    /// Only commuting functions were registered; no value was read yet.
    Commuting,
}

/// Whether a write snapshot differs from the value it was read from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DirtyState {
    /// Not calculated yet.
    Unknown,
    True,
    False,
}

/// A transaction-local snapshot of one cell.
///
/// The snapshot keeps the committed [`VersionedValue`] it was derived from. For readonly
/// snapshots that committed value is what [`Tranlocal::value`] returns; opening for write
/// takes a private copy. The committed value doubles as the pre-transaction value the
/// dirty check compares against.
pub struct Tranlocal<T> {
    cell: Arc<CellInner<T>>,
    value: Option<T>,
    read: Option<Arc<VersionedValue<T>>>,
    version: u64,
    status: TranlocalStatus,
    dirty: DirtyState,
    lock_mode: LockMode,
    has_depart_obligation: bool,
    tracked: bool,
    commuting_functions: Vec<CommutingFunction<T>>,
}

impl<T: TxnValue> Tranlocal<T> {
    pub(crate) fn for_read(cell: Arc<CellInner<T>>, loaded: Loaded<T>, tracked: bool) -> Self {
        Self {
            cell,
            value: None,
            version: loaded.read.version(),
            read: Some(loaded.read),
            status: TranlocalStatus::Readonly,
            dirty: DirtyState::False,
            lock_mode: loaded.lock_mode,
            has_depart_obligation: loaded.has_depart_obligation,
            tracked,
            commuting_functions: Vec::new(),
        }
    }

    pub(crate) fn for_write(cell: Arc<CellInner<T>>, loaded: Loaded<T>) -> Self {
        let mut tranlocal = Self::for_read(cell, loaded, true);
        tranlocal.upgrade_to_write();
        tranlocal
    }

    pub(crate) fn for_construction(cell: Arc<CellInner<T>>, value: T) -> Self {
        Self {
            cell,
            value: Some(value),
            read: None,
            version: 0,
            status: TranlocalStatus::Construction,
            dirty: DirtyState::True,
            lock_mode: LockMode::Commit,
            has_depart_obligation: true,
            tracked: true,
            commuting_functions: Vec::new(),
        }
    }

    pub(crate) fn for_commute(cell: Arc<CellInner<T>>, function: CommutingFunction<T>) -> Self {
        Self {
            cell,
            value: None,
            read: None,
            version: 0,
            status: TranlocalStatus::Commuting,
            dirty: DirtyState::Unknown,
            lock_mode: LockMode::None,
            has_depart_obligation: false,
            tracked: true,
            commuting_functions: vec![function],
        }
    }

    /// The transaction-local value.
    pub fn value(&self) -> &T {
        match (&self.value, &self.read) {
            (Some(value), _) => value,
            (None, Some(read)) => read.value(),
            (None, None) => unreachable!("commuting snapshots are evaluated before they are handed out"),
        }
    }

    /// Mutable access to the transaction-local value.
    pub fn value_mut(&mut self) -> &mut T {
        if self.value.is_none() {
            self.upgrade_to_write();
        }
        self.dirty = DirtyState::Unknown;
        match self.value.as_mut() {
            Some(value) => value,
            None => unreachable!("commuting snapshots are evaluated before they are handed out"),
        }
    }

    /// Replaces the transaction-local value.
    pub fn set_value(&mut self, value: T) {
        if self.status == TranlocalStatus::Readonly {
            self.status = TranlocalStatus::Write;
        }
        self.value = Some(value);
        self.dirty = DirtyState::Unknown;
    }

    /// The committed value this snapshot was derived from, if any.
    pub fn old_value(&self) -> Option<&T> {
        self.read.as_deref().map(VersionedValue::value)
    }

    /// The committed version of the cell this snapshot was read from, 0 when there is none.
    pub fn version(&self) -> u64 {
        self.version
    }

    pub fn status(&self) -> TranlocalStatus {
        self.status
    }

    pub fn dirty_state(&self) -> DirtyState {
        self.dirty
    }

    pub fn lock_mode(&self) -> LockMode {
        self.lock_mode
    }

    pub fn has_depart_obligation(&self) -> bool {
        self.has_depart_obligation
    }

    pub fn is_tracked(&self) -> bool {
        self.tracked
    }

    pub fn cell_id(&self) -> u64 {
        self.cell.id()
    }

    /// Number of commuting functions still waiting to be applied.
    pub fn pending_commutes(&self) -> usize {
        self.commuting_functions.len()
    }

    /// Compares the local value with the committed value it was read from, using
    /// [`TxnValue::same_value`].
    ///
    /// A readonly snapshot is never dirty, a constructed one always is.
    pub fn calculate_is_dirty(&mut self) -> bool {
        let dirty = match self.status {
            TranlocalStatus::Readonly => false,
            TranlocalStatus::Construction => true,
            TranlocalStatus::Commuting => return false,
            TranlocalStatus::Write => match (&self.value, &self.read) {
                (Some(value), Some(read)) => !value.same_value(read.value()),
                (Some(_), None) => true,
                (None, _) => false,
            },
        };
        self.dirty = if dirty {
            DirtyState::True
        } else {
            DirtyState::False
        };
        dirty
    }

    pub(crate) fn mark_dirty(&mut self) {
        self.dirty = DirtyState::True;
    }

    pub(crate) fn upgrade_to_write(&mut self) {
        if self.status != TranlocalStatus::Readonly {
            return;
        }
        self.value = self.read.as_ref().map(|read| read.value().clone());
        self.status = TranlocalStatus::Write;
        self.dirty = DirtyState::Unknown;
    }

    /// Appends a commuting function. Only valid while the status is `Commuting`.
    pub(crate) fn add_commuting_function(&mut self, function: CommutingFunction<T>) {
        debug_assert_eq!(self.status, TranlocalStatus::Commuting);
        self.commuting_functions.push(function);
    }

    /// Applies a function directly to the local value of a snapshot that already has one.
    pub(crate) fn apply(&mut self, function: CommutingFunction<T>) {
        self.upgrade_to_write();
        if let Some(value) = self.value.take() {
            self.value = Some(function(value));
        }
        self.dirty = DirtyState::Unknown;
    }

    /// Folds the pending commuting functions over the freshly loaded committed value, in
    /// registration order, and turns this snapshot into a plain write.
    pub(crate) fn evaluate_commuting_functions(&mut self, loaded: Loaded<T>) {
        debug_assert_eq!(self.status, TranlocalStatus::Commuting);
        let value = self
            .commuting_functions
            .drain(..)
            .fold(loaded.read.value().clone(), |value, function| function(value));

        self.value = Some(value);
        self.version = loaded.read.version();
        self.read = Some(loaded.read);
        self.lock_mode = loaded.lock_mode;
        self.has_depart_obligation = loaded.has_depart_obligation;
        self.status = TranlocalStatus::Write;
        self.dirty = DirtyState::Unknown;
    }

    pub(crate) fn set_lock_mode(&mut self, lock_mode: LockMode) {
        self.lock_mode = lock_mode;
    }

    pub(crate) fn set_depart_obligation(&mut self, has_depart_obligation: bool) {
        self.has_depart_obligation = has_depart_obligation;
    }

    pub(crate) fn take_value(&mut self) -> Option<T> {
        self.value.take()
    }

    /// Resets every field so the snapshot holds on to nothing.
    ///
    /// Called once the snapshot has been committed or aborted; afterwards it must be
    /// treated as uninitialised.
    pub fn prepare_for_pooling(&mut self) {
        self.value = None;
        self.read = None;
        self.version = 0;
        self.status = TranlocalStatus::Readonly;
        self.dirty = DirtyState::Unknown;
        self.lock_mode = LockMode::None;
        self.has_depart_obligation = false;
        self.tracked = true;
        self.commuting_functions.clear();
    }

    pub(crate) fn cell(&self) -> &Arc<CellInner<T>> {
        &self.cell
    }
}

impl<T: TxnValue + fmt::Debug> fmt::Debug for Tranlocal<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Tranlocal")
            .field("cell", &self.cell.id())
            .field("value", &self.value)
            .field("version", &self.version)
            .field("status", &self.status)
            .field("dirty", &self.dirty)
            .field("lock_mode", &self.lock_mode)
            .field("has_depart_obligation", &self.has_depart_obligation)
            .field("tracked", &self.tracked)
            .field("pending_commutes", &self.commuting_functions.len())
            .finish()
    }
}

/// The type-erased protocol a transaction drives over its opened cells.
pub(crate) trait OpenedCell: Send {
    fn cell_id(&self) -> u64;

    fn is_tracked(&self) -> bool;

    /// Returns `true` if the snapshot no longer matches the committed state.
    fn has_read_conflict(&self, owner: u64) -> bool;

    /// Commit steps one and two for this cell: evaluates pending commutes and commit-locks
    /// the cell if it is going to be published.
    fn prepare_dirty_update(
        &mut self,
        owner: u64,
        spin_count: usize,
        dirty_check: bool,
    ) -> Result<(), ConflictType>;

    /// Update-locks a cell that is only read, so no other transaction can commit a write
    /// to it before this one finishes.
    fn lock_for_validation(&mut self, owner: u64, spin_count: usize) -> bool;

    /// Publishes the snapshot if it is dirty and releases everything held on the cell.
    fn commit(&mut self, owner: u64) -> Option<Box<Listeners>>;

    /// Releases everything held on the cell without publishing.
    fn abort(&mut self, owner: u64);

    fn register_change_listener(&self, latch: &Arc<RetryLatch>, era: u64) -> Registration;

    fn as_any(&self) -> &dyn Any;

    fn as_any_mut(&mut self) -> &mut dyn Any;
}

impl<T: TxnValue> OpenedCell for Tranlocal<T> {
    fn cell_id(&self) -> u64 {
        self.cell.id()
    }

    fn is_tracked(&self) -> bool {
        self.tracked
    }

    fn has_read_conflict(&self, owner: u64) -> bool {
        self.cell.has_read_conflict(self, owner)
    }

    fn prepare_dirty_update(
        &mut self,
        owner: u64,
        spin_count: usize,
        dirty_check: bool,
    ) -> Result<(), ConflictType> {
        let cell = Arc::clone(&self.cell);
        match self.status {
            TranlocalStatus::Readonly | TranlocalStatus::Construction => Ok(()),
            TranlocalStatus::Commuting => {
                let loaded = cell.lock_and_load(spin_count, owner, LockMode::Commit, None)?;
                self.evaluate_commuting_functions(loaded);
                if !dirty_check {
                    self.mark_dirty();
                } else {
                    self.calculate_is_dirty();
                }
                Ok(())
            }
            TranlocalStatus::Write => {
                let dirty = if dirty_check {
                    self.calculate_is_dirty()
                } else {
                    self.mark_dirty();
                    true
                };
                if !dirty {
                    return Ok(());
                }
                if cell.try_lock_and_check_conflict(self, owner, spin_count, LockMode::Commit) {
                    Ok(())
                } else {
                    Err(cell.conflict_kind(owner))
                }
            }
        }
    }

    fn lock_for_validation(&mut self, owner: u64, spin_count: usize) -> bool {
        match self.status {
            TranlocalStatus::Construction | TranlocalStatus::Commuting => true,
            TranlocalStatus::Readonly | TranlocalStatus::Write => {
                if self.lock_mode.is_locked() {
                    return true;
                }
                let cell = Arc::clone(&self.cell);
                cell.try_lock_and_check_conflict(self, owner, spin_count, LockMode::Update)
            }
        }
    }

    fn commit(&mut self, owner: u64) -> Option<Box<Listeners>> {
        let cell = Arc::clone(&self.cell);
        let listeners = cell.commit_dirty(self, owner);
        self.prepare_for_pooling();
        listeners
    }

    fn abort(&mut self, owner: u64) {
        let cell = Arc::clone(&self.cell);
        cell.abort(self, owner);
        self.prepare_for_pooling();
    }

    fn register_change_listener(&self, latch: &Arc<RetryLatch>, era: u64) -> Registration {
        self.cell.register_change_listener(latch, self, era)
    }

    fn as_any(&self) -> &dyn Any {
        self
    }

    fn as_any_mut(&mut self) -> &mut dyn Any {
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::thoth::Thoth;

    #[test]
    fn dirty_check_compares_against_committed_value() {
        let stm = Thoth::new();
        let cell = stm.new_cell(10_i64);
        let loaded = cell.inner().load(0, u64::MAX).unwrap();

        let mut tranlocal = Tranlocal::for_write(Arc::clone(cell.inner()), loaded);
        assert!(!tranlocal.calculate_is_dirty());

        tranlocal.set_value(11);
        assert!(tranlocal.calculate_is_dirty());
        assert_eq!(tranlocal.dirty_state(), DirtyState::True);

        tranlocal.set_value(10);
        assert!(!tranlocal.calculate_is_dirty());

        tranlocal.abort(1);
        assert_eq!(cell.inner().orec().surplus(), 0);
    }

    #[test]
    fn readonly_snapshot_is_never_dirty() {
        let stm = Thoth::new();
        let cell = stm.new_cell(String::from("a"));
        let loaded = cell.inner().load(0, u64::MAX).unwrap();

        let mut tranlocal = Tranlocal::for_read(Arc::clone(cell.inner()), loaded, true);
        assert!(!tranlocal.calculate_is_dirty());
        assert_eq!(tranlocal.value(), "a");
        assert_eq!(tranlocal.old_value().map(String::as_str), Some("a"));
        tranlocal.abort(1);
    }

    #[test]
    fn commuting_functions_fold_in_registration_order() {
        let stm = Thoth::new();
        let cell = stm.new_cell(2_i64);

        let mut tranlocal = Tranlocal::for_commute(Arc::clone(cell.inner()), Box::new(|v| v + 3));
        tranlocal.add_commuting_function(Box::new(|v| v * 10));
        tranlocal.add_commuting_function(Box::new(|v| v - 1));
        assert_eq!(tranlocal.pending_commutes(), 3);

        let loaded = cell.inner().load(0, u64::MAX).unwrap();
        tranlocal.evaluate_commuting_functions(loaded);
        assert_eq!(*tranlocal.value(), 49);
        assert_eq!(tranlocal.status(), TranlocalStatus::Write);
        assert_eq!(tranlocal.pending_commutes(), 0);
        tranlocal.abort(1);
    }

    #[test]
    fn debug_output_names_the_cell() {
        let stm = Thoth::new();
        let cell = stm.new_cell(3_i32);
        let loaded = cell.inner().load(0, u64::MAX).unwrap();
        let mut tranlocal = Tranlocal::for_read(Arc::clone(cell.inner()), loaded, true);

        let debug = format!("{:?}", tranlocal);
        assert!(debug.starts_with("Tranlocal"));
        assert!(debug.contains(&format!("cell: {}", cell.id())));
        assert!(debug.contains("status: Readonly"));
        tranlocal.abort(1);
    }

    #[test]
    fn pooling_reset_drops_references() {
        let stm = Thoth::new();
        let cell = stm.new_cell(1_u8);
        let loaded = cell.inner().load(0, u64::MAX).unwrap();
        let mut tranlocal = Tranlocal::for_write(Arc::clone(cell.inner()), loaded);
        tranlocal.abort(1);

        assert_eq!(tranlocal.version(), 0);
        assert!(tranlocal.old_value().is_none());
        assert_eq!(tranlocal.lock_mode(), LockMode::None);
        assert!(!tranlocal.has_depart_obligation());
    }
}
