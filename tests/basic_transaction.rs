// Declare the common module *within this test crate*
mod common;

use std::sync::Arc;

use common::{RecordingListener, assert_read_conflict, committed_value, setup_thoth};
use thoth::{
    ConflictType, LockMode, ThothError, TransactionConfig, TransactionEvent, TransactionStatus,
    TranlocalStatus, commit_all,
};

#[test]
fn test_simple_write_and_commit() {
    let stm = setup_thoth();
    let cell = stm.new_cell(0_i64);
    let counter_before = stm.global_conflict_count();

    let mut tx = stm.start_transaction();
    let tranlocal = tx.open_for_write(&cell, LockMode::None).unwrap();
    assert_eq!(*tranlocal.value(), 0);
    tranlocal.set_value(5);
    tx.commit().unwrap();

    assert_eq!(tx.status(), TransactionStatus::Committed);
    assert_eq!(cell.version(), 2);
    assert_eq!(stm.global_conflict_count(), counter_before + 1);
    assert_eq!(committed_value(&stm, &cell), 5);
    assert!(cell.is_free());
    assert_eq!(cell.orec().surplus(), 0);
}

#[test]
fn test_writing_the_same_value_publishes_nothing() {
    let stm = setup_thoth();
    let cell = stm.new_cell(String::from("same"));
    let counter_before = stm.global_conflict_count();

    let mut tx = stm.start_transaction();
    cell.set(&mut tx, String::from("same")).unwrap();
    assert!(tx.has_updates());
    tx.commit().unwrap();

    assert_eq!(cell.version(), 1);
    assert_eq!(stm.global_conflict_count(), counter_before);
    assert!(cell.is_free());
}

#[test]
fn test_disabled_dirty_check_publishes_every_write() {
    let stm = setup_thoth();
    let cell = stm.new_cell(3_u32);
    let config = TransactionConfig::default().with_dirty_check(false);

    let mut tx = stm.start_transaction_with(config).unwrap();
    cell.set(&mut tx, 3).unwrap();
    tx.commit().unwrap();

    assert_eq!(cell.version(), 2);
    assert_eq!(committed_value(&stm, &cell), 3);
}

#[test]
fn test_abort_discards_writes() {
    let stm = setup_thoth();
    let cell = stm.new_cell(vec![1, 2, 3]);

    let mut tx = stm.start_transaction();
    tx.open_for_write(&cell, LockMode::None)
        .unwrap()
        .value_mut()
        .push(4);
    assert_eq!(cell.get(&mut tx).unwrap(), vec![1, 2, 3, 4]);
    tx.abort().unwrap();

    assert_eq!(tx.status(), TransactionStatus::Aborted);
    assert_eq!(cell.version(), 1);
    assert_eq!(committed_value(&stm, &cell), vec![1, 2, 3]);
    assert_eq!(cell.orec().surplus(), 0);
}

#[test]
fn test_reads_are_repeatable_within_a_transaction() {
    let stm = setup_thoth();
    let cell = stm.new_cell(10_u64);

    let mut tx = stm.start_transaction();
    let first = cell.get(&mut tx).unwrap();
    let second = tx.get(&cell).map(|tranlocal| *tranlocal.value());
    assert_eq!(second, Some(first));
    assert_eq!(tx.opened_count(), 1);

    cell.set(&mut tx, 11).unwrap();
    assert_eq!(cell.get(&mut tx).unwrap(), 11);
    assert_eq!(tx.opened_count(), 1);
    tx.commit().unwrap();
}

#[test]
fn test_dead_transaction_semantics() {
    let stm = setup_thoth();
    let cell = stm.new_cell(1_i32);

    let mut committed = stm.start_transaction();
    cell.set(&mut committed, 2).unwrap();
    committed.commit().unwrap();
    // Committing twice is a no-op.
    committed.commit().unwrap();

    match committed.abort() {
        Err(ThothError::DeadTransaction { status, .. }) => {
            assert_eq!(status, TransactionStatus::Committed)
        }
        e => panic!("Expected DeadTransaction, got {:?}", e),
    }
    match cell.get(&mut committed) {
        Err(ThothError::DeadTransaction { .. }) => {}
        e => panic!("Expected DeadTransaction, got {:?}", e),
    }

    let mut aborted = stm.start_transaction();
    aborted.abort().unwrap();
    aborted.abort().unwrap();
    match aborted.commit() {
        Err(ThothError::DeadTransaction { status, .. }) => {
            assert_eq!(status, TransactionStatus::Aborted)
        }
        e => panic!("Expected DeadTransaction, got {:?}", e),
    }
    match aborted.open_for_write(&cell, LockMode::None) {
        Err(ThothError::DeadTransaction { .. }) => {}
        e => panic!("Expected DeadTransaction, got {:?}", e.map(|_| ())),
    }
    assert_eq!(aborted.status(), TransactionStatus::Aborted);
    assert_eq!(committed_value(&stm, &cell), 2);
}

#[test]
fn test_open_on_prepared_transaction_aborts_it() {
    let stm = setup_thoth();
    let cell = stm.new_cell(1_i32);
    let other = stm.new_cell(1_i32);

    let mut tx = stm.start_transaction();
    cell.set(&mut tx, 9).unwrap();
    tx.prepare().unwrap();
    assert_eq!(tx.status(), TransactionStatus::Prepared);
    assert!(cell.is_privatized_by(&tx));

    match tx.open_for_read(&other, LockMode::None) {
        Err(ThothError::PreparedTransaction { id }) => assert_eq!(id, tx.id()),
        e => panic!("Expected PreparedTransaction, got {:?}", e.map(|_| ())),
    }
    assert_eq!(tx.status(), TransactionStatus::Aborted);
    assert!(cell.is_free());
    assert_eq!(cell.version(), 1);
}

#[test]
fn test_prepare_then_commit() {
    let stm = setup_thoth();
    let cell = stm.new_cell(1_i32);

    let mut tx = stm.start_transaction();
    cell.set(&mut tx, 2).unwrap();
    tx.prepare().unwrap();
    // Preparing again is harmless.
    tx.prepare().unwrap();
    tx.commit().unwrap();

    assert_eq!(cell.version(), 2);
    assert!(cell.is_free());
}

#[test]
fn test_readonly_transaction_rejects_writes() {
    let stm = setup_thoth();
    let cell = stm.new_cell(0_u8);
    let config = TransactionConfig::default().with_readonly(true);

    let mut tx = stm.start_transaction_with(config).unwrap();
    assert_eq!(cell.get(&mut tx).unwrap(), 0);
    match cell.set(&mut tx, 1) {
        Err(ThothError::ReadonlyViolation { id }) => assert_eq!(id, tx.id()),
        e => panic!("Expected ReadonlyViolation, got {:?}", e),
    }
    assert_eq!(tx.status(), TransactionStatus::Aborted);
    assert_eq!(cell.orec().surplus(), 0);
}

#[test]
fn test_construction_commits_with_first_version() {
    let stm = setup_thoth();
    let counter_before = stm.global_conflict_count();

    let mut tx = stm.start_transaction();
    let cell = tx.new_cell(String::from("fresh")).unwrap();
    assert!(!cell.is_committed());
    assert!(cell.is_privatized_by(&tx));

    let tranlocal = cell.open_for_construction(&mut tx).unwrap();
    assert_eq!(tranlocal.status(), TranlocalStatus::Construction);
    tranlocal.value_mut().push_str("er");
    assert_eq!(cell.get(&mut tx).unwrap(), "fresher");
    tx.commit().unwrap();

    assert!(cell.is_committed());
    assert_eq!(cell.version(), 1);
    assert_eq!(stm.global_conflict_count(), counter_before + 1);
    assert_eq!(committed_value(&stm, &cell), "fresher");
    assert!(cell.is_free());
    assert_eq!(cell.orec().surplus(), 0);
}

#[test]
fn test_aborted_construction_stays_uncommitted() {
    let stm = setup_thoth();

    let mut creator = stm.start_transaction();
    let cell = creator.new_cell(42_u32).unwrap();

    let mut reader = stm.start_transaction();
    assert_read_conflict(
        cell.get(&mut reader).unwrap_err(),
        ConflictType::Uncommitted,
    );

    creator.abort().unwrap();
    assert!(!cell.is_committed());
    assert!(cell.is_free());

    let mut late_reader = stm.start_transaction();
    assert_read_conflict(
        cell.get(&mut late_reader).unwrap_err(),
        ConflictType::Uncommitted,
    );
}

#[test]
fn test_open_for_construction_rejects_committed_cells() {
    let stm = setup_thoth();
    let cell = stm.new_cell(0_i32);

    let mut tx = stm.start_transaction();
    match cell.open_for_construction(&mut tx) {
        Err(ThothError::BadReference(_)) => {}
        e => panic!("Expected BadReference, got {:?}", e.map(|_| ())),
    }
    assert_eq!(tx.status(), TransactionStatus::Aborted);
}

#[test]
fn test_cells_of_another_instance_are_rejected() {
    let stm = setup_thoth();
    let foreign = setup_thoth().new_cell(0_i32);

    let mut tx = stm.start_transaction();
    match foreign.get(&mut tx) {
        Err(ThothError::BadReference(_)) => {}
        e => panic!("Expected BadReference, got {:?}", e),
    }
}

#[test]
fn test_atomic_operations() {
    let stm = setup_thoth();
    let cell = stm.new_cell(10_i64);

    assert_eq!(cell.atomic_get().unwrap(), 10);
    cell.atomic_set(20).unwrap();
    assert_eq!(cell.atomic_get_and_set(30).unwrap(), 20);
    assert_eq!(cell.atomic_alter(|value| value * 2).unwrap(), 60);
    assert_eq!(cell.atomic_get().unwrap(), 60);
    assert_eq!(cell.version(), 4);
}

#[test]
fn test_ensure_blocks_other_writers_but_not_readers() {
    let stm = setup_thoth();
    let cell = stm.new_cell(1_i32);

    let mut owner = stm.start_transaction();
    cell.ensure(&mut owner).unwrap();
    assert!(cell.is_ensured());
    assert!(cell.is_ensured_by(&owner));
    assert!(!cell.is_privatized());

    let mut other = stm.start_transaction();
    assert!(cell.is_ensured_by_other(&other));
    assert_eq!(cell.get(&mut other).unwrap(), 1);
    cell.set(&mut other, 2).unwrap();
    match other.commit() {
        Err(ThothError::ReadWriteConflict { id }) => assert_eq!(id, other.id()),
        e => panic!("Expected ReadWriteConflict, got {:?}", e),
    }

    owner.commit().unwrap();
    assert!(cell.is_free());
    assert_eq!(cell.version(), 1);
}

#[test]
fn test_privatize_then_write_publishes_under_own_lock() {
    let stm = setup_thoth();
    let cell = stm.new_cell(1_i32);

    let mut tx = stm.start_transaction();
    cell.privatize(&mut tx).unwrap();
    assert!(cell.is_privatized_by(&tx));
    cell.set(&mut tx, 2).unwrap();
    assert_eq!(
        tx.get(&cell).map(|tranlocal| tranlocal.lock_mode()),
        Some(LockMode::Commit)
    );
    tx.commit().unwrap();

    assert!(cell.is_free());
    assert_eq!(cell.version(), 2);
    assert_eq!(cell.orec().surplus(), 0);
}

#[test]
fn test_configured_lock_modes_raise_open_locks() {
    let stm = setup_thoth();
    let cell = stm.new_cell(0_i32);
    let config = TransactionConfig::default()
        .with_read_lock_mode(LockMode::Update)
        .with_write_lock_mode(LockMode::Update);

    let mut tx = stm.start_transaction_with(config).unwrap();
    let tranlocal = tx.open_for_read(&cell, LockMode::None).unwrap();
    assert_eq!(tranlocal.lock_mode(), LockMode::Update);
    assert!(cell.is_ensured_by(&tx));
    tx.commit().unwrap();
    assert!(cell.is_free());
}

#[test]
fn test_commute_applies_at_commit() {
    let stm = setup_thoth();
    let cell = stm.new_cell(5_i64);

    let mut tx = stm.start_transaction();
    cell.commute(&mut tx, |value| value + 1).unwrap();
    cell.commute(&mut tx, |value| value * 3).unwrap();
    assert_eq!(tx.opened_count(), 1);
    // The cell was not read, so nobody holds anything on it yet.
    assert_eq!(cell.orec().surplus(), 0);
    tx.commit().unwrap();

    assert_eq!(committed_value(&stm, &cell), 18);
    assert_eq!(cell.version(), 2);
}

#[test]
fn test_reading_a_commuting_cell_flattens_it() {
    let stm = setup_thoth();
    let cell = stm.new_cell(1_i64);

    let mut tx = stm.start_transaction();
    cell.commute(&mut tx, |value| value + 10).unwrap();
    // Nothing was read yet, so there is no snapshot value to hand out.
    assert!(tx.get(&cell).is_none());

    let tranlocal = tx.open_for_read(&cell, LockMode::None).unwrap();
    assert_eq!(*tranlocal.value(), 11);
    assert_eq!(tranlocal.status(), TranlocalStatus::Write);
    assert_eq!(tranlocal.pending_commutes(), 0);

    // Commuting on an opened cell applies the function right away.
    cell.commute(&mut tx, |value| value * 2).unwrap();
    assert_eq!(cell.get(&mut tx).unwrap(), 22);
    tx.commit().unwrap();

    assert_eq!(committed_value(&stm, &cell), 22);
}

#[test]
fn test_commuting_cell_is_not_visible_before_it_is_read() {
    let stm = setup_thoth();
    let cell = stm.new_cell(1_i64);

    let mut tx = stm.start_transaction();
    cell.commute(&mut tx, |value| value + 1).unwrap();
    assert!(tx.get(&cell).is_none());
    tx.commit().unwrap();

    // After commit the cell is published with the commuted value.
    assert_eq!(committed_value(&stm, &cell), 2);
}

#[test]
fn test_commute_on_read_cell_takes_configured_write_lock() {
    let stm = setup_thoth();
    let cell = stm.new_cell(3_i64);
    let config = TransactionConfig::default().with_write_lock_mode(LockMode::Update);

    let mut tx = stm.start_transaction_with(config).unwrap();
    assert_eq!(cell.get(&mut tx).unwrap(), 3);
    assert!(cell.is_free());

    cell.commute(&mut tx, |value| value + 1).unwrap();
    assert!(cell.is_ensured_by(&tx));
    assert_eq!(
        tx.get(&cell).map(|tranlocal| (*tranlocal.value(), tranlocal.lock_mode())),
        Some((4, LockMode::Update))
    );

    let mut other = stm.start_transaction();
    cell.set(&mut other, 10).unwrap();
    match other.commit() {
        Err(ThothError::ReadWriteConflict { .. }) => {}
        e => panic!("Expected ReadWriteConflict, got {:?}", e),
    }

    tx.commit().unwrap();
    assert!(cell.is_free());
    assert_eq!(committed_value(&stm, &cell), 4);
}

#[test]
fn test_negative_zero_over_zero_is_published() {
    let stm = setup_thoth();
    let cell = stm.new_cell(0.0_f64);

    let mut tx = stm.start_transaction();
    cell.set(&mut tx, -0.0).unwrap();
    tx.commit().unwrap();

    assert_eq!(cell.version(), 2);
    assert!(committed_value(&stm, &cell).is_sign_negative());
}

#[test]
fn test_rewriting_nan_is_not_a_change() {
    let stm = setup_thoth();
    let cell = stm.new_cell(f64::NAN);
    let counter_before = stm.global_conflict_count();

    let mut tx = stm.start_transaction();
    let current = cell.get(&mut tx).unwrap();
    cell.set(&mut tx, current).unwrap();
    tx.commit().unwrap();

    assert_eq!(cell.version(), 1);
    assert_eq!(stm.global_conflict_count(), counter_before);
    assert!(committed_value(&stm, &cell).is_nan());
}

#[test]
fn test_get_and_set_and_get_and_alter() {
    let stm = setup_thoth();
    let cell = stm.new_cell(String::from("a"));

    let mut tx = stm.start_transaction();
    assert_eq!(cell.get_and_set(&mut tx, String::from("b")).unwrap(), "a");
    assert_eq!(
        cell.get_and_alter(&mut tx, |value| format!("{}c", value))
            .unwrap(),
        "b"
    );
    assert_eq!(cell.get(&mut tx).unwrap(), "bc");
    // Nothing is visible before commit.
    assert_eq!(cell.atomic_weak_get().as_deref(), Some("a"));
    tx.commit().unwrap();

    assert_eq!(committed_value(&stm, &cell), "bc");
    assert_eq!(cell.version(), 2);
}

#[test]
fn test_atomic_compare_and_set() {
    let stm = setup_thoth();
    let cell = stm.new_cell(10_i64);

    assert!(!cell.atomic_compare_and_set(&11, 20).unwrap());
    assert_eq!(cell.version(), 1);

    assert!(cell.atomic_compare_and_set(&10, 20).unwrap());
    assert_eq!(cell.atomic_get().unwrap(), 20);
    assert_eq!(cell.version(), 2);
    assert!(cell.is_free());
    assert_eq!(cell.orec().surplus(), 0);

    assert_eq!(cell.atomic_get_and_alter(|value| value + 5).unwrap(), 20);
    assert_eq!(cell.atomic_get().unwrap(), 25);
}

#[test]
fn test_atomic_weak_get_skips_the_orec() {
    let stm = setup_thoth();
    let cell = stm.new_cell(7_u32);

    let mut holder = stm.start_transaction();
    cell.privatize(&mut holder).unwrap();
    let surplus = cell.orec().surplus();

    // A commit lock keeps transactions out but not weak reads.
    assert_eq!(cell.atomic_weak_get(), Some(7));
    assert_eq!(cell.orec().surplus(), surplus);
    holder.abort().unwrap();

    let mut tx = stm.start_transaction();
    let constructed = tx.new_cell(1_u32).unwrap();
    assert_eq!(constructed.atomic_weak_get(), None);
    tx.commit().unwrap();
    assert_eq!(constructed.atomic_weak_get(), Some(1));
}

#[test]
fn test_abort_only_transaction_cannot_commit() {
    let stm = setup_thoth();
    let cell = stm.new_cell(0_i32);

    let mut tx = stm.start_transaction();
    cell.set(&mut tx, 1).unwrap();
    tx.set_abort_only().unwrap();
    assert!(tx.is_abort_only());
    match tx.commit() {
        Err(ThothError::ReadWriteConflict { .. }) => {}
        e => panic!("Expected ReadWriteConflict, got {:?}", e),
    }
    assert_eq!(tx.status(), TransactionStatus::Aborted);
    assert_eq!(cell.version(), 1);
}

#[test]
fn test_lifecycle_listeners() {
    let stm = setup_thoth();
    let cell = stm.new_cell(0_i32);

    let listener = RecordingListener::new();
    let mut tx = stm.start_transaction();
    tx.register_listener(listener.clone()).unwrap();
    cell.set(&mut tx, 1).unwrap();
    tx.commit().unwrap();
    assert_eq!(
        listener.events(),
        vec![TransactionEvent::PrePrepare, TransactionEvent::PostCommit]
    );
    assert!(listener.transaction_ids().iter().all(|id| *id == tx.id()));

    let aborted = RecordingListener::new();
    let mut tx = stm.start_transaction();
    tx.register_listener(aborted.clone()).unwrap();
    cell.set(&mut tx, 2).unwrap();
    tx.abort().unwrap();
    assert_eq!(aborted.events(), vec![TransactionEvent::PostAbort]);

    let closure_calls = Arc::new(parking_lot::Mutex::new(0));
    let calls = Arc::clone(&closure_calls);
    let mut tx = stm.start_transaction();
    tx.register_listener(Arc::new(move |_: u64, event: TransactionEvent| {
        if event == TransactionEvent::PostCommit {
            *calls.lock() += 1;
        }
    }))
    .unwrap();
    tx.commit().unwrap();
    assert_eq!(*closure_calls.lock(), 1);
}

#[test]
fn test_restart_and_soft_reset() {
    let stm = setup_thoth();
    let cell = stm.new_cell(0_i32);
    let config = TransactionConfig::default().with_max_retries(2);

    let mut tx = stm.start_transaction_with(config).unwrap();
    cell.set(&mut tx, 1).unwrap();
    assert!(tx.soft_reset());
    assert_eq!(tx.attempt(), 2);
    assert_eq!(tx.status(), TransactionStatus::Active);
    assert_eq!(tx.opened_count(), 0);
    assert!(!tx.has_updates());
    assert!(cell.is_free());

    assert!(!tx.soft_reset());
    assert_eq!(tx.attempt(), 2);

    tx.restart();
    assert_eq!(tx.attempt(), 1);
    cell.set(&mut tx, 3).unwrap();
    tx.commit().unwrap();
    assert_eq!(committed_value(&stm, &cell), 3);

    // A committed transaction can be restarted and reused.
    tx.restart();
    assert_eq!(cell.get(&mut tx).unwrap(), 3);
    tx.commit().unwrap();
}

#[test]
fn test_commit_all_commits_every_participant() {
    let stm = setup_thoth();
    let cell_a = stm.new_cell(1_u32);
    let cell_b = stm.new_cell(2_u32);

    let mut first = stm.start_transaction();
    cell_a.set(&mut first, 10).unwrap();
    let mut second = stm.start_transaction();
    cell_b.set(&mut second, 20).unwrap();

    commit_all(&mut [&mut first, &mut second]).unwrap();

    assert_eq!(first.status(), TransactionStatus::Committed);
    assert_eq!(second.status(), TransactionStatus::Committed);
    assert_eq!(committed_value(&stm, &cell_a), 10);
    assert_eq!(committed_value(&stm, &cell_b), 20);
}

#[test]
fn test_commit_all_aborts_every_participant_on_failure() {
    let stm = setup_thoth();
    let cell_a = stm.new_cell(1_u32);
    let cell_b = stm.new_cell(2_u32);

    let mut first = stm.start_transaction();
    cell_a.set(&mut first, 10).unwrap();
    let mut second = stm.start_transaction();
    cell_b.set(&mut second, 20).unwrap();

    // An interleaved commit makes the second participant's write stale.
    cell_b.atomic_set(99).unwrap();

    match commit_all(&mut [&mut first, &mut second]) {
        Err(ThothError::ReadWriteConflict { id }) => assert_eq!(id, second.id()),
        e => panic!("Expected ReadWriteConflict, got {:?}", e),
    }
    assert_eq!(first.status(), TransactionStatus::Aborted);
    assert_eq!(second.status(), TransactionStatus::Aborted);
    assert!(cell_a.is_free());
    assert_eq!(committed_value(&stm, &cell_a), 1);
    assert_eq!(committed_value(&stm, &cell_b), 99);
}
