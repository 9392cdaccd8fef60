//! Common utilities for Thoth integration tests.
#![allow(dead_code)]

use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use thoth::{
    LockMode, StmConfig, Thoth, ThothError, TransactionConfig, TransactionEvent,
    TransactionListener, TxnCell,
};

/// Helper function to create a Thoth instance with the default configuration.
pub fn setup_thoth() -> Thoth {
    Thoth::new()
}

/// Helper function to create a Thoth instance whose atomic blocks never back off, so
/// contention tests don't sleep.
pub fn setup_thoth_without_backoff() -> Thoth {
    let config = StmConfig::default().with_default_transaction(no_backoff_config("default"));
    Thoth::with_config(config).unwrap()
}

/// A transaction configuration that retries conflicts right away.
pub fn no_backoff_config(family: &str) -> TransactionConfig {
    TransactionConfig::default()
        .with_family_name(family)
        .with_backoff_policy(thoth::BackoffPolicy::None)
        .with_max_retries(10_000)
}

/// A transaction configuration whose blocking retries give up after `timeout`.
pub fn timeout_config(family: &str, timeout: Duration) -> TransactionConfig {
    no_backoff_config(family).with_timeout(Some(timeout))
}

/// Reads a cell's committed value in a transaction of its own.
pub fn committed_value<T: thoth::TxnValue>(stm: &Thoth, cell: &TxnCell<T>) -> T {
    let mut tx = stm.start_transaction();
    let value = tx.open_for_read(cell, LockMode::None).unwrap().value().clone();
    tx.commit().unwrap();
    value
}

/// Asserts that `err` is a read conflict of the given kind.
pub fn assert_read_conflict(err: ThothError, expected: thoth::ConflictType) {
    match err {
        ThothError::ReadConflict(kind) if kind == expected => {}
        e => panic!("Expected ReadConflict({:?}), got {:?}", expected, e),
    }
}

/// A transaction listener that records every event it receives.
#[derive(Default)]
pub struct RecordingListener {
    events: Mutex<Vec<(u64, TransactionEvent)>>,
}

impl RecordingListener {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn events(&self) -> Vec<TransactionEvent> {
        self.events.lock().iter().map(|(_, event)| *event).collect()
    }

    pub fn transaction_ids(&self) -> Vec<u64> {
        self.events.lock().iter().map(|(id, _)| *id).collect()
    }
}

impl TransactionListener for RecordingListener {
    fn notify(&self, transaction_id: u64, event: TransactionEvent) {
        self.events.lock().push((transaction_id, event));
    }
}
