//! Thoth is a Software Transactional Memory for sharing mutable state between threads.
//!
//! Shared values live in [`TxnCell`]s. A [`Transaction`] opens cells, reads and writes
//! private snapshots of them and publishes its writes atomically on commit. Transactions
//! are usually run through an [`AtomicBlock`] (or [`Thoth::atomically`]), which retries
//! them on conflicts and blocks them on [`retry`] until a cell they read changes.
//!
//! ```no_run
//! use thoth::prelude::*;
//!
//! let stm = Thoth::new();
//! let counter = stm.new_cell(0_u64);
//!
//! stm.atomically(|tx| counter.alter(tx, |value| value + 1)).unwrap();
//! assert_eq!(counter.atomic_get().unwrap(), 1);
//! ```

pub mod atomic_block;
pub mod blocking;
pub mod cell;
pub mod config;
pub mod conflict;
pub mod data_store;
pub mod errors;
pub mod isolation;
pub mod orec;
pub mod speculative;
pub mod thoth;
pub mod tranlocal;
pub mod transaction;
pub mod twopc;
pub mod value;

// Re-export key types and structs for easier access
pub use atomic_block::AtomicBlock;
pub use blocking::RetryLatch;
pub use cell::TxnCell;
pub use config::{StmConfig, TransactionConfig};
pub use conflict::backoff::BackoffPolicy;
pub use conflict::detection::ConflictType;
pub use data_store::txn_buffer::TxnBufferKind;
pub use data_store::versioned_value::VersionedValue;
pub use errors::{Result, ThothError};
pub use isolation::LockMode;
pub use thoth::{Thoth, prelude, retry};
pub use tranlocal::{Tranlocal, TranlocalStatus};
pub use transaction::{Transaction, TransactionEvent, TransactionListener, TransactionStatus};
pub use twopc::{TwoPhaseCommitParticipant, commit_all};
pub use value::TxnValue;
