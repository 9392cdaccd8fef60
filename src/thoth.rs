use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use log::info;

use crate::atomic_block::AtomicBlock;
use crate::cell::TxnCell;
use crate::config::{StmConfig, TransactionConfig};
use crate::conflict::counter::GlobalConflictCounter;
use crate::data_store::txn_buffer::TxnBufferKind;
use crate::errors::{Result, ThothError};
use crate::speculative::SpeculativeSize;
use crate::transaction::Transaction;
use crate::value::TxnValue;

/// Thoth Prelude
pub mod prelude {
    pub use crate::atomic_block::*;
    pub use crate::blocking::*;
    pub use crate::cell::*;
    pub use crate::config::*;
    pub use crate::conflict::backoff::*;
    pub use crate::conflict::detection::*;
    pub use crate::data_store::txn_buffer::TxnBufferKind;
    pub use crate::data_store::versioned_value::*;
    pub use crate::errors::*;
    pub use crate::isolation::*;
    pub use crate::orec::*;
    pub use crate::thoth::{Thoth, retry};
    pub use crate::tranlocal::{CommutingFunction, DirtyState, Tranlocal, TranlocalStatus};
    pub use crate::transaction::*;
    pub use crate::twopc::*;
    pub use crate::value::TxnValue;
}

/// State shared by an STM instance, its cells and its transactions.
#[derive(Debug)]
pub(crate) struct StmInner {
    config: StmConfig,
    global_conflict_counter: GlobalConflictCounter,
    transaction_ids: AtomicU64,
    cell_ids: AtomicU64,
    default_speculative: Arc<SpeculativeSize>,
}

impl StmInner {
    pub fn config(&self) -> &StmConfig {
        &self.config
    }

    pub fn global_conflict_counter(&self) -> &GlobalConflictCounter {
        &self.global_conflict_counter
    }

    pub fn next_transaction_id(&self) -> u64 {
        self.transaction_ids.fetch_add(1, Ordering::SeqCst)
    }

    pub fn next_cell_id(&self) -> u64 {
        self.cell_ids.fetch_add(1, Ordering::SeqCst)
    }
}

/// The main entry point for the Thoth Software Transactional Memory system.
///
/// A `Thoth` instance owns the global conflict counter and hands out cells and
/// transactions. Cells and transactions of different instances can't be mixed. Cloning
/// gives another handle to the same instance.
#[derive(Debug, Clone)]
pub struct Thoth {
    inner: Arc<StmInner>,
}

impl Thoth {
    /// Creates a new STM instance with the default configuration.
    pub fn new() -> Self {
        Self::build(StmConfig::default())
    }

    /// Creates a new STM instance.
    ///
    /// # Errors
    ///
    /// `ThothError::InvalidConfig` if the configuration doesn't validate.
    pub fn with_config(config: StmConfig) -> Result<Self> {
        config.validate()?;
        Ok(Self::build(config))
    }

    fn build(config: StmConfig) -> Self {
        info!(
            "starting STM instance (read biased threshold {}, max array size {})",
            config.read_biased_threshold, config.max_array_transaction_size
        );
        let default_speculative = Arc::new(SpeculativeSize::new(config.max_array_transaction_size));
        Self {
            inner: Arc::new(StmInner {
                config,
                global_conflict_counter: GlobalConflictCounter::new(),
                transaction_ids: AtomicU64::new(1),
                cell_ids: AtomicU64::new(1),
                default_speculative,
            }),
        }
    }

    pub fn config(&self) -> &StmConfig {
        self.inner.config()
    }

    /// Creates a committed cell holding `initial`, outside of any transaction.
    pub fn new_cell<T: TxnValue>(&self, initial: T) -> TxnCell<T> {
        TxnCell::new_committed(Arc::clone(&self.inner), self.inner.next_cell_id(), initial)
    }

    /// Starts a transaction with the default configuration.
    ///
    /// Transactions started directly are never resized, so they use a growable table.
    pub fn start_transaction(&self) -> Transaction {
        Transaction::new(
            self.inner.next_transaction_id(),
            Arc::clone(&self.inner),
            Arc::new(self.inner.config.default_transaction.clone()),
            TxnBufferKind::Map,
        )
    }

    /// Starts a transaction with the given configuration.
    ///
    /// # Errors
    ///
    /// `ThothError::InvalidConfig` if the configuration doesn't validate.
    pub fn start_transaction_with(&self, config: TransactionConfig) -> Result<Transaction> {
        config.validate()?;
        Ok(Transaction::new(
            self.inner.next_transaction_id(),
            Arc::clone(&self.inner),
            Arc::new(config),
            TxnBufferKind::Map,
        ))
    }

    /// Creates a call site running transactions with `config`.
    ///
    /// # Errors
    ///
    /// `ThothError::InvalidConfig` if the configuration doesn't validate.
    pub fn atomic_block(&self, config: TransactionConfig) -> Result<AtomicBlock> {
        config.validate()?;
        Ok(AtomicBlock::new(Arc::clone(&self.inner), config))
    }

    /// Runs `body` in the instance's default atomic block.
    ///
    /// See [`AtomicBlock::execute`].
    pub fn atomically<R, F>(&self, body: F) -> Result<R>
    where
        F: FnMut(&mut Transaction) -> Result<R>,
    {
        AtomicBlock::with_speculative_size(
            Arc::clone(&self.inner),
            self.inner.config.default_transaction.clone(),
            Arc::clone(&self.inner.default_speculative),
        )
        .execute(body)
    }

    /// The current value of the global conflict counter.
    pub fn global_conflict_count(&self) -> u64 {
        self.inner.global_conflict_counter.count()
    }
}

impl Default for Thoth {
    fn default() -> Self {
        Self::new()
    }
}

/// Aborts the current attempt and blocks it until a cell it read changes.
///
/// Only meaningful inside [`AtomicBlock::execute`] or [`Thoth::atomically`].
///
/// ```no_run
/// use thoth::prelude::*;
///
/// let stm = Thoth::new();
/// let queue = stm.new_cell(Vec::<u32>::new());
///
/// let item = stm
///     .atomically(|tx| {
///         let mut items = queue.get(tx)?;
///         match items.pop() {
///             Some(item) => {
///                 queue.set(tx, items)?;
///                 Ok(item)
///             }
///             None => retry(),
///         }
///     })
///     .unwrap();
/// # let _ = item;
/// ```
pub fn retry<T>() -> Result<T> {
    Err(ThothError::Retry)
}
