use std::sync::Arc;

use log::{debug, warn};

use crate::blocking::RetryLatch;
use crate::config::TransactionConfig;
use crate::data_store::txn_buffer::TxnBufferKind;
use crate::errors::{Result, ThothError};
use crate::speculative::SpeculativeSize;
use crate::thoth::StmInner;
use crate::transaction::{Transaction, TransactionStatus};

/// A reusable call site that runs closures as transactions until they commit.
///
/// An atomic block owns the configuration of its transactions and the speculative size
/// learned for them, so it should be created once per call site and reused.
///
/// # Examples
///
/// ```no_run
/// use thoth::prelude::*;
///
/// let stm = Thoth::new();
/// let from = stm.new_cell(100_i64);
/// let to = stm.new_cell(0_i64);
///
/// let transfer = stm
///     .atomic_block(TransactionConfig::default().with_family_name("transfer"))
///     .unwrap();
///
/// transfer
///     .execute(|tx| {
///         from.alter(tx, |balance| balance - 10)?;
///         to.alter(tx, |balance| balance + 10)?;
///         Ok(())
///     })
///     .unwrap();
/// ```
#[derive(Debug, Clone)]
pub struct AtomicBlock {
    stm: Arc<StmInner>,
    config: Arc<TransactionConfig>,
    speculative: Arc<SpeculativeSize>,
}

impl AtomicBlock {
    pub(crate) fn new(stm: Arc<StmInner>, config: TransactionConfig) -> Self {
        let speculative = Arc::new(SpeculativeSize::new(stm.config().max_array_transaction_size));
        Self::with_speculative_size(stm, config, speculative)
    }

    pub(crate) fn with_speculative_size(
        stm: Arc<StmInner>,
        config: TransactionConfig,
        speculative: Arc<SpeculativeSize>,
    ) -> Self {
        Self {
            stm,
            config: Arc::new(config),
            speculative,
        }
    }

    pub fn config(&self) -> &TransactionConfig {
        &self.config
    }

    /// The capacity hint learned so far.
    pub fn speculative_size(&self) -> &SpeculativeSize {
        &self.speculative
    }

    fn buffer_kind(&self) -> TxnBufferKind {
        if self.config.speculative_config_enabled {
            self.speculative.buffer_kind()
        } else {
            TxnBufferKind::Map
        }
    }

    /// Starts a transaction with this block's configuration and table size.
    pub fn start_transaction(&self) -> Transaction {
        Transaction::new(
            self.stm.next_transaction_id(),
            Arc::clone(&self.stm),
            Arc::clone(&self.config),
            self.buffer_kind(),
        )
    }

    /// Runs `body` in a transaction and commits it, retrying as needed.
    ///
    /// * Conflicts back off and rerun `body`, at most `max_retries` attempts in total.
    /// * `Err(ThothError::Retry)` blocks until a cell read by the attempt changes, then
    ///   reruns `body`. Blocking doesn't count as an attempt.
    /// * A speculative configuration failure grows the learned size and reruns `body`
    ///   right away.
    ///
    /// `body` may run several times, so it should only have transactional side effects.
    ///
    /// # Errors
    ///
    /// * `ThothError::TooManyRetries` once the attempts are used up.
    /// * `ThothError::RetryTimeout` if blocking takes longer than the configured timeout.
    /// * Any other error returned by `body` or the transaction, after aborting it.
    pub fn execute<R, F>(&self, mut body: F) -> Result<R>
    where
        F: FnMut(&mut Transaction) -> Result<R>,
    {
        let mut tx = self.start_transaction();
        let mut latch: Option<Arc<RetryLatch>> = None;

        loop {
            let err = match body(&mut tx).and_then(|value| tx.commit().map(|_| value)) {
                Ok(value) => return Ok(value),
                Err(err) => err,
            };

            match err {
                ThothError::Retry if tx.status() == TransactionStatus::Active => {
                    let latch = latch.get_or_insert_with(|| Arc::new(RetryLatch::new()));
                    self.wait_for_change(&mut tx, latch)?;
                    tx.reinit(self.buffer_kind());
                }
                ThothError::SpeculativeConfigurationFailure { required }
                    if self.config.speculative_config_enabled =>
                {
                    self.speculative.signal_too_small(required);
                    tx.reinit(self.buffer_kind());
                }
                err if err.is_conflict() => {
                    debug!(
                        "'{}' attempt {} failed: {}",
                        self.config.family_name,
                        tx.attempt(),
                        err
                    );
                    tx.abort_internal();
                    self.config.backoff_policy.backoff(tx.attempt());
                    if !tx.soft_reset() {
                        warn!(
                            "'{}' gave up after {} attempts",
                            self.config.family_name,
                            tx.attempt()
                        );
                        return Err(ThothError::TooManyRetries {
                            family: self.config.family_name.clone(),
                            max_retries: self.config.max_retries,
                        });
                    }
                }
                err => {
                    tx.abort_internal();
                    return Err(err);
                }
            }
        }
    }

    fn wait_for_change(&self, tx: &mut Transaction, latch: &Arc<RetryLatch>) -> Result<()> {
        latch.reset();
        let era = latch.era();
        tx.register_retry_latch(latch)?;
        debug!(
            "'{}' transaction {} is waiting for a change",
            self.config.family_name,
            tx.id()
        );

        match tx.remaining_timeout() {
            None => {
                latch.await_open(era);
                Ok(())
            }
            Some(timeout) => match latch.try_await(era, timeout) {
                Some(remaining) => {
                    tx.set_remaining_timeout(Some(remaining));
                    Ok(())
                }
                None => {
                    tx.set_remaining_timeout(Some(std::time::Duration::ZERO));
                    Err(ThothError::RetryTimeout { id: tx.id() })
                }
            },
        }
    }
}
