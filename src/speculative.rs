use std::sync::atomic::{AtomicUsize, Ordering};

use log::debug;

use crate::data_store::txn_buffer::TxnBufferKind;

/// Default largest table that is still kept as a flat array.
pub const DEFAULT_MAX_ARRAY_TRANSACTION_SIZE: usize = 20;

/// Learned capacity hint shared by every transaction started from one call site.
///
/// It starts at a single cell. Whenever a transaction outgrows the table it was given, it
/// aborts with a speculative configuration failure and the call site grows the hint with
/// [`SpeculativeSize::signal_too_small`] before retrying. After a handful of failures the
/// hint covers the workload and later transactions never overflow again.
#[derive(Debug)]
pub struct SpeculativeSize {
    optimal: AtomicUsize,
    max_array_size: usize,
}

impl SpeculativeSize {
    pub fn new(max_array_size: usize) -> Self {
        Self {
            optimal: AtomicUsize::new(1),
            max_array_size: max_array_size.max(1),
        }
    }

    /// The current capacity hint.
    pub fn optimal_size(&self) -> usize {
        self.optimal.load(Ordering::SeqCst)
    }

    pub fn max_array_size(&self) -> usize {
        self.max_array_size
    }

    /// Grows the hint after a transaction needed room for `required` cells.
    ///
    /// The hint at least doubles, so the number of failures stays logarithmic in the size
    /// of the workload.
    ///
    /// # Returns
    ///
    /// The new capacity hint.
    pub fn signal_too_small(&self, required: usize) -> usize {
        let mut current = self.optimal.load(Ordering::SeqCst);
        loop {
            let next = current.saturating_mul(2).max(required);
            if next <= current {
                return current;
            }
            match self.optimal.compare_exchange_weak(
                current,
                next,
                Ordering::SeqCst,
                Ordering::SeqCst,
            ) {
                Ok(_) => {
                    debug!("speculative size grew from {} to {}", current, next);
                    return next;
                }
                Err(actual) => current = actual,
            }
        }
    }

    /// Picks the cheapest table that fits the current hint.
    pub fn buffer_kind(&self) -> TxnBufferKind {
        let size = self.optimal_size();
        if size <= 1 {
            TxnBufferKind::Mono
        } else if size <= self.max_array_size {
            TxnBufferKind::Array(size)
        } else {
            TxnBufferKind::Map
        }
    }
}

impl Default for SpeculativeSize {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_ARRAY_TRANSACTION_SIZE)
    }
}
