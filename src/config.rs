use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::conflict::backoff::BackoffPolicy;
use crate::errors::{Result, ThothError};
use crate::isolation::LockMode;
use crate::orec::{DEFAULT_READ_BIASED_THRESHOLD, MAX_READ_BIASED_THRESHOLD};
use crate::speculative::DEFAULT_MAX_ARRAY_TRANSACTION_SIZE;

/// Default number of spins on a locked orec before giving up.
pub const DEFAULT_SPIN_COUNT: usize = 8;

/// Default number of conflict retries an atomic block makes.
pub const DEFAULT_MAX_RETRIES: usize = 1000;

/// Configuration of the transactions started from one call site.
///
/// All fields have defaults, so a partial configuration can be deserialized:
///
/// ```no_run
/// use thoth::prelude::*;
///
/// let config: TransactionConfig = serde_json::from_str(r#"{ "readonly": true }"#).unwrap();
/// assert!(config.track_reads);
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct TransactionConfig {
    /// Name used in logs and errors.
    pub family_name: String,
    /// Rejects every write.
    pub readonly: bool,
    /// Keeps readonly snapshots attached to their cells so they can be revalidated and
    /// waited on. Disabling it makes reads cheaper but rules out blocking retry.
    pub track_reads: bool,
    /// Allows blocking retry.
    pub blocking_allowed: bool,
    /// Maximum number of attempts for conflicts; blocking retries don't count.
    pub max_retries: usize,
    /// Spins on a locked orec before reporting a conflict.
    pub spin_count: usize,
    /// Lock taken on every cell opened for reading.
    pub read_lock_mode: LockMode,
    /// Lock taken on every cell opened for writing.
    pub write_lock_mode: LockMode,
    /// Only publish writes whose value actually changed.
    pub dirty_check: bool,
    /// When `false`, cells that are only read get update-locked at commit so two
    /// transactions can't each commit based on what the other overwrote.
    pub write_skew_allowed: bool,
    /// Learn the transaction size at the call site.
    pub speculative_config_enabled: bool,
    /// Total time a transaction may spend blocked in retry.
    pub timeout: Option<Duration>,
    /// Delay between attempts that failed on a conflict.
    pub backoff_policy: BackoffPolicy,
}

impl Default for TransactionConfig {
    fn default() -> Self {
        Self {
            family_name: String::from("default"),
            readonly: false,
            track_reads: true,
            blocking_allowed: true,
            max_retries: DEFAULT_MAX_RETRIES,
            spin_count: DEFAULT_SPIN_COUNT,
            read_lock_mode: LockMode::None,
            write_lock_mode: LockMode::None,
            dirty_check: true,
            write_skew_allowed: true,
            speculative_config_enabled: true,
            timeout: None,
            backoff_policy: BackoffPolicy::default(),
        }
    }
}

impl TransactionConfig {
    pub fn with_family_name(mut self, family_name: impl Into<String>) -> Self {
        self.family_name = family_name.into();
        self
    }

    pub fn with_readonly(mut self, readonly: bool) -> Self {
        self.readonly = readonly;
        self
    }

    pub fn with_track_reads(mut self, track_reads: bool) -> Self {
        self.track_reads = track_reads;
        self
    }

    pub fn with_blocking_allowed(mut self, blocking_allowed: bool) -> Self {
        self.blocking_allowed = blocking_allowed;
        self
    }

    pub fn with_max_retries(mut self, max_retries: usize) -> Self {
        self.max_retries = max_retries;
        self
    }

    pub fn with_spin_count(mut self, spin_count: usize) -> Self {
        self.spin_count = spin_count;
        self
    }

    pub fn with_read_lock_mode(mut self, read_lock_mode: LockMode) -> Self {
        self.read_lock_mode = read_lock_mode;
        self
    }

    pub fn with_write_lock_mode(mut self, write_lock_mode: LockMode) -> Self {
        self.write_lock_mode = write_lock_mode;
        self
    }

    pub fn with_dirty_check(mut self, dirty_check: bool) -> Self {
        self.dirty_check = dirty_check;
        self
    }

    pub fn with_write_skew_allowed(mut self, write_skew_allowed: bool) -> Self {
        self.write_skew_allowed = write_skew_allowed;
        self
    }

    pub fn with_speculative_config_enabled(mut self, enabled: bool) -> Self {
        self.speculative_config_enabled = enabled;
        self
    }

    pub fn with_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn with_backoff_policy(mut self, backoff_policy: BackoffPolicy) -> Self {
        self.backoff_policy = backoff_policy;
        self
    }

    /// Checks the configuration for combinations that can't work.
    ///
    /// # Errors
    ///
    /// Returns `ThothError::InvalidConfig` if
    ///
    /// * `max_retries` is zero,
    /// * a readonly configuration asks for write locks,
    /// * the write lock mode is weaker than the read lock mode.
    pub fn validate(&self) -> Result<()> {
        if self.max_retries == 0 {
            return Err(ThothError::InvalidConfig(format!(
                "'{}': max_retries must be at least 1",
                self.family_name
            )));
        }
        if self.readonly && self.write_lock_mode.is_locked() {
            return Err(ThothError::InvalidConfig(format!(
                "'{}': a readonly transaction can't take write locks",
                self.family_name
            )));
        }
        if self.write_lock_mode < self.read_lock_mode {
            return Err(ThothError::InvalidConfig(format!(
                "'{}': write lock mode {:?} is weaker than read lock mode {:?}",
                self.family_name, self.write_lock_mode, self.read_lock_mode
            )));
        }
        Ok(())
    }
}

/// Configuration of an STM instance.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct StmConfig {
    /// Readonly departures after which an orec turns read-biased.
    pub read_biased_threshold: u32,
    /// Largest speculative size served by an array-backed transaction.
    pub max_array_transaction_size: usize,
    /// Used by [`crate::Thoth::start_transaction`] and [`crate::Thoth::atomically`].
    pub default_transaction: TransactionConfig,
}

impl Default for StmConfig {
    fn default() -> Self {
        Self {
            read_biased_threshold: DEFAULT_READ_BIASED_THRESHOLD,
            max_array_transaction_size: DEFAULT_MAX_ARRAY_TRANSACTION_SIZE,
            default_transaction: TransactionConfig::default(),
        }
    }
}

impl StmConfig {
    pub fn with_read_biased_threshold(mut self, threshold: u32) -> Self {
        self.read_biased_threshold = threshold;
        self
    }

    pub fn with_max_array_transaction_size(mut self, size: usize) -> Self {
        self.max_array_transaction_size = size;
        self
    }

    pub fn with_default_transaction(mut self, config: TransactionConfig) -> Self {
        self.default_transaction = config;
        self
    }

    pub fn validate(&self) -> Result<()> {
        if self.read_biased_threshold == 0 || self.read_biased_threshold > MAX_READ_BIASED_THRESHOLD {
            return Err(ThothError::InvalidConfig(format!(
                "read biased threshold must be in 1..={}",
                MAX_READ_BIASED_THRESHOLD
            )));
        }
        if self.max_array_transaction_size == 0 {
            return Err(ThothError::InvalidConfig(
                "max array transaction size must be at least 1".to_string(),
            ));
        }
        self.default_transaction.validate()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rejects_write_locks_in_readonly_config() {
        let config = TransactionConfig::default()
            .with_readonly(true)
            .with_write_lock_mode(LockMode::Update);
        assert!(matches!(config.validate(), Err(ThothError::InvalidConfig(_))));
    }

    #[test]
    fn rejects_write_lock_weaker_than_read_lock() {
        let config = TransactionConfig::default().with_read_lock_mode(LockMode::Commit);
        assert!(config.validate().is_err());
        assert!(config.with_write_lock_mode(LockMode::Commit).validate().is_ok());
    }

    #[test]
    fn deserializes_partial_config() {
        let config: StmConfig =
            serde_json::from_str(r#"{ "read_biased_threshold": 8, "default_transaction": { "max_retries": 5 } }"#)
                .unwrap();
        assert_eq!(config.read_biased_threshold, 8);
        assert_eq!(config.default_transaction.max_retries, 5);
        assert!(config.default_transaction.dirty_check);
        assert_eq!(config.max_array_transaction_size, DEFAULT_MAX_ARRAY_TRANSACTION_SIZE);
    }
}
