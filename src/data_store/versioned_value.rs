/// Represents a committed value of a transactional cell.
///
/// Every commit that changes a cell publishes a fresh `VersionedValue`; the previous one
/// stays alive for as long as some transaction still holds it. Besides the value it
/// records:
///
/// * `version`, the per-cell commit version. It starts at 1 for the first committed value
///   and grows by exactly one for every dirty commit.
/// * `stamp`, the global conflict counter value produced by the commit that published it.
///   Transactions compare it against their read version to find out whether the value is
///   newer than their snapshot.
#[derive(Debug, Clone, PartialEq)]
pub struct VersionedValue<T> {
    value: T,
    version: u64,
    stamp: u64,
}

impl<T> VersionedValue<T> {
    /// Creates a new `VersionedValue`.
    ///
    /// # Arguments
    ///
    /// * `value` - The committed value.
    /// * `version` - The per-cell commit version.
    /// * `stamp` - The global conflict counter value the commit produced.
    ///
    /// # Examples
    ///
    /// ```no_run
    /// use thoth::prelude::*;
    ///
    /// let committed = VersionedValue::new(10_i64, 1, 0);
    /// println!("Created VersionedValue with version: {}", committed.version());
    /// ```
    pub fn new(value: T, version: u64, stamp: u64) -> Self {
        Self {
            value,
            version,
            stamp,
        }
    }

    /// Returns a reference to the committed value.
    pub fn value(&self) -> &T {
        &self.value
    }

    /// Returns the per-cell commit version.
    ///
    /// # Examples
    ///
    /// ```no_run
    /// use thoth::prelude::*;
    ///
    /// let committed = VersionedValue::new("hello".to_string(), 3, 17);
    /// assert_eq!(committed.version(), 3);
    /// ```
    pub fn version(&self) -> u64 {
        self.version
    }

    /// Returns the global conflict counter value at which this value became visible.
    pub fn stamp(&self) -> u64 {
        self.stamp
    }
}
