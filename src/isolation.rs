use serde::{Deserialize, Serialize};

/// Defines the lock strength a transaction takes on a cell.
///
/// Lock modes are ordered: `None < Update < Commit`. Asking for a weaker mode than the one
/// already held is a no-op, asking for a stronger one upgrades the lock.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum LockMode {
    /// **No lock (optimistic):**
    ///
    /// The cell is read optimistically and validated when the transaction commits. If the
    /// cell is written, the commit lock is only acquired during commit.
    #[default]
    None,
    /// **Update lock (ensure):**
    ///
    /// Other transactions can still read the cell, but no other transaction can lock it or
    /// commit a write to it until the holder commits or aborts. Holding an update lock on
    /// every read cell is what prevents write skew.
    Update,
    /// **Commit lock (privatize):**
    ///
    /// Excludes every concurrent access, including plain reads by other transactions. A
    /// committing transaction holds this lock on all of its dirty cells while publishing.
    Commit,
}

impl LockMode {
    pub(crate) fn to_bits(self) -> u64 {
        match self {
            LockMode::None => 0,
            LockMode::Update => 1,
            LockMode::Commit => 2,
        }
    }

    pub(crate) fn from_bits(bits: u64) -> Self {
        match bits {
            0 => LockMode::None,
            1 => LockMode::Update,
            _ => LockMode::Commit,
        }
    }

    /// Returns `true` if this mode holds any lock.
    pub fn is_locked(self) -> bool {
        self != LockMode::None
    }
}
