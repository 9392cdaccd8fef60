use std::fmt;

use serde::{Deserialize, Serialize};

use crate::tranlocal::OpenedCell;

/// Represents the reason a read could not be served consistently.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ConflictType {
    /// The cell was created by a transaction that has not committed yet.
    Uncommitted,
    /// The cell holds a value committed after the transaction's read version, and the
    /// transaction's earlier reads could not be revalidated against it.
    TooOldVersion,
    /// Another transaction holds a lock that excludes this access.
    Locked,
}

impl fmt::Display for ConflictType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConflictType::Uncommitted => write!(f, "cell is not committed yet"),
            ConflictType::TooOldVersion => write!(f, "read version is too old"),
            ConflictType::Locked => write!(f, "cell is locked by another transaction"),
        }
    }
}

/// Checks the opened cells of a transaction for reads that no longer match the committed
/// state.
///
/// Cells locked by `owner`, constructed cells and pending commutes can't be in conflict;
/// every other snapshot conflicts when its cell moved to a newer version or is being
/// published under another transaction's commit lock.
///
/// # Returns
///
/// `true` as soon as one conflicting snapshot is found.
pub(crate) fn detect_read_conflicts<'a, I>(owner: u64, entries: I) -> bool
where
    I: IntoIterator<Item = &'a Box<dyn OpenedCell>>,
{
    entries
        .into_iter()
        .any(|entry| entry.has_read_conflict(owner))
}
