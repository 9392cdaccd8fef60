/// The opened-cell table of a transaction.
pub mod txn_buffer;
/// Immutable committed snapshots of cell values.
pub mod versioned_value;
