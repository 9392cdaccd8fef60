use ahash::AHashMap as HashMap;
use std::collections::hash_map::Entry as MapEntry;

use crate::tranlocal::OpenedCell;

/// An opened cell as stored in the transaction.
pub(crate) type Entry = Box<dyn OpenedCell>;

/// The representation a transaction uses for its opened cells.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TxnBufferKind {
    /// A single slot.
    Mono,
    /// A flat array with a fixed capacity, searched linearly.
    Array(usize),
    /// A growable hash map keyed by cell id.
    Map,
}

/// The opened-cell table of a transaction.
///
/// Fixed-capacity variants refuse inserts once full. The transaction then aborts with a
/// speculative configuration failure and its call site retries with a larger variant.
pub(crate) enum TxnBuffer {
    Mono(Option<Entry>),
    Array { entries: Vec<Entry>, capacity: usize },
    Map(HashMap<u64, Entry>),
}

impl TxnBuffer {
    pub fn new(kind: TxnBufferKind) -> Self {
        match kind {
            TxnBufferKind::Mono => TxnBuffer::Mono(None),
            TxnBufferKind::Array(capacity) => TxnBuffer::Array {
                entries: Vec::with_capacity(capacity),
                capacity,
            },
            TxnBufferKind::Map => TxnBuffer::Map(HashMap::new()),
        }
    }

    pub fn kind(&self) -> TxnBufferKind {
        match self {
            TxnBuffer::Mono(_) => TxnBufferKind::Mono,
            TxnBuffer::Array { capacity, .. } => TxnBufferKind::Array(*capacity),
            TxnBuffer::Map(_) => TxnBufferKind::Map,
        }
    }

    pub fn len(&self) -> usize {
        match self {
            TxnBuffer::Mono(slot) => usize::from(slot.is_some()),
            TxnBuffer::Array { entries, .. } => entries.len(),
            TxnBuffer::Map(map) => map.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Returns `true` if one more cell can be opened.
    pub fn has_room(&self) -> bool {
        match self {
            TxnBuffer::Mono(slot) => slot.is_none(),
            TxnBuffer::Array { entries, capacity } => entries.len() < *capacity,
            TxnBuffer::Map(_) => true,
        }
    }

    pub fn contains(&self, cell_id: u64) -> bool {
        self.get(cell_id).is_some()
    }

    pub fn get(&self, cell_id: u64) -> Option<&Entry> {
        match self {
            TxnBuffer::Mono(slot) => slot.as_ref().filter(|entry| entry.cell_id() == cell_id),
            TxnBuffer::Array { entries, .. } => {
                entries.iter().find(|entry| entry.cell_id() == cell_id)
            }
            TxnBuffer::Map(map) => map.get(&cell_id),
        }
    }

    pub fn get_mut(&mut self, cell_id: u64) -> Option<&mut Entry> {
        match self {
            TxnBuffer::Mono(slot) => slot.as_mut().filter(|entry| entry.cell_id() == cell_id),
            TxnBuffer::Array { entries, .. } => {
                entries.iter_mut().find(|entry| entry.cell_id() == cell_id)
            }
            TxnBuffer::Map(map) => map.get_mut(&cell_id),
        }
    }

    /// Stores a newly opened cell.
    ///
    /// Hands the entry back if the table is full or the cell is already present.
    pub fn insert(&mut self, entry: Entry) -> Result<(), Entry> {
        if !self.has_room() || self.contains(entry.cell_id()) {
            return Err(entry);
        }
        match self {
            TxnBuffer::Mono(slot) => {
                *slot = Some(entry);
                Ok(())
            }
            TxnBuffer::Array { entries, .. } => {
                entries.push(entry);
                Ok(())
            }
            TxnBuffer::Map(map) => match map.entry(entry.cell_id()) {
                MapEntry::Vacant(vacant) => {
                    vacant.insert(entry);
                    Ok(())
                }
                MapEntry::Occupied(_) => Err(entry),
            },
        }
    }

    pub fn iter(&self) -> Box<dyn Iterator<Item = &Entry> + '_> {
        match self {
            TxnBuffer::Mono(slot) => Box::new(slot.iter()),
            TxnBuffer::Array { entries, .. } => Box::new(entries.iter()),
            TxnBuffer::Map(map) => Box::new(map.values()),
        }
    }

    /// Mutable access to every entry, ordered by cell id.
    ///
    /// Commit acquires locks in this order.
    pub fn sorted_mut(&mut self) -> Vec<&mut Entry> {
        let mut sorted: Vec<&mut Entry> = match self {
            TxnBuffer::Mono(slot) => slot.iter_mut().collect(),
            TxnBuffer::Array { entries, .. } => entries.iter_mut().collect(),
            TxnBuffer::Map(map) => map.values_mut().collect(),
        };
        sorted.sort_unstable_by_key(|entry| entry.cell_id());
        sorted
    }

    /// Removes every entry, ordered by cell id.
    pub fn drain_sorted(&mut self) -> Vec<Entry> {
        let mut drained: Vec<Entry> = match self {
            TxnBuffer::Mono(slot) => slot.take().into_iter().collect(),
            TxnBuffer::Array { entries, .. } => entries.drain(..).collect(),
            TxnBuffer::Map(map) => map.drain().map(|(_, entry)| entry).collect(),
        };
        drained.sort_unstable_by_key(|entry| entry.cell_id());
        drained
    }
}
