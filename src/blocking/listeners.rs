use std::sync::Arc;

use crate::blocking::latch::RetryLatch;

/// Outcome of registering a latch on a cell.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Registration {
    /// Nothing to register against: the snapshot was a commute or a construction.
    None,
    /// The latch was appended to the cell's listener chain.
    Registered,
    /// The cell already moved past the snapshot; the latch was opened right away.
    NotNeeded,
}

/// A singly linked chain of `(latch, era)` pairs waiting for a cell to change.
#[derive(Debug)]
pub struct Listeners {
    latch: Arc<RetryLatch>,
    era: u64,
    next: Option<Box<Listeners>>,
}

impl Listeners {
    pub fn new(latch: Arc<RetryLatch>, era: u64, next: Option<Box<Listeners>>) -> Box<Self> {
        Box::new(Self { latch, era, next })
    }

    /// Opens every latch in the chain and consumes it.
    ///
    /// Returns the number of latches visited.
    pub fn open_all(self: Box<Self>) -> usize {
        let mut opened = 0;
        let mut current = Some(self);
        while let Some(mut node) = current {
            node.latch.open(node.era);
            opened += 1;
            current = node.next.take();
        }
        opened
    }

    /// Drops the registrations nobody can be woken through any more, keeping the order of
    /// the rest.
    ///
    /// A registration is dead once its latch opened, moved on to another era, or is held
    /// by nobody but the chain.
    pub fn prune(chain: Option<Box<Self>>) -> Option<Box<Self>> {
        let mut kept = Vec::new();
        let mut current = chain;
        while let Some(mut node) = current {
            current = node.next.take();
            if node.is_live() {
                kept.push(node);
            }
        }
        kept.into_iter().rev().fold(None, |next, mut node| {
            node.next = next;
            Some(node)
        })
    }

    fn is_live(&self) -> bool {
        Arc::strong_count(&self.latch) > 1 && self.latch.era() == self.era && !self.latch.is_open()
    }

    pub fn len(&self) -> usize {
        let mut len = 1;
        let mut current = self.next.as_deref();
        while let Some(node) = current {
            len += 1;
            current = node.next.as_deref();
        }
        len
    }
}

impl Drop for Listeners {
    fn drop(&mut self) {
        // Unlink iteratively so long chains don't recurse.
        let mut next = self.next.take();
        while let Some(mut node) = next {
            next = node.next.take();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn open_all_opens_every_latch() {
        let latches: Vec<_> = (0..4).map(|_| Arc::new(RetryLatch::new())).collect();
        let mut chain = None;
        for latch in &latches {
            chain = Some(Listeners::new(Arc::clone(latch), latch.era(), chain));
        }

        let chain = chain.unwrap();
        assert_eq!(chain.len(), 4);
        assert_eq!(chain.open_all(), 4);
        assert!(latches.iter().all(|latch| latch.is_open()));
    }

    #[test]
    fn prune_drops_dead_registrations() {
        let waiting = Arc::new(RetryLatch::new());
        let opened = Arc::new(RetryLatch::new());
        let moved_on = Arc::new(RetryLatch::new());

        let mut chain = Some(Listeners::new(Arc::clone(&waiting), waiting.era(), None));
        chain = Some(Listeners::new(Arc::clone(&opened), opened.era(), chain));
        chain = Some(Listeners::new(Arc::clone(&moved_on), moved_on.era(), chain));
        chain = Some(Listeners::new(Arc::new(RetryLatch::new()), 0, chain));
        chain = Some(Listeners::new(Arc::clone(&waiting), waiting.era(), chain));
        assert_eq!(chain.as_ref().map_or(0, |chain| chain.len()), 5);

        opened.open(opened.era());
        moved_on.reset();

        let chain = Listeners::prune(chain).unwrap();
        assert_eq!(chain.len(), 2);
        assert_eq!(chain.open_all(), 2);
        assert!(waiting.is_open());
    }
}
