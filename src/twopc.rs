use log::{debug, warn};

use crate::errors::Result;
use crate::transaction::Transaction;

/// Trait for a participant in a two-phase commit protocol.
///
/// A [`Transaction`] is a participant: preparing it takes all of its commit locks and
/// validates its reads, so once every participant is prepared, committing them can't fail.
pub trait TwoPhaseCommitParticipant {
    /// Identifies the participant in logs.
    fn participant_id(&self) -> u64;

    /// Phase 1: validates and locks everything needed to commit.
    fn prepare(&mut self) -> Result<()>;

    /// Phase 2: applies the prepared changes.
    fn commit(&mut self) -> Result<()>;

    /// Phase 2: discards the changes and releases everything held.
    fn abort(&mut self) -> Result<()>;
}

impl TwoPhaseCommitParticipant for Transaction {
    fn participant_id(&self) -> u64 {
        self.id()
    }

    fn prepare(&mut self) -> Result<()> {
        Transaction::prepare(self)
    }

    fn commit(&mut self) -> Result<()> {
        Transaction::commit(self)
    }

    fn abort(&mut self) -> Result<()> {
        Transaction::abort(self)
    }
}

/// Commits a group of participants atomically.
///
/// Every participant is prepared first. If one of them fails to prepare, all of them are
/// aborted and the first failure is returned; otherwise all of them are committed.
///
/// # Examples
///
/// ```no_run
/// use thoth::prelude::*;
///
/// let stm = Thoth::new();
/// let cell_a = stm.new_cell(1_u32);
/// let cell_b = stm.new_cell(2_u32);
///
/// let mut first = stm.start_transaction();
/// cell_a.set(&mut first, 10).unwrap();
/// let mut second = stm.start_transaction();
/// cell_b.set(&mut second, 20).unwrap();
///
/// commit_all(&mut [&mut first, &mut second]).unwrap();
/// ```
pub fn commit_all<P>(participants: &mut [&mut P]) -> Result<()>
where
    P: TwoPhaseCommitParticipant + ?Sized,
{
    let mut failure = None;
    for participant in participants.iter_mut() {
        if let Err(err) = participant.prepare() {
            debug!(
                "participant {} failed to prepare: {}",
                participant.participant_id(),
                err
            );
            failure = Some(err);
            break;
        }
    }

    if let Some(err) = failure {
        for participant in participants.iter_mut() {
            if let Err(abort_err) = participant.abort() {
                warn!(
                    "participant {} failed to abort: {}",
                    participant.participant_id(),
                    abort_err
                );
            }
        }
        return Err(err);
    }

    for participant in participants.iter_mut() {
        participant.commit()?;
    }
    Ok(())
}
