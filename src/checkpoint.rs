use crate::engine::SqlEngine;
use crate::error::SyncError;

/// Maintains the single live savepoint anchored at the last-confirmed
/// state. `rollback` deliberately does not release the savepoint — the
/// anchor must survive so a later replay can roll back to it again.
///
/// Internally tracked as `Option<u64>` rather than the spec's bare
/// `savepointSeq` (0 = none) so a checkpoint legitimately established at
/// seq 0 (an empty room, right after hydration) is distinguishable from
/// no checkpoint having been established at all — both have to report a
/// public `savepoint_seq()` of 0 to match §3's invariant text, but only
/// the former should actually roll back on `rollback()`.
pub struct CheckpointManager {
    savepoint_seq: Option<u64>,
}

impl CheckpointManager {
    /// `savepoint_seq > 0` reconstructs as already-established (used when
    /// restoring a `Reconciler` mid-session); `0` means no live
    /// checkpoint, matching what survives a reload per §4.F.
    pub fn new(savepoint_seq: u64) -> Self {
        Self {
            savepoint_seq: (savepoint_seq > 0).then_some(savepoint_seq),
        }
    }

    pub fn savepoint_seq(&self) -> u64 {
        self.savepoint_seq.unwrap_or(0)
    }

    fn label(seq: u64) -> String {
        format!("cp_{seq}")
    }

    /// Release the previous checkpoint (if any) and establish a new one
    /// at the current engine state, anchored at `seq`.
    pub fn establish_at<E: SqlEngine>(&mut self, engine: &E, seq: u64) -> Result<(), SyncError> {
        if let Some(prev) = self.savepoint_seq {
            if let Err(err) = engine.release_savepoint(&Self::label(prev)) {
                // The named savepoint may not exist after a reload; the
                // new one below replaces it as the live anchor.
                tracing::warn!(seq = prev, error = %err, "checkpoint release failed, continuing");
            }
        }
        engine.savepoint(&Self::label(seq))?;
        self.savepoint_seq = Some(seq);
        Ok(())
    }

    /// Roll the engine back to the current checkpoint. No-op if no
    /// checkpoint has ever been established.
    pub fn rollback<E: SqlEngine>(&self, engine: &E) -> Result<(), SyncError> {
        let Some(seq) = self.savepoint_seq else {
            return Ok(());
        };
        if let Err(err) = engine.rollback_to_savepoint(&Self::label(seq)) {
            tracing::warn!(seq, error = %err, "checkpoint missing on rollback, continuing");
        }
        Ok(())
    }

    /// Drop the live checkpoint entirely (used on shutdown; a fresh one
    /// is established on the next confirmed transition after reload).
    pub fn drop_checkpoint<E: SqlEngine>(&mut self, engine: &E) -> Result<(), SyncError> {
        if let Some(seq) = self.savepoint_seq.take() {
            if let Err(err) = engine.release_savepoint(&Self::label(seq)) {
                tracing::warn!(seq, error = %err, "checkpoint release failed on drop");
            }
        }
        Ok(())
    }
}
