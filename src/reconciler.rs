use crate::apply::{self, apply_best_effort};
use crate::checkpoint::CheckpointManager;
use crate::engine::SqlEngine;
use crate::error::SyncError;
use crate::oplog::OperationLog;
use crate::op::Operation;

/// What happened to a confirmed operation handed to the reconciler.
/// Surfaced mainly for tests and logging; the engine/oplog/checkpoint
/// side effects have already happened by the time this is returned.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReconcileOutcome {
    /// `op.seq` was already folded into `confirmedSeq`; dropped.
    Duplicate,
    /// A local pending operation was confirmed in order; no replay.
    LocalConfirmed,
    /// A remote operation arrived in order with no pending queue to
    /// reorder around; applied directly.
    RemoteApplied,
    /// A remote operation arrived in order while pending operations
    /// existed; rolled back to the checkpoint, applied the remote op,
    /// then replayed the pending queue on top.
    RemoteReplayed,
    /// `op.seq` was beyond `confirmedSeq + 1`: a gap was detected. The op
    /// was still applied best-effort and `confirmedSeq` jumped ahead; no
    /// new checkpoint was established (anchors are meant to be gap-free).
    GapAdvanced { expected: u64, got: u64 },
}

/// The state machine that reconciles the authority's confirmed order
/// against this client's optimistic pending queue. Owns `confirmedSeq`
/// (via its return to the caller, which is expected to persist it) and
/// the checkpoint anchor.
pub struct Reconciler {
    confirmed_seq: u64,
    checkpoint: CheckpointManager,
}

impl Reconciler {
    pub fn new(confirmed_seq: u64, savepoint_seq: u64) -> Self {
        Self {
            confirmed_seq,
            checkpoint: CheckpointManager::new(savepoint_seq),
        }
    }

    pub fn confirmed_seq(&self) -> u64 {
        self.confirmed_seq
    }

    pub fn savepoint_seq(&self) -> u64 {
        self.checkpoint.savepoint_seq()
    }

    /// Handle one confirmed operation (already carrying an authority
    /// `seq`) arriving from the transport.
    pub fn handle_confirmed<E: SqlEngine>(
        &mut self,
        engine: &E,
        log: &mut OperationLog,
        op: Operation,
    ) -> Result<ReconcileOutcome, SyncError> {
        let expected = self.confirmed_seq + 1;

        // Branch 1: duplicate delivery.
        if op.seq <= self.confirmed_seq {
            return Ok(ReconcileOutcome::Duplicate);
        }

        let is_local = log.find_pending_by_id(&op.id).is_some();

        // Branch 4: gap ahead.
        if op.seq > expected {
            if is_local {
                log.remove_pending_by_id(&op.id);
            } else {
                apply_best_effort(engine, &op);
            }
            let got = op.seq;
            log.append_confirmed(op);
            self.confirmed_seq = got;
            tracing::warn!(expected, got, "gap detected in confirmed sequence");
            return Ok(ReconcileOutcome::GapAdvanced { expected, got });
        }

        // Branch 2: in-order confirmation of a local op. The optimistic
        // state already reflects it, so no SQL apply is needed.
        if is_local {
            log.remove_pending_by_id(&op.id);
            log.append_confirmed(op);
            self.confirmed_seq = expected;
            self.checkpoint.establish_at(engine, self.confirmed_seq)?;
            return Ok(ReconcileOutcome::LocalConfirmed);
        }

        // Branch 3: in-order remote operation.
        log.append_confirmed(op.clone());
        self.confirmed_seq = expected;

        if log.pending_count() == 0 {
            apply_best_effort(engine, &op);
            self.checkpoint.establish_at(engine, self.confirmed_seq)?;
            return Ok(ReconcileOutcome::RemoteApplied);
        }

        // Rollback-replay: the remote op must precede the pending queue
        // in authoritative order, but was applied after it optimistically.
        self.checkpoint.rollback(engine)?;
        apply_best_effort(engine, &op);
        for pending in log.iterate_pending() {
            apply_best_effort(engine, pending);
        }
        self.checkpoint.establish_at(engine, self.confirmed_seq)?;
        Ok(ReconcileOutcome::RemoteReplayed)
    }

    /// Establish the checkpoint at the current `confirmedSeq`. Called
    /// once after join/hydration has processed every historical input.
    pub fn checkpoint_after_hydration<E: SqlEngine>(&mut self, engine: &E) -> Result<(), SyncError> {
        self.checkpoint.establish_at(engine, self.confirmed_seq)
    }
}

/// Re-apply the operation directly (used for a fresh local mutation,
/// which must surface real engine errors to the caller rather than
/// swallow them — see §7 of the design: apply failures for local
/// mutations propagate so the caller learns about malformed SQL).
pub fn apply_local<E: SqlEngine>(engine: &E, op: &Operation) -> Result<(), SyncError> {
    apply::apply(engine, op)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::RusqliteEngine;
    use crate::op::Payload;
    use serde_json::json;
    use std::collections::BTreeMap;

    fn engine_with_table() -> RusqliteEngine {
        let e = RusqliteEngine::open_in_memory().unwrap();
        e.execute_batch("CREATE TABLE t(id TEXT PRIMARY KEY, v INTEGER)")
            .unwrap();
        e
    }

    fn insert(client_id: &str, local_seq: u64, id: &str, v: i64) -> Operation {
        let mut columns = BTreeMap::new();
        columns.insert("id".to_string(), json!(id));
        columns.insert("v".to_string(), json!(v));
        Operation::new_pending(client_id, local_seq, "t", Payload::Insert { columns })
    }

    #[test]
    fn s4_local_op_confirmed_in_order_no_replay() {
        let engine = engine_with_table();
        let mut log = OperationLog::new();
        let mut reconciler = Reconciler::new(0, 0);

        let op = insert("c", 1, "y", 1);
        apply_local(&engine, &op).unwrap();
        log.append_pending(op.clone());

        let mut confirmed = op.clone();
        confirmed.seq = 1;
        let outcome = reconciler
            .handle_confirmed(&engine, &mut log, confirmed)
            .unwrap();

        assert_eq!(outcome, ReconcileOutcome::LocalConfirmed);
        assert_eq!(reconciler.confirmed_seq(), 1);
        assert_eq!(log.pending_count(), 0);
        assert_eq!(reconciler.savepoint_seq(), 1);
    }

    #[test]
    fn s3_remote_precedence_forces_replay() {
        let engine = engine_with_table();
        let mut log = OperationLog::new();
        let mut reconciler = Reconciler::new(0, 0);
        reconciler.checkpoint_after_hydration(&engine).unwrap();

        // A inserts {id:x, v:1} pending, locally.
        let a_op = insert("A", 1, "x", 1);
        apply_local(&engine, &a_op).unwrap();
        log.append_pending(a_op.clone());

        // Authority confirms B's earlier insert of the same id at seq=1.
        let mut b_op = insert("B", 1, "x", 9);
        b_op.seq = 1;
        let outcome = reconciler
            .handle_confirmed(&engine, &mut log, b_op)
            .unwrap();

        assert_eq!(outcome, ReconcileOutcome::RemoteReplayed);
        assert_eq!(reconciler.confirmed_seq(), 1);
        assert_eq!(log.pending_count(), 1);

        let result = engine.query("SELECT v FROM t WHERE id='x'", &[]).unwrap();
        assert_eq!(result.rows[0]["v"], json!(1));
    }

    #[test]
    fn s5_duplicate_delivery_is_a_no_op() {
        let engine = engine_with_table();
        let mut log = OperationLog::new();
        let mut reconciler = Reconciler::new(5, 5);
        reconciler.checkpoint_after_hydration(&engine).unwrap();

        let mut op = insert("c", 1, "z", 1);
        op.seq = 5;
        let outcome = reconciler
            .handle_confirmed(&engine, &mut log, op)
            .unwrap();

        assert_eq!(outcome, ReconcileOutcome::Duplicate);
        assert_eq!(reconciler.confirmed_seq(), 5);
    }

    #[test]
    fn gap_ahead_advances_confirmed_seq_without_new_checkpoint() {
        let engine = engine_with_table();
        let mut log = OperationLog::new();
        let mut reconciler = Reconciler::new(0, 0);
        reconciler.checkpoint_after_hydration(&engine).unwrap();

        let mut op = insert("c", 1, "w", 1);
        op.seq = 5;
        let outcome = reconciler
            .handle_confirmed(&engine, &mut log, op)
            .unwrap();

        assert_eq!(outcome, ReconcileOutcome::GapAdvanced { expected: 1, got: 5 });
        assert_eq!(reconciler.confirmed_seq(), 5);
        // The checkpoint anchor did not move off of the hydration point.
        assert_eq!(reconciler.savepoint_seq(), 0);
    }
}
