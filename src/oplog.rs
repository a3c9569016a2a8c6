use std::collections::VecDeque;

use serde_json::json;

use crate::engine::SqlEngine;
use crate::error::SyncError;
use crate::op::{Operation, Payload};

/// In-memory record of every mutation this client knows about: pending
/// (unconfirmed, ordered by `localSeq`) and confirmed (ordered by `seq`).
/// `persist_rows`/`load_pending` mirror this state into the engine's own
/// `_ops` table so it survives a reload.
#[derive(Debug, Default)]
pub struct OperationLog {
    pending: VecDeque<Operation>,
    confirmed: Vec<Operation>,
}

impl OperationLog {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a newly-created local operation. Callers are responsible
    /// for assigning a `localSeq` greater than every previous entry.
    pub fn append_pending(&mut self, op: Operation) {
        debug_assert!(op.is_pending());
        self.pending.push_back(op);
    }

    pub fn find_pending_by_id(&self, id: &str) -> Option<&Operation> {
        self.pending.iter().find(|op| op.id == id)
    }

    /// Remove and return a pending operation by id, if present.
    pub fn remove_pending_by_id(&mut self, id: &str) -> Option<Operation> {
        let idx = self.pending.iter().position(|op| op.id == id)?;
        self.pending.remove(idx)
    }

    pub fn iterate_pending(&self) -> impl Iterator<Item = &Operation> {
        self.pending.iter()
    }

    pub fn pending_count(&self) -> usize {
        self.pending.len()
    }

    pub fn append_confirmed(&mut self, op: Operation) {
        debug_assert!(!op.is_pending());
        self.confirmed.push(op);
    }

    pub fn confirmed(&self) -> &[Operation] {
        &self.confirmed
    }
}

/// Upsert every pending and confirmed operation into the engine's `_ops`
/// table. `INSERT OR REPLACE` keyed on `id` makes repeated confirmation
/// of the same operation idempotent.
pub fn persist_rows<E: SqlEngine>(engine: &E, log: &OperationLog) -> Result<(), SyncError> {
    for op in log.iterate_pending() {
        upsert_row(engine, op, false)?;
    }
    for op in &log.confirmed {
        upsert_row(engine, op, true)?;
    }
    Ok(())
}

fn upsert_row<E: SqlEngine>(engine: &E, op: &Operation, confirmed: bool) -> Result<(), SyncError> {
    let data = json!({ "payload": &op.payload });
    let data_text = serde_json::to_string(&data)?;
    let seq = op.seq as i64;
    let local_seq = op.local_seq as i64;
    let confirmed_flag: i64 = confirmed as i64;
    engine.execute(
        "INSERT OR REPLACE INTO _ops(id, seq, local_seq, table_name, op_type, data, client_id, confirmed) \
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
        &[
            &op.id,
            &seq,
            &local_seq,
            &op.table,
            &op.op_type().as_str(),
            &data_text,
            &op.client_id,
            &confirmed_flag,
        ],
    )?;
    Ok(())
}

/// Rebuild the pending queue from persisted unconfirmed rows on init.
/// Confirmed operations are not reloaded into memory — their effects
/// already live in the deserialized engine state, and `confirmedSeq` /
/// the checkpoint anchor both reset to zero on reload anyway.
pub fn load_pending<E: SqlEngine>(engine: &E) -> Result<VecDeque<Operation>, SyncError> {
    let result = engine.query(
        "SELECT id, local_seq, table_name, op_type, data, client_id \
         FROM _ops WHERE confirmed = 0 ORDER BY local_seq ASC",
        &[],
    )?;

    let mut out = VecDeque::with_capacity(result.rows.len());
    for row in result.rows {
        let id = row["id"].as_str().unwrap_or_default().to_string();
        let local_seq = row["local_seq"].as_u64().unwrap_or(0);
        let table = row["table_name"].as_str().unwrap_or_default().to_string();
        let client_id = row["client_id"].as_str().unwrap_or_default().to_string();
        let data_text = row["data"].as_str().unwrap_or_default();
        let data: serde_json::Value = serde_json::from_str(data_text)?;
        let payload: Payload = serde_json::from_value(data["payload"].clone())?;

        out.push_back(Operation {
            id,
            client_id,
            local_seq,
            seq: 0,
            table,
            payload,
        });
    }
    Ok(out)
}

/// Whether any row exists for `id` at all (pending or confirmed).
/// Exposed for callers that want a persisted-idempotency check without
/// keeping the full confirmed log resident (not used by the reconciler
/// itself, which tracks `confirmedSeq` in memory instead).
pub fn contains_id<E: SqlEngine>(engine: &E, id: &str) -> Result<bool, SyncError> {
    let exists = engine
        .query("SELECT 1 FROM _ops WHERE id = ?1", &[&id])?
        .rows
        .first()
        .is_some();
    Ok(exists)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::RusqliteEngine;
    use serde_json::json;
    use std::collections::BTreeMap;

    fn engine() -> RusqliteEngine {
        let e = RusqliteEngine::open_in_memory().unwrap();
        crate::schema::init_schema(&e).unwrap();
        e
    }

    fn insert_op(client_id: &str, local_seq: u64) -> Operation {
        let mut columns = BTreeMap::new();
        columns.insert("id".to_string(), json!("a"));
        Operation::new_pending(client_id, local_seq, "t", Payload::Insert { columns })
    }

    #[test]
    fn pending_ordered_by_local_seq() {
        let mut log = OperationLog::new();
        log.append_pending(insert_op("c1", 1));
        log.append_pending(insert_op("c1", 2));
        let seqs: Vec<u64> = log.iterate_pending().map(|o| o.local_seq).collect();
        assert_eq!(seqs, vec![1, 2]);
    }

    #[test]
    fn persist_and_reload_roundtrip() {
        let e = engine();
        let mut log = OperationLog::new();
        log.append_pending(insert_op("c1", 1));
        log.append_pending(insert_op("c1", 2));
        persist_rows(&e, &log).unwrap();

        let reloaded = load_pending(&e).unwrap();
        assert_eq!(reloaded.len(), 2);
        assert_eq!(reloaded[0].local_seq, 1);
        assert_eq!(reloaded[1].local_seq, 2);
    }

    #[test]
    fn confirming_removes_row_from_pending_reload() {
        let e = engine();
        let mut log = OperationLog::new();
        let mut op = insert_op("c1", 1);
        log.append_pending(op.clone());
        persist_rows(&e, &log).unwrap();

        op.seq = 1;
        log.remove_pending_by_id(&op.id);
        log.append_confirmed(op);
        persist_rows(&e, &log).unwrap();

        let reloaded = load_pending(&e).unwrap();
        assert!(reloaded.is_empty());
    }
}
