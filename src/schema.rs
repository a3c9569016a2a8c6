use crate::engine::SqlEngine;
use crate::error::SyncError;

/// Create the sync core's own metadata tables. Safe to call multiple
/// times — mirrors the teacher crate's `init_schema` convention of one
/// idempotent `execute_batch` covering every internal table.
pub fn init_schema<E: SqlEngine>(engine: &E) -> Result<(), SyncError> {
    engine.execute_batch(
        r#"
CREATE TABLE IF NOT EXISTS _ops (
    id TEXT PRIMARY KEY,
    seq INTEGER NOT NULL DEFAULT 0,
    local_seq INTEGER NOT NULL,
    table_name TEXT NOT NULL,
    op_type TEXT NOT NULL CHECK(op_type IN ('INSERT','UPDATE','DELETE')),
    data TEXT NOT NULL,
    client_id TEXT NOT NULL,
    confirmed INTEGER NOT NULL DEFAULT 0
);

CREATE INDEX IF NOT EXISTS idx_ops_pending
ON _ops(confirmed, local_seq);

CREATE TABLE IF NOT EXISTS _meta (
    key TEXT PRIMARY KEY,
    value TEXT NOT NULL
);
"#,
    )
}
