use rusqlite::ToSql;

use crate::engine::{JsonParam, SqlEngine};
use crate::error::SyncError;
use crate::op::{Operation, Payload};

/// Translate `op` into the SQL mutation for its type and run it against
/// `engine`. INSERT uses `INSERT OR REPLACE` so replaying the same
/// operation twice is a no-op the second time. UPDATE/DELETE build their
/// `WHERE` clause from the `_where` predicate carried by the payload.
///
/// Pure with respect to `op`: never mutates the record, and the same
/// `op` against the same engine state always produces the same SQL.
pub fn apply<E: SqlEngine>(engine: &E, op: &Operation) -> Result<(), SyncError> {
    let (sql, params) = build_sql(op)?;
    let param_refs: Vec<&dyn ToSql> = params.iter().map(|p| p as &dyn ToSql).collect();
    engine.execute(&sql, &param_refs)?;
    Ok(())
}

/// Same as `apply`, but swallows failures after logging them. Used by the
/// reconciler, where a missing table (schema not yet received on this
/// client) must not abort reconciliation — convergence still happens once
/// the schema arrives.
pub fn apply_best_effort<E: SqlEngine>(engine: &E, op: &Operation) {
    if let Err(err) = apply(engine, op) {
        tracing::warn!(
            op_id = %op.id,
            table = %op.table,
            error = %err,
            "failed to apply operation; continuing for convergence"
        );
    }
}

fn build_sql(op: &Operation) -> Result<(String, Vec<JsonParam<'_>>), SyncError> {
    let table = quote_ident(&op.table);
    match &op.payload {
        Payload::Insert { columns } => {
            if columns.is_empty() {
                return Err(SyncError::InvalidOperation("insert with no columns"));
            }
            let cols: Vec<String> = columns.keys().map(|c| quote_ident(c)).collect();
            let placeholders = vec!["?"; cols.len()].join(", ");
            let sql = format!(
                "INSERT OR REPLACE INTO {table} ({}) VALUES ({placeholders})",
                cols.join(", ")
            );
            let params = columns.values().map(JsonParam).collect();
            Ok((sql, params))
        }
        Payload::Update { set, where_ } => {
            if set.is_empty() {
                return Err(SyncError::InvalidOperation("update with an empty set clause"));
            }
            let set_clause = set
                .keys()
                .map(|k| format!("{} = ?", quote_ident(k)))
                .collect::<Vec<_>>()
                .join(", ");
            let mut params: Vec<JsonParam> = set.values().map(JsonParam).collect();
            let sql = if where_.is_empty() {
                format!("UPDATE {table} SET {set_clause}")
            } else {
                let where_clause = where_clause(where_);
                params.extend(where_.values().map(JsonParam));
                format!("UPDATE {table} SET {set_clause} WHERE {where_clause}")
            };
            Ok((sql, params))
        }
        Payload::Delete { where_ } => {
            if where_.is_empty() {
                return Err(SyncError::InvalidOperation("delete without a where clause"));
            }
            let sql = format!("DELETE FROM {table} WHERE {}", where_clause(where_));
            let params = where_.values().map(JsonParam).collect();
            Ok((sql, params))
        }
    }
}

fn where_clause(where_: &crate::op::Row) -> String {
    where_
        .keys()
        .map(|k| format!("{} = ?", quote_ident(k)))
        .collect::<Vec<_>>()
        .join(" AND ")
}

/// Quote a table/column identifier defensively. Column and table names
/// cannot be bound as SQL parameters, so this is the only guard against a
/// stray `"` in a caller-supplied name.
fn quote_ident(name: &str) -> String {
    format!("\"{}\"", name.replace('"', "\"\""))
}
