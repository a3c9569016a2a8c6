use base64::Engine;
use rusqlite::types::{ToSqlOutput, Value as SqlValue};
use rusqlite::{Connection, DatabaseName, ToSql};
use serde_json::Value as JsonValue;

use crate::error::SyncError;
use crate::op::Row;

/// Stands in for "the embedded SQL engine" of the sync core's scope: the
/// reconciler, checkpoint manager and SQL-apply layer only ever touch the
/// database through this trait. `RusqliteEngine` is the concrete binding
/// used in this crate; a host embedding a different engine only needs to
/// implement this trait to reuse the rest of the crate unchanged.
pub trait SqlEngine {
    fn execute(&self, sql: &str, params: &[&dyn ToSql]) -> Result<usize, SyncError>;
    fn execute_batch(&self, sql: &str) -> Result<(), SyncError>;
    fn query(&self, sql: &str, params: &[&dyn ToSql]) -> Result<QueryResult, SyncError>;

    /// Create a new named savepoint at the current state.
    fn savepoint(&self, label: &str) -> Result<(), SyncError>;
    /// Release a named savepoint without rolling back to it.
    fn release_savepoint(&self, label: &str) -> Result<(), SyncError>;
    /// Roll back to a named savepoint, keeping it open.
    fn rollback_to_savepoint(&self, label: &str) -> Result<(), SyncError>;

    /// Serialize the whole database (including the internal `_ops`/`_meta`
    /// tables) to bytes suitable for handing to a blob store.
    fn serialize(&self) -> Result<Vec<u8>, SyncError>;
}

/// The result of a read-only `query()` call through the public façade.
#[derive(Debug, Clone, Default)]
pub struct QueryResult {
    pub rows: Vec<Row>,
    pub rows_affected: usize,
}

/// Binds the engine to an in-process `rusqlite::Connection`. Mirrors the
/// teacher crate's `SyncEngine`, generalized from an injected
/// `&'c Connection` to an owned one so a `SyncCore` can hold the engine
/// across reloads without an external lifetime.
pub struct RusqliteEngine {
    conn: Connection,
}

impl RusqliteEngine {
    pub fn open_in_memory() -> Result<Self, SyncError> {
        let conn = Connection::open_in_memory()?;
        conn.execute_batch("PRAGMA journal_mode=WAL;")?;
        Ok(Self { conn })
    }

    pub fn open(path: &str) -> Result<Self, SyncError> {
        let conn = Connection::open(path)?;
        conn.execute_batch("PRAGMA journal_mode=WAL;")?;
        Ok(Self { conn })
    }

    /// Rehydrate an engine from a previously-serialized blob (as produced
    /// by `serialize`).
    pub fn from_bytes(bytes: Vec<u8>) -> Result<Self, SyncError> {
        let mut conn = Connection::open_in_memory()?;
        conn.deserialize(DatabaseName::Main, bytes, false)
            .map_err(|(_, e)| SyncError::EngineLoadFailed(e.to_string()))?;
        Ok(Self { conn })
    }

    pub fn conn(&self) -> &Connection {
        &self.conn
    }
}

impl SqlEngine for RusqliteEngine {
    fn execute(&self, sql: &str, params: &[&dyn ToSql]) -> Result<usize, SyncError> {
        Ok(self.conn.execute(sql, params)?)
    }

    fn execute_batch(&self, sql: &str) -> Result<(), SyncError> {
        Ok(self.conn.execute_batch(sql)?)
    }

    fn query(&self, sql: &str, params: &[&dyn ToSql]) -> Result<QueryResult, SyncError> {
        let mut stmt = self.conn.prepare(sql)?;
        let col_names: Vec<String> = stmt.column_names().iter().map(|s| s.to_string()).collect();
        let mut rows_out = Vec::new();
        let mut rows = stmt.query(params)?;
        while let Some(row) = rows.next()? {
            let mut obj = Row::new();
            for (idx, name) in col_names.iter().enumerate() {
                let v: SqlValue = row.get(idx)?;
                obj.insert(name.clone(), sql_value_to_json(v));
            }
            rows_out.push(obj);
        }
        let rows_affected = rows_out.len();
        Ok(QueryResult {
            rows: rows_out,
            rows_affected,
        })
    }

    fn savepoint(&self, label: &str) -> Result<(), SyncError> {
        self.conn.execute_batch(&format!("SAVEPOINT {label}"))?;
        Ok(())
    }

    fn release_savepoint(&self, label: &str) -> Result<(), SyncError> {
        self.conn.execute_batch(&format!("RELEASE {label}"))?;
        Ok(())
    }

    fn rollback_to_savepoint(&self, label: &str) -> Result<(), SyncError> {
        self.conn.execute_batch(&format!("ROLLBACK TO {label}"))?;
        Ok(())
    }

    fn serialize(&self) -> Result<Vec<u8>, SyncError> {
        Ok(self.conn.serialize(DatabaseName::Main)?.to_vec())
    }
}

fn sql_value_to_json(v: SqlValue) -> JsonValue {
    match v {
        SqlValue::Null => JsonValue::Null,
        SqlValue::Integer(i) => JsonValue::from(i),
        SqlValue::Real(f) => serde_json::Number::from_f64(f)
            .map(JsonValue::Number)
            .unwrap_or(JsonValue::Null),
        SqlValue::Text(s) => JsonValue::String(s),
        SqlValue::Blob(b) => JsonValue::String(base64::engine::general_purpose::STANDARD.encode(b)),
    }
}

/// Adapts a `serde_json::Value` for binding as a SQL parameter. Objects
/// and arrays are stored as their JSON text representation.
pub struct JsonParam<'a>(pub &'a JsonValue);

impl ToSql for JsonParam<'_> {
    fn to_sql(&self) -> rusqlite::Result<ToSqlOutput<'_>> {
        let v = match self.0 {
            JsonValue::Null => SqlValue::Null,
            JsonValue::Bool(b) => SqlValue::Integer(*b as i64),
            JsonValue::Number(n) => {
                if let Some(i) = n.as_i64() {
                    SqlValue::Integer(i)
                } else if let Some(f) = n.as_f64() {
                    SqlValue::Real(f)
                } else {
                    SqlValue::Null
                }
            }
            JsonValue::String(s) => SqlValue::Text(s.clone()),
            other => SqlValue::Text(other.to_string()),
        };
        Ok(ToSqlOutput::Owned(v))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn blob_columns_surface_as_base64_text() {
        let engine = RusqliteEngine::open_in_memory().unwrap();
        engine.execute_batch("CREATE TABLE t(b BLOB)").unwrap();
        engine
            .execute("INSERT INTO t(b) VALUES (x'68656c6c6f')", &[])
            .unwrap();
        let result = engine.query("SELECT b FROM t", &[]).unwrap();
        assert_eq!(result.rows[0]["b"], JsonValue::String("aGVsbG8=".to_string()));
    }

    #[test]
    fn serialize_then_from_bytes_preserves_rows() {
        let engine = RusqliteEngine::open_in_memory().unwrap();
        engine.execute_batch("CREATE TABLE t(id TEXT PRIMARY KEY)").unwrap();
        engine.execute("INSERT INTO t(id) VALUES ('a')", &[]).unwrap();

        let bytes = engine.serialize().unwrap();
        let reloaded = RusqliteEngine::from_bytes(bytes).unwrap();
        let result = reloaded.query("SELECT id FROM t", &[]).unwrap();
        assert_eq!(result.rows.len(), 1);
        assert_eq!(result.rows[0]["id"], JsonValue::String("a".to_string()));
    }
}
