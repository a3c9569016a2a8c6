use crate::engine::SqlEngine;
use crate::error::SyncError;
use crate::oplog::{self, OperationLog};

/// A key -> bytes store, namespaced by the caller. Stands in for "the
/// persistent blob store" of the sync core's scope (browser IndexedDB,
/// on-disk file, whatever the host provides).
pub trait BlobStore {
    fn get(&self, key: &str) -> Result<Option<Vec<u8>>, SyncError>;
    fn put(&mut self, key: &str, bytes: &[u8]) -> Result<(), SyncError>;
}

/// An in-memory `BlobStore`, deterministic and dependency-free, for tests
/// and for any host that wants to provide its own persistence later.
#[derive(Default)]
pub struct MemoryBlobStore {
    data: std::collections::HashMap<String, Vec<u8>>,
}

impl BlobStore for MemoryBlobStore {
    fn get(&self, key: &str) -> Result<Option<Vec<u8>>, SyncError> {
        Ok(self.data.get(key).cloned())
    }

    fn put(&mut self, key: &str, bytes: &[u8]) -> Result<(), SyncError> {
        self.data.insert(key.to_string(), bytes.to_vec());
        Ok(())
    }
}

fn blob_key(db_name: &str) -> String {
    format!("{db_name}/db_blob")
}

fn client_id_key(db_name: &str) -> String {
    format!("{db_name}/client_id")
}

/// Serialize the engine (including the `_ops`/`_meta` tables it carries)
/// and write it to the blob store under the database's namespace. Also
/// persists the pending/confirmed operation rows and `localSeqCounter`
/// into those internal tables first, so they ride along in the blob.
pub fn persist<E: SqlEngine, B: BlobStore>(
    db_name: &str,
    engine: &E,
    log: &OperationLog,
    local_seq_counter: u64,
    store: &mut B,
) -> Result<(), SyncError> {
    engine.execute(
        "INSERT INTO _meta(key, value) VALUES ('local_seq_counter', ?1) \
         ON CONFLICT(key) DO UPDATE SET value = excluded.value",
        &[&local_seq_counter.to_string()],
    )?;
    oplog::persist_rows(engine, log)?;

    let blob = engine.serialize()?;
    store
        .put(&blob_key(db_name), &blob)
        .map_err(|e| SyncError::BlobStore(e.to_string()))?;
    Ok(())
}

/// Persist just the stable client id, separate from the main blob so it
/// is available before (and independent of) any engine load.
pub fn persist_client_id<B: BlobStore>(
    db_name: &str,
    client_id: &str,
    store: &mut B,
) -> Result<(), SyncError> {
    store
        .put(&client_id_key(db_name), client_id.as_bytes())
        .map_err(|e| SyncError::BlobStore(e.to_string()))
}

pub fn load_client_id<B: BlobStore>(db_name: &str, store: &B) -> Result<Option<String>, SyncError> {
    let Some(bytes) = store.get(&client_id_key(db_name))? else {
        return Ok(None);
    };
    Ok(Some(String::from_utf8_lossy(&bytes).into_owned()))
}

pub fn load_blob<B: BlobStore>(db_name: &str, store: &B) -> Result<Option<Vec<u8>>, SyncError> {
    store.get(&blob_key(db_name))
}

/// Read `localSeqCounter` back out of a freshly-loaded engine's `_meta`
/// table. `confirmedSeq` and the checkpoint anchor are not read back —
/// per §4.F they are reconstructed as zero on every reload.
pub fn load_local_seq_counter<E: SqlEngine>(engine: &E) -> Result<u64, SyncError> {
    let result = engine.query(
        "SELECT value FROM _meta WHERE key = 'local_seq_counter'",
        &[],
    )?;
    let Some(row) = result.rows.first() else {
        return Ok(0);
    };
    Ok(row["value"]
        .as_str()
        .and_then(|s| s.parse::<u64>().ok())
        .unwrap_or(0))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::RusqliteEngine;
    use crate::schema;

    #[test]
    fn persist_then_reload_preserves_local_seq_counter() {
        let mut store = MemoryBlobStore::default();
        let engine = RusqliteEngine::open_in_memory().unwrap();
        schema::init_schema(&engine).unwrap();
        engine
            .execute_batch("CREATE TABLE t(id TEXT PRIMARY KEY, v INTEGER)")
            .unwrap();
        engine
            .execute("INSERT INTO t(id, v) VALUES ('a', 1)", &[])
            .unwrap();

        let log = OperationLog::new();
        persist("app", &engine, &log, 7, &mut store).unwrap();

        let blob = load_blob("app", &store).unwrap().expect("blob present");
        let reloaded = RusqliteEngine::from_bytes(blob).unwrap();

        assert_eq!(load_local_seq_counter(&reloaded).unwrap(), 7);
        let result = reloaded.query("SELECT v FROM t WHERE id='a'", &[]).unwrap();
        assert_eq!(result.rows[0]["v"], serde_json::json!(1));
    }

    #[test]
    fn missing_blob_returns_none() {
        let store = MemoryBlobStore::default();
        assert!(load_blob("app", &store).unwrap().is_none());
        assert!(load_client_id("app", &store).unwrap().is_none());
    }
}
