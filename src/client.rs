use rusqlite::ToSql;
use uuid::Uuid;

use crate::engine::{JsonParam, QueryResult, SqlEngine};
use crate::error::SyncError;
use crate::oplog::{self, OperationLog};
use crate::op::{Operation, Payload, Row};
use crate::persistence::{self, BlobStore};
use crate::reconciler::{self, ReconcileOutcome, Reconciler};
use crate::schema;
use crate::transport::{self, Transport, TransportAdapter, TransportEvent};

/// Configuration for a `SyncCore`. DDL, client-ID *allocation policy*
/// beyond an optional override, and transport/room wiring are out of
/// scope per §1; this struct is just the ambient plumbing that threads
/// them together.
pub struct ClientConfig {
    /// Also the blob store namespace.
    pub db_name: String,
    pub client_id: Option<String>,
}

/// Host-supplied reactions to the four effects enumerated in §6. All
/// methods default to doing nothing, so a host only overrides what it
/// needs.
pub trait SyncCallbacks {
    fn on_room_create(&mut self) {}
    fn on_connect(&mut self, _snapshot: Option<&[u8]>, _operations: &[Operation]) {}
    fn on_input(&mut self, _operation: &Operation) {}
    fn on_disconnect(&mut self) {}
}

/// A `SyncCallbacks` that does nothing; the default for hosts that only
/// care about the public façade's return values.
pub struct NoopCallbacks;
impl SyncCallbacks for NoopCallbacks {}

/// The public façade: `init`, CRUD + `query`, `close`, and the `id` /
/// `isOnline` / `pendingCount` properties from §6. Ties together the
/// operation log (A), SQL apply (B), checkpoint manager (C, via the
/// reconciler), reconciler (D), transport adapter (E) and persistence
/// (F).
pub struct SyncCore<E: SqlEngine, B: BlobStore, T: Transport> {
    engine: E,
    store: B,
    adapter: TransportAdapter<T>,
    oplog: OperationLog,
    reconciler: Reconciler,
    callbacks: Box<dyn SyncCallbacks>,
    local_seq_counter: u64,
    client_id: String,
    db_name: String,
}

impl<E: SqlEngine, B: BlobStore, T: Transport> SyncCore<E, B, T> {
    /// Load or create the engine, the stable client id, and the pending
    /// queue. `engine_loader` receives the previously-persisted blob (if
    /// any) and is responsible for constructing the concrete `E` — the
    /// core stays agnostic to how a given engine type opens itself.
    pub fn init(
        engine_loader: impl FnOnce(Option<Vec<u8>>) -> Result<E, SyncError>,
        mut store: B,
        transport: T,
        config: ClientConfig,
        callbacks: Box<dyn SyncCallbacks>,
    ) -> Result<Self, SyncError> {
        let existing_blob = persistence::load_blob(&config.db_name, &store)?;
        let is_fresh = existing_blob.is_none();

        let engine = engine_loader(existing_blob)
            .map_err(|e| SyncError::EngineLoadFailed(e.to_string()))?;
        if is_fresh {
            schema::init_schema(&engine)?;
        }

        let client_id = match persistence::load_client_id(&config.db_name, &store)? {
            Some(id) => id,
            None => {
                let id = config
                    .client_id
                    .clone()
                    .unwrap_or_else(|| Uuid::new_v4().to_string());
                persistence::persist_client_id(&config.db_name, &id, &mut store)?;
                id
            }
        };

        let local_seq_counter = persistence::load_local_seq_counter(&engine)?;

        let mut oplog = OperationLog::new();
        for op in oplog::load_pending(&engine)? {
            oplog.append_pending(op);
        }

        // confirmedSeq and the checkpoint anchor do not survive a
        // reload (§4.F) — they are rebuilt from zero.
        let reconciler = Reconciler::new(0, 0);

        Ok(Self {
            engine,
            store,
            adapter: TransportAdapter::new(transport),
            oplog,
            reconciler,
            callbacks,
            local_seq_counter,
            client_id,
            db_name: config.db_name,
        })
    }

    /// Join a room. Hydration (the historical prefix plus snapshot) and
    /// room-creation notice arrive later as `TransportEvent`s the host
    /// feeds to `handle_transport_event` — connecting itself is a
    /// suspension point per the concurrency design, not a synchronous
    /// join.
    pub fn connect(&mut self, room_id: &str) -> Result<(), SyncError> {
        self.adapter.connect(room_id)
    }

    /// Feed one transport event through the reconciler/adapter/callbacks.
    pub fn handle_transport_event(&mut self, event: TransportEvent) -> Result<(), SyncError> {
        match event {
            TransportEvent::RoomCreated => {
                self.callbacks.on_room_create();
            }
            TransportEvent::Joined { snapshot, mut inputs } => {
                inputs.sort_by_key(|i| i.seq);
                let mut applied = Vec::with_capacity(inputs.len());
                for input in inputs {
                    if let Some(op) = transport::input_to_operation(input) {
                        self.reconcile(op.clone())?;
                        applied.push(op);
                    }
                }
                self.reconciler.checkpoint_after_hydration(&self.engine)?;
                self.persist()?;
                self.adapter.flush_pending(&self.oplog)?;
                self.callbacks.on_connect(snapshot.as_deref(), &applied);
            }
            TransportEvent::Input(input) => {
                if let Some(op) = transport::input_to_operation(input) {
                    self.reconcile(op.clone())?;
                    self.persist()?;
                    self.callbacks.on_input(&op);
                }
            }
            TransportEvent::Disconnected => {
                self.adapter.set_offline();
                self.callbacks.on_disconnect();
            }
            TransportEvent::Reconnected => {
                self.adapter.set_online();
                self.adapter.flush_pending(&self.oplog)?;
            }
        }
        Ok(())
    }

    fn reconcile(&mut self, op: Operation) -> Result<ReconcileOutcome, SyncError> {
        self.reconciler.handle_confirmed(&self.engine, &mut self.oplog, op)
    }

    /// DDL passthrough. Not logged as an operation — schema is assumed
    /// equal across clients (see the open question in §9).
    pub fn create_table(&mut self, schema_sql: &str) -> Result<(), SyncError> {
        self.engine.execute_batch(schema_sql)
    }

    pub fn insert(&mut self, table: &str, data: Row) -> Result<(), SyncError> {
        self.mutate(table, Payload::Insert { columns: data })
    }

    pub fn update(&mut self, table: &str, data: Row, where_: Row) -> Result<(), SyncError> {
        self.mutate(table, Payload::Update { set: data, where_ })
    }

    pub fn delete(&mut self, table: &str, where_: Row) -> Result<(), SyncError> {
        self.mutate(table, Payload::Delete { where_ })
    }

    fn mutate(&mut self, table: &str, payload: Payload) -> Result<(), SyncError> {
        self.local_seq_counter += 1;
        let op = Operation::new_pending(&self.client_id, self.local_seq_counter, table, payload);

        // Apply errors propagate to the caller here (unlike the
        // reconciler's best-effort apply) so malformed local SQL is
        // reported; the op is logged/broadcast only once apply succeeds.
        reconciler::apply_local(&self.engine, &op)?;

        self.oplog.append_pending(op.clone());
        self.persist()?;
        self.adapter.send_one(&op)?;
        Ok(())
    }

    /// Read-only local query. `rows_affected` is the number of rows
    /// returned, since this path never mutates.
    pub fn query(&self, sql: &str, params: &[serde_json::Value]) -> Result<QueryResult, SyncError> {
        let json_params: Vec<JsonParam> = params.iter().map(JsonParam).collect();
        let refs: Vec<&dyn ToSql> = json_params.iter().map(|p| p as &dyn ToSql).collect();
        self.engine.query(sql, &refs)
    }

    pub fn close(&mut self) -> Result<(), SyncError> {
        self.persist()?;
        self.adapter.disconnect();
        Ok(())
    }

    fn persist(&mut self) -> Result<(), SyncError> {
        persistence::persist(
            &self.db_name,
            &self.engine,
            &self.oplog,
            self.local_seq_counter,
            &mut self.store,
        )
    }

    pub fn id(&self) -> &str {
        &self.client_id
    }

    pub fn is_online(&self) -> bool {
        self.adapter.is_online()
    }

    pub fn pending_count(&self) -> usize {
        self.oplog.pending_count()
    }

    pub fn local_seq_counter(&self) -> u64 {
        self.local_seq_counter
    }

    pub fn confirmed_seq(&self) -> u64 {
        self.reconciler.confirmed_seq()
    }

    pub fn savepoint_seq(&self) -> u64 {
        self.reconciler.savepoint_seq()
    }
}
