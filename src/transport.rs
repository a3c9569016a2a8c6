use crate::error::SyncError;
use crate::op::{Envelope, Operation};
use crate::oplog::OperationLog;

/// One ordered input delivered by the transport: an authority-assigned
/// `seq` plus the raw envelope that was broadcast.
#[derive(Debug, Clone)]
pub struct InboundInput {
    pub seq: u64,
    pub envelope: Envelope,
}

/// Events a transport delivers to the core. Modeled as a plain enum the
/// host drains and feeds in, rather than as registered push callbacks —
/// this keeps the core's execution model the single-threaded, run-to-
/// completion-between-suspension-points shape described in the
/// concurrency design, without requiring an async runtime the teacher
/// crate doesn't depend on.
#[derive(Debug, Clone)]
pub enum TransportEvent {
    RoomCreated,
    Joined {
        snapshot: Option<Vec<u8>>,
        inputs: Vec<InboundInput>,
    },
    Input(InboundInput),
    Disconnected,
    Reconnected,
}

/// The open connection returned by `Transport::connect`.
pub trait TransportConnection {
    fn send(&mut self, envelope: &Envelope) -> Result<(), SyncError>;
    fn close(&mut self) -> Result<(), SyncError>;
}

/// What the sync core requires from an injected transport: join a room
/// and hand back a connection it can send envelopes through. Event
/// delivery (join/input/disconnect/reconnect) happens out of band via
/// `TransportEvent`, which the host polls from the transport and passes
/// to `TransportAdapter::handle_event`.
pub trait Transport {
    type Connection: TransportConnection;
    fn connect(&mut self, room_id: &str) -> Result<Self::Connection, SyncError>;
}

/// A transport that never connects. The default for an offline-only
/// core, and useful in tests that only exercise local mutation/reload.
pub struct NullTransport;

pub struct NullConnection;

impl TransportConnection for NullConnection {
    fn send(&mut self, _envelope: &Envelope) -> Result<(), SyncError> {
        Ok(())
    }
    fn close(&mut self) -> Result<(), SyncError> {
        Ok(())
    }
}

impl Transport for NullTransport {
    type Connection = NullConnection;
    fn connect(&mut self, _room_id: &str) -> Result<Self::Connection, SyncError> {
        Ok(NullConnection)
    }
}

/// Wraps a transport connection and tracks online/offline state. Owns
/// outbound envelope wrapping and reconnect-flush ordering; inbound
/// conversion and reconciliation are driven by the caller (`SyncCore`),
/// which alone has joint access to the engine, oplog and reconciler.
pub struct TransportAdapter<T: Transport> {
    transport: T,
    connection: Option<T::Connection>,
    online: bool,
}

impl<T: Transport> TransportAdapter<T> {
    pub fn new(transport: T) -> Self {
        Self {
            transport,
            connection: None,
            online: false,
        }
    }

    pub fn is_online(&self) -> bool {
        self.online
    }

    pub fn connect(&mut self, room_id: &str) -> Result<(), SyncError> {
        let connection = self.transport.connect(room_id)?;
        self.connection = Some(connection);
        self.online = true;
        Ok(())
    }

    pub fn set_offline(&mut self) {
        self.online = false;
    }

    pub fn set_online(&mut self) {
        self.online = true;
    }

    pub fn disconnect(&mut self) {
        if let Some(conn) = self.connection.as_mut() {
            let _ = conn.close();
        }
        self.connection = None;
        self.online = false;
    }

    pub fn send_one(&mut self, op: &Operation) -> Result<(), SyncError> {
        if !self.online {
            return Ok(());
        }
        if let Some(conn) = self.connection.as_mut() {
            conn.send(&Envelope::Op {
                operation: op.clone(),
            })?;
        }
        Ok(())
    }

    /// Flush every pending operation to the transport in `localSeq`
    /// order. Called after join/hydration and on reconnect (S6).
    pub fn flush_pending(&mut self, log: &OperationLog) -> Result<(), SyncError> {
        if !self.online {
            return Ok(());
        }
        let Some(conn) = self.connection.as_mut() else {
            return Ok(());
        };
        for op in log.iterate_pending() {
            conn.send(&Envelope::Op {
                operation: op.clone(),
            })?;
        }
        Ok(())
    }
}

/// Convert an inbound input into a confirmed `Operation`, stamping the
/// authority-assigned `seq` onto it. Returns `None` for envelopes with
/// an unrecognized `type` (forward-compatibility, per §4.E).
pub fn input_to_operation(input: InboundInput) -> Option<Operation> {
    match input.envelope {
        Envelope::Op { mut operation } => {
            operation.seq = input.seq;
            Some(operation)
        }
        Envelope::Unknown => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::op::Payload;
    use serde_json::json;
    use std::collections::BTreeMap;
    use std::sync::{Arc, Mutex};

    #[derive(Default)]
    struct RecordingConnection {
        sent: Arc<Mutex<Vec<Envelope>>>,
    }

    impl TransportConnection for RecordingConnection {
        fn send(&mut self, envelope: &Envelope) -> Result<(), SyncError> {
            self.sent.lock().unwrap().push(envelope.clone());
            Ok(())
        }
        fn close(&mut self) -> Result<(), SyncError> {
            Ok(())
        }
    }

    struct RecordingTransport {
        sent: Arc<Mutex<Vec<Envelope>>>,
    }

    impl Transport for RecordingTransport {
        type Connection = RecordingConnection;
        fn connect(&mut self, _room_id: &str) -> Result<Self::Connection, SyncError> {
            Ok(RecordingConnection {
                sent: self.sent.clone(),
            })
        }
    }

    fn insert_op(client_id: &str, local_seq: u64) -> Operation {
        let mut columns = BTreeMap::new();
        columns.insert("id".to_string(), json!("a"));
        Operation::new_pending(client_id, local_seq, "t", Payload::Insert { columns })
    }

    #[test]
    fn s6_reconnect_flushes_pending_in_local_seq_order() {
        let sent = Arc::new(Mutex::new(Vec::new()));
        let mut adapter = TransportAdapter::new(RecordingTransport { sent: sent.clone() });
        adapter.connect("room").unwrap();
        adapter.set_offline();

        let mut log = OperationLog::new();
        log.append_pending(insert_op("c", 1));
        log.append_pending(insert_op("c", 2));
        log.append_pending(insert_op("c", 3));

        adapter.set_online();
        adapter.flush_pending(&log).unwrap();

        let sent = sent.lock().unwrap();
        assert_eq!(sent.len(), 3);
        for (i, env) in sent.iter().enumerate() {
            let Envelope::Op { operation } = env else {
                panic!("expected op envelope")
            };
            assert_eq!(operation.local_seq, (i + 1) as u64);
        }
    }

    #[test]
    fn unrecognized_envelope_type_is_ignored() {
        let input = InboundInput {
            seq: 1,
            envelope: Envelope::Unknown,
        };
        assert!(input_to_operation(input).is_none());
    }
}
