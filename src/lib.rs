pub mod apply;
pub mod checkpoint;
pub mod client;
pub mod engine;
pub mod error;
pub mod op;
pub mod oplog;
pub mod persistence;
pub mod reconciler;
pub mod schema;
pub mod transport;

pub use client::{ClientConfig, NoopCallbacks, SyncCallbacks, SyncCore};
pub use engine::{QueryResult, RusqliteEngine, SqlEngine};
pub use error::SyncError;
pub use op::{Envelope, OpType, Operation, Payload, Row};
pub use persistence::{BlobStore, MemoryBlobStore};
pub use reconciler::ReconcileOutcome;
pub use transport::{InboundInput, NullTransport, Transport, TransportConnection, TransportEvent};
