use thiserror::Error;

/// Errors surfaced across the sync core.
///
/// Per the error handling design, `ApplyFailed`, `CheckpointMissing` and
/// `TransportLost` are never returned to callers — they are logged via
/// `tracing` and swallowed at the point they occur. `GapDetected` is the
/// one case the reconciler still hands back to its caller, so tests can
/// assert the warning path deterministically (see `reconciler::ReconcileOutcome`).
#[derive(Error, Debug)]
pub enum SyncError {
    #[error("sync core not initialized")]
    NotInitialized,

    #[error("failed to load engine state: {0}")]
    EngineLoadFailed(String),

    #[error("sqlite: {0}")]
    Sqlite(#[from] rusqlite::Error),

    #[error("serde: {0}")]
    Serde(#[from] serde_json::Error),

    #[error("blob store: {0}")]
    BlobStore(String),

    #[error("invalid operation: {0}")]
    InvalidOperation(&'static str),

    #[error("gap detected: expected seq {expected}, got {got}")]
    GapDetected { expected: u64, got: u64 },
}
