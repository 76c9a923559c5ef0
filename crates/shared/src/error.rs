use thiserror::Error;

/// Failure taxonomy for the reconciliation engine. None of these are ever
/// surfaced to a UI caller; they are logged where they occur and the
/// operation is abandoned for that trigger.
#[derive(Debug, Error)]
pub enum SyncError {
    /// Local storage read/write failed. Non-fatal: the in-memory value
    /// remains authoritative for the session.
    #[error("local persistence failed: {0}")]
    Persistence(#[source] anyhow::Error),

    /// Network error, timeout, or server-side 5xx.
    #[error("remote unavailable: {0}")]
    RemoteUnavailable(String),

    /// The remote authority rejected the bearer token. Handled like
    /// RemoteUnavailable for now; kept as its own variant so a stricter
    /// policy can force session invalidation later.
    #[error("remote rejected credentials")]
    AuthRejected,

    /// A pull response body could not be decoded. Absent fields are not
    /// malformed; only an undecodable shape is.
    #[error("malformed remote payload: {0}")]
    MalformedRemoteData(String),
}

impl SyncError {
    pub fn persistence(err: impl Into<anyhow::Error>) -> Self {
        SyncError::Persistence(err.into())
    }
}
