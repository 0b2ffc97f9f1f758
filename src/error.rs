use thiserror::Error;

// ---------------------------------------------------------------------------
// ClientError
// ---------------------------------------------------------------------------

/// Errors surfaced by a [`crate::RemoteClient`] implementation.
///
/// `Cancelled` and `NotAuthenticated` are expected conditions, not failures:
/// the mirror and reconciler encode them in state rather than propagating
/// them to the caller. `Clone`-able so it can live inside mirror snapshots.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ClientError {
    /// The request was superseded or explicitly aborted. Never user-visible.
    #[error("request cancelled")]
    Cancelled,

    /// No valid session exists. Distinguishable so the UI can redirect
    /// instead of showing a generic failure.
    #[error("not authenticated")]
    NotAuthenticated,

    /// Programmer error — collection names must match `[a-z0-9_]+`.
    #[error("invalid collection name: {0:?}")]
    InvalidCollection(String),

    /// Network-level failure (connection refused, timeout from transport).
    #[error("network error: {0}")]
    Network(String),

    /// The server answered with an error status.
    #[error("server error ({status}): {message}")]
    Server { status: u16, message: String },
}

impl ClientError {
    /// True for a superseded/aborted request — discard silently, never
    /// surface as an error state.
    pub fn is_cancelled(&self) -> bool {
        matches!(self, ClientError::Cancelled)
    }

    pub fn is_not_authenticated(&self) -> bool {
        matches!(self, ClientError::NotAuthenticated)
    }
}

// ---------------------------------------------------------------------------
// CommitError
// ---------------------------------------------------------------------------

/// Per-line failures reported from [`crate::QuantityReconciler::commit`].
///
/// Collected in `CommitOutcome.failed` — a failed line never aborts the
/// rest of the batch.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum CommitError {
    /// The requested quantity would drive stock negative. Stock is left
    /// unmodified for this line.
    #[error(
        "insufficient stock for medication {medication_id}: \
         have {available}, requested {requested}"
    )]
    InsufficientStock {
        medication_id: String,
        available: f64,
        requested: f64,
    },

    /// An update or delete referenced a line that was not in the baseline
    /// snapshot (already removed by another editor).
    #[error("disbursement line not found: {line_id}")]
    MissingLine { line_id: String },

    /// A read or write against the remote collection failed.
    #[error(transparent)]
    Client(#[from] ClientError),
}

// ---------------------------------------------------------------------------
// ClinicSyncError — top-level rollup
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Error)]
pub enum ClinicSyncError {
    #[error(transparent)]
    Client(#[from] ClientError),

    #[error(transparent)]
    Commit(#[from] CommitError),

    /// The registry was disposed; no further acquires are accepted.
    #[error("subscription registry is disposed")]
    Disposed,

    #[error("internal error: {0}")]
    Internal(String),
}

/// Convenience alias — the default error type is `ClinicSyncError`.
pub type Result<T, E = ClinicSyncError> = std::result::Result<T, E>;

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
