//! Error taxonomy for local persistence, remote calls and sync runs.

use thiserror::Error;

type BoxError = Box<dyn std::error::Error + Send + Sync + 'static>;

/// A local persistence failure, tagged with the store operation that failed.
///
/// The underlying engine error is kept as the source so it can still be
/// logged, but callers only ever match on this type.
#[derive(Error, Debug)]
#[error("Storage error in {operation}: {source}")]
pub struct StorageError {
    pub operation: &'static str,
    #[source]
    source: BoxError,
}

impl StorageError {
    pub fn new(operation: &'static str, source: impl Into<BoxError>) -> Self {
        Self {
            operation,
            source: source.into(),
        }
    }
}

/// Failure reported by the remote API client.
#[derive(Error, Debug)]
pub enum RemoteError {
    /// The server could not be reached (refused, timed out, DNS, ...).
    #[error("No connection to the server: {0}")]
    Connectivity(String),

    /// The server answered but rejected the request.
    #[error("Server rejected the request with status {status}: {message}")]
    Rejected { status: u16, message: String },

    /// The server answered with a body we could not decode.
    #[error("Unexpected response from server: {0}")]
    Decode(String),

    /// The HTTP client itself could not be set up.
    #[error("Failed to build HTTP client: {0}")]
    Client(String),
}

impl RemoteError {
    /// True when the request never got an answer and is worth retrying later.
    pub fn is_connectivity(&self) -> bool {
        matches!(self, RemoteError::Connectivity(_))
    }
}

/// Input that cannot be coerced into a consumption record.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ValidationError {
    #[error("Consumption input must be a JSON object, got {0}")]
    NotAnObject(&'static str),
}

/// Errors surfaced by whole sync operations.
#[derive(Error, Debug)]
pub enum SyncError {
    #[error(transparent)]
    Storage(#[from] StorageError),

    #[error("No network connection")]
    Connectivity,

    #[error("A synchronization is already in progress")]
    Conflict,

    #[error(transparent)]
    Remote(#[from] RemoteError),

    #[error(transparent)]
    Validation(#[from] ValidationError),
}
