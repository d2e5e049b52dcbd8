//! Error types for the query engine.

use thiserror::Error;

/// Errors produced by the spatial query engine.
#[derive(Error, Debug)]
pub enum GeoQueryError {
    /// Invalid caller input (bad coordinates, precision out of range, ...).
    #[error("invalid input: {0}")]
    InvalidInput(String),

    /// A cell id that does not parse under the selected grid system.
    #[error("invalid cell id: {0}")]
    InvalidCell(String),

    /// A continuation token that is malformed or was not produced by this engine.
    #[error("invalid continuation token: {0}")]
    InvalidToken(String),

    /// A well-formed continuation token whose parameters do not match the
    /// current call (different region, precision, or grid system).
    #[error("continuation token mismatch: {0}")]
    TokenMismatch(String),

    /// A storage fault that was fatal, or transient and exhausted its retries.
    #[error("storage error: {0}")]
    Storage(String),

    /// The caller's cancellation signal fired before the operation finished.
    ///
    /// Distinct from both success and storage faults: for paginated queries
    /// the previously issued continuation token remains valid for retry.
    #[error("operation cancelled")]
    Cancelled,
}

/// Result type for spatial query operations.
pub type Result<T> = std::result::Result<T, GeoQueryError>;

/// Classification of a single storage-collaborator fault.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StoreErrorKind {
    /// The store shed load; safe to retry after backoff.
    Throttled,
    /// The call timed out; safe to retry after backoff.
    Timeout,
    /// Anything else; not retried.
    Fatal,
}

/// Error returned by [`SpatialStore`](crate::store::SpatialStore) implementations.
#[derive(Error, Debug)]
#[error("{kind:?}: {message}")]
pub struct StoreError {
    pub kind: StoreErrorKind,
    pub message: String,
}

impl StoreError {
    pub fn throttled(message: impl Into<String>) -> Self {
        Self {
            kind: StoreErrorKind::Throttled,
            message: message.into(),
        }
    }

    pub fn timeout(message: impl Into<String>) -> Self {
        Self {
            kind: StoreErrorKind::Timeout,
            message: message.into(),
        }
    }

    pub fn fatal(message: impl Into<String>) -> Self {
        Self {
            kind: StoreErrorKind::Fatal,
            message: message.into(),
        }
    }

    /// Whether the engine should retry this fault with backoff.
    pub fn is_transient(&self) -> bool {
        matches!(self.kind, StoreErrorKind::Throttled | StoreErrorKind::Timeout)
    }
}

/// Result type for storage-collaborator calls.
pub type StoreResult<T> = std::result::Result<T, StoreError>;

impl From<StoreError> for GeoQueryError {
    fn from(err: StoreError) -> Self {
        GeoQueryError::Storage(err.to_string())
    }
}
