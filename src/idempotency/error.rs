use thiserror::Error;

/// Failure raised by an idempotency storage backend.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("store unavailable: {0}")]
    Unavailable(String),

    #[error("inconsistent store state: {0}")]
    Inconsistent(String),
}

/// Failure converting a response body to or from its stored text form.
#[derive(Debug, Error)]
pub enum CodecError {
    #[error("failed to encode response body: {0}")]
    Encode(#[source] serde_json::Error),

    #[error("failed to decode stored response body: {0}")]
    Decode(#[source] serde_json::Error),
}

/// Cause of a failure inside the caching layer itself.
#[derive(Debug, Error)]
pub enum CacheFailure {
    #[error(transparent)]
    Codec(#[from] CodecError),

    #[error(transparent)]
    Store(#[from] StoreError),

    #[error("stored status code {0} is not a valid HTTP status")]
    InvalidStatus(i32),
}

/// Error returned by idempotent request processing.
///
/// `E` is the business error type of the wrapped operation. It passes through
/// untouched in [`IdempotencyError::Operation`].
#[derive(Debug, Error)]
pub enum IdempotencyError<E> {
    #[error("idempotency key '{key}' is bound to '{stored_path}', cannot be used for '{requested_path}'")]
    KeyConflict {
        key: String,
        stored_path: String,
        requested_path: String,
    },

    #[error("error processing idempotent request: {0}")]
    CacheOperationFailed(#[source] CacheFailure),

    #[error("{0}")]
    Operation(E),
}

impl<E> From<CacheFailure> for IdempotencyError<E> {
    fn from(failure: CacheFailure) -> Self {
        IdempotencyError::CacheOperationFailed(failure)
    }
}

impl<E> IdempotencyError<E> {
    pub fn is_key_conflict(&self) -> bool {
        matches!(self, IdempotencyError::KeyConflict { .. })
    }

    /// Returns the business error, if this is one.
    pub fn into_operation_error(self) -> Option<E> {
        match self {
            IdempotencyError::Operation(e) => Some(e),
            _ => None,
        }
    }
}
