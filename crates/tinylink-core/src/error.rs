use thiserror::Error;

/// Result type for repository operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Why a short code could not be decoded.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CodecError {
    #[error("short code is empty")]
    Empty,
    #[error("invalid character {ch:?} at position {position}")]
    InvalidCharacter { ch: char, position: usize },
    #[error("short code '{0}' exceeds the id range")]
    Overflow(String),
}

/// Failures of the medium behind a backend (journal file, connection pool).
#[derive(Debug, Clone, Error)]
pub enum StorageError {
    #[error("storage backend unavailable: {0}")]
    Unavailable(String),
    #[error("storage operation timed out: {0}")]
    Timeout(String),
    #[error("storage query failed: {0}")]
    Query(String),
    #[error("stored data is invalid: {0}")]
    InvalidData(String),
    #[error("storage backend is closed")]
    Closed,
}

/// Outcomes of the repository contract that are not a successful value.
///
/// Adapters match on the variant to pick a response: the first four are
/// caused by the caller, [`Error::Storage`] is a server-side failure.
#[derive(Debug, Clone, Error)]
pub enum Error {
    #[error("invalid short code '{code}': {source}")]
    InvalidCode {
        code: String,
        #[source]
        source: CodecError,
    },
    #[error("short code '{0}' not found")]
    NotFound(String),
    #[error("short code '{0}' was deleted")]
    Deleted(String),
    #[error("user '{0}' has no links")]
    NoLinksForUser(String),
    #[error(transparent)]
    Storage(#[from] StorageError),
}

impl Error {
    /// Returns `true` when the error stems from the request rather than the backend.
    pub fn is_client_error(&self) -> bool {
        !matches!(self, Error::Storage(_))
    }
}
