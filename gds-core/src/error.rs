use std::fmt;
use thiserror::Error;

/// Failure category reported by a Datastore backend
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BackendErrorKind {
    /// Network failure or the service is not reachable
    Unavailable,
    /// Credentials rejected
    Unauthenticated,
    /// Malformed request (bad GQL, unbound parameter, incomplete key)
    InvalidArgument,
    /// Transaction or entity-group constraint violated
    Aborted,
    /// Unknown or already consumed transaction
    NotFound,
    /// Anything else
    Internal,
}

impl BackendErrorKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            BackendErrorKind::Unavailable => "UNAVAILABLE",
            BackendErrorKind::Unauthenticated => "UNAUTHENTICATED",
            BackendErrorKind::InvalidArgument => "INVALID_ARGUMENT",
            BackendErrorKind::Aborted => "ABORTED",
            BackendErrorKind::NotFound => "NOT_FOUND",
            BackendErrorKind::Internal => "INTERNAL",
        }
    }
}

impl fmt::Display for BackendErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Error surfaced by the Datastore backend, message carried verbatim
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("{kind}: {message}")]
pub struct BackendError {
    pub kind: BackendErrorKind,
    pub message: String,
}

impl BackendError {
    pub fn new(kind: BackendErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }

    pub fn invalid_argument(message: impl Into<String>) -> Self {
        Self::new(BackendErrorKind::InvalidArgument, message)
    }

    pub fn aborted(message: impl Into<String>) -> Self {
        Self::new(BackendErrorKind::Aborted, message)
    }

    pub fn not_found(message: impl Into<String>) -> Self {
        Self::new(BackendErrorKind::NotFound, message)
    }
}

#[derive(Error, Debug)]
pub enum Error {
    #[error("Configuration error: {0}")]
    Configuration(String),

    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Schema mismatch: {0}")]
    SchemaMismatch(String),

    #[error("Invalid key: {0}")]
    InvalidKey(String),

    #[error("Invalid query: {0}")]
    InvalidQuery(String),

    #[error("Backend error: {0}")]
    Backend(#[from] BackendError),
}

impl Error {
    /// Returns a stable error code for this error variant.
    pub fn code(&self) -> &'static str {
        match self {
            Error::Configuration(_) => "CONFIGURATION_ERROR",
            Error::Validation(_) => "VALIDATION_ERROR",
            Error::SchemaMismatch(_) => "SCHEMA_MISMATCH",
            Error::InvalidKey(_) => "INVALID_KEY",
            Error::InvalidQuery(_) => "INVALID_QUERY",
            Error::Backend(_) => "BACKEND_ERROR",
        }
    }

    /// Returns true if a caller could reasonably retry the failed call.
    ///
    /// Only transient backend failures qualify. The mapper never retries on
    /// its own; that policy belongs to the backend or the caller.
    pub fn is_retryable(&self) -> bool {
        match self {
            Error::Backend(e) => matches!(
                e.kind,
                BackendErrorKind::Unavailable | BackendErrorKind::Aborted
            ),
            Error::Configuration(_) => false,
            Error::Validation(_) => false,
            Error::SchemaMismatch(_) => false,
            Error::InvalidKey(_) => false,
            Error::InvalidQuery(_) => false,
        }
    }

    /// The backend failure, if this error came from the backend
    pub fn backend_error(&self) -> Option<&BackendError> {
        match self {
            Error::Backend(e) => Some(e),
            _ => None,
        }
    }
}

pub type Result<T> = std::result::Result<T, Error>;
