//! Error types for the authorization-code client
//!
//! Only configuration problems and local storage failures are errors.
//! Token and data endpoint failures are returned as data (`GrantOutcome`,
//! normalized `{"error": ...}` payloads) and never appear here.

/// Errors from client construction and local storage.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("missing credential: {0} must not be empty")]
    MissingCredential(&'static str),

    #[error("no HTTP transport configured")]
    MissingTransport,

    #[error("session storage selected but no session handle supplied")]
    MissingSession,

    #[error("unsupported storage backend: {0:?} (expected \"session\" or \"flat-file\")")]
    UnsupportedStorage(String),

    #[error("invalid endpoint: {0}")]
    InvalidEndpoint(String),

    #[error("HTTP request failed: {0}")]
    Http(String),

    #[error("I/O error: {0}")]
    Io(String),
}

impl Error {
    /// True for errors that abort client construction.
    pub fn is_configuration(&self) -> bool {
        matches!(
            self,
            Error::MissingCredential(_)
                | Error::MissingTransport
                | Error::MissingSession
                | Error::UnsupportedStorage(_)
                | Error::InvalidEndpoint(_)
        )
    }
}

/// Result alias for client operations.
pub type Result<T> = std::result::Result<T, Error>;
